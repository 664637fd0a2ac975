//! Room state and the authoritative intent/tick loop
//!
//! One `GameRoom` task owns all mutable state for a match. Player
//! intents arrive over an mpsc channel already attributed to a
//! connection; results go out as broadcast events. The core state
//! methods are synchronous and channel-free so the rules can be tested
//! without any transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::GameError;
use crate::util::time::{tick_delta, unix_millis, TICK_DURATION_MICROS};
use crate::ws::protocol::{
    ClientMsg, DamageData, PlayerDamageUpdate, PlayerInfo, ServerMsg, WorldSnapshot,
};

use super::ballistics;
use super::damage;
use super::rules::{weapon_catalog, GameRules, Weapon};
use super::terrain::{GridPos, TerrainGrid};
use super::turn::{ActionBudget, TurnTracker};
use super::{PlayerIntent, Slot, Vec3};

/// Queue delay above which an intent is logged as stale
const STALE_INTENT_MS: u64 = 1_000;

/// Match phase. `None`, `Waiting` and `BeginRound` are legacy labels
/// kept for wire compatibility; a room only ever moves between
/// `SimulateRound` and `EndRound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    None,
    Waiting,
    BeginRound,
    /// Players act in turns
    SimulateRound,
    /// Waiting for both players to request a rematch
    EndRound,
}

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub slot: Slot,
    pub name: String,
    pub session_id: Option<Uuid>,
    pub hp: i32,
    pub coords: GridPos,
    pub budget: ActionBudget,
    pub weapon_index: usize,
    pub aim_angle: f32,
    pub connected: bool,
    pub wants_rematch: bool,
    pub has_quit: bool,
}

impl Player {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            name: String::new(),
            session_id: None,
            hp: GameRules::MAX_HIT_POINTS,
            coords: GridPos::new(0, 0),
            budget: ActionBudget::default(),
            weapon_index: 0,
            aim_angle: 0.0,
            connected: false,
            wants_rematch: false,
            has_quit: false,
        }
    }

    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            slot: self.slot,
            name: self.name.clone(),
            hp: self.hp,
            coords: self.coords,
            current_action_points: self.budget.current_action_points,
            current_movement: self.budget.current_movement,
            weapon_index: self.weapon_index,
            aim_angle: self.aim_angle,
            connected: self.connected,
            wants_rematch: self.wants_rematch,
        }
    }
}

/// Events produced by state transitions, broadcast by the room task
pub type Events = Vec<ServerMsg>;

/// Room state (owned by the room task)
pub struct RoomState {
    pub id: Uuid,
    pub players: [Player; 2],
    pub terrain: TerrainGrid,
    pub weapons: Vec<Weapon>,
    pub phase: MatchPhase,
    pub previous_phase: MatchPhase,
    pub turns: TurnTracker,
    pub status_message: String,
    grid_width: usize,
    grid_height: usize,
    rng: ChaCha8Rng,
    /// Animation latch: a short window after a move or shot during
    /// which further intents are dropped
    is_player_acting: bool,
    action_wait: f32,
    waiting_for_projectile: bool,
    /// A quit/surrender has started; the next leave also counts as a quit
    quitting: bool,
    /// Whether a second participant ever claimed slot 1
    challenger_joined: bool,
    /// The room should shut down once set
    pub should_disconnect: bool,
}

impl RoomState {
    pub fn new(id: Uuid, creator_name: &str, width: usize, height: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let round_seed = rng.gen();
        let (terrain, spawns) = TerrainGrid::generate(width, height, round_seed);

        let mut players = [Player::new(Slot::P0), Player::new(Slot::P1)];
        players[0].name = creator_name.to_string();
        players[0].coords = spawns[0];
        players[1].coords = spawns[1];

        Self {
            id,
            players,
            terrain,
            weapons: weapon_catalog(),
            phase: MatchPhase::SimulateRound,
            previous_phase: MatchPhase::None,
            turns: TurnTracker::new(),
            status_message: String::new(),
            grid_width: width,
            grid_height: height,
            rng,
            is_player_acting: false,
            action_wait: 0.0,
            waiting_for_projectile: false,
            quitting: false,
            challenger_joined: false,
            should_disconnect: false,
        }
    }

    fn move_to_phase(&mut self, next: MatchPhase) {
        self.previous_phase = self.phase;
        self.phase = next;
    }

    /// Regenerate the battlefield and reset all per-round player state
    pub fn reset_for_new_round(&mut self) {
        let round_seed = self.rng.gen();
        let (terrain, spawns) = TerrainGrid::generate(self.grid_width, self.grid_height, round_seed);
        self.terrain = terrain;

        for player in &mut self.players {
            player.hp = GameRules::MAX_HIT_POINTS;
            player.budget.reset();
            player.weapon_index = 0;
            player.wants_rematch = false;
            player.coords = spawns[player.slot.index()];
        }

        self.turns.reset();
        self.status_message.clear();
        self.is_player_acting = false;
        self.action_wait = 0.0;
        self.waiting_for_projectile = false;
    }

    pub fn slot_for_session(&self, session_id: Uuid) -> Option<Slot> {
        self.players
            .iter()
            .find(|p| p.session_id == Some(session_id))
            .map(|p| p.slot)
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }

    /// Whether an intent from this slot is currently actionable:
    /// right phase, right turn, no action still animating
    fn can_act(&self, slot: Slot) -> bool {
        self.phase == MatchPhase::SimulateRound
            && self.turns.active_slot() == slot
            && !self.is_player_acting
            && !self.waiting_for_projectile
    }

    fn initial_setup(&self, your_slot: Option<Slot>) -> ServerMsg {
        let active = &self.players[self.turns.active_slot().index()];
        ServerMsg::InitialSetup {
            your_slot,
            phase: self.phase,
            world: WorldSnapshot {
                width: self.terrain.width(),
                height: self.terrain.height(),
                cells: self.terrain.snapshot(),
            },
            players: self.players.iter().map(Player::info).collect(),
            turn_number: self.turns.turn_number(),
            current_turn: self.turns.active_slot(),
            current_weapon: self.weapons[active.weapon_index].clone(),
            status_message: self.status_message.clone(),
        }
    }

    /// Claim or reclaim a slot for a connecting session
    pub fn handle_join(&mut self, session_id: Uuid, name: &str) -> Events {
        let slot = if self.players[0].name == name {
            Slot::P0
        } else if self.players[1].name.is_empty() || self.players[1].name == name {
            Slot::P1
        } else {
            debug!(room_id = %self.id, name, "join rejected, room is full");
            return vec![ServerMsg::Error {
                code: "room_full".to_string(),
                message: "Room already has two players".to_string(),
            }];
        };

        let player = &mut self.players[slot.index()];
        if player.name.is_empty() {
            player.name = name.to_string();
        }
        player.session_id = Some(session_id);
        player.connected = true;
        if slot == Slot::P1 {
            self.challenger_joined = true;
        }

        info!(room_id = %self.id, %slot, name, "player joined");

        let mut events = vec![
            ServerMsg::PlayerJoined {
                slot,
                name: self.players[slot.index()].name.clone(),
            },
            self.initial_setup(Some(slot)),
        ];

        // A rejoiner needs to hear about an earlier surrender
        if let Some(quitter) = self.players.iter().find(|p| p.has_quit) {
            events.push(ServerMsg::PlayerQuitGame {
                player_name: quitter.name.clone(),
            });
        }

        events
    }

    /// Attempt a one-column move for the active player
    pub fn handle_move(&mut self, slot: Slot, direction: i32) -> Events {
        if direction != -1 && direction != 1 {
            debug!(room_id = %self.id, %slot, direction, "malformed move direction dropped");
            return Vec::new();
        }
        if !self.can_act(slot) || !self.players[slot.index()].budget.can_move() {
            return Vec::new();
        }

        self.is_player_acting = true;
        self.action_wait = 0.0;

        let from = self.players[slot.index()].coords;
        let next = self.terrain.available_space(direction, from);
        if next.x == from.x {
            // Blocked; the latch still runs so clients can settle
            return Vec::new();
        }

        self.terrain.move_occupant(slot, Some(from), next);
        let player = &mut self.players[slot.index()];
        player.coords = next;
        player.budget.consume_move();
        let remaining_ap = player.budget.current_action_points;

        vec![ServerMsg::TankMoved {
            slot,
            coords: next,
            remaining_ap,
        }]
    }

    /// Fire the active weapon: compute the clipped trajectory, resolve
    /// damage at its terminal point, and report both
    pub fn handle_fire(
        &mut self,
        slot: Slot,
        barrel_forward: Vec3,
        barrel_position: Vec3,
        cannon_power: f32,
    ) -> Result<Events, GameError> {
        if !self.can_act(slot) {
            return Ok(Vec::new());
        }
        if !self.players[slot.index()].budget.can_fire() {
            debug!(room_id = %self.id, %slot, "fire rejected, not enough AP");
            return Ok(Vec::new());
        }
        if !cannon_power.is_finite()
            || !barrel_forward.x.is_finite()
            || !barrel_forward.y.is_finite()
            || !barrel_position.x.is_finite()
            || !barrel_position.y.is_finite()
        {
            debug!(room_id = %self.id, %slot, "malformed fire parameters dropped");
            return Ok(Vec::new());
        }

        self.is_player_acting = true;
        self.action_wait = 0.0;
        self.waiting_for_projectile = true;

        // The reported charge is capped by the weapon catalog; path
        // length grows with the square of power
        let weapon = self.weapons[self.players[slot.index()].weapon_index].clone();
        let power = cannon_power.clamp(0.0, weapon.max_charge);

        let fire_path = ballistics::fire_path(&self.terrain, barrel_forward, barrel_position, power)?;

        let mut damage_data = DamageData::default();

        if let Some(&impact) = fire_path.last() {
            if let Some(report) =
                damage::deal_damage(&mut self.terrain, impact, weapon.radius, weapon.impact_damage)
            {
                for update in &report.updated_players {
                    let player = &mut self.players[update.slot.index()];
                    if let Some(amount) = update.damage {
                        player.hp -= amount;
                    }
                    if let Some(pos) = update.new_position {
                        player.coords = pos;
                    }
                    damage_data.updated_players.push(PlayerDamageUpdate {
                        slot: update.slot,
                        damage: update.damage,
                        new_position: update.new_position,
                        remaining_hp: player.hp,
                    });
                }
            }
        }

        // The path result is delivered synchronously, so the projectile
        // latch drops here; the action latch keeps running
        self.waiting_for_projectile = false;

        let player = &mut self.players[slot.index()];
        player.budget.consume_fire();
        let remaining_ap = player.budget.current_action_points;

        let mut events = vec![ServerMsg::ReceiveFirePath {
            slot,
            fire_path,
            damage_data,
            remaining_ap,
        }];

        // A destroyed tank ends the round on the spot
        if self.players.iter().any(|p| p.hp <= 0) {
            let winner = self
                .players
                .iter()
                .find(|p| p.hp > 0)
                .map(|p| p.slot);
            self.move_to_phase(MatchPhase::EndRound);
            info!(room_id = %self.id, ?winner, "round over");
            events.push(ServerMsg::RoundOver { winner });
        }

        Ok(events)
    }

    /// Switch the active player's weapon; out-of-range indices are a no-op
    pub fn handle_change_weapon(&mut self, slot: Slot, index: usize) -> Events {
        if !self.can_act(slot) {
            return Vec::new();
        }
        if index >= self.weapons.len() {
            warn!(room_id = %self.id, %slot, index, "weapon index out of range");
            return Vec::new();
        }

        self.players[slot.index()].weapon_index = index;
        vec![ServerMsg::SelectedWeaponUpdated {
            slot,
            weapon: self.weapons[index].clone(),
        }]
    }

    /// Store and relay the active player's aim angle
    pub fn handle_set_aim_angle(&mut self, slot: Slot, angle: f32) -> Events {
        if !self.can_act(slot) || !angle.is_finite() {
            return Vec::new();
        }
        self.players[slot.index()].aim_angle = angle;
        vec![ServerMsg::AimAngleUpdated { slot, angle }]
    }

    /// Give up the rest of the turn
    pub fn handle_skip_turn(&mut self, slot: Slot) -> Events {
        if !self.can_act(slot) {
            return Vec::new();
        }
        self.end_current_turn(true)
    }

    /// Flag readiness for a rematch
    pub fn handle_request_rematch(&mut self, slot: Slot) -> Events {
        let player = &mut self.players[slot.index()];
        player.wants_rematch = true;
        self.status_message = format!("{} wants a rematch!", player.name);
        vec![ServerMsg::StatusMessage {
            message: self.status_message.clone(),
        }]
    }

    /// Surrender: annotate the player, notify the opponent, and decide
    /// whether the room should shut down
    pub fn handle_quit(&mut self, slot: Slot) -> Events {
        self.status_message.clear();

        // Creator quit before an opponent ever joined
        if !self.challenger_joined {
            self.should_disconnect = true;
        }
        // Everyone else already quit
        if self.quitting && self.players.iter().any(|p| p.has_quit) {
            self.should_disconnect = true;
        }

        self.quitting = true;
        let player = &mut self.players[slot.index()];
        player.has_quit = true;
        player.connected = false;
        player.session_id = None;
        if !player.name.ends_with(" (Surrendered)") {
            player.name.push_str(" (Surrendered)");
        }
        let player_name = player.name.clone();

        info!(room_id = %self.id, %slot, disconnect = self.should_disconnect, "player quit");

        vec![ServerMsg::PlayerQuitGame { player_name }]
    }

    /// Transport-level disconnect. During a quit sequence a dropped
    /// connection counts as that player quitting too.
    pub fn handle_leave(&mut self, session_id: Uuid) -> Events {
        let Some(slot) = self.slot_for_session(session_id) else {
            error!(room_id = %self.id, %session_id, "leave for unknown session");
            return Vec::new();
        };

        let player = &mut self.players[slot.index()];
        player.connected = false;
        player.session_id = None;

        if self.quitting && !self.players[slot.index()].has_quit {
            return self.handle_quit(slot);
        }
        Vec::new()
    }

    fn end_current_turn(&mut self, was_skip: bool) -> Events {
        self.turns.advance();
        for player in &mut self.players {
            player.budget.reset();
        }

        vec![ServerMsg::TurnComplete {
            turn_number: self.turns.turn_number(),
            current_turn: self.turns.active_slot(),
            was_skip,
        }]
    }

    /// Advance the simulation by one tick
    pub fn tick(&mut self, dt: f32) -> Events {
        match self.phase {
            MatchPhase::SimulateRound => {
                if self.is_player_acting {
                    self.action_wait += dt;
                    if self.action_wait >= GameRules::MOVEMENT_TIME_SECS && !self.waiting_for_projectile {
                        self.is_player_acting = false;
                        self.action_wait = 0.0;

                        // Turn ends once the spent budget stops animating
                        let active = self.turns.active_slot();
                        if self.players[active.index()].budget.exhausted() {
                            return self.end_current_turn(false);
                        }
                    }
                }
                Vec::new()
            }
            MatchPhase::EndRound => {
                if !self.players.iter().all(|p| p.wants_rematch) {
                    return Vec::new();
                }

                self.reset_for_new_round();
                self.move_to_phase(MatchPhase::SimulateRound);
                info!(room_id = %self.id, "rematch accepted, new round");

                vec![
                    ServerMsg::StatusMessage {
                        message: String::new(),
                    },
                    self.initial_setup(None),
                ]
            }
            other => {
                error!(
                    room_id = %self.id,
                    phase = ?other,
                    previous = ?self.previous_phase,
                    "tick in unexpected phase"
                );
                Vec::new()
            }
        }
    }
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub intent_tx: mpsc::Sender<PlayerIntent>,
    pub event_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn insert(&self, handle: RoomHandle) {
        self.rooms.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.remove(id).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative room task
pub struct GameRoom {
    state: RoomState,
    intent_rx: mpsc::Receiver<PlayerIntent>,
    event_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
}

impl GameRoom {
    /// Create a new room and its handle
    pub fn new(
        id: Uuid,
        creator_name: &str,
        width: usize,
        height: usize,
        seed: u64,
    ) -> (Self, RoomHandle) {
        let (intent_tx, intent_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id,
            intent_tx,
            event_tx: event_tx.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            state: RoomState::new(id, creator_name, width, height, seed),
            intent_rx,
            event_tx,
            player_count,
        };

        (room, handle)
    }

    /// Run the room until it disconnects. The tick interval only runs
    /// while someone is connected; with zero players the task parks on
    /// the intent channel and resumes when a participant (re)joins.
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, "room started");

        let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.state.connected_count() == 0 {
                match self.intent_rx.recv().await {
                    Some(intent) => self.dispatch(intent),
                    None => {
                        info!(room_id = %self.state.id, "all handles dropped, closing room");
                        break;
                    }
                }
            } else {
                ticker.tick().await;

                while let Ok(intent) = self.intent_rx.try_recv() {
                    self.dispatch(intent);
                }

                let events = self.state.tick(tick_delta());
                self.broadcast(events);
            }

            if self.state.should_disconnect {
                info!(room_id = %self.state.id, "room disconnecting");
                break;
            }
        }
    }

    /// Route one intent into the state machine
    fn dispatch(&mut self, intent: PlayerIntent) {
        let session_id = intent.session_id;

        // Intents queue while the room is busy; a long wait means the
        // tick loop is falling behind
        let queued_ms = unix_millis().saturating_sub(intent.received_at);
        if queued_ms > STALE_INTENT_MS {
            warn!(room_id = %self.state.id, %session_id, queued_ms, "intent delayed in queue");
        }

        // Join and leave are keyed by session, everything else needs
        // an already-claimed slot
        let events = match intent.msg {
            ClientMsg::Join { name } => self.state.handle_join(session_id, &name),
            ClientMsg::Leave => self.state.handle_leave(session_id),
            ClientMsg::Ping { t } => vec![ServerMsg::Pong { t }],
            other => {
                let Some(slot) = self.state.slot_for_session(session_id) else {
                    error!(room_id = %self.state.id, %session_id, "intent from unknown session");
                    return;
                };
                match other {
                    ClientMsg::MovePlayer { direction } => self.state.handle_move(slot, direction),
                    ClientMsg::FireWeapon {
                        barrel_forward,
                        barrel_position,
                        cannon_power,
                    } => match self.state.handle_fire(slot, barrel_forward, barrel_position, cannon_power) {
                        Ok(events) => events,
                        Err(err) => {
                            // Structural fault: close this room, leave the
                            // rest of the service running
                            error!(room_id = %self.state.id, error = %err, "fatal error in fire resolution");
                            self.state.should_disconnect = true;
                            Vec::new()
                        }
                    },
                    ClientMsg::ChangeWeapon { index } => self.state.handle_change_weapon(slot, index),
                    ClientMsg::SetAimAngle { angle } => self.state.handle_set_aim_angle(slot, angle),
                    ClientMsg::SkipTurn => self.state.handle_skip_turn(slot),
                    ClientMsg::QuitGame => self.state.handle_quit(slot),
                    ClientMsg::RequestRematch => self.state.handle_request_rematch(slot),
                    ClientMsg::Join { .. } | ClientMsg::Leave | ClientMsg::Ping { .. } => Vec::new(),
                }
            }
        };

        self.player_count
            .store(self.state.connected_count(), Ordering::Relaxed);
        self.broadcast(events);
    }

    fn broadcast(&self, events: Events) {
        for event in events {
            // Send fails only with zero subscribers, which is fine
            let _ = self.event_tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::terrain::Cell;

    fn test_room() -> (RoomState, Uuid, Uuid) {
        let creator = Uuid::new_v4();
        let challenger = Uuid::new_v4();
        let mut state = RoomState::new(Uuid::new_v4(), "alice", 50, 10, 42);
        state.handle_join(creator, "alice");
        state.handle_join(challenger, "bob");
        (state, creator, challenger)
    }

    /// Drive ticks until the action latch has expired
    fn run_latch(state: &mut RoomState) -> Events {
        let mut events = Vec::new();
        for _ in 0..50 {
            events.extend(state.tick(0.05));
        }
        events
    }

    /// Put a player on known flat terrain for movement tests
    fn flatten(state: &mut RoomState, ground_height: usize) {
        for x in 0..state.terrain.width() {
            for y in 0..state.terrain.height() {
                let cell = if y < ground_height { Cell::Ground } else { Cell::Empty };
                state.terrain.set_cell_at(x, y, cell).unwrap();
            }
        }
        for slot in [Slot::P0, Slot::P1] {
            let coords = GridPos::new(if slot == Slot::P0 { 5 } else { 45 }, ground_height);
            state.terrain.move_occupant(slot, None, coords);
            state.players[slot.index()].coords = coords;
        }
    }

    #[test]
    fn join_assigns_slots_and_reports_world() {
        let (state, _, _) = test_room();
        assert_eq!(state.players[0].name, "alice");
        assert_eq!(state.players[1].name, "bob");
        assert!(state.players.iter().all(|p| p.connected));
        assert_eq!(state.phase, MatchPhase::SimulateRound);
    }

    #[test]
    fn third_player_is_rejected() {
        let (mut state, _, _) = test_room();
        let events = state.handle_join(Uuid::new_v4(), "carol");
        assert!(matches!(events.as_slice(), [ServerMsg::Error { .. }]));
    }

    #[test]
    fn move_up_one_step_costs_one_ap() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);
        for y in 0..4 {
            state.terrain.set_cell_at(6, y, Cell::Ground).unwrap();
        }
        state.players[0].coords = GridPos::new(5, 3);

        let events = state.handle_move(Slot::P0, 1);
        match events.as_slice() {
            [ServerMsg::TankMoved { slot, coords, remaining_ap }] => {
                assert_eq!(*slot, Slot::P0);
                assert_eq!(*coords, GridPos::new(6, 4));
                assert_eq!(*remaining_ap, 2);
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(state.players[0].coords, GridPos::new(6, 4));
    }

    #[test]
    fn off_turn_intents_are_dropped_silently() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);
        let before = state.players[1].coords;
        assert!(state.handle_move(Slot::P1, 1).is_empty());
        assert_eq!(state.players[1].coords, before);
        assert_eq!(state.players[1].budget.current_action_points, GameRules::MAX_AP);
    }

    #[test]
    fn actions_blocked_while_latch_is_up() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);
        assert!(!state.handle_move(Slot::P0, 1).is_empty());
        // Latch holds until the tick loop clears it
        assert!(state.handle_move(Slot::P0, 1).is_empty());
        run_latch(&mut state);
        assert!(!state.handle_move(Slot::P0, 1).is_empty());
    }

    #[test]
    fn turn_ends_when_ap_runs_out() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);

        for _ in 0..GameRules::MAX_AP {
            assert_eq!(state.turns.active_slot(), Slot::P0);
            state.handle_move(Slot::P0, 1);
            let events = run_latch(&mut state);
            if state.players[0].budget.current_action_points == GameRules::MAX_AP {
                // Turn rolled over
                assert!(events
                    .iter()
                    .any(|e| matches!(e, ServerMsg::TurnComplete { was_skip: false, .. })));
            }
        }

        assert_eq!(state.turns.turn_number(), 1);
        assert_eq!(state.turns.active_slot(), Slot::P1);
        assert_eq!(state.players[1].budget.current_action_points, GameRules::MAX_AP);
    }

    #[test]
    fn skip_advances_turn_and_alternates() {
        let (mut state, _, _) = test_room();
        let mut expected = 0;
        for _ in 0..4 {
            let active = state.turns.active_slot();
            let events = state.handle_skip_turn(active);
            expected += 1;
            match events.as_slice() {
                [ServerMsg::TurnComplete { turn_number, current_turn, was_skip }] => {
                    assert_eq!(*turn_number, expected);
                    assert_eq!(*current_turn, active.opponent());
                    assert!(*was_skip);
                }
                other => panic!("unexpected events: {:?}", other),
            }
        }
    }

    #[test]
    fn direct_hit_drops_hp_and_can_end_round() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);
        state.players[1].hp = 1;

        let target = state.players[1].coords;
        // Drop a shot straight down onto the target column: aiming
        // straight up from the target lands on the supporting ground
        let forward = Vec3 { x: 0.0, y: 1.0, z: 0.0 };
        let origin = Vec3 {
            x: target.x as f32,
            y: target.y as f32 + 0.2,
            z: 0.0,
        };
        let events = state.handle_fire(Slot::P0, forward, origin, 3.0).unwrap();

        let fired = events.iter().find_map(|e| match e {
            ServerMsg::ReceiveFirePath { damage_data, remaining_ap, .. } => {
                Some((damage_data.clone(), *remaining_ap))
            }
            _ => None,
        });
        let (damage_data, remaining_ap) = fired.expect("fire path event");
        assert_eq!(remaining_ap, GameRules::MAX_AP - GameRules::FIRING_AP_COST);

        let hit = damage_data
            .updated_players
            .iter()
            .find(|u| u.slot == Slot::P1)
            .expect("target update");
        assert_eq!(hit.damage, Some(1));
        assert_eq!(hit.remaining_hp, 0);

        assert_eq!(state.phase, MatchPhase::EndRound);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerMsg::RoundOver { winner: Some(Slot::P0) })));
    }

    #[test]
    fn fire_blocked_without_enough_ap() {
        let (mut state, _, _) = test_room();
        flatten(&mut state, 3);
        state.players[0].budget.current_action_points = GameRules::FIRING_AP_COST - 1;
        let events = state
            .handle_fire(Slot::P0, Vec3 { x: 1.0, y: 1.0, z: 0.0 }, Vec3 { x: 5.0, y: 4.0, z: 0.0 }, 5.0)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn rematch_gate_restarts_round_once_both_agree() {
        let (mut state, _, _) = test_room();
        state.move_to_phase(MatchPhase::EndRound);
        state.players[0].hp = 0;
        state.players[0].weapon_index = 2;

        state.handle_request_rematch(Slot::P0);
        assert!(state.tick(0.05).is_empty(), "one flag is not enough");

        state.handle_request_rematch(Slot::P1);
        let events = state.tick(0.05);

        assert_eq!(state.phase, MatchPhase::SimulateRound);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerMsg::InitialSetup { your_slot: None, .. })));
        for player in &state.players {
            assert_eq!(player.hp, GameRules::MAX_HIT_POINTS);
            assert_eq!(player.weapon_index, 0);
            assert_eq!(player.budget.current_action_points, GameRules::MAX_AP);
            assert_eq!(player.budget.current_movement, 0);
            assert!(!player.wants_rematch);
        }
    }

    #[test]
    fn rematch_intent_routes_through_the_room_task() {
        let (mut room, handle) = GameRoom::new(Uuid::new_v4(), "alice", 50, 10, 11);
        let mut event_rx = handle.event_tx.subscribe();

        let creator = Uuid::new_v4();
        let challenger = Uuid::new_v4();
        let intent = |session_id, msg| PlayerIntent {
            session_id,
            msg,
            received_at: unix_millis(),
        };
        room.dispatch(intent(creator, ClientMsg::Join { name: "alice".to_string() }));
        room.dispatch(intent(challenger, ClientMsg::Join { name: "bob".to_string() }));

        room.state.move_to_phase(MatchPhase::EndRound);
        room.dispatch(intent(creator, ClientMsg::RequestRematch));
        room.dispatch(intent(challenger, ClientMsg::RequestRematch));
        assert!(room.state.players.iter().all(|p| p.wants_rematch));

        let events = room.state.tick(0.05);
        assert_eq!(room.state.phase, MatchPhase::SimulateRound);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerMsg::InitialSetup { your_slot: None, .. })));

        // Both rematch requests went out as status updates
        let mut status_updates = 0;
        while let Ok(msg) = event_rx.try_recv() {
            if matches!(msg, ServerMsg::StatusMessage { .. }) {
                status_updates += 1;
            }
        }
        assert_eq!(status_updates, 2);
    }

    #[test]
    fn cannon_power_is_clamped_to_weapon_charge_cap() {
        let forward = Vec3 { x: 1.0, y: 1.0, z: 0.0 };
        let origin = Vec3 { x: 5.0, y: 4.0, z: 0.0 };

        let fired_path = |power: f32| {
            let (mut state, _, _) = test_room();
            flatten(&mut state, 3);
            let events = state.handle_fire(Slot::P0, forward, origin, power).unwrap();
            events
                .into_iter()
                .find_map(|e| match e {
                    ServerMsg::ReceiveFirePath { fire_path, .. } => Some(fire_path),
                    _ => None,
                })
                .expect("fire path event")
        };

        let cap = weapon_catalog()[0].max_charge;
        let at_cap = fired_path(cap);
        let overcharged = fired_path(1000.0);
        assert_eq!(overcharged, at_cap);
    }

    #[test]
    fn round_reset_is_idempotent() {
        let (mut state, _, _) = test_room();
        state.reset_for_new_round();
        state.reset_for_new_round();
        for player in &state.players {
            assert_eq!(player.hp, GameRules::MAX_HIT_POINTS);
            assert_eq!(player.budget.current_action_points, GameRules::MAX_AP);
            assert_eq!(player.budget.current_movement, 0);
            assert_eq!(player.weapon_index, 0);
        }
        // Both occupancy markers match recorded coordinates
        for slot in [Slot::P0, Slot::P1] {
            assert_eq!(
                state.terrain.find_occupant(slot),
                Some(state.players[slot.index()].coords)
            );
        }
    }

    #[test]
    fn weapon_switch_validates_index() {
        let (mut state, _, _) = test_room();
        let events = state.handle_change_weapon(Slot::P0, 1);
        assert!(matches!(
            events.as_slice(),
            [ServerMsg::SelectedWeaponUpdated { slot: Slot::P0, .. }]
        ));
        assert_eq!(state.players[0].weapon_index, 1);

        // Out of range: logged no-op
        assert!(state.handle_change_weapon(Slot::P0, 3).is_empty());
        assert_eq!(state.players[0].weapon_index, 1);
    }

    #[test]
    fn quit_cascade_disconnects_room() {
        let (mut state, _, _) = test_room();
        state.handle_quit(Slot::P0);
        assert!(!state.should_disconnect);
        assert!(state.players[0].name.ends_with(" (Surrendered)"));

        let events = state.handle_quit(Slot::P1);
        assert!(state.should_disconnect);
        assert!(matches!(events.as_slice(), [ServerMsg::PlayerQuitGame { .. }]));
    }

    #[test]
    fn creator_quitting_alone_disconnects_immediately() {
        let session = Uuid::new_v4();
        let mut state = RoomState::new(Uuid::new_v4(), "alice", 50, 10, 7);
        state.handle_join(session, "alice");
        state.handle_quit(Slot::P0);
        assert!(state.should_disconnect);
    }

    #[test]
    fn disconnect_during_quit_counts_as_quit() {
        let (mut state, _, challenger) = test_room();
        state.handle_quit(Slot::P0);
        let events = state.handle_leave(challenger);
        assert!(matches!(events.as_slice(), [ServerMsg::PlayerQuitGame { .. }]));
        assert!(state.should_disconnect);
    }

    #[tokio::test]
    async fn room_task_disconnects_after_quit_cascade() {
        let (room, handle) = GameRoom::new(Uuid::new_v4(), "alice", 50, 10, 3);
        let task = tokio::spawn(room.run());

        let join = |name: &str, session: Uuid| PlayerIntent {
            session_id: session,
            msg: ClientMsg::Join { name: name.to_string() },
            received_at: 0,
        };
        let creator = Uuid::new_v4();
        let challenger = Uuid::new_v4();
        handle.intent_tx.send(join("alice", creator)).await.unwrap();
        handle.intent_tx.send(join("bob", challenger)).await.unwrap();
        handle
            .intent_tx
            .send(PlayerIntent { session_id: creator, msg: ClientMsg::QuitGame, received_at: 0 })
            .await
            .unwrap();
        handle
            .intent_tx
            .send(PlayerIntent { session_id: challenger, msg: ClientMsg::QuitGame, received_at: 0 })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("room should shut down")
            .expect("room task should not panic");
    }
}
