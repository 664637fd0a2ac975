//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::room::MatchPhase;
use crate::game::rules::Weapon;
use crate::game::terrain::{Cell, GridPos};
use crate::game::{Slot, Vec2, Vec3};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Claim a slot in the room. Synthesized by the connection handler
    /// at upgrade time from the connect query, so identity is attached
    /// before any other intent is processed.
    Join {
        name: String,
    },

    /// Move the tank one column left (-1) or right (+1)
    MovePlayer {
        direction: i32,
    },

    /// Fire the active weapon with the given barrel pose and charge
    FireWeapon {
        barrel_forward: Vec3,
        barrel_position: Vec3,
        cannon_power: f32,
    },

    /// Select a weapon from the catalog by index
    ChangeWeapon {
        index: usize,
    },

    /// Adjust the barrel aim angle (relayed to the opponent)
    SetAimAngle {
        angle: f32,
    },

    /// Give up the rest of the current turn
    SkipTurn,

    /// Surrender and leave the match
    QuitGame,

    /// Flag readiness for a rematch after a round ends
    RequestRematch,

    /// Ping for latency measurement
    Ping {
        t: u64,
    },

    /// Connection dropped; synthesized by the handler on disconnect
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        session_id: Uuid,
        server_time: u64,
    },

    /// Full world state, sent to a (re)joining client and broadcast on
    /// every round reset (`your_slot` is None on the broadcast)
    InitialSetup {
        your_slot: Option<Slot>,
        phase: MatchPhase,
        world: WorldSnapshot,
        players: Vec<PlayerInfo>,
        turn_number: u32,
        current_turn: Slot,
        current_weapon: Weapon,
        status_message: String,
    },

    /// A player claimed or reclaimed a slot
    PlayerJoined {
        slot: Slot,
        name: String,
    },

    /// Successful move: new coordinates and the mover's remaining AP
    TankMoved {
        slot: Slot,
        coords: GridPos,
        remaining_ap: u32,
    },

    /// Result of a shot: the clipped trajectory plus damage/settle data
    ReceiveFirePath {
        slot: Slot,
        fire_path: Vec<Vec2>,
        damage_data: DamageData,
        remaining_ap: u32,
    },

    /// A turn finished, by skip or by AP exhaustion
    TurnComplete {
        turn_number: u32,
        current_turn: Slot,
        was_skip: bool,
    },

    /// The active player switched weapons
    SelectedWeaponUpdated {
        slot: Slot,
        weapon: Weapon,
    },

    /// The active player adjusted their aim
    AimAngleUpdated {
        slot: Slot,
        angle: f32,
    },

    /// A round ended because a tank was destroyed
    RoundOver {
        winner: Option<Slot>,
    },

    /// A player surrendered or disconnected for good
    PlayerQuitGame {
        player_name: String,
    },

    /// Room status line changed ("X wants a rematch!", ...)
    StatusMessage {
        message: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        t: u64,
    },
}

/// Flattened terrain grid for world broadcasts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub width: usize,
    pub height: usize,
    /// Row-major cells, `y * width + x`
    pub cells: Vec<Cell>,
}

/// Player state as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub slot: Slot,
    pub name: String,
    pub hp: i32,
    pub coords: GridPos,
    pub current_action_points: u32,
    pub current_movement: u32,
    pub weapon_index: usize,
    pub aim_angle: f32,
    pub connected: bool,
    pub wants_rematch: bool,
}

/// Damage resolution result as broadcast with a fire path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DamageData {
    pub updated_players: Vec<PlayerDamageUpdate>,
}

/// One merged entry per affected player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDamageUpdate {
    pub slot: Slot,
    /// Damage taken by this blast, if any
    pub damage: Option<i32>,
    /// New position after settling, if the player fell
    pub new_position: Option<GridPos>,
    /// Hit points left after the damage was applied
    pub remaining_hp: i32,
}
