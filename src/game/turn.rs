//! Turn sequencing and the per-turn action economy

use serde::{Deserialize, Serialize};

use super::rules::GameRules;
use super::Slot;

/// Monotonic turn counter. The active player is derived from parity:
/// slot 0 acts on even turns, slot 1 on odd turns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnTracker {
    turn_number: u32,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn active_slot(&self) -> Slot {
        if self.turn_number % 2 == 0 {
            Slot::P0
        } else {
            Slot::P1
        }
    }

    /// Completes the current turn
    pub fn advance(&mut self) {
        self.turn_number += 1;
    }

    pub fn reset(&mut self) {
        self.turn_number = 0;
    }
}

/// Move and action-point budget for one player's turn. Stored as
/// unsigned counters so the AP floor of zero holds by construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionBudget {
    /// Successful moves taken this turn
    pub current_movement: u32,
    /// Action points remaining this turn
    pub current_action_points: u32,
}

impl Default for ActionBudget {
    fn default() -> Self {
        Self {
            current_movement: 0,
            current_action_points: GameRules::MAX_AP,
        }
    }
}

impl ActionBudget {
    /// Refill at the start of a turn (and at round reset)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A move needs one AP and an unspent move allowance.
    /// Boundary rule: `AP < cost` blocks, `AP >= cost` allows.
    pub fn can_move(&self) -> bool {
        self.current_movement < GameRules::MAX_MOVEMENT
            && self.current_action_points >= GameRules::MOVEMENT_AP_COST
    }

    pub fn can_fire(&self) -> bool {
        self.current_action_points >= GameRules::FIRING_AP_COST
    }

    /// Pay for a successful move
    pub fn consume_move(&mut self) {
        self.current_movement += 1;
        self.current_action_points = self
            .current_action_points
            .saturating_sub(GameRules::MOVEMENT_AP_COST);
    }

    /// Pay for a shot
    pub fn consume_fire(&mut self) {
        self.current_action_points = self
            .current_action_points
            .saturating_sub(GameRules::FIRING_AP_COST);
    }

    /// The turn auto-ends once the budget is spent
    pub fn exhausted(&self) -> bool {
        self.current_action_points == 0
    }
}
