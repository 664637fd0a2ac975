//! Fixed game rules and the weapon catalog

use serde::{Deserialize, Serialize};

/// Tunable constants of the duel. These are the rules of the game, not
/// deployment configuration, so they live in code rather than env vars.
pub struct GameRules;

impl GameRules {
    /// Action points consumed by one successful move
    pub const MOVEMENT_AP_COST: u32 = 1;
    /// Action points consumed by firing the cannon
    pub const FIRING_AP_COST: u32 = 2;
    /// Action points granted at the start of each turn
    pub const MAX_AP: u32 = 3;
    /// Maximum successful moves per turn
    pub const MAX_MOVEMENT: u32 = 3;
    /// Hit points each tank starts a round with
    pub const MAX_HIT_POINTS: i32 = 3;
    /// Seconds the action latch stays up after a move or shot, giving
    /// clients time to animate before the next intent is accepted
    pub const MOVEMENT_TIME_SECS: f32 = 2.0;
}

/// Immutable weapon catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weapon {
    pub index: usize,
    pub name: String,
    /// Power cap when charging a shot
    pub max_charge: f32,
    /// Seconds to reach full charge
    pub charge_time: f32,
    /// Blast radius in cells (Chebyshev)
    pub radius: u32,
    /// Damage applied to each player caught in the blast
    pub impact_damage: i32,
}

/// The fixed catalog, index-addressable. Radius and damage are uniform
/// in the current balance; the three entries trade range for charge time.
pub fn weapon_catalog() -> Vec<Weapon> {
    vec![
        Weapon {
            index: 0,
            name: "Short Range".to_string(),
            max_charge: 5.0,
            charge_time: 1.0,
            radius: 1,
            impact_damage: 1,
        },
        Weapon {
            index: 1,
            name: "Mid Range".to_string(),
            max_charge: 8.0,
            charge_time: 2.0,
            radius: 1,
            impact_damage: 1,
        },
        Weapon {
            index: 2,
            name: "Long Range".to_string(),
            max_charge: 10.0,
            charge_time: 5.0,
            radius: 1,
            impact_damage: 1,
        },
    ]
}
