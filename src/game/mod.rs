//! Game simulation modules

pub mod ballistics;
pub mod damage;
pub mod room;
pub mod rules;
pub mod terrain;
pub mod turn;

pub use room::{GameRoom, RoomHandle, RoomRegistry};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Player intent received from the transport layer, already attributed
/// to a connection
#[derive(Debug, Clone)]
pub struct PlayerIntent {
    pub session_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// One of the two player slots in a duel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    P0,
    P1,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::P0 => 0,
            Slot::P1 => 1,
        }
    }

    pub fn opponent(self) -> Slot {
        match self {
            Slot::P0 => Slot::P1,
            Slot::P1 => Slot::P0,
        }
    }

    pub fn from_index(index: usize) -> Option<Slot> {
        match index {
            0 => Some(Slot::P0),
            1 => Some(Slot::P1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// 2D position in world units (one cell = one unit)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, factor: f32) -> Vec2 {
        Vec2::new(self.x * factor, self.y * factor)
    }

    pub fn distance_to(self, other: Vec2) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 3D vector as reported by clients for the barrel pose. The duel plays
/// out on the XY plane; z is accepted on the wire and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Vec3 {
    pub fn xy(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}
