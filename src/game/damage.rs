//! Radius damage resolution and post-impact settling

use tracing::warn;

use super::terrain::{Cell, GridPos, TerrainGrid};
use super::{Slot, Vec2};

/// Per-player outcome of one blast, merged into a single entry per
/// slot: the damage taken (if any) and/or the new position if the
/// player's support was destroyed and they fell.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlayerUpdate {
    pub slot: Slot,
    pub damage: Option<i32>,
    pub new_position: Option<GridPos>,
}

/// Result of resolving one impact
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DamageReport {
    pub updated_players: Vec<PlayerUpdate>,
}

/// All in-bounds cells within Chebyshev distance `radius` of `center`,
/// each exactly once. The blast area is a square, not a disc.
pub fn impacted_cells(grid: &TerrainGrid, center: GridPos, radius: u32) -> Vec<GridPos> {
    let r = radius as i64;
    let mut cells = Vec::new();

    for dx in -r..=r {
        let x = center.x as i64 + dx;
        if x < 0 || x >= grid.width() as i64 {
            continue;
        }
        for dy in -r..=r {
            let y = center.y as i64 + dy;
            if y < 0 || y >= grid.height() as i64 {
                continue;
            }
            cells.push(GridPos::new(x as usize, y as usize));
        }
    }

    cells
}

/// Apply a weapon impact to the terrain and players. Ground cells in
/// the blast square are destroyed and hit players are recorded, then
/// any player left unsupported falls to the next safe position.
/// Terrain destruction and damage bookkeeping happen before settling,
/// so one report captures both in the same blast.
///
/// Returns None if the impact point maps off the grid; no damage is
/// applied in that case.
pub fn deal_damage(
    grid: &mut TerrainGrid,
    impact: Vec2,
    radius: u32,
    damage: i32,
) -> Option<DamageReport> {
    let Some(center) = grid.world_to_grid(impact) else {
        warn!(x = impact.x, y = impact.y, "explosion did not take place within the map");
        return None;
    };

    let mut damaged = [false; 2];
    for pos in impacted_cells(grid, center, radius) {
        // In-bounds by construction
        match grid.cell_at(pos.x, pos.y).ok()? {
            Cell::Ground => {
                grid.set_cell_at(pos.x, pos.y, Cell::Empty).ok()?;
            }
            Cell::Occupied(slot) => {
                damaged[slot.index()] = true;
            }
            Cell::Empty => {}
        }
    }

    let moved = settle_players(grid);

    let mut updated_players = Vec::new();
    for slot in [Slot::P0, Slot::P1] {
        let damage_taken = damaged[slot.index()].then_some(damage);
        let new_position = moved[slot.index()];
        if damage_taken.is_some() || new_position.is_some() {
            updated_players.push(PlayerUpdate {
                slot,
                damage: damage_taken,
                new_position,
            });
        }
    }

    Some(DamageReport { updated_players })
}

/// Re-scan the grid for player markers left floating by terrain
/// destruction and drop each to its next supported position. Returns
/// the new position per slot for any player that moved.
pub fn settle_players(grid: &mut TerrainGrid) -> [Option<GridPos>; 2] {
    let mut moved = [None; 2];

    for x in 0..grid.width() {
        for y in 0..grid.height() {
            let Ok(Cell::Occupied(slot)) = grid.cell_at(x, y) else {
                continue;
            };
            let new_y = grid.find_next_safe_grid_pos(x, y);
            if new_y != y {
                let target = GridPos::new(x, new_y);
                grid.move_occupant(slot, Some(GridPos::new(x, y)), target);
                moved[slot.index()] = Some(target);
            }
        }
    }

    moved
}
