//! Projectile path computation
//!
//! A shot is integrated as a coarse gravity parabola, densified to
//! sub-cell resolution, then clipped against the terrain to find the
//! first obstruction. The whole pipeline is deterministic: identical
//! barrel pose, power, and terrain always yield an identical path.

use crate::error::GameError;

use super::terrain::{Cell, TerrainGrid};
use super::{Vec2, Vec3};

/// Vertical acceleration added to the velocity each integration step
const GRAVITY_PER_STEP: f32 = -0.98;

/// Integration stops once the projectile drops below this height
const FLOOR_Y: f32 = -1.0;

/// Height above a ground cell at which the impact point is reported
const IMPACT_LIFT: f32 = 0.5;

/// Integrate the coarse flight path of a shot. Initial velocity is the
/// barrel direction scaled by the charged power; each step adds gravity
/// to the vertical velocity and advances one velocity-length segment.
pub fn compute_fire_path(barrel_forward: Vec3, barrel_position: Vec3, power: f32) -> Vec<Vec2> {
    let mut velocity = barrel_forward.xy().scale(power);
    let mut position = barrel_position.xy();

    let mut steps = vec![position];
    while position.y > FLOOR_Y {
        velocity.y += GRAVITY_PER_STEP;
        position = position.add(velocity);
        steps.push(position);
    }

    steps
}

/// Insert `floor(distance) * 2` evenly spaced points between each pair
/// of coarse points, producing a path fine enough for cell-by-cell
/// collision testing. Segments shorter than one unit contribute no
/// intermediate points.
pub fn densify(coarse: &[Vec2]) -> Vec<Vec2> {
    let Some(&first) = coarse.first() else {
        return Vec::new();
    };

    let mut fine = vec![first];
    let mut cursor = first;

    for &next in &coarse[1..] {
        let steps = cursor.distance_to(next).floor() as u32 * 2;
        if steps == 0 {
            continue;
        }
        let step = next.sub(cursor).scale(1.0 / steps as f32);
        for _ in 0..steps {
            cursor = cursor.add(step);
            fine.push(cursor);
        }
    }

    fine
}

/// Walk a fine path in order, stopping at the first Ground cell. Points
/// that map off the grid are kept untouched (the shot sails past the
/// map edge). On termination the final element is the impact point,
/// lifted half a cell above the ground cell at the original horizontal
/// coordinate; everything after it is discarded.
pub fn clip_to_terrain(grid: &TerrainGrid, fine: &[Vec2]) -> Result<Vec<Vec2>, GameError> {
    let Some(&first) = fine.first() else {
        return Ok(Vec::new());
    };

    let mut clipped = vec![first];
    for &point in fine {
        match grid.world_to_grid(point) {
            None => {
                // Over the top or past an edge, projectile keeps flying
                clipped.push(point);
            }
            Some(coords) => match grid.cell_at(coords.x, coords.y)? {
                Cell::Ground => {
                    clipped.push(Vec2::new(point.x, coords.y as f32 + IMPACT_LIFT));
                    break;
                }
                Cell::Empty | Cell::Occupied(_) => {
                    clipped.push(point);
                }
            },
        }
    }

    Ok(clipped)
}

/// Full pipeline: integrate, densify, clip
pub fn fire_path(
    grid: &TerrainGrid,
    barrel_forward: Vec3,
    barrel_position: Vec3,
    power: f32,
) -> Result<Vec<Vec2>, GameError> {
    let coarse = compute_fire_path(barrel_forward, barrel_position, power);
    let fine = densify(&coarse);
    clip_to_terrain(grid, &fine)
}
