//! Destructible terrain grid
//!
//! The battlefield is a width x height field of cells generated from
//! 1D coherent noise once per round. Columns are solid Ground up to a
//! sampled height and Empty above it; each player occupies exactly one
//! cell which mirrors their recorded coordinates.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::GameError;

use super::{Slot, Vec2};

/// Column offset from either map edge where tanks spawn
pub const SPAWN_MARGIN: usize = 5;

/// State of a single terrain cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    Empty,
    Ground,
    Occupied(Slot),
}

/// Integer grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPos {
    pub x: usize,
    pub y: usize,
}

impl GridPos {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Seeded 1D value noise over a wrapping lattice. Interpolated lattice
/// values give a smooth rolling profile and stay fully deterministic
/// per seed.
struct ValueNoise {
    lattice: Vec<f32>,
}

const LATTICE_SIZE: usize = 256;
const NOISE_FREQUENCY: f32 = 10.0;

impl ValueNoise {
    fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let lattice = (0..LATTICE_SIZE).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self { lattice }
    }

    fn value_at(&self, i: i64) -> f32 {
        self.lattice[i.rem_euclid(LATTICE_SIZE as i64) as usize]
    }

    /// Sample the noise field at `t`, returning a value in [0, 1]
    fn sample(&self, t: f32) -> f32 {
        let scaled = t * NOISE_FREQUENCY;
        let cell = scaled.floor();
        let frac = scaled - cell;
        // Smoothstep between the bracketing lattice values
        let w = frac * frac * (3.0 - 2.0 * frac);
        let a = self.value_at(cell as i64);
        let b = self.value_at(cell as i64 + 1);
        let raw = a + (b - a) * w;
        (raw + 1.0) / 2.0
    }
}

/// The authoritative height-field for one round
#[derive(Debug, Clone)]
pub struct TerrainGrid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl TerrainGrid {
    /// Generate a fresh battlefield. Every column gets a noise-sampled
    /// terrain height; cells below it become Ground. Tanks spawn in the
    /// first Empty cell scanning bottom-to-top at a fixed column near
    /// each edge. Returns the grid and both spawn positions.
    pub fn generate(width: usize, height: usize, seed: u64) -> (TerrainGrid, [GridPos; 2]) {
        let noise = ValueNoise::new(seed);
        // Offset the sample window per round so reruns with close seeds
        // still land on different stretches of the lattice
        let sample_offset = (seed % 50) as f32;
        let variation = 1.5;

        let mut grid = TerrainGrid {
            width,
            height,
            cells: vec![Cell::Empty; width * height],
        };

        for x in 0..width {
            let x_sample = (x as f32 / width as f32) * variation + sample_offset;
            let column_height = height as f32 * noise.sample(x_sample);
            for y in 0..height {
                if (y as f32) < column_height {
                    let idx = grid.index(x, y);
                    grid.cells[idx] = Cell::Ground;
                }
            }
        }

        let spawns = grid.place_spawns();
        (grid, spawns)
    }

    fn place_spawns(&mut self) -> [GridPos; 2] {
        let columns = [SPAWN_MARGIN, self.width - SPAWN_MARGIN];
        let mut spawns = [GridPos::new(0, 0); 2];

        for (i, &x) in columns.iter().enumerate() {
            let slot = Slot::from_index(i).unwrap_or(Slot::P0);
            let mut placed = false;
            for y in 0..self.height {
                if self.cell(x, y) == Cell::Empty {
                    let idx = self.index(x, y);
                    self.cells[idx] = Cell::Occupied(slot);
                    spawns[i] = GridPos::new(x, y);
                    placed = true;
                    break;
                }
            }
            if !placed {
                // Column is solid to the ceiling; spawn on top of it
                let y = self.height - 1;
                let idx = self.index(x, y);
                self.cells[idx] = Cell::Occupied(slot);
                spawns[i] = GridPos::new(x, y);
            }
        }

        spawns
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Internal accessor; callers must have bounds-checked
    fn cell(&self, x: usize, y: usize) -> Cell {
        self.cells[self.index(x, y)]
    }

    /// Bounds-checked cell read
    pub fn cell_at(&self, x: usize, y: usize) -> Result<Cell, GameError> {
        if !self.in_bounds(x, y) {
            return Err(GameError::internal(format!(
                "grid read out of range: ({}, {}) on {}x{}",
                x, y, self.width, self.height
            )));
        }
        Ok(self.cell(x, y))
    }

    /// Bounds-checked cell write
    pub fn set_cell_at(&mut self, x: usize, y: usize, value: Cell) -> Result<(), GameError> {
        if !self.in_bounds(x, y) {
            return Err(GameError::internal(format!(
                "grid write out of range: ({}, {}) on {}x{}",
                x, y, self.width, self.height
            )));
        }
        let idx = self.index(x, y);
        self.cells[idx] = value;
        Ok(())
    }

    /// Flat snapshot of the grid for the world broadcast
    pub fn snapshot(&self) -> Vec<Cell> {
        self.cells.clone()
    }

    /// Resolve a one-column move attempt. `direction` is -1 or +1.
    ///
    /// Falling is unbounded: a move into an Empty column settles to the
    /// lowest contiguous Empty cell above ground or bedrock. Climbing is
    /// not: a Ground cell can only be mounted if the cell exactly one
    /// row above it is Empty. Any blocked case returns `from` unchanged.
    pub fn available_space(&self, direction: i32, from: GridPos) -> GridPos {
        let new_x = from.x as i64 + direction as i64;
        if new_x < 0 || new_x >= self.width as i64 {
            // No wraparound off the map edges
            return from;
        }
        let new_x = new_x as usize;

        match self.cell(new_x, from.y) {
            Cell::Empty => {
                let new_y = self.find_next_safe_grid_pos(new_x, from.y);
                GridPos::new(new_x, new_y)
            }
            Cell::Ground => {
                let above = from.y + 1;
                if above < self.height && self.cell(new_x, above) == Cell::Empty {
                    GridPos::new(new_x, above)
                } else {
                    from
                }
            }
            // The other tank holds this cell
            Cell::Occupied(_) => from,
        }
    }

    /// Walk downward from `start_y` while the cell below is Empty.
    /// Returns the lowest supported y (bedrock at y=0 stops the fall).
    pub fn find_next_safe_grid_pos(&self, x: usize, start_y: usize) -> usize {
        let mut y = start_y;
        while y > 0 && self.cell(x, y - 1) == Cell::Empty {
            y -= 1;
        }
        y
    }

    /// Map a world position to grid coordinates. The vertical component
    /// is clamped to >= 0 before rounding. Returns None when the rounded
    /// cell is above the grid or outside horizontal bounds (the shot
    /// missed the map, not an error).
    pub fn world_to_grid(&self, pos: Vec2) -> Option<GridPos> {
        let x = pos.x.round();
        let y = pos.y.max(0.0).round();
        if y >= self.height as f32 {
            return None; // shooting over the top
        }
        if x < 0.0 || x >= self.width as f32 {
            return None;
        }
        Some(GridPos::new(x as usize, y as usize))
    }

    /// Relocate a player's occupancy marker, keeping the one-cell-per-
    /// player invariant. `from` is None on initial placement.
    pub fn move_occupant(&mut self, slot: Slot, from: Option<GridPos>, to: GridPos) {
        if let Some(prev) = from {
            if self.in_bounds(prev.x, prev.y) && self.cell(prev.x, prev.y) == Cell::Occupied(slot) {
                let idx = self.index(prev.x, prev.y);
                self.cells[idx] = Cell::Empty;
            }
        }
        if self.in_bounds(to.x, to.y) {
            let idx = self.index(to.x, to.y);
            self.cells[idx] = Cell::Occupied(slot);
        }
    }

    /// Locate a slot's occupancy marker, if present
    pub fn find_occupant(&self, slot: Slot) -> Option<GridPos> {
        for x in 0..self.width {
            for y in 0..self.height {
                if self.cell(x, y) == Cell::Occupied(slot) {
                    return Some(GridPos::new(x, y));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_grid(width: usize, height: usize) -> TerrainGrid {
        TerrainGrid {
            width,
            height,
            cells: vec![Cell::Empty; width * height],
        }
    }

    fn fill_column(grid: &mut TerrainGrid, x: usize, ground_height: usize) {
        for y in 0..ground_height {
            grid.set_cell_at(x, y, Cell::Ground).unwrap();
        }
    }

    #[test]
    fn generated_columns_are_ground_below_empty_above() {
        for seed in [0u64, 7, 42, 1234] {
            let (grid, spawns) = TerrainGrid::generate(50, 10, seed);
            for x in 0..50 {
                let mut seen_empty = false;
                for y in 0..10 {
                    let cell = grid.cell_at(x, y).unwrap();
                    if spawns.iter().any(|s| s.x == x && s.y == y) {
                        assert!(matches!(cell, Cell::Occupied(_)));
                        continue;
                    }
                    match cell {
                        Cell::Ground => {
                            assert!(!seen_empty, "ground above empty in column {} (seed {})", x, seed)
                        }
                        Cell::Empty => seen_empty = true,
                        Cell::Occupied(_) => panic!("stray occupancy marker"),
                    }
                }
            }
        }
    }

    #[test]
    fn spawns_sit_at_fixed_columns() {
        let (grid, spawns) = TerrainGrid::generate(50, 10, 99);
        assert_eq!(spawns[0].x, 5);
        assert_eq!(spawns[1].x, 45);
        assert_eq!(grid.cell_at(5, spawns[0].y).unwrap(), Cell::Occupied(Slot::P0));
        assert_eq!(grid.cell_at(45, spawns[1].y).unwrap(), Cell::Occupied(Slot::P1));
        // Spawn rests on the first empty cell of its column
        if spawns[0].y > 0 {
            assert_eq!(grid.cell_at(5, spawns[0].y - 1).unwrap(), Cell::Ground);
        }
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let (a, _) = TerrainGrid::generate(50, 10, 777);
        let (b, _) = TerrainGrid::generate(50, 10, 777);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn move_into_empty_column_falls_to_support() {
        let mut grid = empty_grid(10, 10);
        fill_column(&mut grid, 3, 5);
        fill_column(&mut grid, 4, 2);
        // Standing on top of column 3, stepping right into open air at y=5
        let result = grid.available_space(1, GridPos::new(3, 5));
        assert_eq!(result, GridPos::new(4, 2));
    }

    #[test]
    fn fall_stops_at_bedrock() {
        let grid = empty_grid(10, 10);
        let result = grid.available_space(1, GridPos::new(4, 8));
        assert_eq!(result, GridPos::new(5, 0));
    }

    #[test]
    fn climb_exactly_one_row() {
        let mut grid = empty_grid(10, 10);
        fill_column(&mut grid, 5, 3); // target column, ground up to y=2
        let result = grid.available_space(1, GridPos::new(4, 2));
        assert_eq!(result, GridPos::new(5, 3));
    }

    #[test]
    fn climb_of_two_rows_is_blocked() {
        let mut grid = empty_grid(10, 10);
        fill_column(&mut grid, 5, 4); // too tall to mount from y=2
        let start = GridPos::new(4, 2);
        assert_eq!(grid.available_space(1, start), start);
    }

    #[test]
    fn blocked_cases_never_change_column() {
        let mut grid = empty_grid(10, 10);

        // Edge of map
        let at_edge = GridPos::new(0, 3);
        assert_eq!(grid.available_space(-1, at_edge).x, at_edge.x);
        let at_right = GridPos::new(9, 3);
        assert_eq!(grid.available_space(1, at_right).x, at_right.x);

        // Other player in the way
        grid.set_cell_at(6, 3, Cell::Occupied(Slot::P1)).unwrap();
        let start = GridPos::new(5, 3);
        assert_eq!(grid.available_space(1, start), start);

        // Ground with no headroom at the top row
        let mut wall = empty_grid(10, 4);
        fill_column(&mut wall, 2, 4);
        let below = GridPos::new(1, 3);
        assert_eq!(wall.available_space(1, below), below);
    }

    #[test]
    fn find_next_safe_pos_respects_ground() {
        let mut grid = empty_grid(10, 10);
        fill_column(&mut grid, 2, 4);
        assert_eq!(grid.find_next_safe_grid_pos(2, 8), 4);
        assert_eq!(grid.find_next_safe_grid_pos(5, 8), 0);
        // Already supported: no movement
        assert_eq!(grid.find_next_safe_grid_pos(2, 4), 4);
    }

    #[test]
    fn world_to_grid_rounds_and_rejects_offmap() {
        let grid = empty_grid(50, 10);
        assert_eq!(grid.world_to_grid(Vec2::new(4.4, 2.6)), Some(GridPos::new(4, 3)));
        // Below the floor clamps up to y=0
        assert_eq!(grid.world_to_grid(Vec2::new(4.0, -3.0)), Some(GridPos::new(4, 0)));
        // Overshoots are a miss, not an error
        assert_eq!(grid.world_to_grid(Vec2::new(4.0, 10.2)), None);
        assert_eq!(grid.world_to_grid(Vec2::new(-1.0, 2.0)), None);
        assert_eq!(grid.world_to_grid(Vec2::new(50.0, 2.0)), None);
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut grid = empty_grid(10, 10);
        assert!(grid.cell_at(10, 0).is_err());
        assert!(grid.cell_at(0, 10).is_err());
        assert!(grid.set_cell_at(10, 0, Cell::Ground).is_err());
    }

    #[test]
    fn move_occupant_keeps_single_marker() {
        let mut grid = empty_grid(10, 10);
        grid.move_occupant(Slot::P0, None, GridPos::new(2, 2));
        grid.move_occupant(Slot::P0, Some(GridPos::new(2, 2)), GridPos::new(3, 1));
        assert_eq!(grid.cell_at(2, 2).unwrap(), Cell::Empty);
        assert_eq!(grid.cell_at(3, 1).unwrap(), Cell::Occupied(Slot::P0));
        assert_eq!(grid.find_occupant(Slot::P0), Some(GridPos::new(3, 1)));
    }
}
