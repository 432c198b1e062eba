//! Grid-space primitives shared across the tessera workspace.
//!
//! The map is a block grid streamed in fixed-size chunks. Game space is
//! continuous ([`Point`]), the grid is discrete ([`Coordinate`]), and the two
//! convert through the tile-geometry constants below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of one grid cell in game units.
pub const CELL_EDGE_LEN: f32 = 64.0;

/// Diagonal of one cell's horizontal footprint in game units.
pub const CELL_DIAG_LEN: f32 = CELL_EDGE_LEN * std::f32::consts::SQRT_2;

/// Half cell diagonal, the canonical horizontal unit of the iso projection.
pub const CELL_DIAG_LEN2: f32 = CELL_DIAG_LEN / 2.0;

/// Broad-phase collision radius assigned to every entity at construction.
pub const ENTITY_COLLISION_RADIUS: f32 = CELL_DIAG_LEN2 / 2.0;

/// Errors emitted when validating grid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static dimensions of the chunked map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridConfig {
    /// Cells per chunk along the x axis.
    pub chunk_cells_x: u32,
    /// Cells per chunk along the y axis.
    pub chunk_cells_y: u32,
    /// Vertical extent of the map in cells (z levels).
    pub world_height_cells: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            chunk_cells_x: 10,
            chunk_cells_y: 40,
            world_height_cells: 10,
        }
    }
}

impl GridConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.chunk_cells_x == 0 || self.chunk_cells_y == 0 {
            return Err(GridError::InvalidConfig(
                "chunk dimensions must be non-zero",
            ));
        }
        if self.world_height_cells == 0 {
            return Err(GridError::InvalidConfig(
                "world height must be non-zero",
            ));
        }
        Ok(())
    }

    /// Vertical extent of the map in game units.
    #[must_use]
    pub fn world_height_units(&self) -> f32 {
        self.world_height_cells as f32 * CELL_EDGE_LEN
    }
}

/// Continuous position in game space.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    /// Construct a new point.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The grid cell containing this point.
    #[must_use]
    pub fn to_coord(self) -> Coordinate {
        Coordinate::new(
            (self.x / CELL_EDGE_LEN).floor() as i32,
            (self.y / CELL_EDGE_LEN).floor() as i32,
            (self.z / CELL_EDGE_LEN).floor() as i32,
        )
    }

    /// Squared Euclidean distance to `other`.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Discrete cell address within the map grid.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The coordinate displaced by the given cell offsets.
    #[must_use]
    pub const fn shifted(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The horizontally adjacent cell in the given direction.
    #[must_use]
    pub const fn neighbour(self, dir: Direction) -> Self {
        let (dx, dy) = dir.offset();
        self.shifted(dx, dy, 0)
    }

    /// Center of this cell in game space.
    #[must_use]
    pub fn to_point(self) -> Point {
        Point::new(
            (self.x as f32 + 0.5) * CELL_EDGE_LEN,
            (self.y as f32 + 0.5) * CELL_EDGE_LEN,
            self.z as f32 * CELL_EDGE_LEN,
        )
    }

    /// Index of the chunk owning this cell.
    #[must_use]
    pub fn chunk_index(self, config: &GridConfig) -> ChunkIndex {
        ChunkIndex::new(
            self.x.div_euclid(config.chunk_cells_x as i32),
            self.y.div_euclid(config.chunk_cells_y as i32),
        )
    }
}

/// Horizontal neighbour directions. `Front` is the side facing the camera in
/// the iso projection (positive y).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Back,
    BackRight,
    Right,
    FrontRight,
    Front,
    FrontLeft,
    Left,
    BackLeft,
}

impl Direction {
    /// Cell offset of one step in this direction.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::Back => (0, -1),
            Self::BackRight => (1, -1),
            Self::Right => (1, 0),
            Self::FrontRight => (1, 1),
            Self::Front => (0, 1),
            Self::FrontLeft => (-1, 1),
            Self::Left => (-1, 0),
            Self::BackLeft => (-1, -1),
        }
    }
}

/// Horizontal address of a chunk within the streamed map.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkIndex {
    pub x: i32,
    pub y: i32,
}

impl ChunkIndex {
    /// Construct a new chunk index.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One resident chunk's block storage.
///
/// Blocks are stored as flat ids; id 0 is air, any other id is an obstacle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    index: ChunkIndex,
    cells_x: u32,
    cells_y: u32,
    height: u32,
    blocks: Vec<u8>,
}

impl Chunk {
    /// Construct an all-air chunk at `index` with the configured dimensions.
    #[must_use]
    pub fn new(index: ChunkIndex, config: &GridConfig) -> Self {
        let len =
            config.chunk_cells_x as usize * config.chunk_cells_y as usize
                * config.world_height_cells as usize;
        Self {
            index,
            cells_x: config.chunk_cells_x,
            cells_y: config.chunk_cells_y,
            height: config.world_height_cells,
            blocks: vec![0; len],
        }
    }

    /// Horizontal address of this chunk.
    #[must_use]
    pub const fn index(&self) -> ChunkIndex {
        self.index
    }

    /// Translates a world coordinate into this chunk's local block offset.
    fn offset(&self, coord: Coordinate) -> Option<usize> {
        let local_x = coord.x - self.index.x * self.cells_x as i32;
        let local_y = coord.y - self.index.y * self.cells_y as i32;
        if local_x < 0
            || local_y < 0
            || coord.z < 0
            || local_x >= self.cells_x as i32
            || local_y >= self.cells_y as i32
            || coord.z >= self.height as i32
        {
            return None;
        }
        let per_level = self.cells_x as usize * self.cells_y as usize;
        Some(
            coord.z as usize * per_level
                + local_y as usize * self.cells_x as usize
                + local_x as usize,
        )
    }

    /// Block id at a world coordinate, `None` outside this chunk.
    #[must_use]
    pub fn block(&self, coord: Coordinate) -> Option<u8> {
        self.offset(coord).map(|offset| self.blocks[offset])
    }

    /// Overwrite the block id at a world coordinate. Returns `false` when the
    /// coordinate lies outside this chunk.
    pub fn set_block(&mut self, coord: Coordinate, id: u8) -> bool {
        if let Some(offset) = self.offset(coord) {
            self.blocks[offset] = id;
            true
        } else {
            false
        }
    }

    /// Whether the block at a world coordinate blocks movement. Coordinates
    /// outside this chunk report `false`.
    #[must_use]
    pub fn is_obstacle(&self, coord: Coordinate) -> bool {
        self.block(coord).is_some_and(|id| id != 0)
    }

    /// Fills every block with the provided id.
    pub fn fill(&mut self, id: u8) {
        self.blocks.fill(id);
    }
}

/// Cell lookup surface the render layer exposes over the resident area.
pub trait RenderStorage {
    /// Whether a paintable cell exists at `coord`. `false` means the
    /// coordinate lies outside the loaded area and paint-order computations
    /// must skip it silently.
    fn has_cell(&self, coord: Coordinate) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_converts_to_containing_cell() {
        let point = Point::new(CELL_EDGE_LEN * 1.5, CELL_EDGE_LEN * 2.0, 10.0);
        assert_eq!(point.to_coord(), Coordinate::new(1, 2, 0));
        let negative = Point::new(-1.0, -CELL_EDGE_LEN - 1.0, 0.0);
        assert_eq!(negative.to_coord(), Coordinate::new(-1, -2, 0));
    }

    #[test]
    fn cell_center_round_trips() {
        let coord = Coordinate::new(3, -4, 2);
        assert_eq!(coord.to_point().to_coord(), coord);
    }

    #[test]
    fn distance_squared_matches_euclid() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_squared(b), 25.0);
        assert_eq!(b.distance_squared(a), 25.0);
    }

    #[test]
    fn neighbour_steps_one_cell() {
        let coord = Coordinate::new(0, 0, 5);
        assert_eq!(coord.neighbour(Direction::Front), Coordinate::new(0, 1, 5));
        assert_eq!(coord.neighbour(Direction::Back), Coordinate::new(0, -1, 5));
        assert_eq!(
            coord.neighbour(Direction::BackLeft),
            Coordinate::new(-1, -1, 5)
        );
    }

    #[test]
    fn chunk_index_uses_floored_division() {
        let config = GridConfig::default();
        assert_eq!(
            Coordinate::new(9, 39, 0).chunk_index(&config),
            ChunkIndex::new(0, 0)
        );
        assert_eq!(
            Coordinate::new(10, 40, 0).chunk_index(&config),
            ChunkIndex::new(1, 1)
        );
        assert_eq!(
            Coordinate::new(-1, -41, 0).chunk_index(&config),
            ChunkIndex::new(-1, -2)
        );
    }

    #[test]
    fn config_rejects_zero_dimensions() {
        let config = GridConfig {
            chunk_cells_x: 0,
            ..GridConfig::default()
        };
        assert!(config.validate().is_err());
        let config = GridConfig {
            world_height_cells: 0,
            ..GridConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(GridConfig::default().validate().is_ok());
    }

    #[test]
    fn chunk_blocks_are_world_addressed() {
        let config = GridConfig::default();
        let mut chunk = Chunk::new(ChunkIndex::new(-1, 0), &config);
        let inside = Coordinate::new(-3, 12, 4);
        assert_eq!(chunk.block(inside), Some(0));
        assert!(!chunk.is_obstacle(inside));
        assert!(chunk.set_block(inside, 7));
        assert_eq!(chunk.block(inside), Some(7));
        assert!(chunk.is_obstacle(inside));

        let outside = Coordinate::new(5, 12, 4);
        assert_eq!(chunk.block(outside), None);
        assert!(!chunk.set_block(outside, 1));
        assert!(!chunk.is_obstacle(outside));

        let above = Coordinate::new(-3, 12, config.world_height_cells as i32);
        assert_eq!(chunk.block(above), None);
    }

    #[test]
    fn chunk_fill_overwrites_every_block() {
        let config = GridConfig::default();
        let mut chunk = Chunk::new(ChunkIndex::new(0, 0), &config);
        chunk.fill(2);
        assert!(chunk.is_obstacle(Coordinate::new(0, 0, 0)));
        assert!(chunk.is_obstacle(Coordinate::new(9, 39, 9)));
    }
}
