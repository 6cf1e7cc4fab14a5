mod blend;
mod pixel;
mod tile;

pub use blend::{BasicCompositor, BlendMode, Compositor, blend_pixel};
pub use pixel::{
    BIT15, Color, Pixel8, Pixel15, channel8_to_15, channel15_to_8, mul15, pixels15_to_8,
};
pub use tile::{Tile, TransientTile};

pub const TILE_SIZE: u32 = 64;
pub const TILE_LENGTH: usize = (TILE_SIZE * TILE_SIZE) as usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub x: u32,
    pub y: u32,
}

/// Number of tiles along each axis for a canvas of a given pixel size.
///
/// Every layer of a canvas shares the same counts, so tile grids are stored
/// as flat row-major vectors indexed through this type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TileCounts {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TileLayoutError {
    #[error("tile ({x}, {y}) is outside of a {columns}x{rows} grid")]
    PosOutOfBounds { x: u32, y: u32, columns: u32, rows: u32 },
    #[error("tile index {index} is outside of a grid with {total} tiles")]
    IndexOutOfBounds { index: usize, total: usize },
}

impl TileCounts {
    pub fn for_size(width: u32, height: u32) -> Self {
        Self {
            x: width.div_ceil(TILE_SIZE),
            y: height.div_ceil(TILE_SIZE),
        }
    }

    pub const fn total(self) -> usize {
        self.x as usize * self.y as usize
    }

    pub fn tile_index(self, pos: TilePos) -> Result<usize, TileLayoutError> {
        if pos.x >= self.x || pos.y >= self.y {
            Err(TileLayoutError::PosOutOfBounds {
                x: pos.x,
                y: pos.y,
                columns: self.x,
                rows: self.y,
            })
        } else {
            Ok(pos.y as usize * self.x as usize + pos.x as usize)
        }
    }

    pub fn tile_pos(self, index: usize) -> Result<TilePos, TileLayoutError> {
        if index >= self.total() {
            Err(TileLayoutError::IndexOutOfBounds {
                index,
                total: self.total(),
            })
        } else {
            Ok(TilePos {
                x: (index % self.x as usize) as u32,
                y: (index / self.x as usize) as u32,
            })
        }
    }

    pub fn positions(self) -> impl Iterator<Item = TilePos> {
        (0..self.y).flat_map(move |y| (0..self.x).map(move |x| TilePos { x, y }))
    }

    pub fn full_rect(self) -> Option<TileRect> {
        if self.total() == 0 {
            None
        } else {
            Some(TileRect {
                left: 0,
                top: 0,
                right: self.x - 1,
                bottom: self.y - 1,
            })
        }
    }
}

/// Inclusive rectangle of tile positions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl TileRect {
    /// Clamps signed tile bounds to the grid. Returns `None` when nothing of
    /// the requested area lies on the canvas.
    pub fn clamped(left: i64, top: i64, right: i64, bottom: i64, counts: TileCounts) -> Option<Self> {
        if counts.total() == 0 {
            return None;
        }
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(counts.x as i64 - 1);
        let bottom = bottom.min(counts.y as i64 - 1);
        if left > right || top > bottom {
            None
        } else {
            Some(Self {
                left: left as u32,
                top: top as u32,
                right: right as u32,
                bottom: bottom as u32,
            })
        }
    }

    /// Tiles touched by the half-open pixel rectangle `[x0, x1) x [y0, y1)`.
    pub fn covering_pixels(x0: i64, y0: i64, x1: i64, y1: i64, counts: TileCounts) -> Option<Self> {
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let size = TILE_SIZE as i64;
        Self::clamped(
            x0.div_euclid(size),
            y0.div_euclid(size),
            (x1 - 1).div_euclid(size),
            (y1 - 1).div_euclid(size),
            counts,
        )
    }

    pub fn contains(self, pos: TilePos) -> bool {
        pos.x >= self.left && pos.x <= self.right && pos.y >= self.top && pos.y <= self.bottom
    }

    pub fn positions(self) -> impl Iterator<Item = TilePos> {
        (self.top..=self.bottom)
            .flat_map(move |y| (self.left..=self.right).map(move |x| TilePos { x, y }))
    }
}
