use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::blend::{BlendMode, Compositor};
use crate::pixel::{BIT15, Pixel15};
use crate::{TILE_LENGTH, TILE_SIZE};

struct TileData {
    context_id: u32,
    pixels: Box<[Pixel15]>,
}

/// Persisted, immutable tile. Cloning shares the pixel storage; two tiles
/// that are [`Tile::ptr_eq`] are guaranteed to hold identical pixels.
#[derive(Clone)]
pub struct Tile(Arc<TileData>);

/// Exclusively owned tile under construction. Freezing it with
/// [`TransientTile::persist`] is one-way.
#[derive(Clone)]
pub struct TransientTile {
    context_id: u32,
    pixels: Box<[Pixel15]>,
}

impl Tile {
    pub fn new_filled(pixel: Pixel15, context_id: u32) -> Self {
        TransientTile::new_filled(pixel, context_id).persist()
    }

    /// Two-color checkerboard with 32 pixel squares.
    pub fn checker(color1: Pixel15, color2: Pixel15) -> Self {
        let mut tile = TransientTile::new_blank(0);
        let half = TILE_SIZE / 2;
        for (index, pixel) in tile.pixels_mut().iter_mut().enumerate() {
            let x = index as u32 % TILE_SIZE;
            let y = index as u32 / TILE_SIZE;
            *pixel = if (x < half) == (y < half) { color1 } else { color2 };
        }
        tile.persist()
    }

    /// Shared pattern shown in place of censored layer content.
    pub fn censored() -> Self {
        static CENSORED: OnceLock<Tile> = OnceLock::new();
        CENSORED
            .get_or_init(|| {
                let dark = Pixel15 {
                    b: BIT15 / 4,
                    g: BIT15 / 4,
                    r: BIT15 / 4,
                    a: BIT15,
                };
                let light = Pixel15 {
                    b: BIT15 / 2,
                    g: BIT15 / 2,
                    r: BIT15 / 2,
                    a: BIT15,
                };
                let mut tile = TransientTile::new_blank(0);
                for (index, pixel) in tile.pixels_mut().iter_mut().enumerate() {
                    let x = index as u32 % TILE_SIZE;
                    let y = index as u32 / TILE_SIZE;
                    *pixel = if ((x + y) / 8) % 2 == 0 { dark } else { light };
                }
                tile.persist()
            })
            .clone()
    }

    pub fn pixels(&self) -> &[Pixel15] {
        &self.0.pixels
    }

    pub fn context_id(&self) -> u32 {
        self.0.context_id
    }

    pub fn ptr_eq(a: &Tile, b: &Tile) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn opt_ptr_eq(a: Option<&Tile>, b: Option<&Tile>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => Tile::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.pixels().iter().all(|p| p.a == BIT15)
    }

    pub fn is_blank(&self) -> bool {
        self.pixels().iter().all(|p| p.a == 0)
    }

    pub fn to_transient(&self, context_id: u32) -> TransientTile {
        TransientTile {
            context_id,
            pixels: self.0.pixels.clone(),
        }
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("ptr", &Arc::as_ptr(&self.0))
            .field("context_id", &self.0.context_id)
            .finish()
    }
}

impl TransientTile {
    pub fn new_blank(context_id: u32) -> Self {
        Self::new_filled(Pixel15::TRANSPARENT, context_id)
    }

    pub fn new_filled(pixel: Pixel15, context_id: u32) -> Self {
        Self {
            context_id,
            pixels: vec![pixel; TILE_LENGTH].into_boxed_slice(),
        }
    }

    /// Copy of `tile`, or a blank tile if there is none.
    pub fn from_nullable(tile: Option<&Tile>, context_id: u32) -> Self {
        match tile {
            Some(tile) => tile.to_transient(context_id),
            None => Self::new_blank(context_id),
        }
    }

    pub fn pixels(&self) -> &[Pixel15] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Pixel15] {
        &mut self.pixels
    }

    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    pub fn set_context_id(&mut self, context_id: u32) {
        self.context_id = context_id;
    }

    pub fn merge(
        &mut self,
        compositor: &dyn Compositor,
        src: &[Pixel15],
        opacity: u16,
        mode: BlendMode,
    ) {
        compositor.blend(&mut self.pixels, src, opacity, mode);
    }

    /// Blends `color` through `mask` into the `width` x `height` area at
    /// (`left`, `top`). The mask is row-major with `width` entries per row.
    #[allow(clippy::too_many_arguments)]
    pub fn brush_apply(
        &mut self,
        compositor: &dyn Compositor,
        color: Pixel15,
        mode: BlendMode,
        mask: &[u16],
        opacity: u16,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) {
        assert!(left + width <= TILE_SIZE && top + height <= TILE_SIZE);
        assert_eq!(mask.len(), (width * height) as usize);
        for row in 0..height {
            let start = ((top + row) * TILE_SIZE + left) as usize;
            let mask_start = (row * width) as usize;
            compositor.blend_mask(
                &mut self.pixels[start..start + width as usize],
                color,
                &mask[mask_start..mask_start + width as usize],
                opacity,
                mode,
            );
        }
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| p.a == 0)
    }

    pub fn persist(self) -> Tile {
        Tile(Arc::new(TileData {
            context_id: self.context_id,
            pixels: self.pixels,
        }))
    }
}

impl fmt::Debug for TransientTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientTile")
            .field("context_id", &self.context_id)
            .finish_non_exhaustive()
    }
}
