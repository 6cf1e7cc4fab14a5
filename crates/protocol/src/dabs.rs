use model::{BlendMode, Color};
use smallvec::SmallVec;

use crate::LayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DabShape {
    #[default]
    Round,
    Square,
}

/// A single brush dab, positioned relative to the previous dab of the same
/// message (or to the message origin for the first one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dab {
    pub dx: i16,
    pub dy: i16,
    pub radius: u16,
    pub opacity: u8,
}

impl Dab {
    /// Pixel area the dab covers: the square around its diameter, at least 1.
    pub fn area(self) -> u64 {
        let diameter = self.radius as u64 * 2;
        (diameter * diameter).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawDabs {
    pub layer_id: LayerId,
    pub x: i32,
    pub y: i32,
    pub color: Color,
    pub blend_mode: BlendMode,
    pub indirect: bool,
    pub shape: DabShape,
    pub dabs: SmallVec<[Dab; 16]>,
}

impl DrawDabs {
    pub fn new(layer_id: LayerId, x: i32, y: i32, color: Color) -> Self {
        Self {
            layer_id,
            x,
            y,
            color,
            blend_mode: BlendMode::Normal,
            indirect: false,
            shape: DabShape::Round,
            dabs: SmallVec::new(),
        }
    }

    pub fn with_dab(mut self, dx: i16, dy: i16, radius: u16, opacity: u8) -> Self {
        self.dabs.push(Dab {
            dx,
            dy,
            radius,
            opacity,
        });
        self
    }

    /// Absolute dab centers in document coordinates. Offsets running past
    /// the coordinate range stick to its edge.
    pub fn positions(&self) -> impl Iterator<Item = (i32, i32, Dab)> + '_ {
        let mut x = self.x;
        let mut y = self.y;
        self.dabs.iter().map(move |dab| {
            x = x.saturating_add(dab.dx as i32);
            y = y.saturating_add(dab.dy as i32);
            (x, y, *dab)
        })
    }

    pub fn last_position(&self) -> (i32, i32) {
        self.positions()
            .last()
            .map(|(x, y, _)| (x, y))
            .unwrap_or((self.x, self.y))
    }

    /// Adds the area of each dab to `total`, giving up once `limit` has been
    /// reached since the caller only cares whether the budget is exceeded.
    pub fn accumulate_area(&self, mut total: u64, limit: u64) -> u64 {
        for dab in &self.dabs {
            if total >= limit {
                break;
            }
            total += dab.area();
        }
        total
    }
}
