use serde::{Deserialize, Serialize};

use crate::pixel::{BIT15, Pixel15, mul15};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Behind,
    Erase,
    Multiply,
    Screen,
    Add,
    Recolor,
    Replace,
}

impl BlendMode {
    /// Whether compositing with this mode can make the destination more
    /// transparent than it was.
    pub const fn can_decrease_opacity(self) -> bool {
        matches!(self, BlendMode::Erase | BlendMode::Replace)
    }

    pub const fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Behind => "behind",
            BlendMode::Erase => "erase",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Add => "add",
            BlendMode::Recolor => "recolor",
            BlendMode::Replace => "replace",
        }
    }
}

#[inline]
fn inv(a: u16) -> u32 {
    (BIT15 - a.min(BIT15)) as u32
}

#[inline]
fn clamp15(v: u32) -> u16 {
    v.min(BIT15 as u32) as u16
}

/// Composites `src` onto `dst` at `opacity`. Both pixels are premultiplied.
pub fn blend_pixel(dst: Pixel15, src: Pixel15, opacity: u16, mode: BlendMode) -> Pixel15 {
    let s = src.scaled(opacity);
    let (sb, sg, sr, sa) = (s.b as u32, s.g as u32, s.r as u32, s.a as u32);
    let (db, dg, dr, da) = (dst.b as u32, dst.g as u32, dst.r as u32, dst.a as u32);
    match mode {
        BlendMode::Normal => {
            let k = inv(s.a);
            Pixel15 {
                b: clamp15(sb + mul15(db, k)),
                g: clamp15(sg + mul15(dg, k)),
                r: clamp15(sr + mul15(dr, k)),
                a: clamp15(sa + mul15(da, k)),
            }
        }
        BlendMode::Behind => {
            let k = inv(dst.a);
            Pixel15 {
                b: clamp15(db + mul15(sb, k)),
                g: clamp15(dg + mul15(sg, k)),
                r: clamp15(dr + mul15(sr, k)),
                a: clamp15(da + mul15(sa, k)),
            }
        }
        BlendMode::Erase => {
            let k = inv(s.a);
            Pixel15 {
                b: mul15(db, k) as u16,
                g: mul15(dg, k) as u16,
                r: mul15(dr, k) as u16,
                a: mul15(da, k) as u16,
            }
        }
        BlendMode::Multiply => {
            let ks = inv(s.a);
            let kd = inv(dst.a);
            let channel = |s: u32, d: u32| clamp15(mul15(s, d) + mul15(s, kd) + mul15(d, ks));
            Pixel15 {
                b: channel(sb, db),
                g: channel(sg, dg),
                r: channel(sr, dr),
                a: clamp15(sa + da - mul15(sa, da)),
            }
        }
        BlendMode::Screen => {
            let channel = |s: u32, d: u32| clamp15(s + d - mul15(s, d));
            Pixel15 {
                b: channel(sb, db),
                g: channel(sg, dg),
                r: channel(sr, dr),
                a: channel(sa, da),
            }
        }
        BlendMode::Add => {
            let a = clamp15(sa + da - mul15(sa, da));
            let channel = |s: u32, d: u32| clamp15(s + d).min(a);
            Pixel15 {
                b: channel(sb, db),
                g: channel(sg, dg),
                r: channel(sr, dr),
                a,
            }
        }
        BlendMode::Recolor => {
            let k = inv(s.a);
            Pixel15 {
                b: clamp15(mul15(db, k) + mul15(sb, da)),
                g: clamp15(mul15(dg, k) + mul15(sg, da)),
                r: clamp15(mul15(dr, k) + mul15(sr, da)),
                a: dst.a,
            }
        }
        BlendMode::Replace => {
            let k = inv(opacity);
            Pixel15 {
                b: clamp15(sb + mul15(db, k)),
                g: clamp15(sg + mul15(dg, k)),
                r: clamp15(sr + mul15(dr, k)),
                a: clamp15(sa + mul15(da, k)),
            }
        }
    }
}

/// Per-tile compositing primitives. Layer traversal lives with the canvas
/// model; this trait only knows how to blend runs of pixels.
pub trait Compositor: Send + Sync {
    /// Blends `src` onto `dst` pixel by pixel. Slices have equal length.
    fn blend(&self, dst: &mut [Pixel15], src: &[Pixel15], opacity: u16, mode: BlendMode);

    /// Blends a solid `color` through a coverage `mask` onto `dst`.
    fn blend_mask(
        &self,
        dst: &mut [Pixel15],
        color: Pixel15,
        mask: &[u16],
        opacity: u16,
        mode: BlendMode,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCompositor;

impl Compositor for BasicCompositor {
    fn blend(&self, dst: &mut [Pixel15], src: &[Pixel15], opacity: u16, mode: BlendMode) {
        assert_eq!(dst.len(), src.len(), "blend length mismatch");
        if opacity == 0 && mode != BlendMode::Replace {
            return;
        }
        for (d, s) in dst.iter_mut().zip(src) {
            *d = blend_pixel(*d, *s, opacity, mode);
        }
    }

    fn blend_mask(
        &self,
        dst: &mut [Pixel15],
        color: Pixel15,
        mask: &[u16],
        opacity: u16,
        mode: BlendMode,
    ) {
        assert_eq!(dst.len(), mask.len(), "mask length mismatch");
        for (d, m) in dst.iter_mut().zip(mask) {
            if *m != 0 {
                let o = mul15(*m as u32, opacity as u32) as u16;
                *d = blend_pixel(*d, color, o, mode);
            }
        }
    }
}
