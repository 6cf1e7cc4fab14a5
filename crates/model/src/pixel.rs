use serde::{Deserialize, Serialize};

/// Fixed-point one: channels of [`Pixel15`] range over `0..=BIT15`.
pub const BIT15: u16 = 1 << 15;

/// Premultiplied 15-bit fixed point pixel, the working format of every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pixel15 {
    pub b: u16,
    pub g: u16,
    pub r: u16,
    pub a: u16,
}

/// Premultiplied 8-bit pixel handed to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct Pixel8 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

/// Unpremultiplied 8-bit ARGB color packed as `0xAARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const TRANSPARENT: Self = Self(0);
    pub const WHITE: Self = Self(0xffff_ffff);
    pub const BLACK: Self = Self(0xff00_0000);

    pub const fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self(((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    pub const fn with_alpha(self, alpha: u8) -> Self {
        Self((self.0 & 0x00ff_ffff) | ((alpha as u32) << 24))
    }
}

#[inline]
pub fn channel8_to_15(c: u8) -> u16 {
    ((c as u32 * BIT15 as u32 + 127) / 255) as u16
}

#[inline]
pub fn channel15_to_8(c: u16) -> u8 {
    ((c as u32 * 255 + BIT15 as u32 / 2) / BIT15 as u32) as u8
}

/// Fixed-point multiplication of two values in `0..=BIT15`.
#[inline]
pub fn mul15(a: u32, b: u32) -> u32 {
    (a * b + (BIT15 as u32 / 2)) >> 15
}

impl Pixel15 {
    pub const TRANSPARENT: Self = Self {
        b: 0,
        g: 0,
        r: 0,
        a: 0,
    };

    pub fn from_color(color: Color) -> Self {
        let a = channel8_to_15(color.alpha()) as u32;
        let premultiply = |c: u8| mul15(channel8_to_15(c) as u32, a) as u16;
        Self {
            b: premultiply(color.blue()),
            g: premultiply(color.green()),
            r: premultiply(color.red()),
            a: a as u16,
        }
    }

    /// Scales all channels, alpha included, by `opacity`.
    #[inline]
    pub fn scaled(self, opacity: u16) -> Self {
        if opacity >= BIT15 {
            return self;
        }
        let o = opacity as u32;
        Self {
            b: mul15(self.b as u32, o) as u16,
            g: mul15(self.g as u32, o) as u16,
            r: mul15(self.r as u32, o) as u16,
            a: mul15(self.a as u32, o) as u16,
        }
    }

    pub const fn is_opaque(self) -> bool {
        self.a == BIT15
    }

    pub fn to_pixel8(self) -> Pixel8 {
        Pixel8 {
            b: channel15_to_8(self.b),
            g: channel15_to_8(self.g),
            r: channel15_to_8(self.r),
            a: channel15_to_8(self.a),
        }
    }
}

/// Converts a tile worth of working pixels into the display format.
pub fn pixels15_to_8(dst: &mut [Pixel8], src: &[Pixel15]) {
    assert_eq!(dst.len(), src.len(), "pixel buffer length mismatch");
    for (out, pixel) in dst.iter_mut().zip(src) {
        *out = pixel.to_pixel8();
    }
}
