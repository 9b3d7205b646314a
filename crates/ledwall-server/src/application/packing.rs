//! Canvas-to-strip pixel packing.
//!
//! For each panel the packer:
//!
//! 1. crops the panel's footprint out of the canvas (black outside it),
//! 2. rotates it back into the panel's wired orientation,
//! 3. linearises rows, reversing alternate rows for serpentine wiring,
//! 4. reorders channels and divides every byte by the brightness divisor.
//!
//! A pin's stream is the concatenation of its panels in wiring order.
//! Everything here is pure; the dispatcher owns the I/O.

use ledwall_core::protocol::{ColorOrder, BYTES_PER_PIXEL};
use ledwall_core::{LedMatrix, PinConnection, PixelBuffer, Rotation};
use serde::{Deserialize, Serialize};

/// Every channel is divided by this unless configured otherwise.
pub const DEFAULT_BRIGHTNESS_DIVISOR: u8 = 10;

/// Which rows of a panel run right-to-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Serpentine {
    /// Every row runs left-to-right.
    None,
    /// Rows 1, 3, 5, ... run right-to-left.
    #[default]
    OddRowsReversed,
    /// Rows 0, 2, 4, ... run right-to-left.
    EvenRowsReversed,
}

impl Serpentine {
    pub fn is_reversed(self, row: u32) -> bool {
        match self {
            Serpentine::None => false,
            Serpentine::OddRowsReversed => row % 2 == 1,
            Serpentine::EvenRowsReversed => row % 2 == 0,
        }
    }
}

/// Installation-wide packing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingPolicy {
    /// Integer divisor applied to every channel byte; 0 is treated as 1.
    pub brightness_divisor: u8,
    pub serpentine: Serpentine,
}

impl Default for PackingPolicy {
    fn default() -> Self {
        Self {
            brightness_divisor: DEFAULT_BRIGHTNESS_DIVISOR,
            serpentine: Serpentine::default(),
        }
    }
}

/// Position in the packed stream of the pixel at wired `(x, y)`.
pub fn serpentine_index(x: u32, y: u32, width: u32, serpentine: Serpentine) -> usize {
    let col = if serpentine.is_reversed(y) {
        width - 1 - x
    } else {
        x
    };
    y as usize * width as usize + col as usize
}

/// Rotates a buffer into a panel's wired orientation.
///
/// `Left` turns 90° clockwise, `Right` 90° counter-clockwise, `Down` 180°.
pub fn rotate(src: &PixelBuffer, rotation: Rotation) -> PixelBuffer {
    if rotation == Rotation::Up {
        return src.clone();
    }
    let (sw, sh) = src.dimensions();
    let (dw, dh) = if rotation.is_quarter_turn() {
        (sh, sw)
    } else {
        (sw, sh)
    };

    let s = src.data();
    let mut out = PixelBuffer::new(dw, dh);
    let d = out.data_mut();
    for dy in 0..dh {
        for dx in 0..dw {
            let (sx, sy) = match rotation {
                Rotation::Left => (dy, sh - 1 - dx),
                Rotation::Right => (sw - 1 - dy, dx),
                Rotation::Down => (sw - 1 - dx, sh - 1 - dy),
                Rotation::Up => (dx, dy),
            };
            let si = (sy as usize * sw as usize + sx as usize) * BYTES_PER_PIXEL;
            let di = (dy as usize * dw as usize + dx as usize) * BYTES_PER_PIXEL;
            d[di..di + BYTES_PER_PIXEL].copy_from_slice(&s[si..si + BYTES_PER_PIXEL]);
        }
    }
    out
}

/// Crops a panel's footprint from the canvas and rotates it so the result
/// is `matrix.width × matrix.height`.
pub fn extract_panel(canvas: &PixelBuffer, matrix: &LedMatrix) -> PixelBuffer {
    let (fw, fh) = matrix.footprint();
    let region = canvas.crop(matrix.x, matrix.y, fw, fh);
    rotate(&region, matrix.rotation)
}

/// Appends one panel's packed stream to `out`.
pub fn pack_matrix_into(
    out: &mut Vec<u8>,
    canvas: &PixelBuffer,
    matrix: &LedMatrix,
    order: ColorOrder,
    policy: &PackingPolicy,
) {
    let panel = extract_panel(canvas, matrix);
    let (w, h) = (matrix.width as usize, matrix.height as usize);
    let divisor = policy.brightness_divisor.max(1);
    let data = panel.data();

    out.reserve(matrix.packed_pixel_array_size());
    for row in 0..h {
        let reversed = policy.serpentine.is_reversed(row as u32);
        let row_px = &data[row * w * BYTES_PER_PIXEL..(row + 1) * w * BYTES_PER_PIXEL];
        for col in 0..w {
            let src = if reversed { w - 1 - col } else { col };
            let p = &row_px[src * BYTES_PER_PIXEL..(src + 1) * BYTES_PER_PIXEL];
            let (a, b, c) = match order {
                ColorOrder::Rgb => (p[0], p[1], p[2]),
                ColorOrder::Grb => (p[1], p[0], p[2]),
            };
            out.extend_from_slice(&[a / divisor, b / divisor, c / divisor]);
        }
    }
}

/// Packs a single panel into a fresh buffer.
pub fn pack_matrix(
    canvas: &PixelBuffer,
    matrix: &LedMatrix,
    order: ColorOrder,
    policy: &PackingPolicy,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(matrix.packed_pixel_array_size());
    pack_matrix_into(&mut out, canvas, matrix, order, policy);
    out
}

/// Packs every panel on a pin, in wiring order.
pub fn pack_pin(
    canvas: &PixelBuffer,
    pin: &PinConnection,
    order: ColorOrder,
    policy: &PackingPolicy,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(pin.packed_size());
    for matrix in &pin.matrices {
        pack_matrix_into(&mut out, canvas, matrix, order, policy);
    }
    out
}
