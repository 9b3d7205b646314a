//! Tightly packed RGB8 pixel buffer.

/// A `width × height` image stored row-major, three bytes per pixel, no
/// row padding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Creates an all-black buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    /// Creates a buffer where every pixel is `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut buf = Self::new(width, height);
        for px in buf.data.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        buf
    }

    /// Wraps existing RGB bytes; returns `None` if the length does not match.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * 3)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let o = self.offset(x, y)?;
        Some([self.data[o], self.data[o + 1], self.data[o + 2]])
    }

    /// Writes one pixel; returns `false` if `(x, y)` is out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) -> bool {
        match self.offset(x, y) {
            Some(o) => {
                self.data[o..o + 3].copy_from_slice(&rgb);
                true
            }
            None => false,
        }
    }

    /// Sets every pixel to black.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Copies `src` onto this buffer with its top-left corner at `(x, y)`.
    ///
    /// Parts of `src` falling outside this buffer on any edge are dropped.
    /// When `lut` is given every byte is mapped through it on the way.
    pub fn blit(&mut self, src: &PixelBuffer, x: i32, y: i32, lut: Option<&[u8; 256]>) {
        self.blit_at(src, x.into(), y.into(), lut);
    }

    fn blit_at(&mut self, src: &PixelBuffer, x: i64, y: i64, lut: Option<&[u8; 256]>) {
        let Some((dst_x0, src_x0, cols)) = overlap(x, src.width, self.width) else {
            return;
        };
        let Some((dst_y0, src_y0, rows)) = overlap(y, src.height, self.height) else {
            return;
        };

        let row_bytes = cols * 3;
        for r in 0..rows {
            let s = ((src_y0 + r) * src.width as usize + src_x0) * 3;
            let d = ((dst_y0 + r) * self.width as usize + dst_x0) * 3;
            let src_row = &src.data[s..s + row_bytes];
            let dst_row = &mut self.data[d..d + row_bytes];
            match lut {
                Some(lut) => {
                    for (out, &v) in dst_row.iter_mut().zip(src_row) {
                        *out = lut[v as usize];
                    }
                }
                None => dst_row.copy_from_slice(src_row),
            }
        }
    }

    /// Returns the `width × height` region whose top-left corner is at
    /// `(x, y)`.  Pixels outside this buffer read as black.
    pub fn crop(&self, x: i32, y: i32, width: u32, height: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(width, height);
        // Blitting self at the negated offset into the output clips both ways.
        out.blit_at(self, -i64::from(x), -i64::from(y), None);
        out
    }
}

/// Computes the overlap of a span of `len` starting at `pos` with `[0, bound)`.
///
/// Returns `(dst_start, src_start, count)`, or `None` if there is no overlap.
fn overlap(pos: i64, len: u32, bound: u32) -> Option<(usize, usize, usize)> {
    let start = pos.max(0);
    let end = (pos + i64::from(len)).min(i64::from(bound));
    if end <= start {
        return None;
    }
    Some((
        start as usize,
        (start - pos) as usize,
        (end - start) as usize,
    ))
}
