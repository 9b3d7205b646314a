//! Visual layers placed on the canvas.
//!
//! An [`Element`] couples an id, a signed canvas position and a frame rate
//! with an [`ElementSource`] that produces its pixels.  The set of source
//! kinds is closed: still image, carousel, video and rendered text.  Only
//! video and text decoding reach outside this module, through the
//! [`VideoSource`] and [`TextRasterizer`] traits.

use std::fmt;
use std::time::Duration;

use ledwall_core::PixelBuffer;
use thiserror::Error;
use tracing::{debug, warn};

/// Error raised when an element cannot be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElementError {
    #[error("element {id}: carousel has no images")]
    EmptyCarousel { id: u32 },

    #[error("element {id}: video produced no first frame: {reason}")]
    NoFirstFrame { id: u32, reason: String },

    #[error("element {id}: text rendering failed: {reason}")]
    Rasterize { id: u32, reason: String },

    #[error("element {id}: frame rate must be zero or give a usable frame period, got {rate}")]
    InvalidFrameRate { id: u32, rate: String },
}

/// Producer of video frames.
///
/// The frame-directory reader lives in `infrastructure::media`; camera
/// capture or a stream decoder would implement the same trait.
pub trait VideoSource: Send {
    /// Returns the next frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<PixelBuffer>, String>;

    /// Rewinds to the first frame.
    fn rewind(&mut self) -> Result<(), String>;
}

/// Appearance of a text element.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Font file path; `None` means the rasterizer's default font.
    pub font: Option<String>,
    pub size: u32,
    pub color: [u8; 3],
}

/// Renders a string into a pixel buffer sized to fit it.
pub trait TextRasterizer: Send + Sync {
    fn rasterize(&self, text: &str, style: &TextStyle) -> Result<PixelBuffer, String>;
}

/// The pixel producer behind an element.
pub enum ElementSource {
    Image(PixelBuffer),
    Carousel {
        frames: Vec<PixelBuffer>,
        index: usize,
    },
    Video {
        source: Box<dyn VideoSource>,
        /// Last frame successfully read; shown again if a read fails.
        current: PixelBuffer,
    },
    Text {
        text: String,
        frame: PixelBuffer,
    },
}

impl ElementSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ElementSource::Image(_) => "image",
            ElementSource::Carousel { .. } => "carousel",
            ElementSource::Video { .. } => "video",
            ElementSource::Text { .. } => "text",
        }
    }
}

impl fmt::Debug for ElementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementSource::Image(buf) => f.debug_tuple("Image").field(&buf.dimensions()).finish(),
            ElementSource::Carousel { frames, index } => f
                .debug_struct("Carousel")
                .field("frames", &frames.len())
                .field("index", index)
                .finish(),
            ElementSource::Video { current, .. } => f
                .debug_struct("Video")
                .field("current", &current.dimensions())
                .finish_non_exhaustive(),
            ElementSource::Text { text, .. } => f.debug_struct("Text").field("text", text).finish(),
        }
    }
}

/// One visual layer.
#[derive(Debug)]
pub struct Element {
    id: u32,
    x: i32,
    y: i32,
    frame_rate: f64,
    source: ElementSource,
}

impl Element {
    /// A still image; never advances.
    pub fn image(id: u32, x: i32, y: i32, image: PixelBuffer) -> Self {
        Self {
            id,
            x,
            y,
            frame_rate: 0.0,
            source: ElementSource::Image(image),
        }
    }

    /// A looping sequence of pre-loaded images shown `frame_rate` times per
    /// second.
    pub fn carousel(
        id: u32,
        x: i32,
        y: i32,
        frame_rate: f64,
        frames: Vec<PixelBuffer>,
    ) -> Result<Self, ElementError> {
        if frames.is_empty() {
            return Err(ElementError::EmptyCarousel { id });
        }
        Ok(Self {
            id,
            x,
            y,
            frame_rate: check_rate(id, frame_rate)?,
            source: ElementSource::Carousel { frames, index: 0 },
        })
    }

    /// A video feed.  The first frame is read immediately; a source that
    /// cannot produce one is rejected.
    pub fn video(
        id: u32,
        x: i32,
        y: i32,
        frame_rate: f64,
        mut source: Box<dyn VideoSource>,
    ) -> Result<Self, ElementError> {
        let frame_rate = check_rate(id, frame_rate)?;
        let current = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(ElementError::NoFirstFrame {
                    id,
                    reason: "end of stream".to_string(),
                })
            }
            Err(reason) => return Err(ElementError::NoFirstFrame { id, reason }),
        };
        Ok(Self {
            id,
            x,
            y,
            frame_rate,
            source: ElementSource::Video { source, current },
        })
    }

    /// Text rendered once at construction.
    pub fn text(
        id: u32,
        x: i32,
        y: i32,
        text: &str,
        style: &TextStyle,
        rasterizer: &dyn TextRasterizer,
    ) -> Result<Self, ElementError> {
        let frame = rasterizer
            .rasterize(text, style)
            .map_err(|reason| ElementError::Rasterize { id, reason })?;
        Ok(Self {
            id,
            x,
            y,
            frame_rate: 0.0,
            source: ElementSource::Text {
                text: text.to_string(),
                frame,
            },
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn set_position(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn source(&self) -> &ElementSource {
        &self.source
    }

    /// Interval between frames, or `None` for elements that never advance.
    pub fn frame_period(&self) -> Option<Duration> {
        if !self.is_animated() {
            return None;
        }
        period_for_rate(self.frame_rate)
    }

    /// `true` for carousels and videos with a positive frame rate.
    pub fn is_animated(&self) -> bool {
        self.frame_rate > 0.0
            && matches!(
                self.source,
                ElementSource::Carousel { .. } | ElementSource::Video { .. }
            )
    }

    /// The pixels to composite right now.
    pub fn current_frame(&self) -> &PixelBuffer {
        match &self.source {
            ElementSource::Image(buf) => buf,
            ElementSource::Carousel { frames, index } => &frames[*index],
            ElementSource::Video { current, .. } => current,
            ElementSource::Text { frame, .. } => frame,
        }
    }

    /// Moves to the next frame.
    ///
    /// A carousel wraps to its first image.  A video that reaches end of
    /// stream rewinds and reads again; any read failure keeps the last good
    /// frame.  Images and text are unchanged.
    pub fn advance(&mut self) {
        let id = self.id;
        match &mut self.source {
            ElementSource::Image(_) | ElementSource::Text { .. } => {}
            ElementSource::Carousel { frames, index } => {
                *index = (*index + 1) % frames.len();
            }
            ElementSource::Video { source, current } => match source.next_frame() {
                Ok(Some(frame)) => *current = frame,
                Ok(None) => {
                    debug!("element {id}: end of stream, looping");
                    if let Some(frame) = rewind_and_read(id, source.as_mut()) {
                        *current = frame;
                    }
                }
                Err(e) => warn!("element {id}: frame read failed, keeping last frame: {e}"),
            },
        }
    }

    /// Returns an animated element to its first frame.
    pub fn reset(&mut self) {
        let id = self.id;
        match &mut self.source {
            ElementSource::Image(_) | ElementSource::Text { .. } => {}
            ElementSource::Carousel { index, .. } => *index = 0,
            ElementSource::Video { source, current } => {
                if let Some(frame) = rewind_and_read(id, source.as_mut()) {
                    *current = frame;
                }
            }
        }
    }
}

fn rewind_and_read(id: u32, source: &mut dyn VideoSource) -> Option<PixelBuffer> {
    if let Err(e) = source.rewind() {
        warn!("element {id}: rewind failed, keeping last frame: {e}");
        return None;
    }
    match source.next_frame() {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            warn!("element {id}: stream empty after rewind, keeping last frame");
            None
        }
        Err(e) => {
            warn!("element {id}: frame read failed after rewind, keeping last frame: {e}");
            None
        }
    }
}

/// Interval between frames at `rate` frames per second.
///
/// `None` unless the rate is positive and its period is a non-zero
/// `Duration`, which rules out rates so small or so large that one over
/// them does not fit.
pub fn period_for_rate(rate: f64) -> Option<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(rate.recip())
        .ok()
        .filter(|period| !period.is_zero())
}

fn check_rate(id: u32, rate: f64) -> Result<f64, ElementError> {
    if rate == 0.0 || period_for_rate(rate).is_some() {
        Ok(rate)
    } else {
        Err(ElementError::InvalidFrameRate {
            id,
            rate: rate.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Scripted video: plays `frames` in order, then reports end of stream.
    /// Reads listed in `fail_at` return an error instead.
    pub(crate) struct ScriptedVideo {
        pub(crate) frames: Vec<PixelBuffer>,
        pub(crate) pos: usize,
        pub(crate) reads: Arc<Mutex<usize>>,
        pub(crate) fail_at: Vec<usize>,
    }

    impl ScriptedVideo {
        pub(crate) fn new(frames: Vec<PixelBuffer>) -> Self {
            Self {
                frames,
                pos: 0,
                reads: Arc::new(Mutex::new(0)),
                fail_at: Vec::new(),
            }
        }
    }

    impl VideoSource for ScriptedVideo {
        fn next_frame(&mut self) -> Result<Option<PixelBuffer>, String> {
            let n = {
                let mut reads = self.reads.lock().unwrap();
                *reads += 1;
                *reads
            };
            if self.fail_at.contains(&n) {
                return Err(format!("scripted failure on read {n}"));
            }
            let frame = self.frames.get(self.pos).cloned();
            if frame.is_some() {
                self.pos += 1;
            }
            Ok(frame)
        }

        fn rewind(&mut self) -> Result<(), String> {
            self.pos = 0;
            Ok(())
        }
    }

    /// Renders every string as a `len × 1` strip in the style colour.
    pub(crate) struct BlockRasterizer;

    impl TextRasterizer for BlockRasterizer {
        fn rasterize(&self, text: &str, style: &TextStyle) -> Result<PixelBuffer, String> {
            if text.is_empty() {
                return Err("empty text".to_string());
            }
            Ok(PixelBuffer::filled(text.len() as u32, 1, style.color))
        }
    }

    pub(crate) fn solid(v: u8) -> PixelBuffer {
        PixelBuffer::filled(1, 1, [v, v, v])
    }
}
