//! Scene files: what to show on the canvas.
//!
//! ```toml
//! [[elements]]
//! kind = "image"
//! id = 1
//! path = "logo.png"
//! x = 4
//! y = 2
//! scale = 0.5
//!
//! [[elements]]
//! kind = "carousel"
//! id = 2
//! paths = ["a.png", "b.png"]
//! frame_rate = 0.5
//!
//! [[elements]]
//! kind = "video"
//! id = 3
//! dir = "clips/flame"
//! frame_rate = 24.0
//! ```
//!
//! Relative paths are resolved against the scene file's directory.  Every
//! asset is loaded before the first element is placed, so a scene either
//! loads completely or not at all.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::canvas::Canvas;
use crate::application::element::{Element, TextRasterizer, TextStyle};
use crate::infrastructure::media::{load_image, load_images, FrameDirectoryVideo};
use crate::infrastructure::storage::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SceneConfig {
    #[serde(default)]
    pub elements: Vec<ElementEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementEntry {
    pub id: u32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(flatten)]
    pub source: SourceEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceEntry {
    Image {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f32>,
    },
    Carousel {
        paths: Vec<PathBuf>,
        #[serde(default = "default_carousel_rate")]
        frame_rate: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f32>,
    },
    Video {
        dir: PathBuf,
        #[serde(default = "default_video_rate")]
        frame_rate: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f32>,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font: Option<String>,
        #[serde(default = "default_text_size")]
        size: u32,
        #[serde(default = "default_text_color")]
        color: [u8; 3],
    },
}

fn default_carousel_rate() -> f64 {
    1.0
}
fn default_video_rate() -> f64 {
    30.0
}
fn default_text_size() -> u32 {
    8
}
fn default_text_color() -> [u8; 3] {
    [255, 255, 255]
}

impl SceneConfig {
    /// Parses a scene and rejects repeated element ids.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::DuplicateElement`].
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let scene: SceneConfig = toml::from_str(content)?;
        let mut ids = HashSet::new();
        for e in &scene.elements {
            if !ids.insert(e.id) {
                return Err(ConfigError::DuplicateElement(e.id));
            }
        }
        Ok(scene)
    }

    /// Loads every element's assets, resolving relative paths against
    /// `base_dir`.
    ///
    /// # Errors
    ///
    /// The first asset or element failure, as a [`ConfigError`].
    pub fn build_elements(
        &self,
        base_dir: &Path,
        rasterizer: Option<&dyn TextRasterizer>,
    ) -> Result<Vec<Element>, ConfigError> {
        self.elements
            .iter()
            .map(|e| e.build(base_dir, rasterizer))
            .collect()
    }
}

impl ElementEntry {
    fn build(
        &self,
        base_dir: &Path,
        rasterizer: Option<&dyn TextRasterizer>,
    ) -> Result<Element, ConfigError> {
        let (id, x, y) = (self.id, self.x, self.y);
        let media = |source| ConfigError::Media { id, source };
        let element = match &self.source {
            SourceEntry::Image { path, scale } => {
                let image = load_image(&base_dir.join(path), *scale).map_err(media)?;
                Element::image(id, x, y, image)
            }
            SourceEntry::Carousel {
                paths,
                frame_rate,
                scale,
            } => {
                let paths: Vec<PathBuf> = paths.iter().map(|p| base_dir.join(p)).collect();
                let frames = load_images(&paths, *scale).map_err(media)?;
                Element::carousel(id, x, y, *frame_rate, frames)?
            }
            SourceEntry::Video {
                dir,
                frame_rate,
                scale,
            } => {
                let video = FrameDirectoryVideo::open(&base_dir.join(dir), *scale).map_err(media)?;
                Element::video(id, x, y, *frame_rate, Box::new(video))?
            }
            SourceEntry::Text {
                text,
                font,
                size,
                color,
            } => {
                let rasterizer = rasterizer.ok_or(ConfigError::NoRasterizer { id })?;
                let style = TextStyle {
                    font: font.clone(),
                    size: *size,
                    color: *color,
                };
                Element::text(id, x, y, text, &style, rasterizer)?
            }
        };
        Ok(element)
    }
}

/// Reads the scene at `path` and places every element on `canvas`.
///
/// Returns the number of elements added.  Nothing is added unless every
/// element loads.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, otherwise any parse,
/// asset or element error.
pub fn load_scene(
    path: &Path,
    canvas: &mut Canvas,
    rasterizer: Option<&dyn TextRasterizer>,
) -> Result<usize, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let scene = SceneConfig::parse(&content)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let elements = scene.build_elements(base_dir, rasterizer)?;

    if let Some(id) = elements.iter().map(Element::id).find(|id| canvas.element(*id).is_some()) {
        return Err(ConfigError::DuplicateElement(id));
    }
    let count = elements.len();
    for element in elements {
        canvas.add(element)?;
    }
    info!("loaded {count} element(s) from {}", path.display());
    Ok(count)
}
