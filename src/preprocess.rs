use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use thiserror::Error;

use crate::source::ImageAdapter;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_THICKNESS: u32 = 3;
const JPEG_QUALITY: u8 = 90;

/// Bounding box of a detected face, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// JPEG bytes ready for the detector.
    pub bytes: Vec<u8>,
    pub face: Option<FaceBox>,
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("reading image: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Pluggable face locator working on a row-major grayscale buffer.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBox>;
}

/// Finds nothing. Used when no face model is wired in.
pub struct NoFaceLocator;

impl FaceLocator for NoFaceLocator {
    fn locate(&self, _gray: &[u8], _width: u32, _height: u32) -> Vec<FaceBox> {
        Vec::new()
    }
}

pub trait Preprocessor: Send + Sync {
    fn process(&self, source: &ImageAdapter) -> Result<ProcessedImage, PreprocessError>;
}

pub struct ImagePreprocessor {
    locator: std::sync::Arc<dyn FaceLocator>,
}

impl ImagePreprocessor {
    pub fn new(locator: std::sync::Arc<dyn FaceLocator>) -> Self {
        Self { locator }
    }
}

impl Preprocessor for ImagePreprocessor {
    fn process(&self, source: &ImageAdapter) -> Result<ProcessedImage, PreprocessError> {
        let mut raw = Vec::new();
        source.save(&mut raw)?;
        let decoded = image::load_from_memory(&raw)?;
        let gray = decoded.to_luma8();
        let mut rgb = decoded.to_rgb8();

        let face = self
            .locator
            .locate(gray.as_raw(), gray.width(), gray.height())
            .into_iter()
            .max_by_key(FaceBox::area);
        if let Some(b) = face {
            draw_outline(&mut rgb, b);
        }

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(rgb).write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;
        tracing::debug!(source = source.name(), bytes = bytes.len(), face = ?face, "preprocessed image");
        Ok(ProcessedImage { bytes, face })
    }
}

fn draw_outline(img: &mut RgbImage, b: FaceBox) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || b.width == 0 || b.height == 0 || b.x >= w || b.y >= h {
        return;
    }
    let x1 = b.x.saturating_add(b.width).min(w) - 1;
    let y1 = b.y.saturating_add(b.height).min(h) - 1;
    for y in b.y..=y1 {
        for x in b.x..=x1 {
            let on_edge = x < b.x + OUTLINE_THICKNESS
                || y < b.y + OUTLINE_THICKNESS
                || x + OUTLINE_THICKNESS > x1
                || y + OUTLINE_THICKNESS > y1;
            if on_edge {
                img.put_pixel(x, y, OUTLINE);
            }
        }
    }
}
