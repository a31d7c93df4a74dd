use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, DynamicImage, Frame};
use thiserror::Error;

pub const DEFAULT_FRAME_MS: u32 = 2000;
pub const DEFAULT_WIDTH: u32 = 800;

/// The walkthrough screenshots, in display order.
pub const WALKTHROUGH_FRAMES: [&str; 5] = [
    "01_demo_home.png",
    "02_sample_selected.png",
    "03_detection_result.png",
    "04_question_typed.png",
    "05_chat_response.png",
];

#[derive(Debug, Error)]
pub enum GifError {
    #[error("writing {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("encoding gif: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifOutcome {
    /// `None` when no frame could be loaded and nothing was written.
    pub written: Option<PathBuf>,
    pub frames: usize,
    pub skipped: Vec<PathBuf>,
}

fn scale_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let height = (u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1))).max(1);
    img.resize_exact(width, height as u32, FilterType::Lanczos3)
}

/// Writes `frames` into a forever-looping GIF at `output`, `frame_ms` per frame.
/// Missing or unreadable frames are skipped with a warning.
pub fn assemble(frames: &[PathBuf], output: &Path, frame_ms: u32, width: u32) -> Result<GifOutcome, GifError> {
    let mut loaded = Vec::new();
    let mut skipped = Vec::new();
    for path in frames {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "frame not found, skipping");
            skipped.push(path.clone());
            continue;
        }
        match image::open(path) {
            Ok(img) => {
                tracing::info!(path = %path.display(), "adding frame");
                loaded.push(scale_to_width(&img, width));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable frame, skipping");
                skipped.push(path.clone());
            }
        }
    }

    if loaded.is_empty() {
        tracing::warn!("no frames found, gif not written");
        return Ok(GifOutcome { written: None, frames: 0, skipped });
    }

    let io_err = |source| GifError::Io { path: output.to_path_buf(), source };
    let file = File::create(output).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let count = loaded.len();
    encode(loaded, &mut writer, frame_ms)?;
    writer.flush().map_err(io_err)?;
    tracing::info!(output = %output.display(), frames = count, "gif written");
    Ok(GifOutcome { written: Some(output.to_path_buf()), frames: count, skipped })
}

/// Encodes `frames` as a looping GIF. The trailer is written when the encoder
/// drops, so callers must flush `writer` afterwards to see write failures.
fn encode<W: Write>(frames: Vec<DynamicImage>, writer: &mut W, frame_ms: u32) -> Result<(), GifError> {
    let mut encoder = GifEncoder::new(writer);
    encoder.set_repeat(Repeat::Infinite)?;
    for img in frames {
        let frame = Frame::from_parts(img.to_rgba8(), 0, 0, Delay::from_numer_denom_ms(frame_ms, 1));
        encoder.encode_frame(frame)?;
    }
    Ok(())
}
