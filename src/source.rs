use std::io::{self, Write};

use serde::Serialize;

use crate::samples::SampleLibrary;

/// Raw image bytes plus the name they arrived under. Consumers pull the bytes
/// through [`ImageAdapter::save`] so uploads and samples look the same.
#[derive(Debug, Clone)]
pub struct ImageAdapter {
    name: String,
    bytes: Vec<u8>,
}

impl ImageAdapter {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn save<W: Write + ?Sized>(&self, destination: &mut W) -> io::Result<()> {
        destination.write_all(&self.bytes)
    }
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    Upload,
    Sample,
}

#[derive(Debug, Clone)]
pub struct ActiveImage {
    pub origin: ImageOrigin,
    pub image: ImageAdapter,
}

/// Picks the image for this interaction. An upload always wins; otherwise the
/// session's selected sample is read from disk. A vanished sample yields `None`.
pub async fn resolve_active_image(
    upload: Option<Upload>,
    selected_sample: Option<&str>,
    samples: &SampleLibrary,
) -> Option<ActiveImage> {
    if let Some(u) = upload {
        return Some(ActiveImage {
            origin: ImageOrigin::Upload,
            image: ImageAdapter::new(u.file_name, u.bytes),
        });
    }
    let name = selected_sample?;
    match samples.read(name).await {
        Ok(bytes) => Some(ActiveImage {
            origin: ImageOrigin::Sample,
            image: ImageAdapter::new(name, bytes),
        }),
        Err(e) => {
            tracing::warn!(sample = name, error = %e, "selected sample unavailable");
            None
        }
    }
}
