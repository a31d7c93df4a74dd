use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// "Angelina_Jolie.jpg" -> "Angelina Jolie"
pub fn display_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.replace(['_', '-'], " ")
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SampleImage {
    pub file_name: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("invalid sample name: {0}")]
    InvalidName(String),
    #[error("sample not found: {0}")]
    NotFound(String),
    #[error("reading sample {name}: {source}")]
    Io { name: String, source: std::io::Error },
}

/// The gallery: image files directly under `dir`, minus excluded names.
#[derive(Debug, Clone)]
pub struct SampleLibrary {
    dir: PathBuf,
    exclusions: Vec<String>,
}

impl SampleLibrary {
    pub fn new(dir: impl Into<PathBuf>, exclusions: Vec<String>) -> Self {
        let exclusions = exclusions.into_iter().map(|e| e.to_lowercase()).collect();
        Self { dir: dir.into(), exclusions }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_hidden(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.exclusions.iter().any(|e| lower.contains(e.as_str()))
    }

    pub fn list(&self) -> Vec<SampleImage> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "samples directory unavailable");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| is_image_file(n) && !self.is_hidden(n))
            .collect();
        names.sort();
        names
            .into_iter()
            .map(|file_name| SampleImage { display_name: display_name(&file_name), file_name })
            .collect()
    }

    /// Maps a gallery file name to its path. Only plain, visible image names are accepted.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, SampleError> {
        let mut comps = Path::new(file_name).components();
        let single = matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None));
        if !single || !is_image_file(file_name) {
            return Err(SampleError::InvalidName(file_name.into()));
        }
        if self.is_hidden(file_name) {
            return Err(SampleError::NotFound(file_name.into()));
        }
        let path = self.dir.join(file_name);
        if !path.is_file() {
            return Err(SampleError::NotFound(file_name.into()));
        }
        Ok(path)
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, SampleError> {
        let path = self.resolve(file_name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| SampleError::Io { name: file_name.into(), source })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedSample {
    pub celebrity: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Copies the first image of every `dataset/<Celebrity Name>/` folder to
/// `samples/<Celebrity_Name>.jpg`.
pub fn populate_from_dataset(dataset: &Path, samples: &Path) -> anyhow::Result<Vec<CopiedSample>> {
    fs::create_dir_all(samples)?;

    let mut folders: Vec<PathBuf> = fs::read_dir(dataset)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();

    let mut copied = Vec::new();
    for folder in folders {
        let Some(celebrity) = folder.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        let mut images: Vec<PathBuf> = fs::read_dir(&folder)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.file_name().and_then(|n| n.to_str()).is_some_and(is_image_file))
            .collect();
        images.sort();
        let Some(first) = images.into_iter().next() else {
            tracing::debug!(folder = %folder.display(), "no images, skipping");
            continue;
        };
        let destination = samples.join(format!("{}.jpg", celebrity.replace(' ', "_")));
        fs::copy(&first, &destination)?;
        tracing::info!(%celebrity, dest = %destination.display(), "copied sample");
        copied.push(CopiedSample { celebrity, source: first, destination });
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn library_with(files: &[&str]) -> (SampleLibrary, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        for f in files {
            fs::write(dir.path().join(f), b"img").unwrap();
        }
        let lib = SampleLibrary::new(dir.path(), crate::settings::default_exclusions());
        (lib, dir)
    }

    #[test]
    fn display_name_strips_extension_and_separators() {
        assert_eq!(display_name("Angelina_Jolie.jpg"), "Angelina Jolie");
        assert_eq!(display_name("Tom_Hanks.JPEG"), "Tom Hanks");
        assert_eq!(display_name("plain"), "plain");
    }

    #[test]
    fn list_is_sorted_filtered_and_curated() {
        let (lib, _dir) = library_with(&[
            "Tom_Hanks.jpg",
            "Angelina_Jolie.PNG",
            "Bill_Gates.jpg",
            "Dalai_Lama.jpeg",
            "notes.txt",
            "Brad_Pitt.jpeg",
        ]);
        let names: Vec<_> = lib.list().into_iter().map(|s| s.file_name).collect();
        assert_eq!(names, vec!["Angelina_Jolie.PNG", "Brad_Pitt.jpeg", "Tom_Hanks.jpg"]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let lib = SampleLibrary::new("/definitely/not/here", Vec::new());
        assert!(lib.list().is_empty());
    }

    #[test]
    fn resolve_rejects_traversal_hidden_and_missing() {
        let (lib, _dir) = library_with(&["Tom_Hanks.jpg", "Bill_Gates.jpg"]);
        assert!(lib.resolve("Tom_Hanks.jpg").is_ok());
        assert!(matches!(lib.resolve("../etc/passwd.jpg"), Err(SampleError::InvalidName(_))));
        assert!(matches!(lib.resolve("sub/x.jpg"), Err(SampleError::InvalidName(_))));
        assert!(matches!(lib.resolve("readme.md"), Err(SampleError::InvalidName(_))));
        assert!(matches!(lib.resolve("Bill_Gates.jpg"), Err(SampleError::NotFound(_))));
        assert!(matches!(lib.resolve("Nobody.jpg"), Err(SampleError::NotFound(_))));
    }

    #[tokio::test]
    async fn read_returns_bytes() {
        let (lib, _dir) = library_with(&["Tom_Hanks.jpg"]);
        assert_eq!(lib.read("Tom_Hanks.jpg").await.unwrap(), b"img");
    }

    #[test]
    fn populate_copies_first_image_per_folder() {
        let dataset = tempdir().unwrap();
        let samples = tempdir().unwrap();
        let out = samples.path().join("samples");

        let jolie = dataset.path().join("Angelina Jolie");
        fs::create_dir_all(&jolie).unwrap();
        fs::write(jolie.join("002.jpg"), b"second").unwrap();
        fs::write(jolie.join("001.jpg"), b"first").unwrap();
        fs::write(jolie.join("info.txt"), b"skip").unwrap();
        fs::create_dir_all(dataset.path().join("Empty Folder")).unwrap();
        fs::write(dataset.path().join("stray.jpg"), b"x").unwrap();

        let copied = populate_from_dataset(dataset.path(), &out).unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].celebrity, "Angelina Jolie");
        assert_eq!(copied[0].destination, out.join("Angelina_Jolie.jpg"));
        assert_eq!(fs::read(out.join("Angelina_Jolie.jpg")).unwrap(), b"first");
    }
}
