//! File export with collision-free naming.
//!
//! `report.txt` becomes `report(1).txt`, `report(2).txt`, ... until a free
//! name is found. A name without an extension gets the counter appended.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use nokey_proto::Exported;

use crate::errors::ExportError;

/// Upper bound on candidate names tried for one export.
pub const MAX_NAME_ATTEMPTS: u32 = 10_000;

fn split_name(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(0) | None => (filename, None),
        Some(dot) => (&filename[..dot], Some(&filename[dot + 1..])),
    }
}

/// The `attempt`-th candidate for `filename`; attempt 0 is the name itself.
pub fn candidate_name(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match split_name(filename) {
        (stem, Some(ext)) => format!("{stem}({attempt}).{ext}"),
        (stem, None) => format!("{stem}({attempt})"),
    }
}

/// Try candidates in order until `claim` takes one. `claim` returns
/// `Ok(None)` when the name is already in use.
pub fn claim_unique_name<T>(
    filename: &str,
    mut claim: impl FnMut(&str) -> Result<Option<T>, ExportError>,
    max_attempts: u32,
) -> Result<(String, T), ExportError> {
    for attempt in 0..max_attempts {
        let candidate = candidate_name(filename, attempt);
        if let Some(claimed) = claim(&candidate)? {
            return Ok((candidate, claimed));
        }
    }
    Err(ExportError::NoFreeName {
        filename: filename.to_string(),
        attempts: max_attempts,
    })
}

fn validate_name(filename: &str) -> Result<(), ExportError> {
    let bad = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if bad {
        return Err(ExportError::InvalidName(filename.to_string()));
    }
    Ok(())
}

/// Privileged write surface for `exportFile`.
#[async_trait]
pub trait FileExporter: Send + Sync {
    async fn export(&self, filename: &str, content: &str) -> Result<Exported, ExportError>;
}

/// Writes exports into one directory.
#[derive(Debug, Clone)]
pub struct DirectoryExporter {
    dir: PathBuf,
}

impl DirectoryExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_unique(dir: &Path, filename: &str, content: &str) -> Result<Exported, ExportError> {
        validate_name(filename)?;
        std::fs::create_dir_all(dir)?;
        // create_new closes the gap between the existence check and the write.
        let (name, mut file) = claim_unique_name(
            filename,
            |name| match OpenOptions::new().write(true).create_new(true).open(dir.join(name)) {
                Ok(file) => Ok(Some(file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
                Err(e) => Err(e.into()),
            },
            MAX_NAME_ATTEMPTS,
        )?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(Exported {
            path: dir.join(&name).display().to_string(),
            filename: name,
        })
    }
}

#[async_trait]
impl FileExporter for DirectoryExporter {
    async fn export(&self, filename: &str, content: &str) -> Result<Exported, ExportError> {
        let dir = self.dir.clone();
        let filename = filename.to_string();
        let content = content.to_string();
        let exported =
            tokio::task::spawn_blocking(move || Self::write_unique(&dir, &filename, &content))
                .await
                .map_err(|e| ExportError::Io(std::io::Error::new(ErrorKind::Other, e)))??;
        info!(path = %exported.path, "exported file");
        Ok(exported)
    }
}
