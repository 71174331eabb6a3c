// crates/panelfit-core/src/artifact.rs
//
// Artifact persistence. Everything is written to a temporary sibling path
// and atomically renamed into place, so a unit killed mid-write can never
// leave a partial or corrupt artifact behind a published path. Panels are
// parquet; exports and failure records go through the same discipline.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, Result};

/// A published panel variant and its identity.
#[derive(Debug, Clone, Serialize)]
pub struct PanelArtifact {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub content_hash: String,
}

pub fn write_panel(path: &Path, name: &str, df: &DataFrame) -> Result<PanelArtifact> {
    let bytes = parquet_bytes(df)?;
    let content_hash = blake3::hash(&bytes).to_hex().to_string();
    write_bytes_atomic(path, &bytes)?;
    info!(
        variant = name,
        rows = df.height(),
        hash = %content_hash,
        path = %path.display(),
        "published panel artifact"
    );
    Ok(PanelArtifact {
        name: name.to_string(),
        path: path.to_path_buf(),
        rows: df.height(),
        content_hash,
    })
}

/// Open a published panel read-only. A missing artifact is a
/// data-availability failure, not an I/O oddity.
pub fn read_panel(path: &Path) -> Result<DataFrame> {
    if !path.is_file() {
        return Err(PipelineError::DataAvailability(format!(
            "panel artifact not found at {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

pub fn parquet_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = df.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)?;
    }
    Ok(buffer)
}

/// Serialize a report/record as pretty JSON and publish it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        PipelineError::Validation(format!("artifact path {} has no parent", path.display()))
    })?;
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PipelineError::Validation(format!("artifact path {} has no file name", path.display()))
        })?;
    let tmp = parent.join(format!(".{file_name}.tmp"));

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
