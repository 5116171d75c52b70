//! Latency-masking filler clips
//!
//! A persona directory holds `manifest.json` and short PCM clips (raw or
//! WAV) that can play while the real reply is still being produced.

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::PipelineError;

/// Bytes per yielded chunk
pub const FILLER_CHUNK_BYTES: usize = 4096;

/// Canonical WAV header length skipped for `RIFF` files
const WAV_HEADER_BYTES: u64 = 44;

pub type FillerStream = Pin<Box<dyn Stream<Item = Result<Bytes, PipelineError>> + Send>>;

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillerClipEntry {
    pub id: String,
    /// Relative to the persona directory
    pub path: String,
    #[serde(default)]
    pub length_ms: Option<u64>,
    #[serde(default)]
    pub energy: Option<String>,
    #[serde(default)]
    pub use_case: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillerManifest {
    #[serde(default)]
    pub clips: Vec<FillerClipEntry>,
}

/// A clip resolved against the persona directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillerClip {
    pub id: String,
    pub path: PathBuf,
    pub length_ms: Option<u64>,
    pub energy: Option<String>,
}

/// Filler clips of one persona
#[derive(Debug, Clone)]
pub struct FillerLibrary {
    dir: PathBuf,
}

impl FillerLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pick a clip; `None` when the manifest is missing, unreadable or empty
    pub async fn choose(&self) -> Option<FillerClip> {
        let manifest_path = self.dir.join("manifest.json");
        let raw = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %manifest_path.display(), error = %e, "No filler manifest");
                return None;
            },
        };

        let manifest: FillerManifest = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %manifest_path.display(), error = %e, "Invalid filler manifest");
                return None;
            },
        };

        let entry = manifest.clips.into_iter().next()?;
        let path = self.dir.join(&entry.path);
        if tokio::fs::metadata(&path).await.is_err() {
            tracing::warn!(clip = %entry.id, path = %path.display(), "Filler clip file missing");
            return None;
        }

        Some(FillerClip {
            id: entry.id,
            path,
            length_ms: entry.length_ms,
            energy: entry.energy,
        })
    }
}

/// Stream a clip's PCM in fixed chunks until the file ends or `abort` is set.
///
/// The abort flag is checked before every read, so setting it stops the
/// stream at the next chunk boundary.
pub fn stream_clip(path: PathBuf, abort: Arc<AtomicBool>) -> FillerStream {
    Box::pin(async_stream::stream! {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                yield Err(PipelineError::Io(e.to_string()));
                return;
            }
        };

        let mut magic = [0u8; 4];
        let offset = match file.read_exact(&mut magic).await {
            Ok(_) if &magic == b"RIFF" => WAV_HEADER_BYTES,
            _ => 0,
        };
        if let Err(e) = file.seek(std::io::SeekFrom::Start(offset)).await {
            yield Err(PipelineError::Io(e.to_string()));
            return;
        }

        let mut buf = vec![0u8; FILLER_CHUNK_BYTES];
        while !abort.load(Ordering::SeqCst) {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(PipelineError::Io(e.to_string()));
                    break;
                }
            }
        }
    })
}
