//! Dump decoded frames to disk

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::jpeg;

use super::supervisor::FrameChannel;

/// Write frames as `img-<n>.jpeg` in `dir`, numbering from 1
///
/// Stops after `limit` frames, or when the source ends if `limit` is
/// `None`. Returns the number of files written.
pub async fn capture(
    frames: &mut FrameChannel,
    dir: impl AsRef<Path>,
    limit: Option<u64>,
    quality: u8,
) -> Result<u64> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let mut written = 0u64;
    while limit.map_or(true, |limit| written < limit) {
        let Some(frame) = frames.recv().await else {
            break;
        };

        let data = tokio::task::spawn_blocking(move || jpeg::encode(&frame.image, quality))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        written += 1;
        let path = frame_path(dir, written);
        tokio::fs::write(&path, &data).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Frame written");
    }

    Ok(written)
}

/// Path of the `n`th captured frame
pub fn frame_path(dir: &Path, n: u64) -> PathBuf {
    dir.join(format!("img-{}.jpeg", n))
}
