//! Debug snapshot writer.
//!
//! Optional side effect outside the detection contract: when enabled, the
//! frame behind each detection increment is written to disk as a JPEG so an
//! operator can review what tripped the counter. Failures here never affect
//! the session.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frame::Frame;

pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Write the frame that produced detection increment `detection_count`.
    pub fn write(&self, frame: &Frame, detection_count: u32) -> Result<PathBuf> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data().to_vec())
            .ok_or_else(|| {
                anyhow!(
                    "frame buffer does not match {}x{} RGB",
                    frame.width,
                    frame.height
                )
            })?;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let path = self
            .dir
            .join(format!("detect_{}_{:03}.jpg", stamp, detection_count));
        image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_jpeg_per_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = SnapshotWriter::new(dir.path()).expect("writer");
        let frame = Frame::filled(32, 32, 128);

        let path = writer.write(&frame, 1).expect("snapshot");
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
    }
}
