//! Film frame capture to disk.
//!
//! Saving must never stall the scan loop, so the scanner only enqueues: each
//! completed film frame becomes a [`SaveJob`] pushed into a bounded queue
//! with [`Recorder::enqueue`], and [`RecorderWriter`] encodes and writes on
//! the runtime side. When the queue is full the job is dropped and counted;
//! the transport does not wait for the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::camera::Frame;
use crate::config::RecordConfig;
use crate::stats::StatsHandle;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to create session directory {path}: {source}")]
    CreateSession {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no free session slot under {0}")]
    SessionsExhausted(PathBuf),
}

/// One recording session: a numbered directory under the capture root.
#[derive(Debug, Clone)]
pub struct Session {
    dir: PathBuf,
    index: u32,
}

impl Session {
    /// Creates the first unused `<prefix>_NNN` directory under `root`.
    pub fn create(root: &Path, prefix: &str) -> Result<Session, RecordError> {
        std::fs::create_dir_all(root).map_err(|source| RecordError::CreateSession {
            path: root.to_path_buf(),
            source,
        })?;
        for index in 1..=999u32 {
            let dir = root.join(format!("{prefix}_{index:03}"));
            if dir.exists() {
                continue;
            }
            std::fs::create_dir(&dir).map_err(|source| RecordError::CreateSession {
                path: dir.clone(),
                source,
            })?;
            return Ok(Session { dir, index });
        }
        Err(RecordError::SessionsExhausted(root.to_path_buf()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Path of a saved film frame inside this session.
    pub fn frame_path(&self, film_frame: u64) -> PathBuf {
        self.dir.join(format!("frame_{film_frame:06}.jpg"))
    }
}

/// A frame queued for saving.
#[derive(Debug)]
pub struct SaveJob {
    pub frame: Arc<Frame>,
    pub path: PathBuf,
}

/// Scan-loop side of the writer queue. Enqueueing never blocks.
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::Sender<SaveJob>,
    stats: StatsHandle,
}

impl Recorder {
    pub fn enqueue(&self, frame: Arc<Frame>, path: PathBuf) {
        match self.tx.try_send(SaveJob { frame, path }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.stats.inc_dropped();
                warn!(path = %job.path.display(), "writer queue full, dropping frame");
            }
            Err(TrySendError::Closed(job)) => {
                warn!(path = %job.path.display(), "writer gone, dropping frame");
            }
        }
    }
}

/// Drains the writer queue: JPEG-encodes each job and writes it out.
///
/// Encode and write failures are logged and counted; the writer keeps
/// draining so one bad frame or a full disk does not end the session.
pub struct RecorderWriter {
    rx: mpsc::Receiver<SaveJob>,
    quality: u8,
    stats: StatsHandle,
}

/// Builds the queue pair from the record settings.
pub fn channel(config: &RecordConfig, stats: StatsHandle) -> (Recorder, RecorderWriter) {
    let (tx, rx) = mpsc::channel(config.queue_depth);
    (
        Recorder {
            tx,
            stats: stats.clone(),
        },
        RecorderWriter {
            rx,
            quality: config.quality,
            stats,
        },
    )
}

impl RecorderWriter {
    /// Runs until every [`Recorder`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.handle(job).await;
        }
        debug!("writer queue closed");
    }

    async fn handle(&self, job: SaveJob) {
        let quality = self.quality;
        let frame = Arc::clone(&job.frame);
        let encoded = tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await;
        let bytes = match encoded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(error)) => {
                self.stats.inc_write_errors();
                warn!(path = %job.path.display(), %error, "jpeg encode failed");
                return;
            }
            Err(error) => {
                self.stats.inc_write_errors();
                warn!(%error, "encode task failed");
                return;
            }
        };
        match tokio::fs::write(&job.path, &bytes).await {
            Ok(()) => {
                self.stats.inc_saved();
                trace!(path = %job.path.display(), size = bytes.len(), "frame saved");
            }
            Err(error) => {
                self.stats.inc_write_errors();
                warn!(path = %job.path.display(), %error, "failed to write frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ScanStats;
    use image::GrayImage;

    #[test]
    fn sessions_take_the_first_unused_index() {
        let root = tempfile::tempdir().unwrap();
        let first = Session::create(root.path(), "session").unwrap();
        assert_eq!(first.index(), 1);
        assert!(root.path().join("session_001").is_dir());

        let second = Session::create(root.path(), "session").unwrap();
        assert_eq!(second.index(), 2);
    }

    #[test]
    fn sessions_fill_gaps() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("session_001")).unwrap();
        std::fs::create_dir_all(root.path().join("session_003")).unwrap();
        let session = Session::create(root.path(), "session").unwrap();
        assert_eq!(session.index(), 2);
    }

    #[test]
    fn frame_paths_are_zero_padded() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), "roll").unwrap();
        let path = session.frame_path(42);
        assert!(path.ends_with("roll_001/frame_000042.jpg"));
    }

    fn test_frame() -> Arc<Frame> {
        let mut image = GrayImage::new(64, 48);
        for (x, y, px) in image.enumerate_pixels_mut() {
            px.0[0] = ((x + y) % 256) as u8;
        }
        Arc::new(Frame::new(0, image))
    }

    #[tokio::test]
    async fn writer_saves_queued_frames() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), "session").unwrap();
        let stats = ScanStats::new_handle();
        let (recorder, writer) = channel(&RecordConfig::default(), stats.clone());

        recorder.enqueue(test_frame(), session.frame_path(1));
        recorder.enqueue(test_frame(), session.frame_path(2));
        drop(recorder);
        writer.run().await;

        for n in [1u64, 2] {
            let bytes = std::fs::read(session.frame_path(n)).unwrap();
            assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        }
        assert_eq!(stats.snapshot().frames_saved, 2);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let stats = ScanStats::new_handle();
        let config = RecordConfig {
            queue_depth: 2,
            ..RecordConfig::default()
        };
        let (recorder, _writer) = channel(&config, stats.clone());
        let dir = tempfile::tempdir().unwrap();
        for n in 0..5u64 {
            recorder.enqueue(test_frame(), dir.path().join(format!("f{n}.jpg")));
        }
        assert_eq!(stats.snapshot().frames_dropped, 3);
    }

    #[tokio::test]
    async fn writer_survives_a_bad_path() {
        let root = tempfile::tempdir().unwrap();
        let stats = ScanStats::new_handle();
        let (recorder, writer) = channel(&RecordConfig::default(), stats.clone());

        recorder.enqueue(test_frame(), root.path().join("missing_dir").join("f.jpg"));
        recorder.enqueue(test_frame(), root.path().join("good.jpg"));
        drop(recorder);
        writer.run().await;

        let snap = stats.snapshot();
        assert_eq!(snap.write_errors, 1);
        assert_eq!(snap.frames_saved, 1);
        assert!(root.path().join("good.jpg").exists());
    }
}
