//! Page video via the CDP screencast.
//!
//! Frames arrive as base64 JPEG images; each one is acknowledged and
//! appended to a Motion-JPEG file.

use crate::error::{Result, StepError};
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams,
    StopScreencastParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const JPEG_QUALITY: i64 = 80;

/// File name for a recording started now.
pub fn video_filename() -> String {
    format!("video-{}.mjpeg", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

pub struct ScreencastRecorder {
    page: Page,
    path: PathBuf,
    stop: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl ScreencastRecorder {
    /// Start recording `page` into `dir`, at most `width`x`height`.
    pub async fn start(page: &Page, dir: &Path, width: u32, height: u32) -> Result<Self> {
        let path = dir.join(video_filename());
        let mut file = tokio::fs::File::create(&path).await?;
        let mut frames = page.event_listener::<EventScreencastFrame>().await?;

        let params = StartScreencastParams::builder()
            .format(StartScreencastFormat::Jpeg)
            .quality(JPEG_QUALITY)
            .max_width(width as i64)
            .max_height(height as i64)
            .build();
        page.execute(params).await?;

        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let ack_page = page.clone();
        let task = tokio::spawn(async move {
            let mut written = 0u64;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    frame = frames.next() => {
                        let Some(frame) = frame else { break };
                        let _ = ack_page
                            .execute(ScreencastFrameAckParams::new(frame.session_id))
                            .await;

                        match general_purpose::STANDARD.decode(&frame.data) {
                            Ok(jpeg) => {
                                if let Err(e) = file.write_all(&jpeg).await {
                                    log::warn!("🟠 Warning: failed to write video frame: {}", e);
                                    break;
                                }
                                written += 1;
                            }
                            Err(e) => log::debug!("Skipping undecodable video frame: {}", e),
                        }
                    }
                }
            }
            let _ = file.flush().await;
            written
        });

        log::debug!("Recording video to {}", path.display());
        Ok(Self {
            page: page.clone(),
            path,
            stop,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the screencast and close the file. Returns the video path.
    pub async fn stop(self) -> Result<PathBuf> {
        if let Err(e) = self.page.execute(StopScreencastParams::default()).await {
            log::debug!("Stopping screencast failed: {}", e);
        }
        let _ = self.stop.send(());
        let frames = self
            .task
            .await
            .map_err(|e| StepError::Other(format!("video recorder task failed: {}", e)))?;
        log::debug!("Recorded {} video frames to {}", frames, self.path.display());
        Ok(self.path)
    }
}

/// Apply the retention policy to a finished recording.
pub async fn discard_video(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Deleted video: {}", path.display()),
        Err(e) => log::warn!("🟠 Warning: failed to delete video {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_filename_shape() {
        let name = video_filename();
        assert!(name.starts_with("video-"));
        assert!(name.ends_with(".mjpeg"));
        assert_eq!(name.len(), "video-20260101-120000.mjpeg".len());
    }
}
