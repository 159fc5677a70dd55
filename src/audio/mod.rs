//! Audio sampler contracts for Playhead
//!
//! The sampler is the audio presentation sink. Its `write` is deliberately
//! blocking: the device drains samples at wall-clock rate, so the write path
//! is what paces the audio side of the playback loop and makes the sampler
//! the master clock for audio/video synchronization.

use crate::media::{AudioFormat, AudioFrame};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Audio presentation sink with an integrated clock
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Open the output stream and begin draining written samples.
    async fn start(&self) -> Result<()>;

    /// Stop draining. Buffered samples are retained.
    async fn stop(&self) -> Result<()>;

    /// Discard buffered samples without stopping.
    async fn flush(&self) -> Result<()>;

    /// Release the device. Further calls fail.
    async fn close(&self) -> Result<()>;

    /// Write one frame, suspending until the device has room for it.
    ///
    /// `gain` is the linear volume to apply (0 silences the frame, which is
    /// how mute is implemented); `speed` is the playback speed factor the
    /// sampler should resample for.
    async fn write(&self, frame: &AudioFrame, gain: f32, speed: f32) -> Result<()>;
}

/// Builds a sampler for a probed audio format during prepare
#[async_trait]
pub trait SamplerFactory: Send + Sync {
    async fn create(&self, format: &AudioFormat) -> Result<Arc<dyn Sampler>>;
}
