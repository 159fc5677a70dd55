//! Pipeline: the codec-side resources owned while one media is loaded
//!
//! The controller builds a pipeline during prepare and destroys it during
//! release. The three shapes own different resource sets, so they are kept
//! as distinct aggregates rather than unified behind one interface. The
//! buffer and playback loops borrow from the pipeline for their lifetime.

mod buffer_loop;
mod playback_loop;

pub use buffer_loop::BufferLoop;
pub use playback_loop::{PlaybackContext, PlaybackLoop, PlaybackStats};

use crate::audio::Sampler;
use crate::buffer::{FrameBuffer, FramePool};
use crate::decoder::SharedDecoder;
use crate::media::Frame;
use crate::utils::error::{PlayheadError, Result};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Callbacks a loop reports through while running
///
/// Shared by the buffer and playback loops; the controller installs closures
/// that gate timestamp emission on the current status and forward loop
/// completion/failure onto its supervisor channel.
#[derive(Clone)]
pub struct LoopCallbacks {
    pub on_timestamp: Arc<dyn Fn(Duration) + Send + Sync>,
    pub on_end_of_media: Arc<dyn Fn() + Send + Sync>,
    pub on_exception: Arc<dyn Fn(PlayheadError) + Send + Sync>,
}

/// Audio-only pipeline
pub struct AudioPipeline {
    pub decoder: SharedDecoder,
    pub buffer: Arc<FrameBuffer<Frame>>,
    pub sampler: Arc<dyn Sampler>,
}

/// Video-only pipeline
pub struct VideoPipeline {
    pub decoder: SharedDecoder,
    pub pool: Arc<FramePool>,
    pub buffer: Arc<FrameBuffer<Frame>>,
}

/// Pipeline for media with both streams
///
/// Audio and video run through independent decoders and buffers so the two
/// sides can be produced, flushed, and seeked independently; presentation
/// order is reconstructed from timestamps in the playback loop.
pub struct AudioVideoPipeline {
    pub audio_decoder: SharedDecoder,
    pub video_decoder: SharedDecoder,
    pub audio_buffer: Arc<FrameBuffer<Frame>>,
    pub video_buffer: Arc<FrameBuffer<Frame>>,
    pub video_pool: Arc<FramePool>,
    pub sampler: Arc<dyn Sampler>,
}

/// The pipeline, tagged by media shape
pub enum Pipeline {
    Audio(AudioPipeline),
    Video(VideoPipeline),
    AudioVideo(AudioVideoPipeline),
}

impl Pipeline {
    /// The sampler, for shapes that carry audio.
    pub fn sampler(&self) -> Option<&Arc<dyn Sampler>> {
        match self {
            Pipeline::Audio(p) => Some(&p.sampler),
            Pipeline::Video(_) => None,
            Pipeline::AudioVideo(p) => Some(&p.sampler),
        }
    }

    /// The video pool, for shapes that carry video.
    pub fn video_pool(&self) -> Option<&Arc<FramePool>> {
        match self {
            Pipeline::Audio(_) => None,
            Pipeline::Video(p) => Some(&p.pool),
            Pipeline::AudioVideo(p) => Some(&p.video_pool),
        }
    }

    /// Discard everything buffered. Pooled storage inside cleared video
    /// frames returns to the pool.
    pub fn clear_buffers(&self) {
        match self {
            Pipeline::Audio(p) => p.buffer.clear(),
            Pipeline::Video(p) => p.buffer.clear(),
            Pipeline::AudioVideo(p) => {
                p.audio_buffer.clear();
                p.video_buffer.clear();
            }
        }
    }

    /// Rewind the decoder(s); for audio+video both run in parallel.
    pub async fn reset_decoders(&self) -> Result<()> {
        match self {
            Pipeline::Audio(p) => p.decoder.lock().await.reset().await,
            Pipeline::Video(p) => p.decoder.lock().await.reset().await,
            Pipeline::AudioVideo(p) => {
                let (audio, video) = tokio::join!(
                    async { p.audio_decoder.lock().await.reset().await },
                    async { p.video_decoder.lock().await.reset().await },
                );
                audio.and(video)
            }
        }
    }

    /// Seek the decoder(s) to `timestamp`.
    ///
    /// For audio+video the two seeks run in parallel and the adopted
    /// position is the later of the two actually-reached timestamps, so both
    /// clocks rejoin at a common point.
    pub async fn seek_decoders(&self, timestamp: Duration, keyframes_only: bool) -> Result<Duration> {
        match self {
            Pipeline::Audio(p) => p.decoder.lock().await.seek_to(timestamp, keyframes_only).await,
            Pipeline::Video(p) => p.decoder.lock().await.seek_to(timestamp, keyframes_only).await,
            Pipeline::AudioVideo(p) => {
                let (audio, video) = tokio::join!(
                    async {
                        p.audio_decoder
                            .lock()
                            .await
                            .seek_to(timestamp, keyframes_only)
                            .await
                    },
                    async {
                        p.video_decoder
                            .lock()
                            .await
                            .seek_to(timestamp, keyframes_only)
                            .await
                    },
                );
                Ok(audio?.max(video?))
            }
        }
    }

    /// Release every owned component, in reverse construction order.
    ///
    /// Every component gets its close attempt even when an earlier one
    /// fails; the first error is the one propagated.
    pub async fn close(&self) -> Result<()> {
        debug!("Closing pipeline");
        let mut first_error: Option<PlayheadError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        // Reverse of construction order per shape.
        match self {
            Pipeline::Audio(p) => {
                p.buffer.close();
                record(p.sampler.close().await);
                record(p.decoder.lock().await.close().await);
            }
            Pipeline::Video(p) => {
                p.buffer.close();
                p.pool.close();
                record(p.decoder.lock().await.close().await);
            }
            Pipeline::AudioVideo(p) => {
                p.video_pool.close();
                p.video_buffer.close();
                p.audio_buffer.close();
                record(p.sampler.close().await);
                record(p.video_decoder.lock().await.close().await);
                record(p.audio_decoder.lock().await.close().await);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
