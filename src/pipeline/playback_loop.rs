//! Playback loop: drains the frame buffers into the presentation sinks
//!
//! Audio frames go to the sampler, whose blocking write paces the loop and
//! makes it the master clock. Video frames are paced against that clock when
//! audio is present, or against the wall clock scaled by the playback speed
//! factor when it is not. Late video frames are dropped back to the pool;
//! early ones wait, interruptibly.

use super::{AudioPipeline, AudioVideoPipeline, LoopCallbacks, Pipeline, VideoPipeline};
use crate::audio::Sampler;
use crate::buffer::FrameBuffer;
use crate::media::Frame;
use crate::player::Settings;
use crate::renderer::RendererSlot;
use crate::utils::error::{PlayheadError, Result};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How far a video frame may run ahead of or behind the audio clock before
/// the loop waits for it or drops it.
const SYNC_TOLERANCE: Duration = Duration::from_millis(40);

/// Longest single wait while a video frame is early; the clock is re-checked
/// at this cadence so cancellation and clock jumps are observed promptly.
const MAX_SYNC_WAIT: Duration = Duration::from_millis(100);

/// Inputs the playback loop samples while running
///
/// Settings are snapshotted once per frame, so volume, mute, and speed
/// changes take effect on the next frame without restarting the loop. The
/// renderer slot is looked up between frames for the same reason.
pub struct PlaybackContext {
    pub settings: watch::Receiver<Settings>,
    pub renderer: Arc<RendererSlot>,
}

/// Presentation counters, in the spirit of render statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Video frames handed to the renderer
    pub frames_presented: u64,

    /// Video frames dropped for running behind the audio clock
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    presented: AtomicU64,
    dropped: AtomicU64,
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Consumer side of a pipeline: presents buffered frames on the clock
pub struct PlaybackLoop {
    pipeline: Arc<Pipeline>,
    running: Mutex<Option<RunningTask>>,
    playing: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl PlaybackLoop {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            running: Mutex::new(None),
            playing: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Whether the presentation task is currently running.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Presentation counters accumulated since prepare.
    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            frames_presented: self.counters.presented.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Spawn the presentation task(s). Fails if already running.
    pub fn start(&self, ctx: PlaybackContext, callbacks: LoopCallbacks) -> Result<()> {
        let mut running = self.running.lock();
        if self.playing.load(Ordering::Acquire) {
            return Err(PlayheadError::InvalidInput(
                "playback loop is already running".to_string(),
            ));
        }

        debug!("Starting playback loop");
        let token = CancellationToken::new();
        self.playing.store(true, Ordering::Release);

        let pipeline = Arc::clone(&self.pipeline);
        let playing = Arc::clone(&self.playing);
        let counters = Arc::clone(&self.counters);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let result = match &*pipeline {
                Pipeline::Audio(p) => present_audio(p, &ctx, &task_token, &callbacks).await,
                Pipeline::Video(p) => {
                    present_video_paced(p, &ctx, &task_token, &callbacks, &counters).await
                }
                Pipeline::AudioVideo(p) => {
                    present_audio_video(p, &ctx, &task_token, &callbacks, &counters).await
                }
            };
            playing.store(false, Ordering::Release);
            match result {
                Ok(true) => {
                    debug!("Playback loop reached end of media");
                    (callbacks.on_end_of_media)();
                }
                Ok(false) => debug!("Playback loop cancelled"),
                Err(e) => {
                    warn!("Playback loop failed: {}", e);
                    (callbacks.on_exception)(PlayheadError::playback_loop(e));
                }
            }
        });

        *running = Some(RunningTask { token, handle });
        Ok(())
    }

    /// Cancel the presentation task(s) and wait for them to terminate.
    ///
    /// Frames taken from a buffer but not yet presented are dropped on the
    /// unwind, which returns their pooled storage.
    pub async fn stop(&self) {
        let task = self.running.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!("Playback loop task ended abnormally: {}", e);
            }
        }
    }

    /// Cancel without waiting. Idempotent.
    pub fn close(&self) {
        if let Some(task) = self.running.lock().take() {
            task.token.cancel();
        }
    }
}

fn gain_for(settings: &Settings) -> f32 {
    if settings.is_muted {
        0.0
    } else {
        settings.volume
    }
}

fn scale_by_speed(delta: Duration, speed: f32) -> Duration {
    Duration::from_secs_f64(delta.as_secs_f64() / speed as f64)
}

/// Write audio frames to the sampler in FIFO order.
///
/// The sampler's own clock paces the writes; each written frame's timestamp
/// is the playback position reported upward.
async fn present_audio(
    p: &AudioPipeline,
    ctx: &PlaybackContext,
    token: &CancellationToken,
    callbacks: &LoopCallbacks,
) -> Result<bool> {
    drain_audio_frames(&p.buffer, &p.sampler, ctx, token, |timestamp| {
        (callbacks.on_timestamp)(timestamp)
    })
    .await
}

async fn drain_audio_frames(
    buffer: &Arc<FrameBuffer<Frame>>,
    sampler: &Arc<dyn Sampler>,
    ctx: &PlaybackContext,
    token: &CancellationToken,
    after_write: impl Fn(Duration),
) -> Result<bool> {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            frame = buffer.take() => frame?,
        };

        match frame {
            Frame::Audio(frame) => {
                let settings = *ctx.settings.borrow();
                let gain = gain_for(&settings);
                tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = sampler.write(&frame, gain, settings.playback_speed_factor) => result?,
                }
                after_write(frame.timestamp);
            }
            Frame::EndOfStream => return Ok(true),
            Frame::Video(_) => {
                return Err(PlayheadError::Internal(
                    "audio buffer yielded a video frame".to_string(),
                ));
            }
        }
    }
}

/// Pace video frames against the wall clock scaled by the speed factor.
async fn present_video_paced(
    p: &VideoPipeline,
    ctx: &PlaybackContext,
    token: &CancellationToken,
    callbacks: &LoopCallbacks,
    counters: &Counters,
) -> Result<bool> {
    let mut anchor: Option<(Instant, Duration)> = None;

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            frame = p.buffer.take() => frame?,
        };

        match frame {
            Frame::Video(frame) => {
                let settings = *ctx.settings.borrow();
                let now = Instant::now();
                let due = match anchor {
                    Some((at, since)) => {
                        let delta = frame.timestamp.saturating_sub(since);
                        at + scale_by_speed(delta, settings.playback_speed_factor)
                    }
                    None => now,
                };

                if due > now {
                    tokio::select! {
                        // Dropping the frame here returns its storage.
                        _ = token.cancelled() => return Ok(false),
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }

                if let Some(renderer) = ctx.renderer.current().await {
                    renderer.present(&frame).await?;
                }
                counters.presented.fetch_add(1, Ordering::Relaxed);

                let timestamp = frame.timestamp;
                anchor = Some((due.max(now), timestamp));
                drop(frame);
                (callbacks.on_timestamp)(timestamp);
            }
            Frame::EndOfStream => return Ok(true),
            Frame::Audio(_) => {
                return Err(PlayheadError::Internal(
                    "video buffer yielded an audio frame".to_string(),
                ));
            }
        }
    }
}

/// Run audio and video presentation concurrently, audio as master clock.
async fn present_audio_video(
    p: &AudioVideoPipeline,
    ctx: &PlaybackContext,
    token: &CancellationToken,
    callbacks: &LoopCallbacks,
    counters: &Counters,
) -> Result<bool> {
    let audio_clock = AtomicU64::new(0);
    let audio_done = AtomicBool::new(false);

    let audio = async {
        let completed = drain_audio_frames(&p.audio_buffer, &p.sampler, ctx, token, |timestamp| {
            audio_clock.store(timestamp.as_micros() as u64, Ordering::Release);
            (callbacks.on_timestamp)(timestamp);
        })
        .await;
        audio_done.store(true, Ordering::Release);
        completed
    };

    let video = present_video_synced(
        &p.video_buffer,
        ctx,
        token,
        callbacks,
        counters,
        &audio_clock,
        &audio_done,
    );

    let (audio_completed, video_completed) = tokio::try_join!(audio, video)?;
    Ok(audio_completed && video_completed)
}

/// Present video frames against the audio master clock.
///
/// Frames behind the clock by more than the tolerance are dropped; frames
/// ahead of it wait in bounded slices so cancellation and clock movement are
/// observed. Once the audio stream ends, pacing falls back to the wall
/// clock so trailing video still presents at the right rate.
#[allow(clippy::too_many_arguments)]
async fn present_video_synced(
    buffer: &Arc<FrameBuffer<Frame>>,
    ctx: &PlaybackContext,
    token: &CancellationToken,
    callbacks: &LoopCallbacks,
    counters: &Counters,
    audio_clock: &AtomicU64,
    audio_done: &AtomicBool,
) -> Result<bool> {
    let mut fallback_anchor: Option<(Instant, Duration)> = None;

    'frames: loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            frame = buffer.take() => frame?,
        };

        match frame {
            Frame::Video(frame) => {
                let settings = *ctx.settings.borrow();

                loop {
                    if audio_done.load(Ordering::Acquire) {
                        let now = Instant::now();
                        let due = match fallback_anchor {
                            Some((at, since)) => {
                                let delta = frame.timestamp.saturating_sub(since);
                                at + scale_by_speed(delta, settings.playback_speed_factor)
                            }
                            None => now,
                        };
                        if due > now {
                            tokio::select! {
                                _ = token.cancelled() => return Ok(false),
                                _ = tokio::time::sleep_until(due) => {}
                            }
                        }
                        fallback_anchor = Some((due.max(now), frame.timestamp));
                        break;
                    }

                    let audio = Duration::from_micros(audio_clock.load(Ordering::Acquire));
                    if frame.timestamp + SYNC_TOLERANCE < audio {
                        trace!(
                            "Dropping late video frame at {:?} (audio at {:?})",
                            frame.timestamp,
                            audio
                        );
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        drop(frame);
                        continue 'frames;
                    }
                    if frame.timestamp > audio + SYNC_TOLERANCE {
                        let lead = frame.timestamp - audio - SYNC_TOLERANCE;
                        let wait =
                            scale_by_speed(lead, settings.playback_speed_factor).min(MAX_SYNC_WAIT);
                        tokio::select! {
                            _ = token.cancelled() => return Ok(false),
                            _ = tokio::time::sleep(wait) => {}
                        }
                        continue;
                    }
                    break;
                }

                if let Some(renderer) = ctx.renderer.current().await {
                    renderer.present(&frame).await?;
                }
                counters.presented.fetch_add(1, Ordering::Relaxed);
                let timestamp = frame.timestamp;
                drop(frame);

                // With the audio stream gone the video side carries the
                // playback position.
                if audio_done.load(Ordering::Acquire) {
                    (callbacks.on_timestamp)(timestamp);
                }
            }
            Frame::EndOfStream => return Ok(true),
            Frame::Audio(_) => {
                return Err(PlayheadError::Internal(
                    "video buffer yielded an audio frame".to_string(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_honors_mute() {
        let mut settings = Settings::default();
        settings.volume = 0.8;
        assert_eq!(gain_for(&settings), 0.8);

        settings.is_muted = true;
        assert_eq!(gain_for(&settings), 0.0);
    }

    #[test]
    fn test_scale_by_speed() {
        let delta = Duration::from_millis(100);
        assert_eq!(scale_by_speed(delta, 1.0), Duration::from_millis(100));
        assert_eq!(scale_by_speed(delta, 2.0), Duration::from_millis(50));
        assert_eq!(scale_by_speed(delta, 0.5), Duration::from_millis(200));
    }
}
