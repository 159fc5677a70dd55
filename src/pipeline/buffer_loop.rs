//! Buffer loop: drains decoders into the bounded frame buffers
//!
//! One loop instance exists per prepared media. `start` spawns the producer
//! task(s); `stop` cancels and joins; `close` cancels and detaches. For
//! audio+video media two producer tasks run concurrently and coalesce their
//! progress reports into one strictly increasing buffer timestamp.

use super::{AudioVideoPipeline, LoopCallbacks, Pipeline};
use crate::buffer::{FrameBuffer, FramePool};
use crate::decoder::SharedDecoder;
use crate::media::Frame;
use crate::utils::error::{PlayheadError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Producer side of a pipeline: decodes frames and fills the buffers
pub struct BufferLoop {
    pipeline: Arc<Pipeline>,
    running: Mutex<Option<RunningTask>>,
    buffering: Arc<AtomicBool>,
}

impl BufferLoop {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            running: Mutex::new(None),
            buffering: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the producer task is currently running.
    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    /// Spawn the producer task(s). Fails if already buffering.
    pub fn start(&self, callbacks: LoopCallbacks) -> Result<()> {
        let mut running = self.running.lock();
        if self.buffering.load(Ordering::Acquire) {
            return Err(PlayheadError::InvalidInput(
                "buffer loop is already running".to_string(),
            ));
        }

        debug!("Starting buffer loop");
        let token = CancellationToken::new();
        self.buffering.store(true, Ordering::Release);

        let pipeline = Arc::clone(&self.pipeline);
        let buffering = Arc::clone(&self.buffering);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let result = match &*pipeline {
                Pipeline::Audio(p) => {
                    drain_audio(&p.decoder, &p.buffer, &task_token, |ts| {
                        (callbacks.on_timestamp)(ts)
                    })
                    .await
                }
                Pipeline::Video(p) => {
                    drain_video(&p.decoder, &p.pool, &p.buffer, &task_token, |ts| {
                        (callbacks.on_timestamp)(ts)
                    })
                    .await
                }
                Pipeline::AudioVideo(p) => drain_audio_video(p, &task_token, &callbacks).await,
            };
            buffering.store(false, Ordering::Release);
            match result {
                Ok(true) => {
                    debug!("Buffer loop reached end of media");
                    (callbacks.on_end_of_media)();
                }
                Ok(false) => debug!("Buffer loop cancelled"),
                Err(e) => {
                    warn!("Buffer loop failed: {}", e);
                    (callbacks.on_exception)(PlayheadError::buffer_loop(e));
                }
            }
        });

        *running = Some(RunningTask { token, handle });
        Ok(())
    }

    /// Cancel the producer task(s) and wait for them to terminate.
    pub async fn stop(&self) {
        let task = self.running.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!("Buffer loop task ended abnormally: {}", e);
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

/// Decode audio frames into `buffer` until end of stream.
///
/// Returns `Ok(true)` on a completed stream, `Ok(false)` when cancelled.
async fn drain_audio(
    decoder: &SharedDecoder,
    buffer: &Arc<FrameBuffer<Frame>>,
    token: &CancellationToken,
    report: impl Fn(Duration),
) -> Result<bool> {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            frame = async { decoder.lock().await.decode_audio().await } => frame?,
        };

        match frame {
            Frame::Audio(frame) => {
                let timestamp = frame.timestamp;
                tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = buffer.put(Frame::Audio(frame)) => result?,
                }
                // Yield between the put and the report so cancellation is
                // observed even when the decoder never suspends.
                tokio::task::yield_now().await;
                if token.is_cancelled() {
                    return Ok(false);
                }
                report(timestamp);
            }
            Frame::EndOfStream => {
                tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = buffer.put(Frame::EndOfStream) => result?,
                }
                return Ok(true);
            }
            Frame::Video(_) => {
                return Err(PlayheadError::Internal(
                    "audio decode produced a video frame".to_string(),
                ));
            }
        }
    }
}

/// Decode video frames through the pool into `buffer` until end of stream.
async fn drain_video(
    decoder: &SharedDecoder,
    pool: &Arc<FramePool>,
    buffer: &Arc<FrameBuffer<Frame>>,
    token: &CancellationToken,
    report: impl Fn(Duration),
) -> Result<bool> {
    loop {
        let block = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            block = pool.acquire() => block?,
        };

        // On a decode error the block is dropped inside the call and goes
        // back to the pool before the failure surfaces.
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            frame = async { decoder.lock().await.decode_video(block).await } => frame?,
        };

        match frame {
            Frame::Video(frame) => {
                let timestamp = frame.timestamp;
                tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = buffer.put(Frame::Video(frame)) => result?,
                }
                tokio::task::yield_now().await;
                if token.is_cancelled() {
                    return Ok(false);
                }
                report(timestamp);
            }
            Frame::EndOfStream => {
                tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = buffer.put(Frame::EndOfStream) => result?,
                }
                return Ok(true);
            }
            Frame::Audio(_) => {
                return Err(PlayheadError::Internal(
                    "video decode produced an audio frame".to_string(),
                ));
            }
        }
    }
}

/// Run the audio and video producers concurrently.
///
/// Both report through a shared high-water mark so the emitted buffer
/// timestamp is strictly increasing across the two streams, and end of media
/// is reported only once both streams are exhausted.
async fn drain_audio_video(
    p: &AudioVideoPipeline,
    token: &CancellationToken,
    callbacks: &LoopCallbacks,
) -> Result<bool> {
    let high_water = AtomicU64::new(0);

    let report = |timestamp: Duration| {
        let micros = timestamp.as_micros() as u64;
        let mut seen = high_water.load(Ordering::Acquire);
        while micros > seen {
            match high_water.compare_exchange(seen, micros, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    (callbacks.on_timestamp)(timestamp);
                    break;
                }
                Err(observed) => seen = observed,
            }
        }
    };

    let (audio_done, video_done) = tokio::try_join!(
        drain_audio(&p.audio_decoder, &p.audio_buffer, token, &report),
        drain_video(&p.video_decoder, &p.video_pool, &p.video_buffer, token, &report),
    )?;

    Ok(audio_done && video_done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestAtomicU64;

    // The coalescing rule alone, exercised without a pipeline.
    #[test]
    fn test_high_water_reporting_is_strictly_increasing() {
        let high_water = TestAtomicU64::new(0);
        let reported = parking_lot::Mutex::new(Vec::new());

        let report = |timestamp: Duration| {
            let micros = timestamp.as_micros() as u64;
            let mut seen = high_water.load(Ordering::Acquire);
            while micros > seen {
                match high_water.compare_exchange(
                    seen,
                    micros,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        reported.lock().push(micros);
                        break;
                    }
                    Err(observed) => seen = observed,
                }
            }
        };

        for micros in [10u64, 5, 10, 20, 15, 25] {
            report(Duration::from_micros(micros));
        }

        let reported = reported.into_inner();
        assert_eq!(reported, vec![10, 20, 25]);
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
    }
}
