//! Shared fakes for the scenario tests
//!
//! Scripted decoder, sampler, and renderer implementations that let the
//! tests drive the engine end to end without any real codec or device.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use playhead::audio::{Sampler, SamplerFactory};
use playhead::buffer::PoolBlock;
use playhead::decoder::{Decoder, DecoderFactory};
use playhead::media::{AudioFormat, AudioFrame, Frame, Media, VideoFormat, VideoFrame};
use playhead::renderer::Renderer;
use playhead::{PlayheadError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Description of the scripted media a [`FakeDecoderFactory`] serves
#[derive(Clone)]
pub struct MediaSpec {
    pub duration: Duration,
    pub audio: Option<AudioFormat>,
    pub video: Option<VideoFormat>,
    /// Spacing between generated frames
    pub frame_interval: Duration,
    /// Keyframe spacing for keyframes-only seeks; None seeks exactly
    pub audio_keyframe_interval: Option<Duration>,
    pub video_keyframe_interval: Option<Duration>,
    /// Probe latency, for racing Release against Prepare
    pub probe_delay: Duration,
    /// Fail the nth video decode (1-based)
    pub fail_video_decode_at: Option<u64>,
}

impl MediaSpec {
    pub fn audio_only(duration: Duration) -> Self {
        Self {
            duration,
            audio: Some(AudioFormat {
                sample_rate: 48_000,
                channels: 2,
            }),
            video: None,
            frame_interval: Duration::from_millis(50),
            audio_keyframe_interval: None,
            video_keyframe_interval: None,
            probe_delay: Duration::ZERO,
            fail_video_decode_at: None,
        }
    }

    pub fn video_only(duration: Duration) -> Self {
        Self {
            duration,
            audio: None,
            video: Some(VideoFormat {
                width: 64,
                height: 48,
                frame_rate: 10.0,
                buffer_capacity: 64 * 48 * 4,
            }),
            frame_interval: Duration::from_millis(100),
            audio_keyframe_interval: None,
            video_keyframe_interval: Some(Duration::from_secs(1)),
            probe_delay: Duration::ZERO,
            fail_video_decode_at: None,
        }
    }

    pub fn audio_video(duration: Duration) -> Self {
        let mut spec = Self::video_only(duration);
        spec.audio = Some(AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        });
        spec.frame_interval = Duration::from_millis(50);
        spec
    }
}

/// Tracks every decoder the factory opened and whether it was closed
#[derive(Default)]
pub struct DecoderRegistry {
    closed_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl DecoderRegistry {
    pub fn opened(&self) -> usize {
        self.closed_flags.lock().len()
    }

    pub fn all_closed(&self) -> bool {
        self.closed_flags
            .lock()
            .iter()
            .all(|flag| flag.load(Ordering::Acquire))
    }

    fn register(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.closed_flags.lock().push(Arc::clone(&flag));
        flag
    }
}

pub struct FakeDecoderFactory {
    spec: MediaSpec,
    pub registry: Arc<DecoderRegistry>,
}

impl FakeDecoderFactory {
    pub fn new(spec: MediaSpec) -> Self {
        Self {
            spec,
            registry: Arc::new(DecoderRegistry::default()),
        }
    }

    fn media_for(&self, find_audio: bool, find_video: bool) -> Result<Media> {
        let audio = self.spec.audio.filter(|_| find_audio);
        let video = self.spec.video.filter(|_| find_video);
        match (audio, video) {
            (Some(format), Some(video_format)) => Ok(Media::AudioVideo {
                duration: self.spec.duration,
                format,
                video_format,
            }),
            (Some(format), None) => Ok(Media::Audio {
                duration: self.spec.duration,
                format,
            }),
            (None, Some(video_format)) => Ok(Media::Video {
                duration: self.spec.duration,
                video_format,
            }),
            (None, None) => Err(PlayheadError::Probe(
                "no matching streams in media".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DecoderFactory for FakeDecoderFactory {
    async fn probe(&self, _location: &str, find_audio: bool, find_video: bool) -> Result<Media> {
        if self.spec.probe_delay > Duration::ZERO {
            tokio::time::sleep(self.spec.probe_delay).await;
        }
        self.media_for(find_audio, find_video)
    }

    async fn open(
        &self,
        _location: &str,
        find_audio: bool,
        find_video: bool,
        _hardware_acceleration_candidates: &[String],
    ) -> Result<Box<dyn Decoder>> {
        let media = self.media_for(find_audio, find_video)?;
        Ok(Box::new(FakeDecoder {
            media,
            spec: self.spec.clone(),
            position: Duration::ZERO,
            video_decodes: 0,
            closed: self.registry.register(),
        }))
    }
}

pub struct FakeDecoder {
    media: Media,
    spec: MediaSpec,
    position: Duration,
    video_decodes: u64,
    closed: Arc<AtomicBool>,
}

impl FakeDecoder {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlayheadError::Decoder("decoder is closed".to_string()));
        }
        Ok(())
    }

    fn advance(&mut self) -> Option<Duration> {
        if self.position >= self.spec.duration {
            return None;
        }
        let timestamp = self.position;
        self.position += self.spec.frame_interval;
        Some(timestamp)
    }
}

#[async_trait]
impl Decoder for FakeDecoder {
    fn media(&self) -> &Media {
        &self.media
    }

    async fn decode_audio(&mut self) -> Result<Frame> {
        self.ensure_open()?;
        match self.advance() {
            Some(timestamp) => Ok(Frame::Audio(AudioFrame {
                timestamp,
                bytes: Bytes::from_static(&[0u8; 16]),
            })),
            None => Ok(Frame::EndOfStream),
        }
    }

    async fn decode_video(&mut self, mut dest: PoolBlock) -> Result<Frame> {
        self.ensure_open()?;
        self.video_decodes += 1;
        if self.spec.fail_video_decode_at == Some(self.video_decodes) {
            // `dest` drops here and goes back to the pool.
            return Err(PlayheadError::Decoder(
                "injected video decode failure".to_string(),
            ));
        }
        match self.advance() {
            Some(timestamp) => {
                dest.bytes_mut().fill(0x2A);
                Ok(Frame::Video(VideoFrame {
                    timestamp,
                    data: dest,
                }))
            }
            None => Ok(Frame::EndOfStream),
        }
    }

    async fn seek_to(&mut self, timestamp: Duration, keyframes_only: bool) -> Result<Duration> {
        self.ensure_open()?;
        let keyframe_interval = match &self.media {
            Media::Video { .. } => self.spec.video_keyframe_interval,
            _ => self.spec.audio_keyframe_interval,
        };
        let actual = match keyframe_interval {
            Some(interval) if keyframes_only && !interval.is_zero() => {
                let steps = timestamp.as_micros() / interval.as_micros();
                interval * steps as u32
            }
            _ => timestamp,
        };
        self.position = actual;
        Ok(actual)
    }

    async fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.position = Duration::ZERO;
        self.video_decodes = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRecord {
    pub timestamp: Duration,
    pub gain: f32,
    pub speed: f32,
}

/// Sampler that records calls and paces writes with a fixed delay
pub struct FakeSampler {
    pub started: AtomicBool,
    pub flushes: AtomicUsize,
    pub writes: Mutex<Vec<WriteRecord>>,
    pub write_delay: Duration,
    fail_start: AtomicBool,
}

impl FakeSampler {
    pub fn new(write_delay: Duration) -> Self {
        Self {
            started: AtomicBool::new(false),
            flushes: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            write_delay,
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::Release);
    }

    pub fn written_timestamps(&self) -> Vec<Duration> {
        self.writes.lock().iter().map(|w| w.timestamp).collect()
    }
}

#[async_trait]
impl Sampler for FakeSampler {
    async fn start(&self) -> Result<()> {
        if self.fail_start.swap(false, Ordering::AcqRel) {
            return Err(PlayheadError::Sampler("injected start failure".to_string()));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    async fn write(&self, frame: &AudioFrame, gain: f32, speed: f32) -> Result<()> {
        if self.write_delay > Duration::ZERO {
            tokio::time::sleep(self.write_delay).await;
        }
        self.writes.lock().push(WriteRecord {
            timestamp: frame.timestamp,
            gain,
            speed,
        });
        Ok(())
    }
}

pub struct FakeSamplerFactory {
    pub sampler: Arc<FakeSampler>,
}

impl FakeSamplerFactory {
    pub fn new(write_delay: Duration) -> Self {
        Self {
            sampler: Arc::new(FakeSampler::new(write_delay)),
        }
    }
}

#[async_trait]
impl SamplerFactory for FakeSamplerFactory {
    async fn create(&self, _format: &AudioFormat) -> Result<Arc<dyn Sampler>> {
        Ok(Arc::clone(&self.sampler) as Arc<dyn Sampler>)
    }
}

/// Sampler factory that always fails, for prepare-atomicity tests
pub struct FailingSamplerFactory;

#[async_trait]
impl SamplerFactory for FailingSamplerFactory {
    async fn create(&self, _format: &AudioFormat) -> Result<Arc<dyn Sampler>> {
        Err(PlayheadError::Sampler(
            "injected sampler construction failure".to_string(),
        ))
    }
}

/// Renderer that records presented timestamps
#[derive(Default)]
pub struct FakeRenderer {
    pub presented: Mutex<Vec<Duration>>,
}

impl FakeRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn presented_timestamps(&self) -> Vec<Duration> {
        self.presented.lock().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn present(&self, frame: &VideoFrame) -> Result<()> {
        self.presented.lock().push(frame.timestamp);
        Ok(())
    }
}
