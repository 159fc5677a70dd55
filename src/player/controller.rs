//! Player controller implementation for Playhead
//!
//! The controller owns the state machine that serializes commands against
//! asynchronously firing loop events. One command executes at a time under
//! the command mutex; loop completions and failures arrive on an internal
//! channel drained by a supervisor task, so a loop callback never re-enters
//! the command mutex from inside a loop task.

use crate::audio::SamplerFactory;
use crate::buffer::{FrameBuffer, FramePool};
use crate::decoder::{share, DecoderFactory};
use crate::media::Media;
use crate::pipeline::{
    AudioPipeline, AudioVideoPipeline, BufferLoop, LoopCallbacks, Pipeline, PlaybackContext,
    PlaybackLoop, PlaybackStats, VideoPipeline,
};
use crate::player::{Command, PlayerEvent, PlayerState, Settings, Status};
use crate::renderer::{Renderer, RendererSlot};
use crate::utils::error::{PlayheadError, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Blocks the video pool holds beyond the buffer capacity: one in decode
/// and one in presentation.
const POOL_HEADROOM: usize = 2;

/// Event bus depth; slow subscribers lag rather than block the engine.
const EVENT_BUS_CAPACITY: usize = 64;

/// Signals from loop tasks to the supervisor
///
/// Each carries the epoch of the session whose loops emitted it, so a
/// signal that outlives its session (a loop unwinding while a release or a
/// fresh prepare runs) is recognized as stale and dropped.
enum LoopSignal {
    BufferComplete { epoch: u64 },
    PlaybackComplete { epoch: u64 },
    Failure { epoch: u64, error: PlayheadError },
}

/// The resources owned while one media is loaded
struct Session {
    epoch: u64,
    media: Media,
    pipeline: Arc<Pipeline>,
    buffer_loop: Arc<BufferLoop>,
    playback_loop: Arc<PlaybackLoop>,
    status: Status,
}

/// Main player controller
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct PlayerController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    decoder_factory: Arc<dyn DecoderFactory>,
    sampler_factory: Arc<dyn SamplerFactory>,
    initial_settings: Settings,

    /// The command mutex: holding this lock is executing a command.
    session: Mutex<Option<Session>>,

    /// Cancellation handle of the currently-executing command task.
    current_command: parking_lot::Mutex<Option<CancellationToken>>,

    state_tx: watch::Sender<PlayerState>,
    settings_tx: watch::Sender<Settings>,
    buffer_timestamp_tx: watch::Sender<Duration>,
    playback_timestamp_tx: watch::Sender<Duration>,
    events_tx: broadcast::Sender<PlayerEvent>,

    renderer: Arc<RendererSlot>,
    signal_tx: mpsc::UnboundedSender<LoopSignal>,
    epochs: AtomicU64,
    closed: AtomicBool,
}

impl PlayerController {
    pub(crate) fn new(
        decoder_factory: Arc<dyn DecoderFactory>,
        sampler_factory: Arc<dyn SamplerFactory>,
        settings: Settings,
    ) -> Self {
        let (state_tx, _) = watch::channel(PlayerState::Empty);
        let (settings_tx, _) = watch::channel(settings);
        let (buffer_timestamp_tx, _) = watch::channel(Duration::ZERO);
        let (playback_timestamp_tx, _) = watch::channel(Duration::ZERO);
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ControllerInner {
            decoder_factory,
            sampler_factory,
            initial_settings: settings,
            session: Mutex::new(None),
            current_command: parking_lot::Mutex::new(None),
            state_tx,
            settings_tx,
            buffer_timestamp_tx,
            playback_timestamp_tx,
            events_tx,
            renderer: Arc::new(RendererSlot::new()),
            signal_tx,
            epochs: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        ControllerInner::spawn_supervisor(Arc::downgrade(&inner), signal_rx);
        Self { inner }
    }

    /// Run one command to completion.
    ///
    /// Commands serialize on the command mutex; a command arriving in a
    /// status it is not defined for returns success without side effects.
    pub async fn execute(&self, command: Command) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PlayheadError::InvalidInput(
                "player controller is closed".to_string(),
            ));
        }
        match command {
            Command::Release => self.inner.release().await,
            other => self.inner.run_mutating(other).await,
        }
    }

    /// Attach a renderer. Fails if one is already attached.
    pub async fn attach_renderer(&self, renderer: Arc<dyn Renderer>) -> Result<()> {
        self.inner.renderer.attach(renderer).await
    }

    /// Detach and return the current renderer so the caller can close it.
    pub async fn detach_renderer(&self) -> Option<Arc<dyn Renderer>> {
        self.inner.renderer.detach().await
    }

    /// Validate and atomically replace the live settings.
    pub fn change_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        debug!("Settings changed: {:?}", settings);
        self.inner.settings_tx.send_replace(settings);
        Ok(())
    }

    /// Reinstate the settings the controller was built with.
    pub fn reset_settings(&self) {
        self.inner.settings_tx.send_replace(self.inner.initial_settings);
    }

    /// Release any loaded media and shut the controller down. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing player controller");
        self.inner.release().await
    }

    pub fn state(&self) -> watch::Receiver<PlayerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> PlayerState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn settings(&self) -> watch::Receiver<Settings> {
        self.inner.settings_tx.subscribe()
    }

    pub fn current_settings(&self) -> Settings {
        *self.inner.settings_tx.borrow()
    }

    /// Progress of the buffer loop; emitted in Playing and Paused.
    pub fn buffer_timestamp(&self) -> watch::Receiver<Duration> {
        self.inner.buffer_timestamp_tx.subscribe()
    }

    /// Progress of presentation; emitted in Playing.
    pub fn playback_timestamp(&self) -> watch::Receiver<Duration> {
        self.inner.playback_timestamp_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Presentation counters of the current session, if any.
    pub async fn playback_stats(&self) -> Option<PlaybackStats> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.playback_loop.stats())
    }
}

impl ControllerInner {
    fn spawn_supervisor(
        weak: Weak<ControllerInner>,
        mut signal_rx: mpsc::UnboundedReceiver<LoopSignal>,
    ) {
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_signal(signal).await;
            }
        });
    }

    async fn handle_signal(self: Arc<Self>, signal: LoopSignal) {
        match signal {
            LoopSignal::BufferComplete { epoch } => {
                if self.session_epoch().await == Some(epoch) {
                    debug!("Buffering complete");
                    let _ = self.events_tx.send(PlayerEvent::BufferComplete);
                }
            }
            LoopSignal::PlaybackComplete { epoch } => self.complete_playback(epoch).await,
            LoopSignal::Failure { epoch, error } => {
                if self.session_epoch().await != Some(epoch) {
                    debug!("Ignoring failure from a released session: {}", error);
                    return;
                }
                error!("Loop failure: {}", error);
                let _ = self.events_tx.send(PlayerEvent::Error(error));
                if let Err(e) = self.release_session(Some(epoch)).await {
                    warn!("Release after loop failure reported: {}", e);
                }
            }
        }
    }

    async fn session_epoch(&self) -> Option<u64> {
        self.session.lock().await.as_ref().map(|sess| sess.epoch)
    }

    /// Transition Playing -> Completed once the playback loop drains out.
    async fn complete_playback(self: &Arc<Self>, epoch: u64) {
        let mut session = self.session.lock().await;
        let Some(sess) = session.as_mut() else { return };
        if sess.epoch != epoch || sess.status != Status::Playing {
            // A command got there first; the completion is stale.
            return;
        }
        info!("Playback completed");
        if let Some(sampler) = sess.pipeline.sampler() {
            if let Err(e) = sampler.stop().await {
                warn!("Sampler stop at completion failed: {}", e);
            }
        }
        self.set_status(sess, Status::Completed);
        self.playback_timestamp_tx.send_replace(sess.media.duration());
    }

    async fn run_mutating(self: &Arc<Self>, command: Command) -> Result<()> {
        let token = CancellationToken::new();

        let result = {
            let mut session = self.session.lock().await;
            *self.current_command.lock() = Some(token.clone());
            let outcome = if token.is_cancelled() {
                Err(PlayheadError::Cancelled)
            } else {
                match command {
                    Command::Prepare {
                        location,
                        audio_buffer_size,
                        video_buffer_size,
                        hardware_acceleration_candidates,
                    } => {
                        self.prepare(
                            &mut session,
                            &location,
                            audio_buffer_size,
                            video_buffer_size,
                            &hardware_acceleration_candidates,
                            &token,
                        )
                        .await
                    }
                    Command::Play => self.play(&mut session).await,
                    Command::Pause => self.pause(&mut session).await,
                    Command::Resume => self.resume(&mut session).await,
                    Command::Stop => self.stop_playback(&mut session).await,
                    Command::SeekTo {
                        timestamp,
                        keyframes_only,
                    } => {
                        self.seek(&mut session, timestamp, keyframes_only, &token)
                            .await
                    }
                    Command::Release => unreachable!("release has its own path"),
                }
            };
            self.current_command.lock().take();
            outcome
        };

        result
    }

    fn set_status(&self, session: &mut Session, status: Status) {
        session.status = status;
        self.state_tx.send_replace(PlayerState::Ready {
            media: session.media.clone(),
            status,
        });
    }

    fn playback_context(&self) -> PlaybackContext {
        PlaybackContext {
            settings: self.settings_tx.subscribe(),
            renderer: Arc::clone(&self.renderer),
        }
    }

    /// Callbacks the buffer loop reports through. Timestamps pass the gate
    /// only in Playing and Paused.
    fn buffer_callbacks(self: &Arc<Self>, epoch: u64) -> LoopCallbacks {
        let on_timestamp = {
            let inner = Arc::clone(self);
            Arc::new(move |timestamp: Duration| {
                let gated_in = matches!(
                    inner.state_tx.borrow().status(),
                    Some(Status::Playing | Status::Paused)
                );
                if gated_in {
                    inner.buffer_timestamp_tx.send_replace(timestamp);
                }
            })
        };
        let on_end_of_media = {
            let signal_tx = self.signal_tx.clone();
            Arc::new(move || {
                let _ = signal_tx.send(LoopSignal::BufferComplete { epoch });
            })
        };
        let on_exception = {
            let signal_tx = self.signal_tx.clone();
            Arc::new(move |error: PlayheadError| {
                let _ = signal_tx.send(LoopSignal::Failure { epoch, error });
            })
        };
        LoopCallbacks {
            on_timestamp,
            on_end_of_media,
            on_exception,
        }
    }

    /// Callbacks the playback loop reports through. Timestamps pass the
    /// gate only in Playing.
    fn playback_callbacks(self: &Arc<Self>, epoch: u64) -> LoopCallbacks {
        let on_timestamp = {
            let inner = Arc::clone(self);
            Arc::new(move |timestamp: Duration| {
                if inner.state_tx.borrow().status() == Some(Status::Playing) {
                    inner.playback_timestamp_tx.send_replace(timestamp);
                }
            })
        };
        let on_end_of_media = {
            let signal_tx = self.signal_tx.clone();
            Arc::new(move || {
                let _ = signal_tx.send(LoopSignal::PlaybackComplete { epoch });
            })
        };
        let on_exception = {
            let signal_tx = self.signal_tx.clone();
            Arc::new(move |error: PlayheadError| {
                let _ = signal_tx.send(LoopSignal::Failure { epoch, error });
            })
        };
        LoopCallbacks {
            on_timestamp,
            on_end_of_media,
            on_exception,
        }
    }

    fn zero_timestamps(&self) {
        self.buffer_timestamp_tx.send_replace(Duration::ZERO);
        self.playback_timestamp_tx.send_replace(Duration::ZERO);
    }

    async fn prepare(
        self: &Arc<Self>,
        session: &mut Option<Session>,
        location: &str,
        audio_buffer_size: usize,
        video_buffer_size: usize,
        hardware_acceleration_candidates: &[String],
        token: &CancellationToken,
    ) -> Result<()> {
        if session.is_some() {
            debug!("Prepare ignored: media already loaded");
            return Ok(());
        }
        if audio_buffer_size == 0 && video_buffer_size == 0 {
            return Err(PlayheadError::InvalidInput(
                "at least one of audio and video must be enabled".to_string(),
            ));
        }

        info!("Preparing {}", location);
        self.state_tx.send_replace(PlayerState::Preparing);

        match self
            .construct_session(
                location,
                audio_buffer_size,
                video_buffer_size,
                hardware_acceleration_candidates,
                token,
            )
            .await
        {
            Ok(new_session) => {
                self.zero_timestamps();
                let media = new_session.media.clone();
                self.state_tx.send_replace(PlayerState::Ready {
                    media: media.clone(),
                    status: Status::Stopped,
                });
                *session = Some(new_session);
                let _ = self.events_tx.send(PlayerEvent::MediaPrepared { media });
                Ok(())
            }
            Err(e) => {
                warn!("Prepare failed: {}", e);
                self.state_tx.send_replace(PlayerState::Empty);
                Err(e)
            }
        }
    }

    /// Probe the media and build the matching pipeline shape.
    ///
    /// Construction is checkpointed: a failure or cancellation at any step
    /// closes everything built so far, in reverse order.
    async fn construct_session(
        &self,
        location: &str,
        audio_buffer_size: usize,
        video_buffer_size: usize,
        hw_candidates: &[String],
        token: &CancellationToken,
    ) -> Result<Session> {
        let find_audio = audio_buffer_size > 0;
        let find_video = video_buffer_size > 0;

        let media = self
            .decoder_factory
            .probe(location, find_audio, find_video)
            .await?;
        if media.has_audio() && !find_audio {
            return Err(PlayheadError::Probe(
                "probe returned an audio stream that was not requested".to_string(),
            ));
        }
        if media.has_video() && !find_video {
            return Err(PlayheadError::Probe(
                "probe returned a video stream that was not requested".to_string(),
            ));
        }
        if let Some(video_format) = media.video_format() {
            if video_format.buffer_capacity == 0 {
                return Err(PlayheadError::Probe(
                    "probe returned a zero-sized video frame capacity".to_string(),
                ));
            }
        }
        if token.is_cancelled() {
            return Err(PlayheadError::Cancelled);
        }

        let pipeline = match &media {
            Media::Audio { format, .. } => {
                let mut decoder = self
                    .decoder_factory
                    .open(location, true, false, hw_candidates)
                    .await?;
                if token.is_cancelled() {
                    let _ = decoder.close().await;
                    return Err(PlayheadError::Cancelled);
                }
                let sampler = match self.sampler_factory.create(format).await {
                    Ok(sampler) => sampler,
                    Err(e) => {
                        let _ = decoder.close().await;
                        return Err(e);
                    }
                };
                Pipeline::Audio(AudioPipeline {
                    decoder: share(decoder),
                    buffer: Arc::new(FrameBuffer::new(audio_buffer_size)),
                    sampler,
                })
            }

            Media::Video { video_format, .. } => {
                let mut decoder = self
                    .decoder_factory
                    .open(location, false, true, hw_candidates)
                    .await?;
                if token.is_cancelled() {
                    let _ = decoder.close().await;
                    return Err(PlayheadError::Cancelled);
                }
                Pipeline::Video(VideoPipeline {
                    decoder: share(decoder),
                    pool: Arc::new(FramePool::new(
                        video_buffer_size + POOL_HEADROOM,
                        video_format.buffer_capacity,
                    )),
                    buffer: Arc::new(FrameBuffer::new(video_buffer_size)),
                })
            }

            Media::AudioVideo {
                format,
                video_format,
                ..
            } => {
                let mut audio_decoder = self
                    .decoder_factory
                    .open(location, true, false, hw_candidates)
                    .await?;
                let mut video_decoder = match self
                    .decoder_factory
                    .open(location, false, true, hw_candidates)
                    .await
                {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        let _ = audio_decoder.close().await;
                        return Err(e);
                    }
                };
                if token.is_cancelled() {
                    let _ = video_decoder.close().await;
                    let _ = audio_decoder.close().await;
                    return Err(PlayheadError::Cancelled);
                }
                let sampler = match self.sampler_factory.create(format).await {
                    Ok(sampler) => sampler,
                    Err(e) => {
                        let _ = video_decoder.close().await;
                        let _ = audio_decoder.close().await;
                        return Err(e);
                    }
                };
                Pipeline::AudioVideo(AudioVideoPipeline {
                    audio_decoder: share(audio_decoder),
                    video_decoder: share(video_decoder),
                    audio_buffer: Arc::new(FrameBuffer::new(audio_buffer_size)),
                    video_buffer: Arc::new(FrameBuffer::new(video_buffer_size)),
                    video_pool: Arc::new(FramePool::new(
                        video_buffer_size + POOL_HEADROOM,
                        video_format.buffer_capacity,
                    )),
                    sampler,
                })
            }
        };

        let pipeline = Arc::new(pipeline);
        Ok(Session {
            epoch: self.epochs.fetch_add(1, Ordering::Relaxed) + 1,
            media,
            buffer_loop: Arc::new(BufferLoop::new(Arc::clone(&pipeline))),
            playback_loop: Arc::new(PlaybackLoop::new(Arc::clone(&pipeline))),
            pipeline,
            status: Status::Stopped,
        })
    }

    async fn play(self: &Arc<Self>, session: &mut Option<Session>) -> Result<()> {
        let Some(sess) = session.as_mut() else {
            return Ok(());
        };
        if sess.status != Status::Stopped || !sess.media.is_continuous() {
            return Ok(());
        }

        info!("Starting playback");
        self.set_status(sess, Status::Transition);

        let started: Result<()> = async {
            if let Some(sampler) = sess.pipeline.sampler() {
                sampler.start().await?;
            }
            // The consumer must be draining before the producer starts.
            sess.playback_loop
                .start(self.playback_context(), self.playback_callbacks(sess.epoch))?;
            sess.buffer_loop.start(self.buffer_callbacks(sess.epoch))?;
            Ok(())
        }
        .await;

        match started {
            Ok(()) => {
                self.set_status(sess, Status::Playing);
                Ok(())
            }
            Err(e) => {
                sess.playback_loop.stop().await;
                sess.buffer_loop.stop().await;
                self.set_status(sess, Status::Stopped);
                Err(e)
            }
        }
    }

    async fn pause(self: &Arc<Self>, session: &mut Option<Session>) -> Result<()> {
        let Some(sess) = session.as_mut() else {
            return Ok(());
        };
        if sess.status != Status::Playing {
            return Ok(());
        }

        info!("Pausing playback");
        self.set_status(sess, Status::Transition);

        sess.playback_loop.stop().await;
        let mut result = Ok(());
        if let Some(sampler) = sess.pipeline.sampler() {
            result = sampler.stop().await;
        }

        // The buffer loop keeps filling while paused.
        self.set_status(sess, Status::Paused);
        result
    }

    async fn resume(self: &Arc<Self>, session: &mut Option<Session>) -> Result<()> {
        let Some(sess) = session.as_mut() else {
            return Ok(());
        };
        if sess.status != Status::Paused {
            return Ok(());
        }

        info!("Resuming playback");
        self.set_status(sess, Status::Transition);

        let started: Result<()> = async {
            if let Some(sampler) = sess.pipeline.sampler() {
                sampler.start().await?;
            }
            sess.playback_loop
                .start(self.playback_context(), self.playback_callbacks(sess.epoch))?;
            Ok(())
        }
        .await;

        match started {
            Ok(()) => {
                self.set_status(sess, Status::Playing);
                Ok(())
            }
            Err(e) => {
                sess.playback_loop.stop().await;
                self.set_status(sess, Status::Paused);
                Err(e)
            }
        }
    }

    async fn stop_playback(self: &Arc<Self>, session: &mut Option<Session>) -> Result<()> {
        let Some(sess) = session.as_mut() else {
            return Ok(());
        };
        if !matches!(
            sess.status,
            Status::Playing | Status::Paused | Status::Completed | Status::Seeking
        ) {
            return Ok(());
        }

        info!("Stopping playback");
        self.set_status(sess, Status::Transition);

        sess.playback_loop.stop().await;
        sess.buffer_loop.stop().await;

        let mut first_error: Option<PlayheadError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        if let Some(sampler) = sess.pipeline.sampler() {
            record(sampler.stop().await);
            record(sampler.flush().await);
        }
        sess.pipeline.clear_buffers();
        if let Some(pool) = sess.pipeline.video_pool() {
            record(pool.reset());
        }
        record(sess.pipeline.reset_decoders().await);

        self.zero_timestamps();
        self.set_status(sess, Status::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn seek(
        self: &Arc<Self>,
        session: &mut Option<Session>,
        timestamp: Duration,
        keyframes_only: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let Some(sess) = session.as_mut() else {
            return Ok(());
        };
        if !matches!(
            sess.status,
            Status::Playing | Status::Paused | Status::Stopped | Status::Completed | Status::Seeking
        ) {
            return Ok(());
        }
        if !sess.media.is_continuous() {
            return Ok(());
        }

        let target = timestamp.min(sess.media.duration());
        info!("Seeking to {:?} (keyframes_only: {})", target, keyframes_only);
        self.set_status(sess, Status::Transition);

        sess.playback_loop.stop().await;
        sess.buffer_loop.stop().await;

        if let Some(sampler) = sess.pipeline.sampler() {
            if let Err(e) = sampler.stop().await {
                warn!("Sampler stop before seek failed: {}", e);
            }
            if let Err(e) = sampler.flush().await {
                self.set_status(sess, Status::Paused);
                return Err(e);
            }
        }
        sess.pipeline.clear_buffers();
        if let Some(pool) = sess.pipeline.video_pool() {
            if let Err(e) = pool.reset() {
                self.set_status(sess, Status::Paused);
                return Err(e);
            }
        }
        if token.is_cancelled() {
            self.set_status(sess, Status::Paused);
            return Err(PlayheadError::Cancelled);
        }

        self.set_status(sess, Status::Seeking);
        let actual = match sess.pipeline.seek_decoders(target, keyframes_only).await {
            Ok(actual) => actual,
            Err(e) => {
                self.set_status(sess, Status::Paused);
                return Err(e);
            }
        };
        debug!("Seek settled at {:?}", actual);

        // Effective post-seek position is forced into both observables
        // regardless of status gating.
        self.buffer_timestamp_tx.send_replace(actual);
        self.playback_timestamp_tx.send_replace(actual);

        let restarted = sess.buffer_loop.start(self.buffer_callbacks(sess.epoch));
        self.set_status(sess, Status::Paused);
        restarted?;

        let _ = self
            .events_tx
            .send(PlayerEvent::SeekCompleted { timestamp: actual });
        Ok(())
    }

    /// Tear the session down to Empty.
    ///
    /// Cancels the currently-executing command first and joins it by taking
    /// the command mutex; a cancelled prepare unwinds its own partial
    /// construction before the mutex is released.
    async fn release(self: &Arc<Self>) -> Result<()> {
        let current = self.current_command.lock().take();
        if let Some(token) = current {
            token.cancel();
        }
        self.release_session(None).await
    }

    /// The shared teardown. With `only_epoch` set, the session is torn down
    /// only if it is still the one the caller meant.
    async fn release_session(&self, only_epoch: Option<u64>) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(expected) = only_epoch {
            if session.as_ref().map(|sess| sess.epoch) != Some(expected) {
                return Ok(());
            }
        }
        let Some(sess) = session.take() else {
            // Nothing loaded, or a cancelled prepare already unwound.
            self.state_tx.send_replace(PlayerState::Empty);
            return Ok(());
        };

        info!("Releasing media session");
        self.state_tx.send_replace(PlayerState::Ready {
            media: sess.media.clone(),
            status: Status::Releasing,
        });

        sess.playback_loop.close();
        sess.buffer_loop.close();
        let result = sess.pipeline.close().await;

        self.zero_timestamps();
        self.state_tx.send_replace(PlayerState::Empty);
        result
    }
}
