//! Playhead - a media playback engine core
//!
//! Playhead coordinates decoding, frame buffering, audio sampling, and
//! clock-driven rendering for audio, video, and audio+video media. The
//! engine is built around a deterministic state machine that serializes
//! commands against asynchronously firing loop events, bounded buffers with
//! pooled video-frame storage between the producer and consumer loops, and
//! coordinated seek/flush semantics that rejoin the audio and video clocks
//! at a common timestamp.
//!
//! Concrete decoders, audio output, and rendering are supplied by the
//! embedder through the [`decoder`], [`audio`], and [`renderer`] contracts;
//! the engine owns everything in between.

pub mod audio;
pub mod buffer;
pub mod decoder;
pub mod media;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod renderer;
pub mod utils;

pub use buffer::{FrameBuffer, FramePool, PoolBlock};
pub use media::{AudioFormat, AudioFrame, Frame, Media, VideoFormat, VideoFrame};
pub use player::{
    Command, PlayerController, PlayerControllerBuilder, PlayerEvent, PlayerState, Settings, Status,
    MAX_PLAYBACK_SPEED_FACTOR, MIN_PLAYBACK_SPEED_FACTOR,
};
pub use queue::{MediaQueue, RepeatMode};
pub use utils::error::{PlayheadError, Result};
