//! Player module for Playhead
//!
//! This module holds the controller that orchestrates pipelines and loops,
//! together with the vocabulary of the state machine: commands, statuses,
//! settings, and the event bus payloads.

mod controller;

pub use controller::PlayerController;

use crate::audio::SamplerFactory;
use crate::decoder::DecoderFactory;
use crate::media::Media;
use crate::utils::error::{PlayheadError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Lowest accepted playback speed factor
pub const MIN_PLAYBACK_SPEED_FACTOR: f32 = 0.25;

/// Highest accepted playback speed factor
pub const MAX_PLAYBACK_SPEED_FACTOR: f32 = 4.0;

/// Playback status while media is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A command is moving between statuses
    Transition,

    /// Playing: both loops run and timestamps advance
    Playing,

    /// Paused: presentation stopped, buffering continues
    Paused,

    /// Loaded and idle at the start position
    Stopped,

    /// Playback ran to end of media
    Completed,

    /// A seek is repositioning the decoders
    Seeking,

    /// The session is being torn down
    Releasing,
}

/// Observable controller state
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    /// No media loaded
    Empty,

    /// Probe and construction in progress
    Preparing,

    /// Media loaded; `status` tracks playback
    Ready { media: Media, status: Status },
}

impl PlayerState {
    pub fn status(&self) -> Option<Status> {
        match self {
            PlayerState::Ready { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Commands accepted by [`PlayerController::execute`]
///
/// A command arriving in a status it is not defined for is silently dropped;
/// that is the reconciliation rule for fast user input against a
/// transitioning engine.
#[derive(Debug, Clone)]
pub enum Command {
    /// Probe `location` and build the pipeline. Buffer sizes are in frames;
    /// a size of zero disables that stream.
    Prepare {
        location: String,
        audio_buffer_size: usize,
        video_buffer_size: usize,
        hardware_acceleration_candidates: Vec<String>,
    },
    Play,
    Pause,
    Resume,
    Stop,
    SeekTo {
        timestamp: Duration,
        keyframes_only: bool,
    },
    Release,
}

/// Live playback settings
///
/// Observed by the playback loop as a snapshot per frame; changes take
/// effect on subsequent frames with no resynchronization.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Linear volume, 0.0 to 1.0
    pub volume: f32,

    /// Mute passes a gain of 0 to the sampler without touching `volume`
    pub is_muted: bool,

    /// Temporal scale from frame timestamps to wall time
    pub playback_speed_factor: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 0.7,
            is_muted: false,
            playback_speed_factor: 1.0,
        }
    }
}

impl Settings {
    /// Check the value ranges; invalid settings never replace current ones.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(PlayheadError::InvalidInput(format!(
                "volume {} outside [0, 1]",
                self.volume
            )));
        }
        if !(MIN_PLAYBACK_SPEED_FACTOR..=MAX_PLAYBACK_SPEED_FACTOR)
            .contains(&self.playback_speed_factor)
        {
            return Err(PlayheadError::InvalidInput(format!(
                "playback speed factor {} outside [{}, {}]",
                self.playback_speed_factor, MIN_PLAYBACK_SPEED_FACTOR, MAX_PLAYBACK_SPEED_FACTOR
            )));
        }
        Ok(())
    }
}

/// Events published on the controller's broadcast bus
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A loop surfaced a failure; the controller auto-releases after this
    Error(PlayheadError),

    /// The buffer loop finished a run (fires once per run, so a seek that
    /// restarts buffering may fire it again)
    BufferComplete,

    /// Prepare finished successfully
    MediaPrepared { media: Media },

    /// A seek settled on its effective timestamp
    SeekCompleted { timestamp: Duration },
}

/// Builder wiring the external collaborators into a controller
pub struct PlayerControllerBuilder {
    decoder_factory: Option<Arc<dyn DecoderFactory>>,
    sampler_factory: Option<Arc<dyn SamplerFactory>>,
    settings: Settings,
}

impl PlayerControllerBuilder {
    pub fn new() -> Self {
        Self {
            decoder_factory: None,
            sampler_factory: None,
            settings: Settings::default(),
        }
    }

    pub fn with_decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    pub fn with_sampler_factory(mut self, factory: Arc<dyn SamplerFactory>) -> Self {
        self.sampler_factory = Some(factory);
        self
    }

    /// Initial settings; `reset_settings` reinstates these.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<PlayerController> {
        self.settings.validate()?;
        let decoder_factory = self.decoder_factory.ok_or_else(|| {
            PlayheadError::InvalidInput("a decoder factory is required".to_string())
        })?;
        let sampler_factory = self.sampler_factory.ok_or_else(|| {
            PlayheadError::InvalidInput("a sampler factory is required".to_string())
        })?;
        Ok(PlayerController::new(
            decoder_factory,
            sampler_factory,
            self.settings,
        ))
    }
}

impl Default for PlayerControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.volume, 0.7);
        assert!(!settings.is_muted);
        assert_eq!(settings.playback_speed_factor, 1.0);
        settings.validate().unwrap();
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();

        settings.volume = 1.5;
        assert!(settings.validate().is_err());
        settings.volume = 1.0;
        settings.validate().unwrap();

        settings.playback_speed_factor = 8.0;
        assert!(settings.validate().is_err());
        settings.playback_speed_factor = MAX_PLAYBACK_SPEED_FACTOR;
        settings.validate().unwrap();
        settings.playback_speed_factor = MIN_PLAYBACK_SPEED_FACTOR;
        settings.validate().unwrap();
    }

    #[test]
    fn test_state_status() {
        assert_eq!(PlayerState::Empty.status(), None);
        assert_eq!(PlayerState::Preparing.status(), None);

        let ready = PlayerState::Ready {
            media: Media::Audio {
                duration: Duration::from_secs(1),
                format: crate::media::AudioFormat {
                    sample_rate: 44_100,
                    channels: 2,
                },
            },
            status: Status::Stopped,
        };
        assert_eq!(ready.status(), Some(Status::Stopped));
    }
}
