//! Media model for Playhead
//!
//! Probed media descriptions and the decoded frame types that flow from the
//! decoders through the bounded buffers to the presentation sinks.

mod frame;

pub use frame::{AudioFrame, Frame, VideoFrame};

use std::time::Duration;

/// Audio stream format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,
}

/// Video stream format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frame rate (frames per second)
    pub frame_rate: f32,

    /// Bytes per decoded frame
    pub buffer_capacity: usize,
}

impl VideoFormat {
    /// Nominal duration of a single frame, or zero for a degenerate rate.
    pub fn frame_duration(&self) -> Duration {
        if self.frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.frame_rate as f64)
        } else {
            Duration::ZERO
        }
    }
}

/// Probed media, tagged by which streams it carries
#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    /// Audio-only media
    Audio {
        duration: Duration,
        format: AudioFormat,
    },

    /// Video-only media
    Video {
        duration: Duration,
        video_format: VideoFormat,
    },

    /// Media with both an audio and a video stream
    AudioVideo {
        duration: Duration,
        format: AudioFormat,
        video_format: VideoFormat,
    },
}

impl Media {
    /// Total duration of the media.
    pub fn duration(&self) -> Duration {
        match self {
            Media::Audio { duration, .. }
            | Media::Video { duration, .. }
            | Media::AudioVideo { duration, .. } => *duration,
        }
    }

    /// Whether the media can be played, paused, and seeked.
    ///
    /// Non-continuous media (e.g. single-image streams) are valid but
    /// playback commands no-op on them.
    pub fn is_continuous(&self) -> bool {
        self.duration() > Duration::ZERO
    }

    /// The audio format, if the media carries an audio stream.
    pub fn audio_format(&self) -> Option<&AudioFormat> {
        match self {
            Media::Audio { format, .. } | Media::AudioVideo { format, .. } => Some(format),
            Media::Video { .. } => None,
        }
    }

    /// The video format, if the media carries a video stream.
    pub fn video_format(&self) -> Option<&VideoFormat> {
        match self {
            Media::Video { video_format, .. } | Media::AudioVideo { video_format, .. } => {
                Some(video_format)
            }
            Media::Audio { .. } => None,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio_format().is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_format().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        }
    }

    fn video_format() -> VideoFormat {
        VideoFormat {
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            buffer_capacity: 1920 * 1080 * 4,
        }
    }

    #[test]
    fn test_media_accessors() {
        let media = Media::AudioVideo {
            duration: Duration::from_secs(10),
            format: audio_format(),
            video_format: video_format(),
        };

        assert!(media.has_audio());
        assert!(media.has_video());
        assert_eq!(media.duration(), Duration::from_secs(10));
        assert_eq!(media.audio_format().unwrap().sample_rate, 48_000);
        assert_eq!(media.video_format().unwrap().width, 1920);
    }

    #[test]
    fn test_continuity() {
        let still = Media::Video {
            duration: Duration::ZERO,
            video_format: video_format(),
        };
        assert!(!still.is_continuous());

        let clip = Media::Audio {
            duration: Duration::from_millis(1),
            format: audio_format(),
        };
        assert!(clip.is_continuous());
    }

    #[test]
    fn test_frame_duration() {
        let format = video_format();
        let frame = format.frame_duration();
        assert!(frame > Duration::from_millis(33));
        assert!(frame < Duration::from_millis(34));
    }
}
