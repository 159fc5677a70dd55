//! Decoded frame types
//!
//! Frames are what the buffer loop produces and the playback loop consumes.
//! Audio payloads are cheap reference-counted byte slices; video payloads
//! carry a pooled storage block that returns to its pool when the frame is
//! dropped.

use crate::buffer::PoolBlock;
use bytes::Bytes;
use std::time::Duration;

/// A decoded audio frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp, monotonic within the stream
    pub timestamp: Duration,

    /// Interleaved sample bytes
    pub bytes: Bytes,
}

/// A decoded video frame backed by pooled storage
#[derive(Debug)]
pub struct VideoFrame {
    /// Presentation timestamp, monotonic within the stream
    pub timestamp: Duration,

    /// Pooled pixel storage; returns to its pool on drop
    pub data: PoolBlock,
}

/// A unit flowing through a bounded frame buffer
#[derive(Debug)]
pub enum Frame {
    /// Decoded audio content
    Audio(AudioFrame),

    /// Decoded video content
    Video(VideoFrame),

    /// Sentinel enqueued once the decoder has exhausted the stream
    EndOfStream,
}

impl Frame {
    /// Presentation timestamp of content frames; None for the sentinel.
    pub fn timestamp(&self) -> Option<Duration> {
        match self {
            Frame::Audio(frame) => Some(frame.timestamp),
            Frame::Video(frame) => Some(frame.timestamp),
            Frame::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Frame::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamp() {
        let frame = Frame::Audio(AudioFrame {
            timestamp: Duration::from_millis(20),
            bytes: Bytes::from_static(&[0, 1, 2, 3]),
        });
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(20)));
        assert!(!frame.is_end_of_stream());

        assert_eq!(Frame::EndOfStream.timestamp(), None);
        assert!(Frame::EndOfStream.is_end_of_stream());
    }
}
