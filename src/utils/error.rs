//! Error types for Playhead
//!
//! This module defines the error type used throughout the engine. We use
//! thiserror for the error enum; loop failures wrap their cause so the
//! original decoder/sampler/renderer error stays on the source chain.

use thiserror::Error;

/// Main error type for Playhead
#[derive(Error, Debug, Clone)]
pub enum PlayheadError {
    /// Media probing failed
    #[error("Probe error: {0}")]
    Probe(String),

    /// Decoder errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Audio sampler errors
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// Renderer errors
    #[error("Renderer error: {0}")]
    Renderer(String),

    /// Operation on a closed frame buffer
    #[error("Frame buffer is closed")]
    BufferClosed,

    /// Operation on a closed frame-data pool
    #[error("Frame pool is closed")]
    PoolClosed,

    /// Frame-data pool misuse
    #[error("Pool error: {0}")]
    Pool(String),

    /// A failure that occurred inside the buffer loop
    #[error("Buffer loop failure: {0}")]
    BufferLoop(#[source] Box<PlayheadError>),

    /// A failure that occurred inside the playback loop
    #[error("Playback loop failure: {0}")]
    PlaybackLoop(#[source] Box<PlayheadError>),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A renderer is already attached
    #[error("A renderer is already attached")]
    RendererAttached,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlayheadError {
    /// Wrap an error as a buffer-loop failure.
    pub fn buffer_loop(cause: PlayheadError) -> Self {
        PlayheadError::BufferLoop(Box::new(cause))
    }

    /// Wrap an error as a playback-loop failure.
    pub fn playback_loop(cause: PlayheadError) -> Self {
        PlayheadError::PlaybackLoop(Box::new(cause))
    }
}

/// Convenience type alias for Results in Playhead
pub type Result<T> = std::result::Result<T, PlayheadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlayheadError::Decoder("no stream selected".to_string());
        assert_eq!(err.to_string(), "Decoder error: no stream selected");

        let err = PlayheadError::BufferClosed;
        assert_eq!(err.to_string(), "Frame buffer is closed");
    }

    #[test]
    fn test_loop_wrapping_keeps_source() {
        use std::error::Error;

        let err = PlayheadError::buffer_loop(PlayheadError::Decoder("bad packet".into()));
        assert_eq!(
            err.to_string(),
            "Buffer loop failure: Decoder error: bad packet"
        );
        assert!(err.source().is_some());
    }
}
