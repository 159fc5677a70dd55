//! Decoder contracts for Playhead
//!
//! The engine does not decode anything itself; it drives implementations of
//! these traits. A [`DecoderFactory`] probes a location and opens decoders
//! bound to the streams the caller asked for; a [`Decoder`] then produces
//! frames one at a time until end of stream.
//!
//! Decode and seek calls perform I/O and are suspension points; the buffer
//! loop holds a decoder behind an async mutex so cancellation can interrupt
//! a decode in flight.

use crate::buffer::PoolBlock;
use crate::media::{Frame, Media};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A decoder bound to one or both streams of an opened media
#[async_trait]
pub trait Decoder: Send {
    /// The media this decoder was opened on.
    fn media(&self) -> &Media;

    /// Decode the next audio frame.
    ///
    /// Returns [`Frame::Audio`] until the stream is exhausted, then
    /// [`Frame::EndOfStream`] on every subsequent call.
    async fn decode_audio(&mut self) -> Result<Frame>;

    /// Decode the next video frame into `dest`.
    ///
    /// On success the block rides inside the returned [`Frame::Video`]. On
    /// end of stream or on error the block is dropped here and returns to
    /// its pool.
    async fn decode_video(&mut self, dest: PoolBlock) -> Result<Frame>;

    /// Position the decoder at or before `timestamp`.
    ///
    /// With `keyframes_only` the decoder may land on the nearest preceding
    /// keyframe. Returns the timestamp actually reached; subsequent frames
    /// carry timestamps at or after it.
    async fn seek_to(&mut self, timestamp: Duration, keyframes_only: bool) -> Result<Duration>;

    /// Rewind to the start of the stream and drop internal buffers.
    async fn reset(&mut self) -> Result<()>;

    /// Release decoder resources. Further calls fail.
    async fn close(&mut self) -> Result<()>;
}

/// Opens media locations into probed descriptions and decoders
#[async_trait]
pub trait DecoderFactory: Send + Sync {
    /// Inspect `location` and describe the streams selected by
    /// `find_audio`/`find_video`.
    async fn probe(&self, location: &str, find_audio: bool, find_video: bool) -> Result<Media>;

    /// Open a decoder over the selected streams.
    ///
    /// `hardware_acceleration_candidates` lists backend names to try in
    /// order before falling back to software; implementations may ignore it.
    async fn open(
        &self,
        location: &str,
        find_audio: bool,
        find_video: bool,
        hardware_acceleration_candidates: &[String],
    ) -> Result<Box<dyn Decoder>>;
}

/// A decoder as the pipeline holds it: shared with the buffer loop and
/// locked around every decode, seek, and reset.
pub type SharedDecoder = Arc<Mutex<Box<dyn Decoder>>>;

/// Wrap a freshly opened decoder for pipeline ownership.
pub fn share(decoder: Box<dyn Decoder>) -> SharedDecoder {
    Arc::new(Mutex::new(decoder))
}
