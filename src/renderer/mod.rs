//! Video renderer contract and the attachable renderer slot
//!
//! The renderer is a pluggable presentation sink: it can be attached and
//! detached at any time, including mid-playback. The playback loop looks the
//! slot up between frames, so a swap takes effect on the next frame without
//! stopping anything.

use crate::media::VideoFrame;
use crate::utils::error::{PlayheadError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Video presentation sink
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Present one frame, swapping it in atomically.
    ///
    /// The caller returns the frame's pooled storage after this resolves, so
    /// implementations must finish reading the pixels before returning.
    async fn present(&self, frame: &VideoFrame) -> Result<()>;
}

/// The single attachment point for a renderer
///
/// Shared between the controller (writer) and the playback loop (reader).
pub struct RendererSlot {
    slot: Mutex<Option<Arc<dyn Renderer>>>,
}

impl RendererSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Attach a renderer. Fails if one is already attached.
    pub async fn attach(&self, renderer: Arc<dyn Renderer>) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(PlayheadError::RendererAttached);
        }
        *slot = Some(renderer);
        Ok(())
    }

    /// Detach and return the current renderer, if any.
    pub async fn detach(&self) -> Option<Arc<dyn Renderer>> {
        self.slot.lock().await.take()
    }

    /// Snapshot the currently attached renderer.
    pub async fn current(&self) -> Option<Arc<dyn Renderer>> {
        self.slot.lock().await.clone()
    }
}

impl Default for RendererSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRenderer;

    #[async_trait]
    impl Renderer for NullRenderer {
        async fn present(&self, _frame: &VideoFrame) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_attach_detach_cycle() {
        let slot = RendererSlot::new();
        assert!(slot.current().await.is_none());

        slot.attach(Arc::new(NullRenderer)).await.unwrap();
        assert!(slot.current().await.is_some());

        // Second attach is rejected while one is present.
        let second = slot.attach(Arc::new(NullRenderer)).await;
        assert!(matches!(second, Err(PlayheadError::RendererAttached)));

        let detached = slot.detach().await;
        assert!(detached.is_some());
        assert!(slot.current().await.is_none());
        assert!(slot.detach().await.is_none());
    }
}
