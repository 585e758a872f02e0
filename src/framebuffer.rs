// src/framebuffer.rs

//! Lazily created display framebuffers, one per buffer object.
//!
//! The binding lives on the buffer object itself (GBM user data) rather than
//! in a side table, so it is dropped exactly when the allocator destroys the
//! buffer object, and dropping it deregisters the framebuffer first.

use crate::error::DrmError;
use crate::gbm::{BufferId, ScanoutBuffer};
use crate::kms::KmsDevice;
use log::{debug, error};
use std::rc::Rc;

/// A registered framebuffer tied to the buffer object that backs it.
pub struct FramebufferBinding {
    buffer: BufferId,
    device: Rc<dyn KmsDevice>,
    fb_id: u32,
}

impl FramebufferBinding {
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }
}

impl std::fmt::Debug for FramebufferBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramebufferBinding")
            .field("buffer", &self.buffer)
            .field("fb_id", &self.fb_id)
            .finish()
    }
}

impl Drop for FramebufferBinding {
    fn drop(&mut self) {
        match self.device.remove_framebuffer(self.fb_id) {
            Ok(()) => debug!(
                "Framebuffer {} released with buffer {:?}",
                self.fb_id, self.buffer
            ),
            Err(e) => error!("Failed to remove framebuffer {}: {}", self.fb_id, e),
        }
    }
}

/// Resolves buffer objects to framebuffer ids, registering them on first use.
pub struct FramebufferCache {
    device: Rc<dyn KmsDevice>,
    created: u64,
}

impl FramebufferCache {
    pub fn new(device: Rc<dyn KmsDevice>) -> Self {
        Self { device, created: 0 }
    }

    /// Returns the framebuffer id of `buffer`, registering one if it has none.
    ///
    /// Fails with `FramebufferCreationFailed` when the display rejects the
    /// buffer's layout; the buffer is left without a binding.
    pub fn framebuffer_for<B: ScanoutBuffer>(&mut self, buffer: &mut B) -> Result<u32, DrmError> {
        if let Some(fb_id) = buffer.framebuffer_id() {
            return Ok(fb_id);
        }

        let layout = buffer.layout();
        let fb_id = self.device.add_framebuffer(&layout).map_err(|e| match e {
            DrmError::Kms { source, .. } => DrmError::FramebufferCreationFailed {
                width: layout.width,
                height: layout.height,
                stride: layout.stride,
                source,
            },
            other => other,
        })?;

        buffer.attach_framebuffer(FramebufferBinding {
            buffer: buffer.id(),
            device: Rc::clone(&self.device),
            fb_id,
        });
        self.created += 1;
        debug!("Bound framebuffer {} to buffer {:?}", fb_id, buffer.id());
        Ok(fb_id)
    }

    /// Number of bindings created so far.
    pub fn created(&self) -> u64 {
        self.created
    }
}
