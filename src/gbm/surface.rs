// src/gbm/surface.rs

use super::{BufferId, RenderSurface, ScanoutBuffer};
use crate::framebuffer::FramebufferBinding;
use crate::kms::BufferLayout;
use crate::native_state::NativeHandle;
use gbm::{AsRaw, BufferObject, Surface};
use log::trace;

/// A buffer object locked from a `GbmSurface`.
///
/// Dropping it hands the buffer back to the surface.
pub struct GbmBuffer {
    bo: BufferObject<FramebufferBinding>,
}

impl std::fmt::Debug for GbmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbmBuffer")
            .field("id", &self.id())
            .field("framebuffer", &self.framebuffer_id())
            .finish()
    }
}

impl ScanoutBuffer for GbmBuffer {
    fn id(&self) -> BufferId {
        BufferId(self.bo.as_raw() as usize)
    }

    fn layout(&self) -> BufferLayout {
        BufferLayout {
            width: self.bo.width(),
            height: self.bo.height(),
            stride: self.bo.stride(),
            format: self.bo.format(),
            // SAFETY: on a DRM device GBM fills the 32-bit GEM handle member.
            handle: unsafe { self.bo.handle().u32_ },
        }
    }

    fn framebuffer_id(&self) -> Option<u32> {
        self.bo.userdata().map(FramebufferBinding::fb_id)
    }

    fn attach_framebuffer(&mut self, binding: FramebufferBinding) {
        // A replaced binding removes its framebuffer here.
        drop(self.bo.set_userdata(binding));
    }
}

/// A `gbm_surface` sized to the display mode.
///
/// Its buffer objects carry their `FramebufferBinding` as user data, dropped
/// when the bo is freed. With an EGL renderer the bos belong to the EGL
/// window surface created on top of this one, and Mesa frees them when that
/// EGL surface is destroyed, not when this surface is. The renderer must
/// destroy its EGL surface before the display session is dropped, so the
/// bindings still find the card open.
pub struct GbmSurface {
    surface: Surface<FramebufferBinding>,
}

impl GbmSurface {
    pub(super) fn new(surface: Surface<FramebufferBinding>) -> Self {
        Self { surface }
    }
}

impl RenderSurface for GbmSurface {
    type Buffer = GbmBuffer;

    fn lock_front_buffer(&mut self) -> Option<GbmBuffer> {
        // SAFETY: only called from `flip()`, after the renderer swapped buffers.
        match unsafe { self.surface.lock_front_buffer() } {
            Ok(bo) => Some(GbmBuffer { bo }),
            Err(e) => {
                trace!("No front buffer to lock: {}", e);
                None
            }
        }
    }

    fn release_buffer(&mut self, buffer: GbmBuffer) {
        trace!("Releasing buffer {:?}", buffer.id());
        drop(buffer);
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::from_ptr(self.surface.as_raw() as *mut libc::c_void)
    }
}
