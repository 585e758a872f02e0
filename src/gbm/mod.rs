// src/gbm/mod.rs
//! Buffer surface management.
//!
//! The renderer draws into buffer objects owned by a rendering surface. This
//! module defines the seams the scheduler drives (`BufferAllocator`,
//! `RenderSurface`, `ScanoutBuffer`) and their implementation over the `gbm`
//! crate.

pub mod device;
pub mod surface;

pub use device::GbmDevice;
pub use surface::{GbmBuffer, GbmSurface};

use crate::config::PixelFormat;
use crate::error::DrmError;
use crate::framebuffer::FramebufferBinding;
use crate::kms::{BufferLayout, ModeInfo};
use crate::native_state::NativeHandle;
use bitflags::bitflags;
use log::info;

bitflags! {
    /// `GBM_BO_USE_*` usage bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const SCANOUT = 1 << 0;
        const RENDERING = 1 << 2;
    }
}

/// Identity of a buffer object for as long as the allocator keeps it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// A buffer object borrowed from a surface between lock and release.
pub trait ScanoutBuffer {
    fn id(&self) -> BufferId;

    fn layout(&self) -> BufferLayout;

    /// Framebuffer previously attached with `attach_framebuffer`, if any.
    fn framebuffer_id(&self) -> Option<u32>;

    /// Hands `binding` to the buffer object. The allocator drops it when it
    /// destroys the buffer object, before freeing the memory.
    fn attach_framebuffer(&mut self, binding: FramebufferBinding);
}

/// Source of the buffer objects the renderer draws into.
pub trait RenderSurface {
    type Buffer: ScanoutBuffer;

    /// Locks the most recently rendered buffer. `None` if nothing was rendered
    /// since the last lock or every buffer is already locked.
    fn lock_front_buffer(&mut self) -> Option<Self::Buffer>;

    /// Returns a buffer to the surface so the renderer can reuse it.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Native window handle for GPU context creation.
    fn native_handle(&self) -> NativeHandle;
}

pub trait BufferAllocator {
    type Surface: RenderSurface;

    /// Native display handle for GPU context creation.
    fn native_handle(&self) -> NativeHandle;

    fn create_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<Self::Surface, DrmError>;
}

/// Creates the scanout-capable rendering surface matching `mode`.
pub fn init_gbm<A: BufferAllocator>(
    allocator: &A,
    mode: &ModeInfo,
    format: PixelFormat,
) -> Result<A::Surface, DrmError> {
    let surface = allocator.create_surface(
        mode.width(),
        mode.height(),
        format,
        BufferUsage::SCANOUT | BufferUsage::RENDERING,
    )?;
    info!(
        "Created {}x{} {} rendering surface",
        mode.width(),
        mode.height(),
        format.name()
    );
    Ok(surface)
}
