// src/gbm/device.rs

use super::surface::GbmSurface;
use super::{BufferAllocator, BufferUsage};
use crate::config::PixelFormat;
use crate::error::DrmError;
use crate::framebuffer::FramebufferBinding;
use crate::kms::Card;
use crate::native_state::NativeHandle;
use gbm::{AsRaw, BufferObjectFlags};
use log::info;
use std::rc::Rc;

fn gbm_usage(usage: BufferUsage) -> BufferObjectFlags {
    BufferObjectFlags::from_bits_truncate(usage.bits())
}

/// GBM buffer manager created over the display card's fd.
///
/// The `gbm` device keeps its `Rc<Card>` for as long as any surface or
/// buffer object created from it is alive.
pub struct GbmDevice {
    device: gbm::Device<Rc<Card>>,
}

impl GbmDevice {
    pub fn new(card: Rc<Card>) -> Result<Self, DrmError> {
        let path = card.path().to_path_buf();
        let device = gbm::Device::new(card).map_err(|e| DrmError::SurfaceCreationFailed {
            width: 0,
            height: 0,
            format: String::from("-"),
            reason: format!("gbm_create_device failed on {}: {}", path.display(), e),
        })?;
        info!("Created GBM device on {}", path.display());
        Ok(Self { device })
    }

    pub fn is_format_supported(&self, format: PixelFormat, usage: BufferUsage) -> bool {
        self.device
            .is_format_supported(format.fourcc(), gbm_usage(usage))
    }
}

impl BufferAllocator for GbmDevice {
    type Surface = GbmSurface;

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::from_ptr(self.device.as_raw() as *mut libc::c_void)
    }

    fn create_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<GbmSurface, DrmError> {
        let failed = |reason: String| DrmError::SurfaceCreationFailed {
            width,
            height,
            format: format.name().to_string(),
            reason,
        };

        if !self.is_format_supported(format, usage) {
            return Err(failed("format/usage not supported by the driver".to_string()));
        }

        let surface = self
            .device
            .create_surface::<FramebufferBinding>(width, height, format.fourcc(), gbm_usage(usage))
            .map_err(|e| failed(format!("gbm_surface_create failed: {}", e)))?;
        Ok(GbmSurface::new(surface))
    }
}
