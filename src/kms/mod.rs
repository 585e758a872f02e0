// src/kms/mod.rs
//! Kernel mode-setting: object snapshots, the `KmsDevice` seam, and discovery.
//!
//! - `KmsDevice`: the display-device primitives the rest of the crate uses
//! - `Card`: `drm`-crate implementation over a `/dev/dri/card*` node
//! - `discover`: connector / encoder / CRTC / mode selection

pub mod card;
pub mod discover;

pub use card::Card;
pub use discover::{select_target, DisplayTarget};

use crate::error::DrmError;
use bitflags::bitflags;
use drm::buffer::DrmFourcc;
use std::time::Duration;

bitflags! {
    /// `DRM_MODE_TYPE_*` bits carried by a mode. Unnamed bits are kept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeTypeFlags: u32 {
        const PREFERRED = 1 << 3;
        const DRIVER = 1 << 6;
    }
}

/// A display mode (resolution and timing), owned copy of `drm_mode_modeinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub mode_type: ModeTypeFlags,
    pub name: String,
}

impl ModeInfo {
    pub fn width(&self) -> u32 {
        self.hdisplay as u32
    }

    pub fn height(&self) -> u32 {
        self.vdisplay as u32
    }

    pub fn is_preferred(&self) -> bool {
        self.mode_type.contains(ModeTypeFlags::PREFERRED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// Ids of every KMS object the card exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardResources {
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
    pub crtcs: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub id: u32,
    /// Currently bound encoder, 0 if none.
    pub encoder_id: u32,
    pub state: ConnectionState,
    pub modes: Vec<ModeInfo>,
    pub encoders: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub id: u32,
    /// Currently bound CRTC, 0 if none.
    pub crtc_id: u32,
    /// Bit `i` set means `CardResources::crtcs[i]` can drive this encoder.
    pub possible_crtcs: u32,
}

/// CRTC configuration as read from the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    pub id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    /// `None` when the CRTC has no valid mode (disabled).
    pub mode: Option<ModeInfo>,
}

/// Memory layout of a buffer object, as needed for framebuffer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: DrmFourcc,
    /// GEM handle of the buffer on the display device.
    pub handle: u32,
}

/// Display-device primitives.
///
/// Methods take `&self`: the device is shared through `Rc` between the
/// scheduler and the framebuffer bindings attached to buffer objects.
pub trait KmsDevice {
    fn resources(&self) -> Result<CardResources, DrmError>;

    fn connector(&self, id: u32) -> Result<ConnectorInfo, DrmError>;

    fn encoder(&self, id: u32) -> Result<EncoderInfo, DrmError>;

    fn crtc(&self, id: u32) -> Result<CrtcInfo, DrmError>;

    /// Full mode-set: scan out `fb_id` on `crtc_id`, driving `connectors` with `mode`.
    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<&ModeInfo>,
    ) -> Result<(), DrmError>;

    /// Registers a framebuffer over a buffer object's memory.
    fn add_framebuffer(&self, layout: &BufferLayout) -> Result<u32, DrmError>;

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), DrmError>;

    /// Queues a flip to `fb_id` at the next vblank and asks for a completion
    /// event. The event is tagged with `crtc_id`; the kernel accepts one
    /// outstanding flip per CRTC.
    fn page_flip(&self, crtc_id: u32, fb_id: u32) -> Result<(), DrmError>;

    /// Waits up to `timeout` for the device fd to become readable and returns
    /// the flip-completion events read. An interrupted wait returns no events.
    fn wait_for_events(&self, timeout: Duration) -> Result<Vec<FlipEvent>, DrmError>;
}

/// A page flip completed on `crtc_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    pub crtc_id: u32,
    /// Vblank counter at completion.
    pub sequence: u32,
    /// Completion timestamp (`CLOCK_MONOTONIC`).
    pub time: Duration,
}
