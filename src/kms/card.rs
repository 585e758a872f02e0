// src/kms/card.rs

//! `KmsDevice` over a DRM card node, through the `drm` crate.
//!
//! The card owns the device file; closing happens when the last `Rc<Card>`
//! is dropped, which is after every framebuffer binding has been released.

use super::{
    BufferLayout, CardResources, ConnectionState, ConnectorInfo, CrtcInfo, EncoderInfo,
    FlipEvent, KmsDevice, ModeInfo, ModeTypeFlags,
};
use crate::config::DeviceConfig;
use crate::error::{errno_of, DrmError};
use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{
    self, connector, crtc, encoder, framebuffer, Device as ControlDevice, Event, FbCmd2Flags,
    Mode, PageFlipFlags, RawResourceHandle,
};
use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of `/dev/dri/cardN` nodes probed when the configured one is unusable.
const MAX_PROBED_CARDS: u32 = 8;

/// Length of `drm_mode_modeinfo::name`.
const MODE_NAME_LEN: usize = 32;

/// The open device node, carrying the `drm` device traits.
#[derive(Debug)]
struct Node(File);

impl AsFd for Node {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Node {}
impl ControlDevice for Node {}

fn to_handle<T: From<RawResourceHandle>>(op: &'static str, id: u32) -> Result<T, DrmError> {
    control::from_u32(id).ok_or(DrmError::kms(op, Errno::EINVAL))
}

fn ids<T: Copy + Into<u32>>(handles: &[T]) -> Vec<u32> {
    handles.iter().map(|&h| h.into()).collect()
}

/// Poll timeout in milliseconds, rounded up so a sub-millisecond remainder
/// still sleeps instead of spinning.
fn poll_millis(timeout: Duration) -> u16 {
    timeout
        .as_micros()
        .div_ceil(1000)
        .clamp(1, u16::MAX as u128) as u16
}

fn mode_from_drm(mode: &Mode) -> ModeInfo {
    let (hdisplay, vdisplay) = mode.size();
    let (hsync_start, hsync_end, htotal) = mode.hsync();
    let (vsync_start, vsync_end, vtotal) = mode.vsync();
    ModeInfo {
        clock: mode.clock(),
        hdisplay,
        hsync_start,
        hsync_end,
        htotal,
        hskew: mode.hskew(),
        vdisplay,
        vsync_start,
        vsync_end,
        vtotal,
        vscan: mode.vscan(),
        vrefresh: mode.vrefresh(),
        flags: mode.flags().bits(),
        mode_type: ModeTypeFlags::from_bits_retain(mode.mode_type().bits()),
        name: mode.name().to_string_lossy().into_owned(),
    }
}

fn mode_to_drm(mode: &ModeInfo) -> Mode {
    let mut name = [0 as libc::c_char; MODE_NAME_LEN];
    for (dst, src) in name
        .iter_mut()
        .zip(mode.name.bytes().take(MODE_NAME_LEN - 1))
    {
        *dst = src as libc::c_char;
    }
    Mode::from(drm_ffi::drm_mode_modeinfo {
        clock: mode.clock,
        hdisplay: mode.hdisplay,
        hsync_start: mode.hsync_start,
        hsync_end: mode.hsync_end,
        htotal: mode.htotal,
        hskew: mode.hskew,
        vdisplay: mode.vdisplay,
        vsync_start: mode.vsync_start,
        vsync_end: mode.vsync_end,
        vtotal: mode.vtotal,
        vscan: mode.vscan,
        vrefresh: mode.vrefresh,
        flags: mode.flags,
        type_: mode.mode_type.bits(),
        name,
    })
}

/// A `BufferLayout` seen as a single-plane buffer for `drmModeAddFB2`.
struct SinglePlane<'a>(&'a BufferLayout);

impl PlanarBuffer for SinglePlane<'_> {
    fn size(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }

    fn format(&self) -> DrmFourcc {
        self.0.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.0.stride, 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [control::from_u32(self.0.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

#[derive(Debug)]
pub struct Card {
    node: Node,
    path: PathBuf,
}

impl Card {
    /// Opens `path` and checks that it exposes mode-setting resources.
    pub fn open(path: &Path) -> Result<Self, DrmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DrmError::NoDisplayFound(format!("{}: {}", path.display(), e)))?;
        let card = Card {
            node: Node(file),
            path: path.to_path_buf(),
        };

        // Render-only nodes open fine but have no KMS resources.
        card.node.resource_handles().map_err(|e| {
            DrmError::NoDisplayFound(format!("{}: no mode-setting support ({})", path.display(), e))
        })?;

        info!("Opened DRM device {} (fd {})", path.display(), card.node.0.as_raw_fd());
        Ok(card)
    }

    /// Opens the configured device, falling back to probing `/dev/dri/card*`.
    pub fn open_configured(config: &DeviceConfig) -> Result<Self, DrmError> {
        let first_err = match Self::open(&config.path) {
            Ok(card) => return Ok(card),
            Err(e) => e,
        };
        if !config.probe_fallback {
            return Err(first_err);
        }
        warn!("{}. Probing other DRM devices.", first_err);

        for index in 0..MAX_PROBED_CARDS {
            let candidate = PathBuf::from(format!("/dev/dri/card{}", index));
            if candidate == config.path {
                continue;
            }
            match Self::open(&candidate) {
                Ok(card) => return Ok(card),
                Err(e) => debug!("Skipping {}: {}", candidate.display(), e),
            }
        }

        Err(DrmError::NoDisplayFound(format!(
            "{} and /dev/dri/card0..card{} are unusable",
            config.path.display(),
            MAX_PROBED_CARDS - 1
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.node.as_fd()
    }
}

impl KmsDevice for Card {
    fn resources(&self) -> Result<CardResources, DrmError> {
        let res = self
            .node
            .resource_handles()
            .map_err(|e| DrmError::io("drmModeGetResources", e))?;
        Ok(CardResources {
            connectors: ids(res.connectors()),
            encoders: ids(res.encoders()),
            crtcs: ids(res.crtcs()),
        })
    }

    fn connector(&self, id: u32) -> Result<ConnectorInfo, DrmError> {
        let handle: connector::Handle = to_handle("drmModeGetConnector", id)?;
        let conn = self
            .node
            .get_connector(handle, true)
            .map_err(|e| DrmError::io("drmModeGetConnector", e))?;
        let state = match conn.state() {
            connector::State::Connected => ConnectionState::Connected,
            connector::State::Disconnected => ConnectionState::Disconnected,
            _ => ConnectionState::Unknown,
        };
        Ok(ConnectorInfo {
            id,
            encoder_id: conn.current_encoder().map_or(0, u32::from),
            state,
            modes: conn.modes().iter().map(mode_from_drm).collect(),
            encoders: ids(conn.encoders()),
        })
    }

    fn encoder(&self, id: u32) -> Result<EncoderInfo, DrmError> {
        let handle: encoder::Handle = to_handle("drmModeGetEncoder", id)?;
        let enc = self
            .node
            .get_encoder(handle)
            .map_err(|e| DrmError::io("drmModeGetEncoder", e))?;
        let res = self
            .node
            .resource_handles()
            .map_err(|e| DrmError::io("drmModeGetResources", e))?;

        let allowed = res.filter_crtcs(enc.possible_crtcs());
        let possible_crtcs = res
            .crtcs()
            .iter()
            .enumerate()
            .filter(|(index, crtc)| *index < 32 && allowed.contains(crtc))
            .fold(0u32, |mask, (index, _)| mask | 1 << index);

        Ok(EncoderInfo {
            id,
            crtc_id: enc.crtc().map_or(0, u32::from),
            possible_crtcs,
        })
    }

    fn crtc(&self, id: u32) -> Result<CrtcInfo, DrmError> {
        let handle: crtc::Handle = to_handle("drmModeGetCrtc", id)?;
        let info = self
            .node
            .get_crtc(handle)
            .map_err(|e| DrmError::io("drmModeGetCrtc", e))?;
        let (x, y) = info.position();
        Ok(CrtcInfo {
            id,
            fb_id: info.framebuffer().map_or(0, u32::from),
            x,
            y,
            mode: info.mode().as_ref().map(mode_from_drm),
        })
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<&ModeInfo>,
    ) -> Result<(), DrmError> {
        const OP: &str = "drmModeSetCrtc";
        let crtc: crtc::Handle = to_handle(OP, crtc_id)?;
        let fb: Option<framebuffer::Handle> = control::from_u32(fb_id);
        let connectors = connectors
            .iter()
            .map(|&id| to_handle::<connector::Handle>(OP, id))
            .collect::<Result<Vec<_>, _>>()?;

        self.node
            .set_crtc(crtc, fb, position, &connectors, mode.map(mode_to_drm))
            .map_err(|e| DrmError::io(OP, e))?;
        trace!("drmModeSetCrtc: crtc {} -> fb {}", crtc_id, fb_id);
        Ok(())
    }

    fn add_framebuffer(&self, layout: &BufferLayout) -> Result<u32, DrmError> {
        let fb = self
            .node
            .add_planar_framebuffer(&SinglePlane(layout), FbCmd2Flags::empty())
            .map_err(|e| DrmError::FramebufferCreationFailed {
                width: layout.width,
                height: layout.height,
                stride: layout.stride,
                source: errno_of(&e),
            })?;
        let fb_id = u32::from(fb);
        debug!(
            "Registered framebuffer {} for GEM handle {} ({}x{}, stride {})",
            fb_id, layout.handle, layout.width, layout.height, layout.stride
        );
        Ok(fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), DrmError> {
        let fb: framebuffer::Handle = to_handle("drmModeRmFB", fb_id)?;
        self.node
            .destroy_framebuffer(fb)
            .map_err(|e| DrmError::io("drmModeRmFB", e))?;
        debug!("Removed framebuffer {}", fb_id);
        Ok(())
    }

    fn page_flip(&self, crtc_id: u32, fb_id: u32) -> Result<(), DrmError> {
        const OP: &str = "drmModePageFlip";
        let crtc: crtc::Handle = to_handle(OP, crtc_id)?;
        let fb: framebuffer::Handle = to_handle(OP, fb_id)?;
        self.node
            .page_flip(crtc, fb, PageFlipFlags::EVENT, None)
            .map_err(|e| DrmError::io(OP, e))?;
        trace!("Queued page flip crtc {} -> fb {}", crtc_id, fb_id);
        Ok(())
    }

    fn wait_for_events(&self, timeout: Duration) -> Result<Vec<FlipEvent>, DrmError> {
        let mut fds = [PollFd::new(self.node.as_fd(), PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::from(poll_millis(timeout))) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                trace!("Poll on DRM fd interrupted by a signal");
                return Ok(Vec::new());
            }
            Err(e) => return Err(DrmError::kms("poll", e)),
        }

        let events = match self.node.receive_events() {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(DrmError::io("read", e)),
        };
        Ok(events
            .filter_map(|event| match event {
                Event::PageFlip(flip) => Some(FlipEvent {
                    crtc_id: u32::from(flip.crtc),
                    sequence: flip.frame,
                    time: flip.duration,
                }),
                _ => {
                    trace!("Ignoring non page-flip DRM event");
                    None
                }
            })
            .collect())
    }
}
