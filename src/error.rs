// src/error.rs

//! Error taxonomy for the display session.
//!
//! Init failures (`NoDisplayFound`, `NoConnectorFound`, `SurfaceCreationFailed`)
//! abort startup. `FramebufferCreationFailed` and rejected flips are per-frame
//! and never escape `flip()`; the scheduler logs them and drops the frame.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrmError {
    /// No DRM device node could be opened or none exposes mode-setting resources.
    #[error("no display device found: {0}")]
    NoDisplayFound(String),

    /// No connected connector with at least one mode and a usable encoder/CRTC.
    #[error("no connected connector with a usable mode found")]
    NoConnectorFound,

    /// The buffer manager could not create a device or a surface for the mode.
    #[error("failed to create {width}x{height} {format} rendering surface: {reason}")]
    SurfaceCreationFailed {
        width: u32,
        height: u32,
        format: String,
        reason: String,
    },

    /// The display device rejected framebuffer registration for a buffer object.
    #[error("failed to register {width}x{height} framebuffer (stride {stride}): {source}")]
    FramebufferCreationFailed {
        width: u32,
        height: u32,
        stride: u32,
        #[source]
        source: Errno,
    },

    /// A KMS call failed.
    #[error("{op} failed: {source}")]
    Kms {
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// An operation that needs an initialized display was called too early.
    #[error("display session is not initialized")]
    NotInitialized,

    /// Installing the termination signal handlers failed.
    #[error("failed to install handler for {signal}: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: Errno,
    },
}

impl DrmError {
    pub(crate) fn kms(op: &'static str, source: Errno) -> Self {
        DrmError::Kms { op, source }
    }

    pub(crate) fn io(op: &'static str, err: io::Error) -> Self {
        DrmError::kms(op, errno_of(&err))
    }
}

/// The OS error behind `err`, `EIO` when it carries none.
pub(crate) fn errno_of(err: &io::Error) -> Errno {
    err.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}
