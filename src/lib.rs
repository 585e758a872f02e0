// src/lib.rs

//! Direct-to-display presentation through KMS page flips and GBM buffers.
//!
//! A benchmark renderer uses [`NativeState`] to reach the display without a
//! windowing system: `init_display` picks a connector, mode and CRTC and
//! creates a GBM surface of that size, the renderer draws into the surface,
//! and every `flip` hands the newest buffer to the CRTC and waits (bounded)
//! for the kernel to confirm it. `SIGINT`/`SIGTERM` set a latch that makes
//! `should_quit` return true and cuts any flip wait short.

pub mod config;
pub mod error;
pub mod framebuffer;
pub mod gbm;
pub mod kms;
pub mod native_state;
pub mod scheduler;
pub mod shutdown;

#[cfg(test)]
mod mock;

pub use config::{Config, CONFIG};
pub use error::DrmError;
pub use native_state::{DrmNativeState, KmsBackend, NativeHandle, NativeState, WindowProperties};
pub use scheduler::{DropReason, FlipMode, FlipOutcome, FlipStats};
