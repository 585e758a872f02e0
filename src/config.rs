// src/config.rs

//! Configuration structures for the KMS presenter.
//!
//! Every section is deserialized from JSON with `#[serde(default)]`, so a
//! configuration file only needs to name the settings it changes. The file
//! path comes from the `KMSFLIP_CONFIG` environment variable; without it the
//! defaults below are used.

use anyhow::{bail, Context, Result};
use drm::buffer::DrmFourcc;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "KMSFLIP_CONFIG";

/// Process-wide configuration, loaded on first access.
///
/// A broken configuration file is reported and replaced by defaults; the
/// display session itself reports the fatal errors.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match Config::load() {
    Ok(config) => config,
    Err(e) => {
        warn!("Failed to load configuration: {:#}. Using defaults.", e);
        Config::default()
    }
});

// --- Top-Level Configuration Structure ---

/// Root of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Display device selection.
    pub device: DeviceConfig,
    /// Page-flip scheduling.
    pub flip: FlipConfig,
    /// Rendering surface allocation.
    pub surface: SurfaceConfig,
    /// Smoke-test loop settings used by the binary.
    pub run: RunConfig,
}

impl Config {
    /// Loads the file named by `KMSFLIP_CONFIG`, or returns defaults if unset.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(Path::new(&path)),
            None => {
                info!("{} not set, using default configuration.", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).context("Failed to parse JSON")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        PixelFormat::from_name(&self.surface.format)?;
        if self.flip.flip_timeout_ms == 0 {
            bail!("flip.flip_timeout_ms must be greater than zero");
        }
        if self.flip.wait_slice_ms == 0 {
            bail!("flip.wait_slice_ms must be greater than zero");
        }
        Ok(())
    }
}

// --- Device Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// DRM device node tried first.
    pub path: PathBuf,
    /// If true, `/dev/dri/card0`..`card7` are probed when `path` is unusable.
    pub probe_fallback: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            path: PathBuf::from("/dev/dri/card0"),
            probe_fallback: true,
        }
    }
}

// --- Flip Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlipConfig {
    /// Use event-driven page flips. When false every frame is a synchronous mode-set.
    pub async_flip: bool,
    /// Upper bound on waiting for one flip-completion event.
    pub flip_timeout_ms: u64,
    /// Length of one poll slice; the shutdown flag is checked between slices.
    pub wait_slice_ms: u64,
}

impl FlipConfig {
    pub fn flip_timeout(&self) -> Duration {
        Duration::from_millis(self.flip_timeout_ms)
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

impl Default for FlipConfig {
    fn default() -> Self {
        FlipConfig {
            async_flip: true,
            flip_timeout_ms: 1000, // Generous even for a 1 Hz panel
            wait_slice_ms: 50,
        }
    }
}

// --- Surface Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Pixel format name, e.g. "XRGB8888".
    pub format: String,
}

impl SurfaceConfig {
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        PixelFormat::from_name(&self.format)
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        SurfaceConfig {
            format: "XRGB8888".to_string(),
        }
    }
}

/// Scanout pixel formats accepted for the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Xrgb8888,
    Argb8888,
    Xbgr8888,
    Rgb565,
}

impl PixelFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "XRGB8888" => Ok(PixelFormat::Xrgb8888),
            "ARGB8888" => Ok(PixelFormat::Argb8888),
            "XBGR8888" => Ok(PixelFormat::Xbgr8888),
            "RGB565" => Ok(PixelFormat::Rgb565),
            other => bail!("unsupported surface format '{}'", other),
        }
    }

    /// DRM/GBM fourcc code.
    pub fn fourcc(self) -> DrmFourcc {
        match self {
            PixelFormat::Xrgb8888 => DrmFourcc::Xrgb8888,
            PixelFormat::Argb8888 => DrmFourcc::Argb8888,
            PixelFormat::Xbgr8888 => DrmFourcc::Xbgr8888,
            PixelFormat::Rgb565 => DrmFourcc::Rgb565,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Xrgb8888 => "XRGB8888",
            PixelFormat::Argb8888 => "ARGB8888",
            PixelFormat::Xbgr8888 => "XBGR8888",
            PixelFormat::Rgb565 => "RGB565",
        }
    }
}

// --- Run Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many `flip()` calls. `None` runs until a signal arrives.
    pub max_frames: Option<u64>,
    /// Sleep after a dropped frame so an idle surface does not spin the CPU.
    pub idle_sleep_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            max_frames: None,
            idle_sleep_ms: 16,
        }
    }
}

#[cfg(test)]
mod tests;
