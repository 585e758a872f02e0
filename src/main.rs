// src/main.rs

use kmsflip::{
    config::CONFIG, DrmNativeState, FlipOutcome, KmsBackend, NativeState, WindowProperties,
};

// Logging
use anyhow::Context;
use log::{info, warn};

/// Drives the flip loop on the configured display until a termination
/// signal arrives or `run.max_frames` is reached.
///
/// Without a GPU client rendering into the surface every frame is dropped;
/// this binary checks device discovery, mode-set and teardown on real
/// hardware.
fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting kmsflip...");

    let config = &*CONFIG;
    let format = config
        .surface
        .pixel_format()
        .context("Invalid surface format in configuration")?;

    let mut state = DrmNativeState::new(
        KmsBackend::new(config.device.clone()),
        config.flip.clone(),
        format,
    );
    state
        .init_display()
        .context("Failed to initialize the display")?;
    info!("Native display handle: {:?}", state.display());

    let mut properties = WindowProperties {
        width: 0,
        height: 0,
        fullscreen: true,
        visual_id: 0,
    };
    state
        .create_window(properties)
        .context("Failed to create the output window")?;
    let window = state.window(&mut properties);
    info!(
        "Output window {}x{} (handle {:?})",
        properties.width, properties.height, window
    );
    state.visible(true);

    // --- Main Flip Loop ---
    let idle = std::time::Duration::from_millis(config.run.idle_sleep_ms);
    let mut frames: u64 = 0;
    loop {
        if state.should_quit() {
            info!("Shutdown requested. Exiting flip loop.");
            break;
        }
        if config.run.max_frames.is_some_and(|max| frames >= max) {
            info!("Reached {} frames. Exiting flip loop.", frames);
            break;
        }

        state.flip();
        frames += 1;

        match state.last_flip() {
            Some(FlipOutcome::Dropped(reason)) => {
                if frames == 1 {
                    warn!("First frame dropped ({:?}); is a renderer attached?", reason);
                }
                std::thread::sleep(idle);
            }
            Some(FlipOutcome::Interrupted) => {
                info!("Flip interrupted by shutdown request.");
                break;
            }
            _ => {}
        }
    }

    // --- Cleanup ---
    if let Some(stats) = state.stats() {
        info!("Flip statistics: {:?}", stats);
    }
    state.shutdown();
    info!("kmsflip exited successfully.");

    Ok(())
}
