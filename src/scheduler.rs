// src/scheduler.rs

//! Page-flip scheduling for one CRTC.
//!
//! Each `flip()` locks the freshly rendered buffer, resolves its framebuffer,
//! and presents it: the first frame with a full mode-set, later frames with
//! an event-driven page flip whose completion is awaited (bounded, and
//! cancellable through the shutdown latch between poll slices). A rejected
//! flip or a missing completion event switches the session to synchronous
//! mode-sets for good.
//!
//! A buffer is released only after a newer one has been confirmed on screen
//! and then replaced again, so the renderer never draws into scanout memory.

pub mod pipeline;

use crate::config::FlipConfig;
use crate::error::DrmError;
use crate::framebuffer::FramebufferCache;
use crate::gbm::{BufferId, RenderSurface, ScanoutBuffer};
use crate::kms::{DisplayTarget, KmsDevice};
use crate::shutdown::ShutdownLatch;
use log::{debug, error, info, warn};
use pipeline::FlipPipeline;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// How frames reach the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMode {
    /// `drmModePageFlip` with a completion event.
    EventDriven,
    /// `drmModeSetCrtc` per frame; best effort, may tear.
    Synchronous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The surface had no newly rendered buffer.
    NoBuffer,
    /// Framebuffer registration was rejected.
    Framebuffer,
    /// The mode-set presenting the frame failed.
    ModeSet,
    /// A previous flip is still pending.
    FlipPending,
}

/// Result of one `flip()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// First frame, presented by the initial mode-set.
    ModeSet,
    /// Presented by a confirmed page flip.
    Flipped,
    /// Presented by a synchronous mode-set.
    Synchronous,
    /// Skipped; the previously presented buffer stays on screen.
    Dropped(DropReason),
    /// Shutdown was requested; the pipeline was left as is.
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlipStats {
    pub presented: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
}

enum WaitResult {
    Completed,
    TimedOut,
    Interrupted,
}

pub struct FlipScheduler<S: RenderSurface> {
    // Buffers in the pipeline go back to the surface in Drop, before the
    // surface itself is dropped.
    pipeline: FlipPipeline<S::Buffer>,
    surface: S,
    framebuffers: FramebufferCache,
    device: Rc<dyn KmsDevice>,
    target: DisplayTarget,
    latch: &'static ShutdownLatch,
    mode: FlipMode,
    crtc_set: bool,
    /// A flip request was accepted and its completion has not been seen yet.
    outstanding: bool,
    flip_timeout: Duration,
    wait_slice: Duration,
    stats: FlipStats,
}

impl<S: RenderSurface> FlipScheduler<S> {
    pub fn new(
        device: Rc<dyn KmsDevice>,
        target: DisplayTarget,
        surface: S,
        latch: &'static ShutdownLatch,
        config: &FlipConfig,
    ) -> Self {
        let mode = if config.async_flip {
            FlipMode::EventDriven
        } else {
            info!("Asynchronous page flips disabled by configuration");
            FlipMode::Synchronous
        };
        Self {
            pipeline: FlipPipeline::new(),
            surface,
            framebuffers: FramebufferCache::new(Rc::clone(&device)),
            device,
            target,
            latch,
            mode,
            crtc_set: false,
            outstanding: false,
            flip_timeout: config.flip_timeout(),
            wait_slice: config.wait_slice(),
            stats: FlipStats::default(),
        }
    }

    pub fn target(&self) -> &DisplayTarget {
        &self.target
    }

    pub fn mode(&self) -> FlipMode {
        self.mode
    }

    pub fn stats(&self) -> FlipStats {
        self.stats
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// The buffer most recently put on screen.
    pub fn on_screen(&self) -> Option<BufferId> {
        self.pipeline.flipped().map(|b| b.id())
    }

    /// The buffer shown before `on_screen`, still held back from the renderer.
    pub fn previous(&self) -> Option<BufferId> {
        self.pipeline.presented().map(|b| b.id())
    }

    pub fn pending(&self) -> Option<BufferId> {
        self.pipeline.pending().map(|b| b.id())
    }

    pub fn should_quit(&self) -> bool {
        self.latch.is_requested()
    }

    /// Presents the most recently rendered buffer.
    pub fn flip(&mut self) -> FlipOutcome {
        if self.latch.is_requested() {
            debug!("Shutdown requested, not flipping");
            return FlipOutcome::Interrupted;
        }

        let Some(mut next) = self.surface.lock_front_buffer() else {
            debug!("No rendered buffer available");
            return self.drop_frame(DropReason::NoBuffer);
        };

        let fb_id = match self.framebuffers.framebuffer_for(&mut next) {
            Ok(fb_id) => fb_id,
            Err(e) => {
                warn!("Skipping frame: {}", e);
                self.surface.release_buffer(next);
                return self.drop_frame(DropReason::Framebuffer);
            }
        };

        if !self.crtc_set {
            return self.initial_mode_set(next, fb_id);
        }

        match self.mode {
            FlipMode::EventDriven => self.flip_with_event(next, fb_id),
            FlipMode::Synchronous => self.present_synchronously(next, fb_id),
        }
    }

    fn initial_mode_set(&mut self, next: S::Buffer, fb_id: u32) -> FlipOutcome {
        if let Err(e) = self.set_crtc(fb_id) {
            error!("Initial mode-set failed: {}", e);
            self.surface.release_buffer(next);
            return self.drop_frame(DropReason::ModeSet);
        }
        self.crtc_set = true;
        info!(
            "Mode {} set on CRTC {}",
            self.target.mode.name, self.target.crtc_id
        );
        self.present_now(next, FlipOutcome::ModeSet)
    }

    fn flip_with_event(&mut self, next: S::Buffer, fb_id: u32) -> FlipOutcome {
        if self.pipeline.pending().is_some() {
            warn!("Previous flip still pending, skipping frame");
            self.surface.release_buffer(next);
            return self.drop_frame(DropReason::FlipPending);
        }

        if let Err(e) = self.device.page_flip(self.target.crtc_id, fb_id) {
            warn!("Page flip rejected ({}), switching to synchronous mode-set", e);
            self.enter_synchronous_mode();
            return self.present_synchronously(next, fb_id);
        }

        if let Err(next) = self.pipeline.queue(next) {
            // Unreachable: the pending slot was checked above.
            self.surface.release_buffer(next);
            return self.drop_frame(DropReason::FlipPending);
        }
        self.outstanding = true;

        match self.wait_for_flip(true) {
            WaitResult::Completed => {
                self.complete_flip();
                FlipOutcome::Flipped
            }
            WaitResult::Interrupted => {
                debug!("Flip to framebuffer {} interrupted by shutdown request", fb_id);
                FlipOutcome::Interrupted
            }
            WaitResult::TimedOut => {
                warn!(
                    "No completion for flip to framebuffer {} within {:?}, switching to synchronous mode-set",
                    fb_id, self.flip_timeout
                );
                self.stats.timeouts += 1;
                self.enter_synchronous_mode();
                match self.set_crtc(fb_id) {
                    Ok(()) => {
                        self.complete_flip();
                        FlipOutcome::Synchronous
                    }
                    Err(e) => {
                        // The flip may still land, so nothing on screen is released.
                        warn!(
                            "Synchronous re-present of framebuffer {} failed, keeping it pending: {}",
                            fb_id, e
                        );
                        self.drop_frame(DropReason::ModeSet)
                    }
                }
            }
        }
    }

    fn present_synchronously(&mut self, next: S::Buffer, fb_id: u32) -> FlipOutcome {
        if let Err(e) = self.set_crtc(fb_id) {
            warn!("Synchronous mode-set failed, skipping frame: {}", e);
            self.surface.release_buffer(next);
            return self.drop_frame(DropReason::ModeSet);
        }
        if let Some(stale) = self.pipeline.take_pending() {
            debug!("Mode-set replaced unconfirmed flip of buffer {:?}", stale.id());
            self.outstanding = false;
            self.surface.release_buffer(stale);
        }
        self.present_now(next, FlipOutcome::Synchronous)
    }

    fn present_now(&mut self, next: S::Buffer, outcome: FlipOutcome) -> FlipOutcome {
        match self.pipeline.present_immediately(next) {
            Ok(released) => {
                if let Some(old) = released {
                    self.surface.release_buffer(old);
                }
                self.stats.presented += 1;
                outcome
            }
            Err(next) => {
                self.surface.release_buffer(next);
                self.drop_frame(DropReason::FlipPending)
            }
        }
    }

    /// Advances the pipeline past the confirmed flip and releases the buffer
    /// that left the screen before it.
    fn complete_flip(&mut self) {
        self.outstanding = false;
        if let Some(old) = self.pipeline.advance() {
            self.surface.release_buffer(old);
        }
        self.stats.presented += 1;
    }

    fn wait_for_flip(&mut self, cancellable: bool) -> WaitResult {
        let deadline = Instant::now() + self.flip_timeout;
        loop {
            if cancellable && self.latch.is_requested() {
                return WaitResult::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitResult::TimedOut;
            }
            let slice = (deadline - now).min(self.wait_slice);

            match self.device.wait_for_events(slice) {
                Ok(events) => {
                    for event in events {
                        if event.crtc_id == self.target.crtc_id {
                            debug!(
                                "Flip completed on CRTC {} at sequence {} ({:?})",
                                event.crtc_id, event.sequence, event.time
                            );
                            return WaitResult::Completed;
                        }
                        debug!("Ignoring flip completion for CRTC {}", event.crtc_id);
                    }
                }
                Err(e) => {
                    error!("Waiting for flip completion failed: {}", e);
                    return WaitResult::TimedOut;
                }
            }
        }
    }

    fn set_crtc(&self, fb_id: u32) -> Result<(), DrmError> {
        self.device.set_crtc(
            self.target.crtc_id,
            fb_id,
            (0, 0),
            &[self.target.connector_id],
            Some(&self.target.mode),
        )
    }

    fn enter_synchronous_mode(&mut self) {
        if self.mode != FlipMode::Synchronous {
            self.mode = FlipMode::Synchronous;
            self.stats.fallbacks += 1;
        }
    }

    fn drop_frame(&mut self, reason: DropReason) -> FlipOutcome {
        self.stats.dropped += 1;
        FlipOutcome::Dropped(reason)
    }

    fn restore_crtc(&self) {
        if !self.crtc_set {
            return;
        }
        let Some(saved) = self.target.saved_crtc.as_ref() else {
            info!("No saved CRTC state, leaving display as is");
            return;
        };
        if saved.fb_id == 0 || saved.mode.is_none() {
            info!("CRTC {} was disabled before start, leaving display as is", saved.id);
            return;
        }
        match self.device.set_crtc(
            saved.id,
            saved.fb_id,
            (saved.x, saved.y),
            &[self.target.connector_id],
            saved.mode.as_ref(),
        ) {
            Ok(()) => info!("Restored CRTC {} to framebuffer {}", saved.id, saved.fb_id),
            Err(e) => warn!("Failed to restore CRTC {}: {}", saved.id, e),
        }
    }
}

impl<S: RenderSurface> Drop for FlipScheduler<S> {
    fn drop(&mut self) {
        if self.outstanding {
            self.outstanding = false;
            debug!("Waiting for the outstanding flip before teardown");
            if let WaitResult::TimedOut = self.wait_for_flip(false) {
                warn!("Outstanding flip never completed, releasing its buffer anyway");
            }
        }

        for buffer in self.pipeline.drain() {
            self.surface.release_buffer(buffer);
        }
        self.restore_crtc();

        info!(
            "Flip scheduler stopped: {} presented, {} dropped, {} timeouts, {} fallbacks, {} framebuffers",
            self.stats.presented,
            self.stats.dropped,
            self.stats.timeouts,
            self.stats.fallbacks,
            self.framebuffers.created()
        );
    }
}
