// src/native_state.rs
//
// Windowing-state interface consumed by the rendering driver, and its
// KMS/GBM implementation.

use crate::config::{DeviceConfig, FlipConfig, PixelFormat};
use crate::error::DrmError;
use crate::gbm::{init_gbm, BufferAllocator, GbmDevice, RenderSurface};
use crate::kms::{select_target, Card, DisplayTarget, KmsDevice};
use crate::scheduler::{FlipOutcome, FlipScheduler, FlipStats};
use crate::shutdown::{self, ShutdownLatch, SHUTDOWN};
use log::{debug, info, warn};
use std::ffi::c_void;
use std::rc::Rc;

/// Opaque native pointer handed to the GPU API (GBM device or surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle(*mut c_void);

impl NativeHandle {
    pub const fn null() -> Self {
        NativeHandle(std::ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        NativeHandle(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Window geometry requested by, and reported back to, the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowProperties {
    pub width: i32,
    pub height: i32,
    pub fullscreen: bool,
    pub visual_id: i32,
}

/// The interface the rendering driver uses to talk to its display.
///
/// `init_display` must succeed before the other calls do anything useful.
pub trait NativeState {
    fn init_display(&mut self) -> Result<(), DrmError>;

    /// Handle for creating the GPU display connection. Null before init.
    fn display(&self) -> NativeHandle;

    fn create_window(&mut self, properties: WindowProperties) -> Result<(), DrmError>;

    /// Updates `properties` with the effective geometry and returns the
    /// native window handle. Null before init.
    fn window(&mut self, properties: &mut WindowProperties) -> NativeHandle;

    fn visible(&mut self, visible: bool);

    fn should_quit(&self) -> bool;

    fn flip(&mut self);
}

/// Opens the display device and creates the buffer allocator over it.
pub trait DisplayBackend {
    type Device: KmsDevice + 'static;
    type Allocator: BufferAllocator;

    fn open_device(&self) -> Result<Rc<Self::Device>, DrmError>;

    fn create_allocator(&self, device: &Rc<Self::Device>) -> Result<Self::Allocator, DrmError>;
}

/// libdrm card + libgbm allocator.
#[derive(Debug, Clone)]
pub struct KmsBackend {
    device: DeviceConfig,
}

impl KmsBackend {
    pub fn new(device: DeviceConfig) -> Self {
        Self { device }
    }
}

impl DisplayBackend for KmsBackend {
    type Device = Card;
    type Allocator = GbmDevice;

    fn open_device(&self) -> Result<Rc<Card>, DrmError> {
        Card::open_configured(&self.device).map(Rc::new)
    }

    fn create_allocator(&self, device: &Rc<Card>) -> Result<GbmDevice, DrmError> {
        GbmDevice::new(Rc::clone(device))
    }
}

type SurfaceOf<A> = <A as BufferAllocator>::Surface;

/// Resources of an initialized session, dropped scheduler first.
struct Session<A: BufferAllocator> {
    scheduler: FlipScheduler<SurfaceOf<A>>,
    allocator: A,
}

/// `NativeState` driving one KMS connector through GBM buffers.
pub struct DrmNativeState<B: DisplayBackend> {
    session: Option<Session<B::Allocator>>,
    backend: B,
    flip_config: FlipConfig,
    format: PixelFormat,
    latch: &'static ShutdownLatch,
    install_signal_handlers: bool,
    requested_window: Option<WindowProperties>,
    last_flip: Option<FlipOutcome>,
}

impl<B: DisplayBackend> DrmNativeState<B> {
    /// A session stopped by `SIGINT`/`SIGTERM` through the process latch.
    pub fn new(backend: B, flip_config: FlipConfig, format: PixelFormat) -> Self {
        let mut state = Self::with_latch(backend, flip_config, format, &SHUTDOWN);
        state.install_signal_handlers = true;
        state
    }

    /// A session stopped by `latch`; no signal handlers are installed.
    pub fn with_latch(
        backend: B,
        flip_config: FlipConfig,
        format: PixelFormat,
        latch: &'static ShutdownLatch,
    ) -> Self {
        Self {
            session: None,
            backend,
            flip_config,
            format,
            latch,
            install_signal_handlers: false,
            requested_window: None,
            last_flip: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn target(&self) -> Option<&DisplayTarget> {
        self.session.as_ref().map(|s| s.scheduler.target())
    }

    pub fn scheduler(&self) -> Option<&FlipScheduler<SurfaceOf<B::Allocator>>> {
        self.session.as_ref().map(|s| &s.scheduler)
    }

    pub fn stats(&self) -> Option<FlipStats> {
        self.scheduler().map(FlipScheduler::stats)
    }

    /// Outcome of the most recent `flip()`.
    pub fn last_flip(&self) -> Option<FlipOutcome> {
        self.last_flip
    }

    pub fn requested_window(&self) -> Option<WindowProperties> {
        self.requested_window
    }

    /// Tears the session down now instead of at drop.
    ///
    /// An EGL surface created on the window handle must be destroyed first.
    pub fn shutdown(&mut self) {
        if self.session.take().is_some() {
            info!("Display session closed");
        }
    }
}

impl<B: DisplayBackend> NativeState for DrmNativeState<B> {
    fn init_display(&mut self) -> Result<(), DrmError> {
        if self.session.is_some() {
            warn!("init_display called twice, keeping the existing session");
            return Ok(());
        }

        if self.install_signal_handlers {
            shutdown::install_handlers()?;
        }

        // Locals drop in reverse order if any step fails.
        let device = self.backend.open_device()?;
        let target = select_target(&*device)?;
        let allocator = self.backend.create_allocator(&device)?;
        let surface = init_gbm(&allocator, &target.mode, self.format)?;

        let device: Rc<dyn KmsDevice> = device;
        let scheduler = FlipScheduler::new(device, target, surface, self.latch, &self.flip_config);
        self.session = Some(Session {
            scheduler,
            allocator,
        });
        info!("Display initialized");
        Ok(())
    }

    fn display(&self) -> NativeHandle {
        self.session
            .as_ref()
            .map_or(NativeHandle::null(), |s| s.allocator.native_handle())
    }

    fn create_window(&mut self, properties: WindowProperties) -> Result<(), DrmError> {
        let target = self.target().ok_or(DrmError::NotInitialized)?;
        let (width, height) = (target.mode.width() as i32, target.mode.height() as i32);
        if properties.width != width || properties.height != height || !properties.fullscreen {
            info!(
                "Requested {}x{} window (fullscreen: {}), output is always fullscreen {}x{}",
                properties.width, properties.height, properties.fullscreen, width, height
            );
        }
        self.requested_window = Some(properties);
        Ok(())
    }

    fn window(&mut self, properties: &mut WindowProperties) -> NativeHandle {
        let Some(session) = self.session.as_ref() else {
            return NativeHandle::null();
        };
        let mode = &session.scheduler.target().mode;
        *properties = WindowProperties {
            width: mode.width() as i32,
            height: mode.height() as i32,
            fullscreen: true,
            visual_id: 0,
        };
        session.scheduler.surface().native_handle()
    }

    fn visible(&mut self, visible: bool) {
        debug!("visible({}) ignored, the display is always visible", visible);
    }

    fn should_quit(&self) -> bool {
        self.latch.is_requested()
    }

    fn flip(&mut self) {
        let Some(session) = self.session.as_mut() else {
            warn!("flip() before init_display, ignoring");
            return;
        };
        self.last_flip = Some(session.scheduler.flip());
    }
}
