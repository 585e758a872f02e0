// src/mock.rs

//! In-memory stand-ins for the display card and the buffer manager.
//!
//! Both record every call so tests can assert on framebuffer registration,
//! flips, mode-sets and buffer releases without hardware.

use crate::config::PixelFormat;
use crate::error::DrmError;
use crate::framebuffer::FramebufferBinding;
use crate::gbm::{BufferAllocator, BufferId, BufferUsage, RenderSurface, ScanoutBuffer};
use crate::kms::{
    BufferLayout, CardResources, ConnectionState, ConnectorInfo, CrtcInfo, EncoderInfo,
    FlipEvent, KmsDevice, ModeInfo, ModeTypeFlags,
};
use drm::buffer::DrmFourcc;
use crate::native_state::{DisplayBackend, NativeHandle};
use nix::errno::Errno;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

pub const CONNECTOR_ID: u32 = 10;
pub const ENCODER_ID: u32 = 20;
pub const CRTC_ID: u32 = 30;
/// Framebuffer scanned out before the session started.
pub const CONSOLE_FB_ID: u32 = 5;

pub fn mode(width: u16, height: u16, preferred: bool) -> ModeInfo {
    ModeInfo {
        clock: 148_500,
        hdisplay: width,
        hsync_start: width + 88,
        hsync_end: width + 132,
        htotal: width + 280,
        hskew: 0,
        vdisplay: height,
        vsync_start: height + 4,
        vsync_end: height + 9,
        vtotal: height + 45,
        vscan: 0,
        vrefresh: 60,
        flags: 0,
        mode_type: if preferred {
            ModeTypeFlags::DRIVER | ModeTypeFlags::PREFERRED
        } else {
            ModeTypeFlags::DRIVER
        },
        name: format!("{}x{}", width, height),
    }
}

/// How the mock card answers page-flip requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipBehavior {
    /// Queue a matching completion event immediately.
    Complete,
    /// Accept the request but never deliver an event.
    NeverComplete,
    /// Reject the request with `EINVAL`.
    Reject,
}

#[derive(Debug)]
pub struct MockKmsState {
    pub resources: CardResources,
    pub connectors: BTreeMap<u32, ConnectorInfo>,
    pub encoders: BTreeMap<u32, EncoderInfo>,
    pub crtcs: BTreeMap<u32, CrtcInfo>,
    pub flip_behavior: FlipBehavior,
    /// Framebuffer registration fails for these GEM handles.
    pub rejected_handles: HashSet<u32>,
    pub fail_set_crtc: bool,
    /// Events delivered before the real completion, e.g. for another CRTC.
    pub injected_events: VecDeque<FlipEvent>,
    pub added_framebuffers: Vec<(u32, BufferLayout)>,
    pub removed_framebuffers: Vec<u32>,
    pub set_crtc_calls: Vec<(u32, u32)>,
    /// Framebuffer ids of accepted page-flip requests.
    pub flip_requests: Vec<u32>,
    queued_events: VecDeque<FlipEvent>,
    next_fb_id: u32,
}

pub struct MockKmsDevice {
    state: RefCell<MockKmsState>,
    on_page_flip: RefCell<Option<Box<dyn Fn()>>>,
}

impl MockKmsDevice {
    pub fn empty() -> Self {
        Self {
            state: RefCell::new(MockKmsState {
                resources: CardResources::default(),
                connectors: BTreeMap::new(),
                encoders: BTreeMap::new(),
                crtcs: BTreeMap::new(),
                flip_behavior: FlipBehavior::Complete,
                rejected_handles: HashSet::new(),
                fail_set_crtc: false,
                injected_events: VecDeque::new(),
                added_framebuffers: Vec::new(),
                removed_framebuffers: Vec::new(),
                set_crtc_calls: Vec::new(),
                flip_requests: Vec::new(),
                queued_events: VecDeque::new(),
                next_fb_id: 100,
            }),
            on_page_flip: RefCell::new(None),
        }
    }

    /// One connected connector with a single mode, wired to one encoder and CRTC.
    pub fn single_display(width: u16, height: u16) -> Self {
        let device = Self::empty();
        {
            let mut state = device.state_mut();
            state.resources = CardResources {
                connectors: vec![CONNECTOR_ID],
                encoders: vec![ENCODER_ID],
                crtcs: vec![CRTC_ID],
            };
            state.connectors.insert(
                CONNECTOR_ID,
                ConnectorInfo {
                    id: CONNECTOR_ID,
                    encoder_id: ENCODER_ID,
                    state: ConnectionState::Connected,
                    modes: vec![mode(width, height, true)],
                    encoders: vec![ENCODER_ID],
                },
            );
            state.encoders.insert(
                ENCODER_ID,
                EncoderInfo {
                    id: ENCODER_ID,
                    crtc_id: CRTC_ID,
                    possible_crtcs: 0b1,
                },
            );
            state.crtcs.insert(
                CRTC_ID,
                CrtcInfo {
                    id: CRTC_ID,
                    fb_id: CONSOLE_FB_ID,
                    x: 0,
                    y: 0,
                    mode: Some(mode(1024, 768, false)),
                },
            );
        }
        device
    }

    pub fn state(&self) -> Ref<'_, MockKmsState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, MockKmsState> {
        self.state.borrow_mut()
    }

    /// Runs `hook` after every accepted page-flip request.
    pub fn on_page_flip(&self, hook: impl Fn() + 'static) {
        *self.on_page_flip.borrow_mut() = Some(Box::new(hook));
    }

    /// Framebuffers registered and not yet removed.
    pub fn live_framebuffers(&self) -> Vec<u32> {
        let state = self.state();
        state
            .added_framebuffers
            .iter()
            .map(|(fb, _)| *fb)
            .filter(|fb| !state.removed_framebuffers.contains(fb))
            .collect()
    }
}

impl KmsDevice for MockKmsDevice {
    fn resources(&self) -> Result<CardResources, DrmError> {
        Ok(self.state().resources.clone())
    }

    fn connector(&self, id: u32) -> Result<ConnectorInfo, DrmError> {
        self.state()
            .connectors
            .get(&id)
            .cloned()
            .ok_or(DrmError::kms("drmModeGetConnector", Errno::ENOENT))
    }

    fn encoder(&self, id: u32) -> Result<EncoderInfo, DrmError> {
        self.state()
            .encoders
            .get(&id)
            .copied()
            .ok_or(DrmError::kms("drmModeGetEncoder", Errno::ENOENT))
    }

    fn crtc(&self, id: u32) -> Result<CrtcInfo, DrmError> {
        self.state()
            .crtcs
            .get(&id)
            .cloned()
            .ok_or(DrmError::kms("drmModeGetCrtc", Errno::ENOENT))
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        _position: (u32, u32),
        _connectors: &[u32],
        _mode: Option<&ModeInfo>,
    ) -> Result<(), DrmError> {
        let mut state = self.state_mut();
        if state.fail_set_crtc {
            return Err(DrmError::kms("drmModeSetCrtc", Errno::EINVAL));
        }
        state.set_crtc_calls.push((crtc_id, fb_id));
        Ok(())
    }

    fn add_framebuffer(&self, layout: &BufferLayout) -> Result<u32, DrmError> {
        let mut state = self.state_mut();
        if state.rejected_handles.contains(&layout.handle) {
            return Err(DrmError::FramebufferCreationFailed {
                width: layout.width,
                height: layout.height,
                stride: layout.stride,
                source: Errno::EINVAL,
            });
        }
        let fb_id = state.next_fb_id;
        state.next_fb_id += 1;
        state.added_framebuffers.push((fb_id, *layout));
        Ok(fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), DrmError> {
        self.state_mut().removed_framebuffers.push(fb_id);
        Ok(())
    }

    fn page_flip(&self, crtc_id: u32, fb_id: u32) -> Result<(), DrmError> {
        {
            let mut state = self.state_mut();
            if state.flip_behavior == FlipBehavior::Reject {
                return Err(DrmError::kms("drmModePageFlip", Errno::EINVAL));
            }
            state.flip_requests.push(fb_id);
            if state.flip_behavior == FlipBehavior::Complete {
                let sequence = state.flip_requests.len() as u32;
                state.queued_events.push_back(FlipEvent {
                    crtc_id,
                    sequence,
                    time: Duration::ZERO,
                });
            }
        }
        if let Some(hook) = self.on_page_flip.borrow().as_ref() {
            hook();
        }
        Ok(())
    }

    fn wait_for_events(&self, timeout: Duration) -> Result<Vec<FlipEvent>, DrmError> {
        let events: Vec<FlipEvent> = {
            let mut state = self.state_mut();
            let mut events: Vec<FlipEvent> = state.injected_events.drain(..).collect();
            events.extend(state.queued_events.drain(..));
            events
        };
        if events.is_empty() {
            std::thread::sleep(timeout);
        }
        Ok(events)
    }
}

// --- Buffer manager ---

#[derive(Debug)]
struct MockBo {
    id: usize,
    locked: bool,
    binding: Option<FramebufferBinding>,
}

#[derive(Debug, Default)]
pub struct MockSurfaceState {
    bos: Vec<MockBo>,
    next_front: usize,
    /// Buffer ids in release order.
    pub released: Vec<BufferId>,
    /// When set, `lock_front_buffer` reports that nothing was rendered.
    pub starved: bool,
}

/// A surface with a fixed ring of buffer objects; clones share state.
#[derive(Clone)]
pub struct MockSurface {
    state: Rc<RefCell<MockSurfaceState>>,
    width: u32,
    height: u32,
    format: DrmFourcc,
}

pub struct MockBuffer {
    id: usize,
    width: u32,
    height: u32,
    format: DrmFourcc,
    state: Rc<RefCell<MockSurfaceState>>,
}

impl MockSurface {
    pub fn new(width: u32, height: u32, buffers: usize) -> Self {
        let bos = (0..buffers)
            .map(|i| MockBo {
                id: i + 1,
                locked: false,
                binding: None,
            })
            .collect();
        Self {
            state: Rc::new(RefCell::new(MockSurfaceState {
                bos,
                ..MockSurfaceState::default()
            })),
            width,
            height,
            format: PixelFormat::Xrgb8888.fourcc(),
        }
    }

    pub fn state(&self) -> Ref<'_, MockSurfaceState> {
        self.state.borrow()
    }

    pub fn set_starved(&self, starved: bool) {
        self.state.borrow_mut().starved = starved;
    }

    pub fn locked_count(&self) -> usize {
        self.state.borrow().bos.iter().filter(|bo| bo.locked).count()
    }

    /// Destroys a buffer object the way the allocator would, firing its binding's drop.
    pub fn reclaim(&self, id: BufferId) {
        let binding = {
            let mut state = self.state.borrow_mut();
            state
                .bos
                .iter_mut()
                .find(|bo| bo.id == id.0)
                .and_then(|bo| bo.binding.take())
        };
        drop(binding);
    }

    /// Destroys every buffer object, as `gbm_surface_destroy` does.
    pub fn destroy_all(&self) {
        let bindings: Vec<FramebufferBinding> = {
            let mut state = self.state.borrow_mut();
            state.bos.iter_mut().filter_map(|bo| bo.binding.take()).collect()
        };
        drop(bindings);
    }
}

impl ScanoutBuffer for MockBuffer {
    fn id(&self) -> BufferId {
        BufferId(self.id)
    }

    fn layout(&self) -> BufferLayout {
        BufferLayout {
            width: self.width,
            height: self.height,
            stride: self.width * 4,
            format: self.format,
            handle: self.id as u32,
        }
    }

    fn framebuffer_id(&self) -> Option<u32> {
        self.state
            .borrow()
            .bos
            .iter()
            .find(|bo| bo.id == self.id)
            .and_then(|bo| bo.binding.as_ref().map(FramebufferBinding::fb_id))
    }

    fn attach_framebuffer(&mut self, binding: FramebufferBinding) {
        let previous = {
            let mut state = self.state.borrow_mut();
            let bo = state
                .bos
                .iter_mut()
                .find(|bo| bo.id == self.id)
                .expect("buffer belongs to this surface");
            bo.binding.replace(binding)
        };
        drop(previous);
    }
}

impl RenderSurface for MockSurface {
    type Buffer = MockBuffer;

    fn lock_front_buffer(&mut self) -> Option<MockBuffer> {
        let mut state = self.state.borrow_mut();
        if state.starved {
            return None;
        }
        let count = state.bos.len();
        for step in 0..count {
            let index = (state.next_front + step) % count;
            if !state.bos[index].locked {
                state.bos[index].locked = true;
                state.next_front = (index + 1) % count;
                return Some(MockBuffer {
                    id: state.bos[index].id,
                    width: self.width,
                    height: self.height,
                    format: self.format,
                    state: Rc::clone(&self.state),
                });
            }
        }
        None
    }

    fn release_buffer(&mut self, buffer: MockBuffer) {
        let mut state = self.state.borrow_mut();
        let bo = state
            .bos
            .iter_mut()
            .find(|bo| bo.id == buffer.id)
            .expect("buffer belongs to this surface");
        assert!(bo.locked, "buffer {} released twice", buffer.id);
        bo.locked = false;
        state.released.push(BufferId(buffer.id));
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::from_ptr(Rc::as_ptr(&self.state) as *mut libc::c_void)
    }
}

/// Allocator handing out a prepared `MockSurface`.
pub struct MockAllocator {
    surface: MockSurface,
    supported: bool,
    /// Last `(width, height, format)` requested.
    pub requested: RefCell<Option<(u32, u32, PixelFormat)>>,
}

impl MockAllocator {
    pub fn new(surface: MockSurface) -> Self {
        Self {
            surface,
            supported: true,
            requested: RefCell::new(None),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(MockSurface::new(0, 0, 0))
        }
    }
}

impl BufferAllocator for MockAllocator {
    type Surface = MockSurface;

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::from_ptr(self as *const Self as *mut libc::c_void)
    }

    fn create_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        _usage: BufferUsage,
    ) -> Result<MockSurface, DrmError> {
        *self.requested.borrow_mut() = Some((width, height, format));
        if !self.supported {
            return Err(DrmError::SurfaceCreationFailed {
                width,
                height,
                format: format.name().to_string(),
                reason: "format/usage not supported by the driver".to_string(),
            });
        }
        let mut surface = self.surface.clone();
        surface.width = width;
        surface.height = height;
        surface.format = format.fourcc();
        Ok(surface)
    }
}

/// Backend that hands out shared mock devices; `None` simulates a missing card.
pub struct MockBackend {
    pub device: Option<Rc<MockKmsDevice>>,
    pub surface: MockSurface,
    pub allocator_supported: bool,
}

impl MockBackend {
    pub fn new(device: Rc<MockKmsDevice>, surface: MockSurface) -> Self {
        Self {
            device: Some(device),
            surface,
            allocator_supported: true,
        }
    }
}

impl DisplayBackend for MockBackend {
    type Device = MockKmsDevice;
    type Allocator = MockAllocator;

    fn open_device(&self) -> Result<Rc<MockKmsDevice>, DrmError> {
        self.device
            .clone()
            .ok_or_else(|| DrmError::NoDisplayFound("/dev/dri/card0: No such file or directory".into()))
    }

    fn create_allocator(&self, _device: &Rc<MockKmsDevice>) -> Result<MockAllocator, DrmError> {
        if self.allocator_supported {
            Ok(MockAllocator::new(self.surface.clone()))
        } else {
            Ok(MockAllocator::unsupported())
        }
    }
}
