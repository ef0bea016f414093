//! Multi-window orchestration
//!
//! Owns the windowing platform, one window per surface, the Vulkan
//! backend, and the renderer. Ownership is one-directional: the manager
//! owns windows and their surfaces; surfaces hold non-owning handles into
//! the shared device context and never point back.
//!
//! Resize events are debounced per window: an event only records the
//! target size and a timestamp, and the swapchain is rebuilt once no
//! event has arrived for the configured quiescent interval.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::RendererConfig;
use crate::render::renderer::{AxesDecorations, DrawItem, FrameReport, PlotRenderer};
use crate::render::vulkan::{
    Platform, PresentPreference, VulkanBackend, VulkanError, Window, WindowEvent,
};
use crate::render::{
    EntityId, PrimitiveKind, RenderBackend, RenderError, RenderResult, ResizeDebounce, SurfaceId,
    Theme,
};

struct ManagedWindow {
    window: Window,
    debounce: ResizeDebounce,
    close_requested: bool,
}

/// Owns all windows and drives rendering across them.
pub struct WindowManager {
    platform: Platform,
    backend: VulkanBackend,
    renderer: PlotRenderer,
    windows: HashMap<SurfaceId, ManagedWindow>,
    /// Surface that device-global calls and [`render`](Self::render)
    /// target.
    active: SurfaceId,
    quiescence: Duration,
}

impl WindowManager {
    /// Initialize the platform, the first window, and the GPU stack.
    pub fn new(config: &RendererConfig, title: &str, width: u32, height: u32) -> RenderResult<Self> {
        let mut platform = Platform::new()?;
        let mut window = platform.create_window(title, width, height)?;

        let preference = if config.vsync {
            PresentPreference::Vsync
        } else {
            PresentPreference::LowLatency
        };
        let (mut backend, first_surface) = VulkanBackend::new(
            &platform,
            &mut window,
            PathBuf::from(&config.shader_dir),
            preference,
        )?;
        let renderer = PlotRenderer::new(&mut backend)?;

        let quiescence = Duration::from_millis(config.resize_debounce_ms);
        let mut windows = HashMap::new();
        windows.insert(
            first_surface,
            ManagedWindow {
                window,
                debounce: ResizeDebounce::new(quiescence),
                close_requested: false,
            },
        );

        Ok(Self {
            platform,
            backend,
            renderer,
            windows,
            active: first_surface,
            quiescence,
        })
    }

    /// Open an additional window with its own surface and swapchain.
    pub fn create_window(&mut self, title: &str, width: u32, height: u32) -> RenderResult<SurfaceId> {
        let mut window = self.platform.create_window(title, width, height)?;
        let surface = self.backend.add_window_surface(&mut window)?;
        self.windows.insert(
            surface,
            ManagedWindow {
                window,
                debounce: ResizeDebounce::new(self.quiescence),
                close_requested: false,
            },
        );
        log::info!("opened window {title:?} ({width}x{height})");
        Ok(surface)
    }

    /// Close a window, retiring its decoration buffers through the ring.
    pub fn close_window(&mut self, surface: SurfaceId) {
        if self.windows.remove(&surface).is_some() {
            self.renderer.remove_surface(surface);
            self.backend.remove_surface(surface);
            if self.active == surface {
                if let Some(&next) = self.windows.keys().next() {
                    self.active = next;
                    let _ = self.backend.set_active_surface(next);
                }
            }
        }
    }

    pub fn set_active(&mut self, surface: SurfaceId) -> RenderResult<()> {
        if !self.windows.contains_key(&surface) {
            return Err(RenderError::Vulkan(VulkanError::NoActiveSurface));
        }
        self.backend.set_active_surface(surface)?;
        self.active = surface;
        Ok(())
    }

    pub fn active(&self) -> SurfaceId {
        self.active
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// True when every window has been closed by the user.
    pub fn all_closed(&self) -> bool {
        self.windows.is_empty()
    }

    /// Register a drawable entity with the shared renderer.
    pub fn register_entity(&mut self, kind: PrimitiveKind) -> EntityId {
        self.renderer.register_entity(kind)
    }

    /// Remove a drawable entity; its buffers are retired via the ring.
    pub fn remove_entity(&mut self, id: EntityId) {
        self.renderer.remove_entity(id);
    }

    /// Pump OS events and fold them into per-window state. Resize events
    /// only arm the debounce; nothing is rebuilt here.
    pub fn pump_events(&mut self) {
        self.platform.poll_events();
        let now = Instant::now();
        for (&surface, managed) in &mut self.windows {
            for event in managed.window.drain_events() {
                match event {
                    WindowEvent::FramebufferResized { width, height } => {
                        managed.debounce.record(width, height, now);
                        self.backend.note_framebuffer_extent(surface, width, height);
                    }
                    WindowEvent::CloseRequested => {
                        managed.close_requested = true;
                    }
                }
            }
            if managed.window.should_close() {
                managed.close_requested = true;
            }
        }
    }

    /// Apply debounced resizes and reap closed windows. Call once per
    /// frame loop tick, after [`pump_events`](Self::pump_events).
    pub fn maintain(&mut self) {
        let now = Instant::now();

        let mut resizes = Vec::new();
        let mut closed = Vec::new();
        for (&surface, managed) in &mut self.windows {
            if managed.close_requested {
                closed.push(surface);
                continue;
            }
            if let Some((width, height)) = managed.debounce.poll(now) {
                resizes.push((surface, width, height));
            }
        }

        for surface in closed {
            log::info!("window closed");
            self.close_window(surface);
        }

        let previous = self.active;
        for (surface, width, height) in resizes {
            if self.backend.set_active_surface(surface).is_err() {
                continue;
            }
            if !self.backend.recreate_swapchain(width, height) {
                log::debug!("deferred resize to {width}x{height} skipped (unusable extent)");
            }
        }
        if self.windows.contains_key(&previous) {
            let _ = self.backend.set_active_surface(previous);
        }
    }

    /// Resize the active window's swapchain immediately.
    ///
    /// Returns false for zero dimensions or when no window exists; returns
    /// true without recreating when the size is unchanged.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if !self.windows.contains_key(&self.active) {
            return false;
        }
        if self.backend.set_active_surface(self.active).is_err() {
            return false;
        }
        if self.backend.surface_extent() == (width, height) {
            return true;
        }
        self.backend.note_framebuffer_extent(self.active, width, height);
        self.backend.recreate_swapchain(width, height)
    }

    /// Render one frame to the active window.
    pub fn render(
        &mut self,
        items: &mut [DrawItem<'_>],
        decorations: &[AxesDecorations<'_>],
        theme: &Theme,
    ) -> RenderResult<FrameReport> {
        self.render_window(self.active, items, decorations, theme)
    }

    /// Render one frame to a specific window.
    pub fn render_window(
        &mut self,
        surface: SurfaceId,
        items: &mut [DrawItem<'_>],
        decorations: &[AxesDecorations<'_>],
        theme: &Theme,
    ) -> RenderResult<FrameReport> {
        self.backend.set_active_surface(surface)?;
        self.renderer
            .render_frame(&mut self.backend, surface, items, decorations, theme)
    }

    /// Render synchronously into `out_rgba` without a window.
    ///
    /// Returns false when the requested size is zero, the output slice is
    /// too small, or there is nothing to draw.
    pub fn render_to_buffer(
        &mut self,
        out_rgba: &mut [u8],
        width: u32,
        height: u32,
        items: &mut [DrawItem<'_>],
        decorations: &[AxesDecorations<'_>],
        theme: &Theme,
    ) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if out_rgba.len() < (width as usize) * (height as usize) * 4 {
            return false;
        }
        if items.is_empty() && decorations.is_empty() {
            return false;
        }

        let surface = match self.backend.add_offscreen_surface(width, height) {
            Ok(surface) => surface,
            Err(e) => {
                log::error!("offscreen surface creation failed: {e}");
                return false;
            }
        };
        let previous = self.active;
        if self.backend.set_active_surface(surface).is_err() {
            self.backend.remove_surface(surface);
            return false;
        }

        let rendered = self
            .renderer
            .render_frame(&mut self.backend, surface, items, decorations, theme)
            .map(|report| report.presented)
            .unwrap_or(false);
        let copied = rendered && self.backend.readback_framebuffer(out_rgba, width, height);

        self.renderer.remove_surface(surface);
        self.backend.remove_surface(surface);
        if self.windows.contains_key(&previous) {
            let _ = self.backend.set_active_surface(previous);
        }
        copied
    }

    /// Retire every cached buffer, drain the deletion ring, and idle-wait
    /// the device. Windows close when the manager drops.
    pub fn shutdown(&mut self) {
        self.renderer.shutdown(&mut self.backend);
        self.backend.wait_idle();
    }
}
