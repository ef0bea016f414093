//! # plot_engine
//!
//! GPU frame-lifecycle and multi-window rendering core for interactive
//! plotting. Vulkan-backed, with per-entity buffer caching, deferred GPU
//! resource deletion, and debounced swapchain recreation.
//!
//! ## Features
//!
//! - **Frame driver**: fence-synchronized begin/end frame protocol with
//!   one-retry swapchain recovery and sticky device-loss handling
//! - **Per-entity GPU cache**: dirty-tracked vertex/index buffers with 2x
//!   growth headroom, keyed by generation-checked ids
//! - **Deferred deletion ring**: retired buffers outlive every in-flight
//!   frame that may still reference them
//! - **Multi-window**: one swapchain per window over a shared device
//!   context, with debounced resize recreation
//! - **Headless export**: synchronous offscreen rendering into an RGBA
//!   buffer
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plot_engine::config::RendererConfig;
//! use plot_engine::render::{PrimitiveKind, Theme};
//! use plot_engine::window_manager::WindowManager;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let mut manager = WindowManager::new(&config, "waveform", 800, 600)?;
//!     let _series = manager.register_entity(PrimitiveKind::Line);
//!     let theme = Theme::default();
//!     while !manager.all_closed() {
//!         manager.pump_events();
//!         manager.maintain();
//!         manager.render(&mut [], &[], &theme)?;
//!     }
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod render;
pub mod window_manager;

pub use config::{Config, ConfigError, RendererConfig};
pub use render::renderer::{AxesDecorations, DrawItem, FrameReport, PlotRenderer};
pub use render::{
    Color, Drawable, EntityId, PrimitiveKind, RenderBackend, RenderError, RenderResult, SurfaceId,
    Theme, Viewport,
};
pub use window_manager::WindowManager;
