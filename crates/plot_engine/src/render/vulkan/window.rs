//! Window management using GLFW
//!
//! One [`Platform`] per process owns the GLFW context; each [`Window`]
//! wraps one OS window configured for Vulkan (no client API) and drains
//! its own event stream.

use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("window creation failed")]
    CreationFailed,

    #[error("GLFW error: {0}")]
    GlfwError(String),
}

pub type WindowResult<T> = Result<T, WindowError>;

/// Events this core consumes from the window system. Everything else
/// (keys, mouse) belongs to the excluded UI collaborator and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Framebuffer resized to the given pixel size.
    FramebufferResized { width: u32, height: u32 },
    /// The user requested the window close.
    CloseRequested,
}

/// Process-wide GLFW context. Create once; hand out windows.
pub struct Platform {
    glfw: glfw::Glfw,
}

impl Platform {
    pub fn new() -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        // Vulkan rendering: no OpenGL context.
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        Ok(Self { glfw })
    }

    pub fn create_window(&mut self, title: &str, width: u32, height: u32) -> WindowResult<Window> {
        let (mut window, events) = self
            .glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Window { window, events })
    }

    /// Pump the OS event queue. Each window drains its own receiver
    /// afterwards.
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Vulkan instance extensions the window system requires.
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("failed to get required extensions".to_string()))
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Drain pending events, translating the ones this core reacts to.
    pub fn drain_events(&mut self) -> Vec<WindowEvent> {
        let mut out = Vec::new();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    out.push(WindowEvent::FramebufferResized {
                        width: width.max(0) as u32,
                        height: height.max(0) as u32,
                    });
                }
                glfw::WindowEvent::Close => out.push(WindowEvent::CloseRequested),
                _ => {}
            }
        }
        out
    }

    /// Create a Vulkan surface using GLFW's built-in support.
    pub fn create_vulkan_surface(
        &mut self,
        instance: ash::vk::Instance,
    ) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!(
                "failed to create Vulkan surface: {result:?}"
            )))
        }
    }
}
