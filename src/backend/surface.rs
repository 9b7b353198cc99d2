// Presentation surface
//
// The window system is an opaque provider: it reports its framebuffer size and
// knows how to make a VkSurfaceKHR for an instance. Everything else about the
// window stays outside the renderer.

use anyhow::Result;
use ash::vk;
use std::ffi::c_char;
use std::sync::Arc;

use super::VulkanInstance;
use crate::error::{RendererError, RendererResult};

pub trait SurfaceProvider {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Instance extensions needed to create a surface for this window
    fn required_instance_extensions(&self) -> Result<&'static [*const c_char]>;

    /// Create a surface bound to `instance`
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RendererResult<vk::SurfaceKHR>;
}

/// Owned surface; keeps the instance alive until it is destroyed
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(instance: Arc<VulkanInstance>, provider: &dyn SurfaceProvider) -> RendererResult<Self> {
        let surface = provider.create_surface(&instance.entry, &instance.instance)?;
        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> RendererResult<bool> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }?)
    }

    /// Query fresh capabilities, formats and present modes
    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> RendererResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// What a surface offers on one adapter at one moment
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

// winit windows expose rwh 0.5 handles for ash-window
impl SurfaceProvider for winit::window::Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn required_instance_extensions(&self) -> Result<&'static [*const c_char]> {
        use raw_window_handle::HasRawDisplayHandle;
        Ok(ash_window::enumerate_required_extensions(self.raw_display_handle())?)
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RendererResult<vk::SurfaceKHR> {
        use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.raw_display_handle(),
                self.raw_window_handle(),
                None,
            )
        }
        .map_err(RendererError::SurfaceCreation)
    }
}
