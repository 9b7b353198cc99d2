// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Graphics / present queue family selection
// - Logical device creation with the dynamic rendering feature chain
// - Queue handles

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::adapter::AdapterDescriptor;
use super::surface::Surface;
use super::VulkanInstance;
use crate::error::{RendererError, RendererResult};

/// Chosen queue families (may be the same index)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue requested per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Pick graphics and present families.
///
/// A single family that does both is preferred; otherwise the first graphics
/// family is paired with the first family that can present.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> RendererResult<QueueFamilyIndices>
where
    F: FnMut(u32) -> RendererResult<bool>,
{
    let mut present_support = Vec::with_capacity(families.len());
    for index in 0..families.len() as u32 {
        present_support.push(supports_present(index)?);
    }

    let is_graphics =
        |family: &vk::QueueFamilyProperties| family.queue_flags.contains(vk::QueueFlags::GRAPHICS);

    if let Some(index) = families
        .iter()
        .zip(&present_support)
        .position(|(family, &present)| is_graphics(family) && present)
    {
        let index = index as u32;
        return Ok(QueueFamilyIndices {
            graphics: index,
            present: index,
        });
    }

    let graphics = families
        .iter()
        .position(is_graphics)
        .ok_or(RendererError::NoQueueFamily("graphics"))? as u32;
    let present = present_support
        .iter()
        .position(|&present| present)
        .ok_or(RendererError::NoQueueFamily("present"))? as u32;

    Ok(QueueFamilyIndices { graphics, present })
}

/// Logical device plus its queues
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    /// Create the logical device for `adapter`, able to present to `surface`
    pub fn new(
        instance: Arc<VulkanInstance>,
        adapter: &AdapterDescriptor,
        surface: &Surface,
        extensions: &[&CStr],
    ) -> Result<Arc<Self>> {
        let queue_families = find_queue_families(&adapter.queue_families, |index| {
            surface.supports_present(adapter.handle, index)
        })?;
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_names: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();

        // Dynamic rendering, synchronization2 and extended dynamic state
        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut dynamic_state_features =
            vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::builder().extended_dynamic_state(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut vulkan13_features)
            .push_next(&mut dynamic_state_features);

        let create_info = vk::DeviceCreateInfo::builder()
            .push_next(&mut features2)
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names);

        let device = unsafe {
            instance
                .instance
                .create_device(adapter.handle, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok(Arc::new(Self {
            device,
            physical_device: adapter.handle,
            queue_families,
            graphics_queue,
            present_queue,
            instance,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RendererResult<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn families(flags: &[vk::QueueFlags]) -> Vec<vk::QueueFamilyProperties> {
        flags
            .iter()
            .map(|&queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = families(&[
            vk::QueueFlags::GRAPHICS,
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        ]);
        // family 0 graphics but no present, family 2 does both
        let indices = find_queue_families(&families, |i| Ok(i != 0)).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = families(&[vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS, vk::QueueFlags::COMPUTE]);
        let indices = find_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 2 });
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn missing_graphics_family_is_an_error() {
        let families = families(&[vk::QueueFlags::COMPUTE, vk::QueueFlags::TRANSFER]);
        let result = find_queue_families(&families, |_| Ok(true));
        assert!(matches!(result, Err(RendererError::NoQueueFamily("graphics"))));
    }

    #[test]
    fn missing_present_family_is_an_error() {
        let families = families(&[vk::QueueFlags::GRAPHICS]);
        let result = find_queue_families(&families, |_| Ok(false));
        assert!(matches!(result, Err(RendererError::NoQueueFamily("present"))));
    }

    #[test]
    fn present_query_failure_propagates() {
        let families = families(&[vk::QueueFlags::GRAPHICS]);
        let result = find_queue_families(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR.into()));
        assert!(matches!(
            result,
            Err(RendererError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
    }
}
