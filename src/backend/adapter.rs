// Adapter selection
//
// Snapshots each physical device's capabilities and picks the first one that
// meets the API version, graphics queue and extension requirements.

use ash::vk;
use std::ffi::CStr;

use crate::error::{RendererError, RendererResult};

/// Device extensions every adapter must expose
pub fn required_device_extensions() -> [&'static CStr; 4] {
    [
        ash::extensions::khr::Swapchain::name(),
        ash::extensions::khr::DynamicRendering::name(),
        ash::extensions::ext::ExtendedDynamicState::name(),
        ash::extensions::khr::Synchronization2::name(),
    ]
}

/// Read-only capability snapshot of one physical device
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub api_version: u32,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<String>,
}

impl AdapterDescriptor {
    pub fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> RendererResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }?
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        Ok(Self {
            handle,
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            api_version: properties.api_version,
            queue_families,
            extensions,
        })
    }

    /// Snapshot every adapter in enumeration order
    pub fn enumerate(instance: &ash::Instance) -> RendererResult<Vec<Self>> {
        let handles = unsafe { instance.enumerate_physical_devices() }?;
        handles
            .into_iter()
            .map(|handle| Self::query(instance, handle))
            .collect()
    }

    pub fn has_graphics_queue(&self) -> bool {
        self.queue_families
            .iter()
            .any(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|ext| *ext == name)
    }

    pub fn is_suitable(&self, required_api_version: u32, required_extensions: &[&CStr]) -> bool {
        self.api_version >= required_api_version
            && self.has_graphics_queue()
            && required_extensions
                .iter()
                .all(|ext| self.supports_extension(ext))
    }
}

/// First adapter, in enumeration order, that passes every predicate.
///
/// There is deliberately no ranking between eligible adapters.
pub fn select_adapter<'a>(
    adapters: &'a [AdapterDescriptor],
    required_api_version: u32,
    required_extensions: &[&CStr],
) -> RendererResult<&'a AdapterDescriptor> {
    let selected = adapters
        .iter()
        .find(|adapter| adapter.is_suitable(required_api_version, required_extensions))
        .ok_or(RendererError::NoSuitableAdapter)?;

    log::info!(
        "Selected GPU: {} (API {}.{}.{})",
        selected.name,
        vk::api_version_major(selected.api_version),
        vk::api_version_minor(selected.api_version),
        vk::api_version_patch(selected.api_version)
    );

    Ok(selected)
}
