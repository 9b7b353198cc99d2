// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, one owning type per Vulkan object family.
// Every owner holds an Arc to what it was created from, so parents outlive
// their children.

pub mod adapter;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use swapchain::Swapchain;
