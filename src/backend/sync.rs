// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One set per frame in flight; a slot's fence guards its command buffer.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RendererResult;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> RendererResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None)?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e.into());
                }
            };
            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// All frame-in-flight slots
pub struct FrameSyncSet {
    slots: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    pub fn new(device: Arc<VulkanDevice>, count: usize) -> RendererResult<Self> {
        let mut set = Self {
            slots: Vec::with_capacity(count),
            device,
        };
        // Partially built sets clean up through Drop
        for _ in 0..count.max(1) {
            let slot = FrameSync::new(&set.device.device)?;
            set.slots.push(slot);
        }
        log::debug!("Created {} frame sync slots", set.slots.len());
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &FrameSync {
        &self.slots[index]
    }

    /// Block until the slot's previous submission has finished.
    ///
    /// `u64::MAX` means forever, but a driver may still report a timeout, so
    /// keep waiting until the fence is actually signaled.
    pub fn wait(&self, index: usize) -> RendererResult<()> {
        let fences = [self.slots[index].in_flight_fence];
        loop {
            match unsafe { self.device.device.wait_for_fences(&fences, true, u64::MAX) } {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) => {
                    log::trace!("Fence wait for slot {} timed out, waiting again", index);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Only call right before resubmitting the slot's command buffer
    pub fn reset(&self, index: usize) -> RendererResult<()> {
        let fences = [self.slots[index].in_flight_fence];
        Ok(unsafe { self.device.device.reset_fences(&fences) }?)
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.destroy(&self.device.device);
        }
    }
}
