// =============================================================================
// RENDERER - owns every Vulkan object and performs the per-frame GPU work
// =============================================================================
//
// Setup order:
//   instance -> surface -> adapter -> device -> swapchain -> pipeline
//            -> command pool -> frame sync
//
// IMPORTANT: Field order matters for Drop! Fields are dropped top to bottom,
// which is the reverse of creation: sync objects and the command pool go
// before the pipeline, the swapchain before the surface, and the device
// before the instance.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use crate::backend::adapter::{self, AdapterDescriptor};
use crate::backend::command::{self, CommandPool, FrameTarget};
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::shader;
use crate::backend::surface::{Surface, SurfaceProvider};
use crate::backend::swapchain::SwapchainPlan;
use crate::backend::sync::FrameSyncSet;
use crate::backend::{Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::error::{RendererError, RendererResult};
use crate::frame::FrameBackend;

pub struct Renderer {
    frame_sync: FrameSyncSet,
    commands: CommandPool,
    pipeline: GraphicsPipeline,
    swapchain: Option<Swapchain>,
    surface: Surface,
    device: Arc<VulkanDevice>,
    _instance: Arc<VulkanInstance>,

    window: Arc<dyn SurfaceProvider>,
    shader_code: Vec<u32>,
    clear_color: [f32; 4],
    preferred_present_mode: vk::PresentModeKHR,
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl Renderer {
    /// Initialize all Vulkan resources for `window`.
    pub fn new(config: &Config, window: Arc<dyn SurfaceProvider>) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Fail on a missing shader before touching the GPU
        let shader_code = shader::load_spirv(&config.graphics.shader_path)?;

        let instance = Arc::new(VulkanInstance::new(
            &config.window.title,
            window.required_instance_extensions()?,
            config.validation_enabled(),
        )?);

        let surface = Surface::new(instance.clone(), window.as_ref())?;

        let required_extensions = adapter::required_device_extensions();
        let adapters = AdapterDescriptor::enumerate(&instance.instance)?;
        let selected = adapter::select_adapter(&adapters, vk::API_VERSION_1_3, &required_extensions)?;

        let device = VulkanDevice::new(instance.clone(), selected, &surface, &required_extensions)?;

        let preferred_present_mode = config.preferred_present_mode();
        let support = surface.query_support(device.physical_device)?;
        let plan = SwapchainPlan::negotiate(&support, window.framebuffer_size(), preferred_present_mode)?;

        // A window that starts minimized gets its chain on the first rebuild
        let swapchain = if plan.is_renderable() {
            Some(Swapchain::new(device.clone(), &surface, &plan, vk::SwapchainKHR::null())?)
        } else {
            log::info!("Surface has no drawable area yet, deferring swapchain creation");
            None
        };

        let pipeline = GraphicsPipeline::new(device.clone(), &shader_code, plan.surface_format.format)?;

        let frames_in_flight = config.frames_in_flight();
        let commands = CommandPool::new(device.clone(), frames_in_flight as u32)?;
        let frame_sync = FrameSyncSet::new(device.clone(), frames_in_flight)?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            frame_sync,
            commands,
            pipeline,
            swapchain,
            surface,
            device,
            _instance: instance,
            window,
            shader_code,
            clear_color: config.graphics.clear_color,
            preferred_present_mode,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        })
    }

    /// False until a window that started minimized gets a drawable area
    pub fn has_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    fn swapchain(&self) -> RendererResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RendererError::SwapchainBuild("no live swapchain".into()))
    }
}

/// Negotiate against fresh surface state and create a chain.
///
/// `Ok(None)` when the window currently has no drawable area.
fn build_swapchain(
    device: &Arc<VulkanDevice>,
    surface: &Surface,
    framebuffer_size: (u32, u32),
    preferred_present_mode: vk::PresentModeKHR,
    old_swapchain: vk::SwapchainKHR,
) -> RendererResult<Option<Swapchain>> {
    let support = surface.query_support(device.physical_device)?;
    let Some(plan) =
        SwapchainPlan::negotiate_renderable(&support, framebuffer_size, preferred_present_mode)?
    else {
        log::debug!("Surface has no drawable area, deferring swapchain creation");
        return Ok(None);
    };

    Swapchain::new(device.clone(), surface, &plan, old_swapchain).map(Some)
}

impl FrameBackend for Renderer {
    fn frames_in_flight(&self) -> usize {
        self.frame_sync.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.frame_sync.wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> RendererResult<(u32, bool)> {
        let semaphore = self.frame_sync.slot(slot).image_available;
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.frame_sync.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        let swapchain = self.swapchain()?;
        let target = FrameTarget {
            image: swapchain.images[image_index as usize],
            image_view: swapchain.image_views[image_index as usize],
            extent: swapchain.extent,
        };

        command::record_triangle(
            &self.device.device,
            self.commands.buffers[slot],
            &target,
            self.pipeline.pipeline,
            self.clear_color,
        )
    }

    fn submit(&mut self, slot: usize) -> RendererResult<()> {
        let sync = self.frame_sync.slot(slot);

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.commands.buffers[slot]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&self.wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence, // Signal this fence when GPU is done
            )?;
        }

        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
        let render_finished = self.frame_sync.slot(slot).render_finished;
        self.swapchain()?
            .present(self.device.present_queue, image_index, render_finished)
    }

    fn rebuild_swapchain(&mut self) -> RendererResult<bool> {
        // Nothing may still be using the old images or views
        self.device.wait_idle()?;

        let old_handle = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.swapchain);

        let rebuilt = build_swapchain(
            &self.device,
            &self.surface,
            self.window.framebuffer_size(),
            self.preferred_present_mode,
            old_handle,
        )?;

        let Some(swapchain) = rebuilt else {
            return Ok(false);
        };

        // Old chain and its views go once the successor exists
        self.swapchain = Some(swapchain);
        let format = self.swapchain()?.format;

        if format != self.pipeline.color_format {
            log::info!(
                "Swapchain format changed {:?} -> {:?}, rebuilding pipeline",
                self.pipeline.color_format,
                format
            );
            self.pipeline = GraphicsPipeline::new(self.device.clone(), &self.shader_code, format)?;
        }

        Ok(true)
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle during cleanup failed: {}", e);
        }

        // Remaining fields drop in declaration order
    }
}
