// Command pool and per-frame command recording
//
// Buffers are allocated once per frame slot and reset every frame, never
// reallocated. Recording uses dynamic rendering and synchronization2 barriers.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RendererResult;

const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Command pool on the graphics family plus one buffer per frame slot
pub struct CommandPool {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>, buffer_count: u32) -> RendererResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            // RESET: Allow individual buffer reset
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(buffer_count);

        let buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees the command buffers
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Per-frame inputs for recording the triangle
pub struct FrameTarget {
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// Barrier description for one color-image layout transition
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// Fresh image into something we can draw to; previous contents are discarded
pub const TO_COLOR_ATTACHMENT: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::UNDEFINED,
    new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
    dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    src_access: vk::AccessFlags2::NONE,
    dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
};

/// Finished color attachment into the layout the presentation engine reads.
/// The present semaphore orders the read, so there is no destination access.
pub const TO_PRESENT: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
    dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
    src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    dst_access: vk::AccessFlags2::NONE,
};

/// Viewport and scissor covering the whole target
pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

/// Record one frame: transition, clear + draw the triangle, transition back.
pub fn record_triangle(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &FrameTarget,
    pipeline: vk::Pipeline,
    clear_color: [f32; 4],
) -> RendererResult<()> {
    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info)?;

        transition_image(device, cmd, target.image, &TO_COLOR_ATTACHMENT);

        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(target.image_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            })
            .build();
        let color_attachments = [color_attachment];

        let (viewport, scissor) = full_viewport(target.extent);

        let rendering_info = vk::RenderingInfo::builder()
            .render_area(scissor)
            .layer_count(1)
            .color_attachments(&color_attachments);

        device.cmd_begin_rendering(cmd, &rendering_info);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
        // Positions come from the vertex index, nothing is bound
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_rendering(cmd);

        transition_image(device, cmd, target.image, &TO_PRESENT);

        device.end_command_buffer(cmd)?;
    }

    Ok(())
}

unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    transition: &LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier2::builder()
        .src_stage_mask(transition.src_stage)
        .src_access_mask(transition.src_access)
        .dst_stage_mask(transition.dst_stage)
        .dst_access_mask(transition.dst_access)
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_SUBRESOURCE_RANGE)
        .build();
    let barriers = [barrier];

    let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);

    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}
