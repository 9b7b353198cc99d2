// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Negotiation (format, present mode, extent, image count) is kept separate
// from creation so it can be re-run against fresh surface capabilities on
// every rebuild.

use ash::vk;
use std::sync::Arc;

use super::surface::{Surface, SurfaceSupport};
use super::VulkanDevice;
use crate::error::{RendererError, RendererResult};

/// Images requested unless the surface demands more
pub const PREFERRED_IMAGE_COUNT: u32 = 3;

const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// Prefer 8-bit BGRA/RGBA sRGB with a nonlinear sRGB color space, else the
/// first format the surface reports.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&preferred| {
            formats.iter().copied().find(|f| {
                f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

/// Use `preferred` when offered, then mailbox, then FIFO (always supported, vsync)
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel;
/// then the framebuffer size clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Triple buffering when allowed; `max_image_count == 0` means no upper bound
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = PREFERRED_IMAGE_COUNT.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Everything needed to create a swapchain, derived from one support query
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn negotiate(
        support: &SurfaceSupport,
        framebuffer_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RendererResult<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| RendererError::SwapchainBuild("surface reports no formats".into()))?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }

    /// A zero-sized extent (minimized window) cannot back a swapchain
    pub fn is_renderable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }

    /// Negotiate, but `None` when the resulting extent has no area.
    ///
    /// The window size only matters when the surface leaves the extent
    /// undefined; a defined current extent is trusted as reported.
    pub fn negotiate_renderable(
        support: &SurfaceSupport,
        framebuffer_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RendererResult<Option<Self>> {
        let plan = Self::negotiate(support, framebuffer_size, preferred_present_mode)?;
        Ok(plan.is_renderable().then_some(plan))
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Build a chain for `plan`. `old_swapchain` is handed to the driver as
    /// the retiring chain; the caller still owns and destroys it.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        plan: &SwapchainPlan,
        old_swapchain: vk::SwapchainKHR,
    ) -> RendererResult<Self> {
        if !plan.is_renderable() {
            return Err(RendererError::SwapchainBuild(format!(
                "zero-sized extent {}x{}",
                plan.extent.width, plan.extent.height
            )));
        }

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.image_count
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance.instance, &device.device);

        let family_indices = [
            device.queue_families.graphics,
            device.queue_families.present,
        ];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if device.queue_families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| RendererError::SwapchainBuild(format!("vkCreateSwapchainKHR: {e}")))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RendererError::SwapchainBuild(format!(
                    "vkGetSwapchainImagesKHR: {e}"
                )));
            }
        };

        let image_views =
            match create_image_views(&device.device, &images, plan.surface_format.format) {
                Ok(views) => views,
                Err(e) => {
                    unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                    return Err(e);
                }
            };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: plan.surface_format.format,
            extent: plan.extent,
            device,
        })
    }

    /// Acquire next image for rendering, signalling `semaphore` when ready.
    ///
    /// Returns the image index and whether the chain is suboptimal.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RendererResult<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        result.map_err(RendererError::from_frame_status)
    }

    /// Present rendered image to screen.
    ///
    /// A suboptimal or out-of-date chain comes back as a recoverable error.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RendererResult<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => Err(RendererError::SwapchainSuboptimal),
            Err(e) => Err(RendererError::from_frame_status(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("Destroying swapchain ({} views)", self.image_views.len());
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// One 2D color view per image, mip 0 and layer 0 only
fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RendererResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        match unsafe { device.create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for view in image_views.drain(..) {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(RendererError::SwapchainBuild(format!("vkCreateImageView: {e}")));
            }
        }
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn capabilities(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    #[test]
    fn picks_srgb_format_at_any_index() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn rgba_srgb_is_accepted_when_bgra_is_missing() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_wins_regardless_of_order() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn configured_mode_falls_back_to_mailbox_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO),
            vk::PresentModeKHR::FIFO
        );

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::FIFO_RELAXED),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn current_extent_is_used_verbatim() {
        let caps = capabilities(2, 4, (1280, 720));
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn undefined_extent_clamps_framebuffer_size() {
        let caps = capabilities(2, 4, (u32::MAX, u32::MAX));
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));

        let extent = choose_extent(&caps, (8000, 10));
        assert_eq!((extent.width, extent.height), (4096, 64));
    }

    #[test]
    fn image_count_respects_bounds() {
        for (min, max) in [(1, 0), (2, 4), (2, 2), (3, 3), (4, 8), (5, 0), (1, 2)] {
            let caps = capabilities(min, max, (100, 100));
            let count = choose_image_count(&caps);
            assert_eq!(count, choose_image_count(&caps));
            assert!(count >= min);
            if max > 0 {
                assert!(count <= max);
            }
            if min <= 3 && (max == 0 || max >= 3) {
                assert!(count >= 3);
            }
        }
    }

    #[test]
    fn image_count_clamps_to_max() {
        assert_eq!(choose_image_count(&capabilities(1, 2, (1, 1))), 2);
        assert_eq!(choose_image_count(&capabilities(5, 0, (1, 1))), 5);
    }

    #[test]
    fn negotiates_reference_scenario() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (1280, 720)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan = SwapchainPlan::negotiate(&support, (800, 600), vk::PresentModeKHR::MAILBOX).unwrap();
        assert_eq!(plan.image_count, 3);
        assert_eq!((plan.extent.width, plan.extent.height), (1280, 720));
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert!(plan.is_renderable());
    }

    #[test]
    fn minimized_surface_is_not_renderable() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (0, 0)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan = SwapchainPlan::negotiate(&support, (0, 0), vk::PresentModeKHR::MAILBOX).unwrap();
        assert!(!plan.is_renderable());
    }

    #[test]
    fn defined_extent_ignores_zero_framebuffer() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (1024, 768)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan = SwapchainPlan::negotiate_renderable(&support, (0, 0), vk::PresentModeKHR::MAILBOX)
            .unwrap()
            .expect("defined extent is renderable");
        assert_eq!((plan.extent.width, plan.extent.height), (1024, 768));
    }

    #[test]
    fn zero_extent_defers_creation() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (0, 0)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let deferred =
            SwapchainPlan::negotiate_renderable(&support, (800, 600), vk::PresentModeKHR::MAILBOX).unwrap();
        assert!(deferred.is_none());

        // Undefined extent with a minimized window clamps to the minimum, never zero here
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (u32::MAX, u32::MAX)),
            ..support
        };
        let plan = SwapchainPlan::negotiate_renderable(&support, (0, 0), vk::PresentModeKHR::MAILBOX)
            .unwrap()
            .expect("clamped into the supported range");
        assert_eq!((plan.extent.width, plan.extent.height), (64, 64));
    }

    #[test]
    fn no_formats_fails_negotiation() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4, (640, 480)),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let result = SwapchainPlan::negotiate(&support, (640, 480), vk::PresentModeKHR::MAILBOX);
        assert!(matches!(result, Err(RendererError::SwapchainBuild(_))));
    }
}
