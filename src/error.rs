// Renderer error taxonomy
//
// Initialization errors are fatal. Per-frame errors split into the two
// swapchain statuses we recover from by rebuilding, and everything else.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("No GPU satisfies the required API version, queue and extension support")]
    NoSuitableAdapter,

    #[error("No queue family supports {0}")]
    NoQueueFamily(&'static str),

    #[error("Failed to create presentation surface: {0}")]
    SurfaceCreation(vk::Result),

    #[error("Failed to build swapchain: {0}")]
    SwapchainBuild(String),

    #[error("Failed to build graphics pipeline: {0}")]
    PipelineBuild(String),

    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Required layer or extension is not supported: {0}")]
    LayerOrExtensionUnsupported(String),

    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("Swapchain is suboptimal for the surface")]
    SwapchainSuboptimal,

    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
}

impl RendererError {
    /// Map a raw status from acquire/present onto the taxonomy.
    pub fn from_frame_status(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            vk::Result::SUBOPTIMAL_KHR => Self::SwapchainSuboptimal,
            other => Self::Vulkan(other),
        }
    }

    /// Recovered locally by rebuilding the swapchain; anything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate | Self::SwapchainSuboptimal)
    }
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;
