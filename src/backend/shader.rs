// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. The triangle ships as one module
// with both stages; `vertMain` and `fragMain` are its entry points.

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RendererError, RendererResult};

pub const VERTEX_ENTRY: &CStr = c"vertMain";
pub const FRAGMENT_ENTRY: &CStr = c"fragMain";

/// Read a SPIR-V file into aligned words
pub fn load_spirv(path: &Path) -> RendererResult<Vec<u32>> {
    let shader_load_error = |source| RendererError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(shader_load_error)?;
    let words = parse_spirv(&bytes).map_err(shader_load_error)?;

    log::info!("Loaded shader {:?} ({} bytes)", path, bytes.len());
    Ok(words)
}

/// Validate magic/length and re-align the byte blob into u32 words
pub fn parse_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
}

/// Shader module that lives only as long as pipeline creation needs it
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a ash::Device,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, code: &[u32]) -> RendererResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| RendererError::PipelineBuild(format!("shader module rejected: {e}")))?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn parses_little_endian_words() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0400, 0, 8, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[3], 8);
    }

    #[test]
    fn rejects_truncated_blob() {
        let bytes = SPIRV_MAGIC.to_le_bytes();
        assert!(parse_spirv(&bytes[..3]).is_err());
    }

    #[test]
    fn missing_file_is_a_shader_load_error() {
        let path = Path::new("no/such/dir/triangle.spv");
        match load_spirv(path) {
            Err(RendererError::ShaderLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ShaderLoad, got {:?}", other.map(|w| w.len())),
        }
    }
}
