//! SPIR-V shader modules
//!
//! Shaders are looked up by file name in the configured shader directory.
//! A missing file is reported as [`VulkanError::ShaderNotFound`] so startup
//! can fail with the exact path that was tried.

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Entry point every shader stage uses
// SAFETY: literal is nul-terminated with no interior nul
pub const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Path of shader `name` inside `shader_dir`
pub fn shader_path(shader_dir: &Path, name: &str) -> PathBuf {
    shader_dir.join(name)
}

/// Read a SPIR-V binary into aligned words
pub fn read_spirv(path: &Path) -> VulkanResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|_| VulkanError::ShaderNotFound {
        path: path.to_path_buf(),
    })?;
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|err| {
        VulkanError::InitializationFailed(format!("{} is not valid SPIR-V: {err}", path.display()))
    })
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V words
    pub fn from_words(device: &Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::driver("vkCreateShaderModule"))?
        };
        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load `name` from `shader_dir`
    pub fn load(device: &Device, shader_dir: &Path, name: &str) -> VulkanResult<Self> {
        let path = shader_path(shader_dir, name);
        let words = read_spirv(&path)?;
        log::debug!("Loaded shader {:?} ({} words)", path, words.len());
        Self::from_words(device, &words)
    }

    /// Shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description using the `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_shader_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_spirv(&shader_path(dir.path(), "missing.vert.spv")).unwrap_err();
        match err {
            VulkanError::ShaderNotFound { path } => assert!(path.ends_with("missing.vert.spv")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reads_spirv_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.spv");
        let mut file = std::fs::File::create(&path).unwrap();
        // Magic number followed by one word
        file.write_all(&0x0723_0203_u32.to_le_bytes()).unwrap();
        file.write_all(&7_u32.to_le_bytes()).unwrap();
        drop(file);

        let words = read_spirv(&path).unwrap();
        assert_eq!(words, vec![0x0723_0203, 7]);
    }

    #[test]
    fn test_truncated_binary_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.spv");
        std::fs::write(&path, [1_u8, 2, 3]).unwrap();
        assert!(matches!(read_spirv(&path), Err(VulkanError::InitializationFailed(_))));
    }
}
