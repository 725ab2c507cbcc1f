use std::rc::Rc;

use ash::{prelude::VkResult, vk};

use crate::foundation::{debug_type::DebugType, device_api::GfxDeviceApi};

/// # Destroy
/// 只在创建 pipeline 时使用，pipeline 创建完成之后立即 destroy
pub struct GfxShaderModule {
    handle: vk::ShaderModule,
    device: Rc<dyn GfxDeviceApi>,
}
impl GfxShaderModule {
    /// # param
    /// * spirv - 已经按 4 字节对齐的 SPIR-V 代码
    pub fn new(device: Rc<dyn GfxDeviceApi>, spirv: &[u32], debug_name: &str) -> VkResult<Self> {
        let handle = device.create_shader_module(spirv)?;
        let shader_module = Self { handle, device };
        shader_module.device.set_debug_name(&shader_module, debug_name);
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(self) {
        self.device.destroy_shader_module(self.handle);
    }
}
impl DebugType for GfxShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
