use std::rc::Rc;

use ash::vk;

use crate::{
    commands::command_buffer::GfxCommandBuffer,
    foundation::{debug_type::DebugType, device_api::GfxDeviceApi},
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
///
/// # Destroy
/// 可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    device: Rc<dyn GfxDeviceApi>,
}
// init & destroy
impl GfxCommandPool {
    pub fn new(device: Rc<dyn GfxDeviceApi>, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> Self {
        let command_pool = Self {
            handle: device.create_command_pool(flags),
            device,
        };
        command_pool.device.set_debug_name(&command_pool, debug_name);
        command_pool
    }

    pub fn destroy(self) {
        self.device.destroy_command_pool(self.handle);
    }
}
// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }
}
// tools
impl GfxCommandPool {
    /// 这个调用并不会释放资源，而是将 pool 内的 command buffer 设置到初始状态
    ///
    /// reset 之后，pool 内的 command buffer 又可以重新录制命令
    pub fn reset_all_buffers(&self) {
        self.device.reset_command_pool(self.handle);
    }

    pub fn alloc_command_buffer(&self, debug_name: &str) -> GfxCommandBuffer {
        GfxCommandBuffer::new(self.device.clone(), self, debug_name)
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
