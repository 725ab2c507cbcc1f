use std::rc::Rc;

use ash::vk;

use crate::foundation::{debug_type::DebugType, device_api::GfxDeviceApi};

/// binary semaphore
///
/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
    device: Rc<dyn GfxDeviceApi>,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(device: Rc<dyn GfxDeviceApi>, debug_name: &str) -> Self {
        let semaphore = Self {
            semaphore: device.create_semaphore(),
            device,
        };
        semaphore.device.set_debug_name(&semaphore, debug_name);
        semaphore
    }

    #[inline]
    pub fn destroy(self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}
