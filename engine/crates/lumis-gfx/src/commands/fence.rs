use std::rc::Rc;

use ash::vk;

use crate::foundation::{debug_type::DebugType, device_api::GfxDeviceApi};

/// 等待 fence 的上限；超时视为设备丢失
pub const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
    device: Rc<dyn GfxDeviceApi>,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(device: Rc<dyn GfxDeviceApi>, signaled: bool, debug_name: &str) -> Self {
        let fence = Self {
            fence: device.create_fence(signaled),
            device,
        };
        fence.device.set_debug_name(&fence, debug_name);
        fence
    }

    #[inline]
    pub fn destroy(self) {
        self.device.destroy_fence(self.fence);
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.device.fence_signaled(self.fence)
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，最多等待 [`FENCE_TIMEOUT_NS`]
    ///
    /// 超时或者设备丢失都是 fatal 的，不会重试
    pub fn wait(&self) {
        let _span = tracy_client::span!("GfxFence::wait");
        match self.device.wait_fence(self.fence, FENCE_TIMEOUT_NS) {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                log::error!("fence {:?} timeout after {}ns, treat as device lost", self.fence, FENCE_TIMEOUT_NS);
                panic!("fence wait timeout: device lost");
            }
            Err(err) => {
                log::error!("fence {:?} wait failed: {:?}", self.fence, err);
                panic!("fence wait failed: {err:?}");
            }
        }
    }

    #[inline]
    pub fn reset(&self) {
        self.device.reset_fence(self.fence);
    }
}
