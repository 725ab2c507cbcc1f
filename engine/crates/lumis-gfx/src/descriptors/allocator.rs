use std::rc::Rc;

use ash::{prelude::VkResult, vk};
use itertools::Itertools;

use crate::foundation::device_api::GfxDeviceApi;

/// 每个 pool 中各种 descriptor 的数量，是相对于 `sets_per_pool` 的倍率
#[derive(Clone, Debug)]
pub struct GfxDescriptorPoolSizes {
    pub ratios: Vec<(vk::DescriptorType, f32)>,
    pub sets_per_pool: u32,
}
impl Default for GfxDescriptorPoolSizes {
    fn default() -> Self {
        Self {
            ratios: vec![
                (vk::DescriptorType::SAMPLER, 0.5),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
                (vk::DescriptorType::SAMPLED_IMAGE, 4.0),
                (vk::DescriptorType::STORAGE_IMAGE, 4.0),
                (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
                (vk::DescriptorType::STORAGE_BUFFER, 2.0),
            ],
            sets_per_pool: 256,
        }
    }
}
impl GfxDescriptorPoolSizes {
    pub fn vk_pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.ratios
            .iter()
            .map(|(ty, ratio)| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: ((ratio * self.sets_per_pool as f32).ceil() as u32).max(1),
            })
            .collect_vec()
    }
}

/// 基于 pool 的 descriptor set 分配器
///
/// 总是从 current pool 分配；current pool 耗尽或者碎片化时，换一个新的 pool（优先复用 reset 过的 pool）
/// 然后重试一次，第二次失败是 fatal 的。
///
/// # Destroy
/// 需要手动调用 `destroy`
pub struct GfxDescriptorAllocator {
    device: Rc<dyn GfxDeviceApi>,
    pool_sizes: GfxDescriptorPoolSizes,

    current_pool: Option<vk::DescriptorPool>,
    /// 分配过 set 的 pool，包括 current pool
    used_pools: Vec<vk::DescriptorPool>,
    /// reset 过的 pool，可以直接复用
    free_pools: Vec<vk::DescriptorPool>,

    name: String,
}
// new & init
impl GfxDescriptorAllocator {
    pub fn new(device: Rc<dyn GfxDeviceApi>, pool_sizes: GfxDescriptorPoolSizes, name: impl Into<String>) -> Self {
        Self {
            device,
            pool_sizes,
            current_pool: None,
            used_pools: vec![],
            free_pools: vec![],
            name: name.into(),
        }
    }
}
// getters
impl GfxDescriptorAllocator {
    #[inline]
    pub fn device(&self) -> &Rc<dyn GfxDeviceApi> {
        &self.device
    }

    #[inline]
    pub fn used_pool_count(&self) -> usize {
        self.used_pools.len()
    }

    #[inline]
    pub fn free_pool_count(&self) -> usize {
        self.free_pools.len()
    }
}
// tools
impl GfxDescriptorAllocator {
    /// 分配失败（重试之后）是 fatal 的
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        match self.try_allocate(layout) {
            Ok(set) => set,
            Err(err) => {
                log::error!("<{}> failed to allocate descriptor set after retry: {:?}", self.name, err);
                panic!("descriptor set allocation failed: {err:?}");
            }
        }
    }

    /// 与 [`Self::allocate`] 相同，但是将重试之后的失败返回给调用者
    pub fn try_allocate(&mut self, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        let pool = match self.current_pool {
            Some(pool) => pool,
            None => self.grab_pool(),
        };

        match self.device.allocate_descriptor_set(pool, layout) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                log::debug!("<{}> descriptor pool {:?} exhausted, grab a new one", self.name, pool);
                let pool = self.grab_pool();
                self.device.allocate_descriptor_set(pool, layout)
            }
            Err(err) => Err(err),
        }
    }

    /// 所有已经分配出去的 set 都会失效
    pub fn reset_pools(&mut self) {
        for pool in self.used_pools.drain(..) {
            self.device.reset_descriptor_pool(pool);
            self.free_pools.push(pool);
        }
        self.current_pool = None;
    }

    fn grab_pool(&mut self) -> vk::DescriptorPool {
        let pool = self.free_pools.pop().unwrap_or_else(|| {
            let pool = self
                .device
                .create_descriptor_pool(self.pool_sizes.sets_per_pool, &self.pool_sizes.vk_pool_sizes());
            log::info!("<{}> create descriptor pool {:?}", self.name, pool);
            pool
        });
        self.used_pools.push(pool);
        self.current_pool = Some(pool);
        pool
    }
}
// destroy
impl GfxDescriptorAllocator {
    pub fn destroy(&mut self) {
        log::info!(
            "<{}> destroying {} descriptor pools",
            self.name,
            self.used_pools.len() + self.free_pools.len()
        );
        for pool in self.used_pools.drain(..).chain(self.free_pools.drain(..)) {
            self.device.destroy_descriptor_pool(pool);
        }
        self.current_pool = None;
    }
}
impl Drop for GfxDescriptorAllocator {
    fn drop(&mut self) {
        debug_assert!(
            (self.used_pools.is_empty() && self.free_pools.is_empty()) || std::thread::panicking(),
            "GfxDescriptorAllocator must be destroyed manually before drop."
        );
    }
}
