use std::rc::Rc;

use lumis_gfx::{
    commands::immediate::GfxImmediateSubmit,
    descriptors::{
        allocator::{GfxDescriptorAllocator, GfxDescriptorPoolSizes},
        layout_cache::GfxDescriptorLayoutCache,
    },
    foundation::{deletion_stack::DeletionStack, device_api::GfxDeviceApi},
};

/// 设备生命周期内共享的渲染上下文，显式地传给需要它的模块
///
/// - `layout_cache`：所有 descriptor set layout 的唯一来源
/// - `descriptor_allocator`：帧槽位等长期存在的 descriptor set
/// - `ledger`：设备生命周期的销毁账本，pipeline、常驻 buffer 等放在这里
///
/// # Destroy
/// 需要手动调用 `destroy`，调用前需要保证 GPU 已经空闲
pub struct RenderContext {
    device: Rc<dyn GfxDeviceApi>,
    layout_cache: GfxDescriptorLayoutCache,
    descriptor_allocator: GfxDescriptorAllocator,
    ledger: DeletionStack,
    immediate: Option<GfxImmediateSubmit>,
}
// new & init
impl RenderContext {
    pub fn new(device: Rc<dyn GfxDeviceApi>) -> Self {
        let _span = tracy_client::span!("RenderContext::new");
        Self {
            layout_cache: GfxDescriptorLayoutCache::new(device.clone()),
            descriptor_allocator: GfxDescriptorAllocator::new(
                device.clone(),
                GfxDescriptorPoolSizes::default(),
                "device-descriptors",
            ),
            ledger: DeletionStack::new("device"),
            immediate: Some(GfxImmediateSubmit::new(device.clone())),
            device,
        }
    }
}
// getters
impl RenderContext {
    #[inline]
    pub fn device(&self) -> &Rc<dyn GfxDeviceApi> {
        &self.device
    }

    #[inline]
    pub fn layout_cache_mut(&mut self) -> &mut GfxDescriptorLayoutCache {
        &mut self.layout_cache
    }

    #[inline]
    pub fn descriptor_allocator_mut(&mut self) -> &mut GfxDescriptorAllocator {
        &mut self.descriptor_allocator
    }

    /// 同时借用 layout cache 与分配器，配合 `GfxDescriptorBuilder` 使用
    #[inline]
    pub fn descriptor_parts_mut(&mut self) -> (&mut GfxDescriptorLayoutCache, &mut GfxDescriptorAllocator) {
        (&mut self.layout_cache, &mut self.descriptor_allocator)
    }

    #[inline]
    pub fn ledger_mut(&mut self) -> &mut DeletionStack {
        &mut self.ledger
    }

    #[inline]
    pub fn immediate(&self) -> &GfxImmediateSubmit {
        self.immediate.as_ref().expect("RenderContext already destroyed")
    }
}
// destroy
impl RenderContext {
    /// 销毁顺序：immediate submit、账本中的对象、descriptor pool、descriptor set layout
    pub fn destroy(&mut self) {
        let _span = tracy_client::span!("RenderContext::destroy");
        if let Some(immediate) = self.immediate.take() {
            immediate.destroy();
        }
        self.ledger.flush();
        self.descriptor_allocator.destroy();
        self.layout_cache.destroy();
    }
}
