use ash::{prelude::VkResult, vk};

use crate::descriptors::{
    allocator::GfxDescriptorAllocator,
    layout_cache::{GfxDescriptorBinding, GfxDescriptorLayoutCache},
    write::GfxWriteDescriptorSet,
};

/// 同时构建 descriptor set layout 以及 descriptor set
///
/// layout 经过 cache 去重，set 由 allocator 分配；声明了但是没有提供资源的 binding（`bind_*_empty`）
/// 只出现在 layout 中，在 dispatch 之前再写入。
///
/// # 使用示例
/// ```ignore
/// let (set, layout) = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
///     .bind_image(0, src_info, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
///     .bind_buffer(1, lum_info, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)
///     .build()?;
/// ```
pub struct GfxDescriptorBuilder<'a> {
    cache: &'a mut GfxDescriptorLayoutCache,
    allocator: &'a mut GfxDescriptorAllocator,

    bindings: Vec<GfxDescriptorBinding>,
    /// dst_set 在 build 时才确定
    writes: Vec<GfxWriteDescriptorSet>,
}
// new & init
impl<'a> GfxDescriptorBuilder<'a> {
    pub fn begin(cache: &'a mut GfxDescriptorLayoutCache, allocator: &'a mut GfxDescriptorAllocator) -> Self {
        Self {
            cache,
            allocator,
            bindings: vec![],
            writes: vec![],
        }
    }
}
// getters
impl GfxDescriptorBuilder<'_> {
    #[inline]
    pub fn bindings(&self) -> &[GfxDescriptorBinding] {
        &self.bindings
    }
}
// builder
impl GfxDescriptorBuilder<'_> {
    pub fn bind_buffer(
        mut self,
        binding: u32,
        buffer_info: vk::DescriptorBufferInfo,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(GfxDescriptorBinding::new(binding, descriptor_type, 1, stages));
        self.writes.push(GfxWriteDescriptorSet::buffers(
            vk::DescriptorSet::null(),
            binding,
            descriptor_type,
            vec![buffer_info],
        ));
        self
    }

    pub fn bind_image(
        mut self,
        binding: u32,
        image_info: vk::DescriptorImageInfo,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(GfxDescriptorBinding::new(binding, descriptor_type, 1, stages));
        self.writes.push(GfxWriteDescriptorSet::images(
            vk::DescriptorSet::null(),
            binding,
            descriptor_type,
            vec![image_info],
        ));
        self
    }

    /// 数组 binding，layout 中的数量是 `count`，只写入 `image_infos` 对应的前几个元素
    pub fn bind_image_array(
        mut self,
        binding: u32,
        image_infos: &[vk::DescriptorImageInfo],
        count: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        assert!(
            image_infos.len() <= count as usize,
            "binding {binding}: {} images do not fit into an array of {count}",
            image_infos.len()
        );
        self.bindings.push(GfxDescriptorBinding::new(binding, descriptor_type, count, stages));
        if !image_infos.is_empty() {
            self.writes.push(GfxWriteDescriptorSet::images(
                vk::DescriptorSet::null(),
                binding,
                descriptor_type,
                image_infos.to_vec(),
            ));
        }
        self
    }

    /// 只声明 binding，不写入资源
    pub fn bind_image_empty(
        mut self,
        binding: u32,
        count: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(GfxDescriptorBinding::new(binding, descriptor_type, count, stages));
        self
    }

    /// 只声明 binding，不写入资源
    pub fn bind_buffer_empty(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(GfxDescriptorBinding::new(binding, descriptor_type, 1, stages));
        self
    }
}
// build
impl GfxDescriptorBuilder<'_> {
    /// 分配 set 并写入所有已经提供资源的 binding
    pub fn build(self) -> VkResult<(vk::DescriptorSet, vk::DescriptorSetLayout)> {
        let layout = self.cache.get_or_create(&self.bindings);
        let set = self.allocator.try_allocate(layout)?;

        if !self.writes.is_empty() {
            let writes = self.writes.iter().map(|w| w.retarget(set)).collect::<Vec<_>>();
            let device = self.allocator.device().clone();
            GfxWriteDescriptorSet::with_writes(&writes, |writes| device.update_descriptor_sets(writes));
        }

        Ok((set, layout))
    }

    /// 只需要 layout 的场景，例如创建 pipeline layout；提供的资源会被忽略
    pub fn build_layout(self) -> vk::DescriptorSetLayout {
        self.cache.get_or_create(&self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{descriptors::allocator::GfxDescriptorPoolSizes, testing::RecordingDevice};

    fn fixtures(recording: &Rc<RecordingDevice>) -> (GfxDescriptorLayoutCache, GfxDescriptorAllocator) {
        (
            GfxDescriptorLayoutCache::new(recording.clone()),
            GfxDescriptorAllocator::new(recording.clone(), GfxDescriptorPoolSizes::default(), "test"),
        )
    }

    fn storage_view(raw: u64) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .image_view(vk::Handle::from_raw(raw))
            .image_layout(vk::ImageLayout::GENERAL)
    }

    #[test]
    fn test_build_writes_provided_bindings_only() {
        let recording = Rc::new(RecordingDevice::new());
        let (mut cache, mut allocator) = fixtures(&recording);

        let buffer_info = vk::DescriptorBufferInfo::default().buffer(vk::Handle::from_raw(42)).range(vk::WHOLE_SIZE);
        let (set, layout) = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
            .bind_image(0, storage_view(7), vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .bind_buffer(1, buffer_info, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)
            .bind_image_empty(2, 1, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .build()
            .unwrap();

        assert_eq!(recording.layout_bindings(layout).len(), 3);
        let writes = recording.descriptor_writes_for(set);
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.binding != 2));

        allocator.destroy();
        cache.destroy();
    }

    #[test]
    fn test_same_schema_reuses_layout() {
        let recording = Rc::new(RecordingDevice::new());
        let (mut cache, mut allocator) = fixtures(&recording);

        let (set_a, layout_a) = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
            .bind_image(0, storage_view(1), vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .build()
            .unwrap();
        let (set_b, layout_b) = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
            .bind_image(0, storage_view(2), vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .build()
            .unwrap();

        assert_eq!(layout_a, layout_b);
        assert_ne!(set_a, set_b);
        assert_eq!(cache.len(), 1);

        allocator.destroy();
        cache.destroy();
    }

    #[test]
    fn test_image_array_declares_capacity() {
        let recording = Rc::new(RecordingDevice::new());
        let (mut cache, mut allocator) = fixtures(&recording);

        let infos = [storage_view(1), storage_view(2), storage_view(3)];
        let (set, layout) = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
            .bind_image_array(0, &infos, 8, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .build()
            .unwrap();

        assert_eq!(recording.layout_bindings(layout)[0].count, 8);
        let writes = recording.descriptor_writes_for(set);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].image_views.len(), 3);

        allocator.destroy();
        cache.destroy();
    }

    #[test]
    fn test_build_layout_does_not_allocate() {
        let recording = Rc::new(RecordingDevice::new());
        let (mut cache, mut allocator) = fixtures(&recording);

        let layout = GfxDescriptorBuilder::begin(&mut cache, &mut allocator)
            .bind_buffer_empty(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)
            .build_layout();

        assert_ne!(layout, vk::DescriptorSetLayout::null());
        assert_eq!(allocator.used_pool_count(), 0);
        assert_eq!(recording.created_count("descriptor_pool"), 0);

        allocator.destroy();
        cache.destroy();
    }
}
