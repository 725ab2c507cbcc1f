use ash::vk;
use itertools::Itertools;

/// 一次 descriptor 写入，持有 buffer/image info 的所有权，方便延迟到 dispatch 之前再提交
#[derive(Clone, Debug)]
pub struct GfxWriteDescriptorSet {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
}
// new & init
impl GfxWriteDescriptorSet {
    pub fn buffers(
        dst_set: vk::DescriptorSet,
        dst_binding: u32,
        descriptor_type: vk::DescriptorType,
        buffers: Vec<vk::DescriptorBufferInfo>,
    ) -> Self {
        Self {
            dst_set,
            dst_binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos: buffers,
            image_infos: vec![],
        }
    }

    pub fn images(
        dst_set: vk::DescriptorSet,
        dst_binding: u32,
        descriptor_type: vk::DescriptorType,
        images: Vec<vk::DescriptorImageInfo>,
    ) -> Self {
        Self {
            dst_set,
            dst_binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos: vec![],
            image_infos: images,
        }
    }

    /// 写入另一个 descriptor set 的相同 binding
    #[inline]
    pub fn retarget(&self, dst_set: vk::DescriptorSet) -> Self {
        Self {
            dst_set,
            ..self.clone()
        }
    }
}
// tools
impl GfxWriteDescriptorSet {
    pub fn to_vk_type(&self) -> vk::WriteDescriptorSet<'_> {
        assert!(
            self.buffer_infos.is_empty() != self.image_infos.is_empty(),
            "Only one of buffer_infos or image_infos should be set in GfxWriteDescriptorSet"
        );
        let descriptor_count = self.buffer_infos.len().max(self.image_infos.len());

        vk::WriteDescriptorSet {
            dst_set: self.dst_set,
            dst_binding: self.dst_binding,
            dst_array_element: self.dst_array_element,
            descriptor_count: descriptor_count as u32,
            descriptor_type: self.descriptor_type,
            // 选择 buffer ptr 还是 image ptr，是由 descriptor type 控制的
            p_buffer_info: self.buffer_infos.as_ptr(),
            p_image_info: self.image_infos.as_ptr(),
            ..Default::default()
        }
    }

    pub fn with_writes(writes: &[Self], cbk: impl FnOnce(&[vk::WriteDescriptorSet])) {
        let writes = writes.iter().map(|w| w.to_vk_type()).collect_vec();
        cbk(&writes);
    }
}
