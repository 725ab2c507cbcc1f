use std::{collections::HashMap, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::foundation::device_api::GfxDeviceApi;

/// 一个 binding 的结构描述，是 layout cache 判断相等的最小单位
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}
impl GfxDescriptorBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, count: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count,
            stage_flags,
        }
    }

    #[inline]
    pub fn to_vk_type(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stage_flags)
    }
}

/// 已经按照 binding index 排序的 binding 列表
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxDescriptorLayoutKey {
    bindings: Vec<GfxDescriptorBinding>,
}
impl GfxDescriptorLayoutKey {
    pub fn new(bindings: &[GfxDescriptorBinding]) -> Self {
        let bindings = bindings.iter().copied().sorted_by_key(|b| b.binding).collect_vec();
        debug_assert!(
            bindings.windows(2).all(|w| w[0].binding != w[1].binding),
            "duplicated binding index in descriptor layout: {:?}",
            bindings
        );
        Self { bindings }
    }

    #[inline]
    pub fn bindings(&self) -> &[GfxDescriptorBinding] {
        &self.bindings
    }
}

/// 对 descriptor set layout 去重
///
/// 结构相同的 binding 列表（与输入顺序无关）总是返回同一个 layout handle。
///
/// 所有的 binding 都带有 `PARTIALLY_BOUND` flag：可以先声明 binding，在 dispatch 之前再写入；
/// 数组 binding 也可以只写入前面一部分。flag 因此不参与 key 的比较。
///
/// # Destroy
/// 需要手动调用 `destroy`
pub struct GfxDescriptorLayoutCache {
    device: Rc<dyn GfxDeviceApi>,
    layouts: HashMap<GfxDescriptorLayoutKey, vk::DescriptorSetLayout>,
}
// new & init
impl GfxDescriptorLayoutCache {
    pub fn new(device: Rc<dyn GfxDeviceApi>) -> Self {
        Self {
            device,
            layouts: HashMap::new(),
        }
    }
}
// getters
impl GfxDescriptorLayoutCache {
    #[inline]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
// tools
impl GfxDescriptorLayoutCache {
    pub fn get_or_create(&mut self, bindings: &[GfxDescriptorBinding]) -> vk::DescriptorSetLayout {
        let key = GfxDescriptorLayoutKey::new(bindings);
        if let Some(layout) = self.layouts.get(&key) {
            return *layout;
        }

        let vk_bindings = key.bindings().iter().map(|b| b.to_vk_type()).collect_vec();
        let binding_flags = vec![vk::DescriptorBindingFlags::PARTIALLY_BOUND; vk_bindings.len()];
        let layout = self.device.create_descriptor_set_layout(&vk_bindings, &binding_flags);
        log::debug!("create descriptor set layout {:?} with {} bindings", layout, vk_bindings.len());

        self.layouts.insert(key, layout);
        layout
    }
}
// destroy
impl GfxDescriptorLayoutCache {
    pub fn destroy(&mut self) {
        log::info!("destroying {} descriptor set layouts", self.layouts.len());
        for (_, layout) in self.layouts.drain() {
            self.device.destroy_descriptor_set_layout(layout);
        }
    }
}
impl Drop for GfxDescriptorLayoutCache {
    fn drop(&mut self) {
        debug_assert!(
            self.layouts.is_empty() || std::thread::panicking(),
            "GfxDescriptorLayoutCache must be destroyed manually before drop."
        );
    }
}
