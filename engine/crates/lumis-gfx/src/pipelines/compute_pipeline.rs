use std::rc::Rc;

use ash::{prelude::VkResult, vk};

use crate::{
    foundation::{debug_type::DebugType, device_api::GfxDeviceApi},
    pipelines::shader::GfxShaderModule,
};

/// compute pipeline 以及它的 pipeline layout
///
/// push constant 总是从 offset 0 开始，只对 compute stage 可见。
///
/// # Destroy
/// 可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxComputePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: Rc<dyn GfxDeviceApi>,

    push_constant_size: u32,
}
// new & init
impl GfxComputePipeline {
    /// 失败时不会留下任何对象；shader module 的生命周期由调用者负责
    pub fn new(
        device: Rc<dyn GfxDeviceApi>,
        shader_module: &GfxShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
        debug_name: &str,
    ) -> VkResult<Self> {
        let _span = tracy_client::span!("GfxComputePipeline::new");

        let push_constant_ranges = if push_constant_size > 0 {
            vec![
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .offset(0)
                    .size(push_constant_size),
            ]
        } else {
            vec![]
        };
        let layout = device.create_pipeline_layout(set_layouts, &push_constant_ranges);

        let pipeline = match device.create_compute_pipeline(shader_module.handle(), c"main", layout) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log::error!("failed to create compute pipeline <{}>: {:?}", debug_name, err);
                device.destroy_pipeline_layout(layout);
                return Err(err);
            }
        };

        let compute_pipeline = Self {
            pipeline,
            layout,
            device,
            push_constant_size,
        };
        compute_pipeline.device.set_debug_name(&compute_pipeline, debug_name);
        Ok(compute_pipeline)
    }
}
// getters
impl GfxComputePipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}
// destroy
impl GfxComputePipeline {
    pub fn destroy(self) {
        self.device.destroy_pipeline(self.pipeline);
        self.device.destroy_pipeline_layout(self.layout);
    }
}
impl DebugType for GfxComputePipeline {
    fn debug_type_name() -> &'static str {
        "GfxComputePipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;

    #[test]
    fn test_create_and_destroy() {
        let recording = Rc::new(RecordingDevice::new());
        let module = GfxShaderModule::new(recording.clone(), &[0x0723_0203, 0, 0], "tone-map").unwrap();
        let pipeline = GfxComputePipeline::new(recording.clone(), &module, &[], 16, "tone-map").unwrap();
        module.destroy();

        assert_eq!(recording.live_count("pipeline"), 1);
        assert_eq!(recording.live_count("pipeline_layout"), 1);
        assert_eq!(recording.live_count("shader_module"), 0);

        pipeline.destroy();
        assert_eq!(recording.live_count("pipeline"), 0);
        assert_eq!(recording.live_count("pipeline_layout"), 0);
    }

    #[test]
    fn test_failed_pipeline_leaves_nothing_behind() {
        let recording = Rc::new(RecordingDevice::new());
        recording.set_pipeline_failure(true);
        let module = GfxShaderModule::new(recording.clone(), &[0x0723_0203], "broken").unwrap();

        let result = GfxComputePipeline::new(recording.clone(), &module, &[], 0, "broken");
        assert!(result.is_err());
        assert_eq!(recording.live_count("pipeline_layout"), 0);

        module.destroy();
    }
}
