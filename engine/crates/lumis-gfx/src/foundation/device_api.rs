use std::ffi::CStr;

use ash::{prelude::VkResult, vk};

use crate::{
    commands::submit_info::GfxSubmitInfo,
    foundation::debug_type::{DebugType, object_type_of},
};

slotmap::new_key_type! {
    /// 由设备内部持有的内存分配，外部只拿到一个 key
    pub struct GfxAllocationHandle;
}

/// 分配内存时的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxMemoryUsage {
    /// 只有 GPU 访问
    DeviceLocal,
    /// CPU 顺序写入，GPU 读取；创建时就 map
    HostWrite,
    /// GPU 写入，CPU 读取；创建时就 map
    HostRead,
}

/// 上层使用的所有 Vulkan 设备调用
///
/// [`GfxDevice`](crate::foundation::device::GfxDevice) 基于 ash 实现；
/// `testing` feature 下的 `RecordingDevice` 会记录所有调用，用于无 GPU 的测试。
///
/// # 错误
/// 返回值不是 `VkResult` 的调用如果失败，视为 fatal：先输出 error 日志，然后 panic。
pub trait GfxDeviceApi {
    // ------------------------------ device ------------------------------
    fn queue_family_index(&self) -> u32;
    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str);
    fn wait_idle(&self);

    // ------------------------------ sync ------------------------------
    fn create_fence(&self, signaled: bool) -> vk::Fence;
    fn destroy_fence(&self, fence: vk::Fence);
    /// 超时会返回 `vk::Result::TIMEOUT`
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence);
    fn fence_signaled(&self, fence: vk::Fence) -> bool;
    fn create_semaphore(&self) -> vk::Semaphore;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ------------------------------ commands ------------------------------
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags) -> vk::CommandPool;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn reset_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> vk::CommandBuffer;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags);
    fn end_command_buffer(&self, cmd: vk::CommandBuffer);
    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: vk::Fence);

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_cnt: glam::UVec3);
    fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo);
    fn cmd_fill_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    );
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit_info: &vk::BlitImageInfo2);
    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &CStr, color: [f32; 4]);
    fn cmd_end_label(&self, cmd: vk::CommandBuffer);

    // ------------------------------ descriptors ------------------------------
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> vk::DescriptorSetLayout;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> vk::DescriptorPool;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// 池耗尽时返回 `ERROR_OUT_OF_POOL_MEMORY` 或 `ERROR_FRAGMENTED_POOL`
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);

    // ------------------------------ pipelines ------------------------------
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> vk::PipelineLayout;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_compute_pipeline(
        &self,
        module: vk::ShaderModule,
        entry_point: &CStr,
        layout: vk::PipelineLayout,
    ) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ------------------------------ resources ------------------------------
    fn create_image(&self, image_ci: &vk::ImageCreateInfo) -> (vk::Image, GfxAllocationHandle);
    fn destroy_image(&self, image: vk::Image, allocation: GfxAllocationHandle);
    fn create_image_view(&self, view_ci: &vk::ImageViewCreateInfo) -> vk::ImageView;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_buffer(
        &self,
        buffer_ci: &vk::BufferCreateInfo,
        memory_usage: GfxMemoryUsage,
    ) -> (vk::Buffer, GfxAllocationHandle);
    /// 只有 host 可见的 buffer 才有 mapped 指针
    fn mapped_ptr(&self, allocation: GfxAllocationHandle) -> Option<*mut u8>;
    fn flush_allocation(&self, allocation: GfxAllocationHandle, offset: vk::DeviceSize, size: vk::DeviceSize);
    fn invalidate_allocation(&self, allocation: GfxAllocationHandle, offset: vk::DeviceSize, size: vk::DeviceSize);
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: GfxAllocationHandle);
    fn create_sampler(&self, sampler_ci: &vk::SamplerCreateInfo) -> vk::Sampler;
    fn destroy_sampler(&self, sampler: vk::Sampler);
}

// tools
impl dyn GfxDeviceApi {
    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        let vk_handle = handle.vk_handle();
        let debug_name = format!("{}::{}", T::debug_type_name(), name.as_ref());
        self.set_object_name(object_type_of(&vk_handle), vk::Handle::as_raw(vk_handle), &debug_name);
    }
}

/// fatal 错误的统一出口：先输出日志，然后 panic
#[track_caller]
pub fn vk_check<T>(result: VkResult<T>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("fatal vulkan error in {}: {:?}", what, err);
            panic!("fatal vulkan error in {what}: {err:?}");
        }
    }
}
