use std::{
    cell::RefCell,
    ffi::{CStr, CString},
    mem::ManuallyDrop,
};

use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    commands::submit_info::GfxSubmitInfo,
    foundation::device_api::{GfxAllocationHandle, GfxDeviceApi, GfxMemoryUsage, vk_check},
};

struct GfxDeviceAllocation {
    allocation: vk_mem::Allocation,
    /// 在创建阶段写死
    mapped: Option<*mut u8>,
}

/// Vulkan 逻辑设备封装
///
/// 设备本身由外部创建（physical device 以及 queue 的选择不在这里），这里接管它的所有权，
/// 并创建 vma 内存分配器。
///
/// 需要的 device features：
/// - synchronization2
/// - descriptor indexing 中的 descriptor_binding_partially_bound
///
/// # Destroy
/// 最后一个 `Rc` 被释放时销毁分配器以及设备；在此之前所有资源都需要通过账本销毁。
pub struct GfxDevice {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,

    queue: vk::Queue,
    queue_family_index: u32,

    allocator: ManuallyDrop<vk_mem::Allocator>,
    allocations: RefCell<SlotMap<GfxAllocationHandle, GfxDeviceAllocation>>,
}
// new & init
impl GfxDevice {
    /// # param
    /// * enable_debug_utils - instance 是否开启了 `VK_EXT_debug_utils`
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        enable_debug_utils: bool,
    ) -> Self {
        let _span = tracy_client::span!("GfxDevice::new");

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let debug_utils = enable_debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = vk_check(unsafe { vk_mem::Allocator::new(vma_ci) }, "vk_mem::Allocator::new");

        log::info!("GfxDevice created, queue family: {}", queue_family_index);
        Self {
            device,
            debug_utils,
            queue,
            queue_family_index,
            allocator: ManuallyDrop::new(allocator),
            allocations: RefCell::new(SlotMap::with_key()),
        }
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        log::info!("destroying device");

        let leaked = self.allocations.get_mut().len();
        if leaked > 0 {
            log::error!("{} allocations are still alive when destroying device", leaked);
        }
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
// getters
impl GfxDevice {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }
}
impl GfxDeviceApi for GfxDevice {
    #[inline]
    fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(name.replace('\0', "")).unwrap_or_default();
        let name_info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: raw_handle,
            ..Default::default()
        }
        .object_name(name.as_c_str());
        unsafe {
            // debug name 设置失败不影响渲染
            if let Err(err) = debug_utils.set_debug_utils_object_name(&name_info) {
                log::warn!("failed to set debug name {:?}: {:?}", name, err);
            }
        }
    }

    fn wait_idle(&self) {
        let _span = tracy_client::span!("GfxDevice::wait_idle");
        vk_check(unsafe { self.device.device_wait_idle() }, "device_wait_idle");
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        vk_check(
            unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) },
            "create_fence",
        )
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) {
        vk_check(unsafe { self.device.reset_fences(std::slice::from_ref(&fence)) }, "reset_fences");
    }

    fn fence_signaled(&self, fence: vk::Fence) -> bool {
        vk_check(unsafe { self.device.get_fence_status(fence) }, "get_fence_status")
    }

    fn create_semaphore(&self) -> vk::Semaphore {
        vk_check(
            unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) },
            "create_semaphore",
        )
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags) -> vk::CommandPool {
        let pool_ci = vk::CommandPoolCreateInfo::default().queue_family_index(self.queue_family_index).flags(flags);
        vk_check(unsafe { self.device.create_command_pool(&pool_ci, None) }, "create_command_pool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) {
        vk_check(
            unsafe { self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::RELEASE_RESOURCES) },
            "reset_command_pool",
        );
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> vk::CommandBuffer {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        vk_check(unsafe { self.device.allocate_command_buffers(&info) }, "allocate_command_buffers")[0]
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) {
        vk_check(
            unsafe { self.device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default().flags(flags)) },
            "begin_command_buffer",
        );
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) {
        vk_check(unsafe { self.device.end_command_buffer(cmd) }, "end_command_buffer");
    }

    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: vk::Fence) {
        let _span = tracy_client::span!("GfxDevice::queue_submit");
        let submit_infos = submits.iter().map(|s| s.submit_info()).collect_vec();
        vk_check(unsafe { self.device.queue_submit2(self.queue, &submit_infos, fence) }, "queue_submit2");
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe { self.device.cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]) }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_cnt: glam::UVec3) {
        unsafe { self.device.cmd_dispatch(cmd, group_cnt.x, group_cnt.y, group_cnt.z) }
    }

    fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo) {
        unsafe { self.device.cmd_pipeline_barrier2(cmd, dependency_info) }
    }

    fn cmd_fill_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        unsafe { self.device.cmd_fill_buffer(cmd, buffer, offset, size, data) }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit_info: &vk::BlitImageInfo2) {
        unsafe { self.device.cmd_blit_image2(cmd, blit_info) }
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &CStr, color: [f32; 4]) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe {
                debug_utils
                    .cmd_begin_debug_utils_label(cmd, &vk::DebugUtilsLabelEXT::default().label_name(label).color(color));
            }
        }
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) }
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> vk::DescriptorSetLayout {
        let mut flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings).push_next(&mut flags_ci);
        vk_check(
            unsafe { self.device.create_descriptor_set_layout(&layout_ci, None) },
            "create_descriptor_set_layout",
        )
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> vk::DescriptorPool {
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        vk_check(unsafe { self.device.create_descriptor_pool(&pool_ci, None) }, "create_descriptor_pool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) {
        vk_check(
            unsafe { self.device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) },
            "reset_descriptor_pool",
        );
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        unsafe { self.device.allocate_descriptor_sets(&alloc_info).map(|sets| sets[0]) }
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        unsafe { self.device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(code), None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> vk::PipelineLayout {
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        vk_check(unsafe { self.device.create_pipeline_layout(&layout_ci, None) }, "create_pipeline_layout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_compute_pipeline(
        &self,
        module: vk::ShaderModule,
        entry_point: &CStr,
        layout: vk::PipelineLayout,
    ) -> VkResult<vk::Pipeline> {
        let stage_ci = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage_ci).layout(layout);
        unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
                .map(|pipelines| pipelines[0])
                .map_err(|(_, err)| err)
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_image(&self, image_ci: &vk::ImageCreateInfo) -> (vk::Image, GfxAllocationHandle) {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = vk_check(unsafe { self.allocator.create_image(image_ci, &alloc_ci) }, "create_image");
        let handle = self.allocations.borrow_mut().insert(GfxDeviceAllocation {
            allocation,
            mapped: None,
        });
        (image, handle)
    }

    fn destroy_image(&self, image: vk::Image, allocation: GfxAllocationHandle) {
        let Some(mut allocation) = self.allocations.borrow_mut().remove(allocation) else {
            log::error!("destroying image {:?} with unknown allocation", image);
            return;
        };
        unsafe { self.allocator.destroy_image(image, &mut allocation.allocation) }
    }

    fn create_image_view(&self, view_ci: &vk::ImageViewCreateInfo) -> vk::ImageView {
        vk_check(unsafe { self.device.create_image_view(view_ci, None) }, "create_image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_buffer(
        &self,
        buffer_ci: &vk::BufferCreateInfo,
        memory_usage: GfxMemoryUsage,
    ) -> (vk::Buffer, GfxAllocationHandle) {
        let alloc_ci = match memory_usage {
            GfxMemoryUsage::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            GfxMemoryUsage::HostWrite => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            GfxMemoryUsage::HostRead => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        };

        let (buffer, mut allocation) =
            vk_check(unsafe { self.allocator.create_buffer(buffer_ci, &alloc_ci) }, "create_buffer");
        let mapped = match memory_usage {
            GfxMemoryUsage::DeviceLocal => None,
            GfxMemoryUsage::HostWrite | GfxMemoryUsage::HostRead => {
                Some(vk_check(unsafe { self.allocator.map_memory(&mut allocation) }, "map_memory"))
            }
        };

        let handle = self.allocations.borrow_mut().insert(GfxDeviceAllocation { allocation, mapped });
        (buffer, handle)
    }

    fn mapped_ptr(&self, allocation: GfxAllocationHandle) -> Option<*mut u8> {
        self.allocations.borrow().get(allocation).and_then(|a| a.mapped)
    }

    fn flush_allocation(&self, allocation: GfxAllocationHandle, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let allocations = self.allocations.borrow();
        if let Some(allocation) = allocations.get(allocation) {
            vk_check(self.allocator.flush_allocation(&allocation.allocation, offset, size), "flush_allocation");
        }
    }

    fn invalidate_allocation(&self, allocation: GfxAllocationHandle, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let allocations = self.allocations.borrow();
        if let Some(allocation) = allocations.get(allocation) {
            vk_check(
                self.allocator.invalidate_allocation(&allocation.allocation, offset, size),
                "invalidate_allocation",
            );
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: GfxAllocationHandle) {
        let Some(mut allocation) = self.allocations.borrow_mut().remove(allocation) else {
            log::error!("destroying buffer {:?} with unknown allocation", buffer);
            return;
        };
        unsafe {
            if allocation.mapped.is_some() {
                self.allocator.unmap_memory(&mut allocation.allocation);
            }
            self.allocator.destroy_buffer(buffer, &mut allocation.allocation);
        }
    }

    fn create_sampler(&self, sampler_ci: &vk::SamplerCreateInfo) -> vk::Sampler {
        vk_check(unsafe { self.device.create_sampler(sampler_ci, None) }, "create_sampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }
}
