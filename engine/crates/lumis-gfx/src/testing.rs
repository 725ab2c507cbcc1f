//! 无 GPU 环境下使用的设备实现
//!
//! [`RecordingDevice`] 为每个对象分配递增的假 handle，记录所有的命令、提交以及 descriptor 写入，
//! 并模拟 fence 的状态机、descriptor pool 的容量以及 host 可见内存。
//!
//! buffer 都有 CPU 侧的存储；`cmd_fill_buffer` 与 `cmd_copy_buffer` 在录制时立即执行。

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    ffi::CStr,
};

use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    commands::{barrier::GfxBarrierMask, submit_info::GfxSubmitInfo},
    descriptors::layout_cache::GfxDescriptorBinding,
    foundation::device_api::{GfxAllocationHandle, GfxDeviceApi, GfxMemoryUsage},
};

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub mask: GfxBarrierMask,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Begin {
        cmd: vk::CommandBuffer,
    },
    End {
        cmd: vk::CommandBuffer,
    },
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        offset: u32,
        data: Vec<u8>,
    },
    Dispatch {
        group_cnt: glam::UVec3,
    },
    Barrier {
        memory: Vec<GfxBarrierMask>,
        images: Vec<RecordedImageBarrier>,
        buffers: Vec<vk::Buffer>,
    },
    FillBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    Blit {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
    },
    BeginLabel {
        name: String,
    },
    EndLabel,
}

/// 一次 `update_descriptor_sets` 中的一个写入
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub image_views: Vec<vk::ImageView>,
    pub buffers: Vec<vk::Buffer>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedSubmit {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// 与 fence 相关的时间线，用于检查 CPU 写入与 GPU 执行的先后关系
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    Submit {
        fence: vk::Fence,
    },
    WaitFence {
        fence: vk::Fence,
    },
    ResetFence {
        fence: vk::Fence,
    },
    /// 写入 host 可见内存时，仍然处于 pending 状态的 fence
    Flush {
        allocation: GfxAllocationHandle,
        pending_fences: Vec<vk::Fence>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeFenceState {
    Unsignaled,
    /// 已经提交，等待之后变为 Signaled
    Pending,
    Signaled,
}

struct FakeAllocation {
    bytes: Box<[u8]>,
    host_visible: bool,
}

struct FakeDescriptorPool {
    capacity: u32,
    used: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeImageInfo {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

#[derive(Default)]
pub struct RecordingDevice {
    next_handle: Cell<u64>,

    live: RefCell<HashMap<&'static str, HashSet<u64>>>,
    created: RefCell<HashMap<&'static str, usize>>,
    names: RefCell<HashMap<u64, String>>,

    fences: RefCell<HashMap<vk::Fence, FakeFenceState>>,
    fence_hang: Cell<bool>,

    commands: RefCell<Vec<RecordedCommand>>,
    submits: RefCell<Vec<RecordedSubmit>>,
    events: RefCell<Vec<DeviceEvent>>,
    wait_idle_count: Cell<usize>,

    layouts: RefCell<HashMap<vk::DescriptorSetLayout, (Vec<GfxDescriptorBinding>, Vec<vk::DescriptorBindingFlags>)>>,
    pools: RefCell<HashMap<vk::DescriptorPool, FakeDescriptorPool>>,
    set_layouts: RefCell<HashMap<vk::DescriptorSet, vk::DescriptorSetLayout>>,
    allocation_failure: Cell<Option<vk::Result>>,
    writes: RefCell<Vec<RecordedWrite>>,

    shader_module_failure: Cell<bool>,
    pipeline_failure: Cell<bool>,

    allocations: RefCell<SlotMap<GfxAllocationHandle, FakeAllocation>>,
    buffers: RefCell<HashMap<vk::Buffer, GfxAllocationHandle>>,
    images: RefCell<HashMap<vk::Image, FakeImageInfo>>,
}
// new & init
impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            next_handle: Cell::new(1),
            ..Default::default()
        }
    }
}
// 注入错误
impl RecordingDevice {
    /// 之后所有的 descriptor set 分配都返回这个错误
    pub fn set_descriptor_allocation_failure(&self, failure: Option<vk::Result>) {
        self.allocation_failure.set(failure);
    }

    pub fn set_shader_module_failure(&self, fail: bool) {
        self.shader_module_failure.set(fail);
    }

    pub fn set_pipeline_failure(&self, fail: bool) {
        self.pipeline_failure.set(fail);
    }

    /// 开启之后 pending 的 fence 永远不会 signal，等待会超时
    pub fn set_fence_hang(&self, hang: bool) {
        self.fence_hang.set(hang);
    }

    /// 模拟 GPU 对 buffer 的写入
    pub fn write_buffer_memory(&self, buffer: vk::Buffer, offset: usize, data: &[u8]) {
        let allocation = self.buffer_allocation(buffer);
        let mut allocations = self.allocations.borrow_mut();
        let bytes = &mut allocations[allocation].bytes;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}
// 查询
impl RecordingDevice {
    pub fn live_count(&self, kind: &str) -> usize {
        self.live.borrow().get(kind).map_or(0, |set| set.len())
    }

    pub fn created_count(&self, kind: &str) -> usize {
        self.created.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn object_name(&self, raw_handle: u64) -> Option<String> {
        self.names.borrow().get(&raw_handle).cloned()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.borrow().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.borrow_mut().clear();
    }

    pub fn submits(&self) -> Vec<RecordedSubmit> {
        self.submits.borrow().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.borrow().len()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.borrow().clone()
    }

    pub fn wait_idle_count(&self) -> usize {
        self.wait_idle_count.get()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FakeFenceState> {
        self.fences.borrow().get(&fence).copied()
    }

    pub fn layout_bindings(&self, layout: vk::DescriptorSetLayout) -> Vec<GfxDescriptorBinding> {
        self.layouts.borrow().get(&layout).map(|(bindings, _)| bindings.clone()).unwrap_or_default()
    }

    pub fn layout_all_partially_bound(&self, layout: vk::DescriptorSetLayout) -> bool {
        self.layouts.borrow().get(&layout).is_some_and(|(bindings, flags)| {
            bindings.len() == flags.len()
                && flags.iter().all(|f| f.contains(vk::DescriptorBindingFlags::PARTIALLY_BOUND))
        })
    }

    /// 分配过的 descriptor set 总数，pool reset 不会减少
    pub fn descriptor_set_count(&self) -> usize {
        self.set_layouts.borrow().len()
    }

    pub fn descriptor_writes(&self) -> Vec<RecordedWrite> {
        self.writes.borrow().clone()
    }

    pub fn descriptor_writes_for(&self, set: vk::DescriptorSet) -> Vec<RecordedWrite> {
        self.writes.borrow().iter().filter(|w| w.set == set).cloned().collect_vec()
    }

    pub fn image_info(&self, image: vk::Image) -> Option<FakeImageInfo> {
        self.images.borrow().get(&image).copied()
    }

    pub fn read_buffer_memory(&self, buffer: vk::Buffer) -> Vec<u8> {
        let allocation = self.buffer_allocation(buffer);
        self.allocations.borrow()[allocation].bytes.to_vec()
    }
}
// 内部工具
impl RecordingDevice {
    fn next<H: vk::Handle>(&self) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        H::from_raw(raw)
    }

    fn create_object<H: vk::Handle + Copy>(&self, kind: &'static str) -> H {
        let handle: H = self.next();
        self.live.borrow_mut().entry(kind).or_default().insert(handle.as_raw());
        *self.created.borrow_mut().entry(kind).or_default() += 1;
        handle
    }

    fn destroy_object<H: vk::Handle>(&self, kind: &'static str, handle: H) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }
        let removed = self.live.borrow_mut().get_mut(kind).is_some_and(|set| set.remove(&raw));
        assert!(removed, "destroying {kind} {raw:#x} which is not alive");
    }

    fn record(&self, command: RecordedCommand) {
        self.commands.borrow_mut().push(command);
    }

    fn buffer_allocation(&self, buffer: vk::Buffer) -> GfxAllocationHandle {
        match self.buffers.borrow().get(&buffer) {
            Some(allocation) => *allocation,
            None => panic!("unknown buffer {buffer:?}"),
        }
    }

    fn pending_fences(&self) -> Vec<vk::Fence> {
        self.fences
            .borrow()
            .iter()
            .filter(|(_, state)| **state == FakeFenceState::Pending)
            .map(|(fence, _)| *fence)
            .sorted_by_key(|fence| vk::Handle::as_raw(*fence))
            .collect_vec()
    }

    fn mask_of(
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) -> GfxBarrierMask {
        GfxBarrierMask {
            src_stage,
            dst_stage,
            src_access,
            dst_access,
        }
    }
}

/// # Safety
/// `ptr` 与 `count` 来自同一个 Vulkan 结构体
unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if count == 0 || ptr.is_null() { &[] } else { unsafe { std::slice::from_raw_parts(ptr, count as usize) } }
}

fn is_image_descriptor(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLER
    )
}

impl GfxDeviceApi for RecordingDevice {
    fn queue_family_index(&self) -> u32 {
        0
    }

    fn set_object_name(&self, _object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        self.names.borrow_mut().insert(raw_handle, name.to_string());
    }

    fn wait_idle(&self) {
        self.wait_idle_count.set(self.wait_idle_count.get() + 1);
        for state in self.fences.borrow_mut().values_mut() {
            if *state == FakeFenceState::Pending && !self.fence_hang.get() {
                *state = FakeFenceState::Signaled;
            }
        }
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let fence = self.create_object("fence");
        let state = if signaled { FakeFenceState::Signaled } else { FakeFenceState::Unsignaled };
        self.fences.borrow_mut().insert(fence, state);
        fence
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.destroy_object("fence", fence);
        self.fences.borrow_mut().remove(&fence);
    }

    fn wait_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        self.events.borrow_mut().push(DeviceEvent::WaitFence { fence });
        let mut fences = self.fences.borrow_mut();
        let state = fences.get_mut(&fence).expect("waiting on unknown fence");
        match *state {
            FakeFenceState::Signaled => Ok(()),
            FakeFenceState::Pending if !self.fence_hang.get() => {
                *state = FakeFenceState::Signaled;
                Ok(())
            }
            // 从未提交的 fence 永远不会 signal
            _ => Err(vk::Result::TIMEOUT),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) {
        self.events.borrow_mut().push(DeviceEvent::ResetFence { fence });
        let mut fences = self.fences.borrow_mut();
        let state = fences.get_mut(&fence).expect("resetting unknown fence");
        assert_ne!(*state, FakeFenceState::Pending, "resetting a fence that is still in flight");
        *state = FakeFenceState::Unsignaled;
    }

    fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.borrow().get(&fence) == Some(&FakeFenceState::Signaled)
    }

    fn create_semaphore(&self) -> vk::Semaphore {
        self.create_object("semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy_object("semaphore", semaphore);
    }

    fn create_command_pool(&self, _flags: vk::CommandPoolCreateFlags) -> vk::CommandPool {
        self.create_object("command_pool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy_object("command_pool", pool);
    }

    fn reset_command_pool(&self, _pool: vk::CommandPool) {}

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> vk::CommandBuffer {
        self.next()
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) {
        self.record(RecordedCommand::Begin { cmd });
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) {
        self.record(RecordedCommand::End { cmd });
    }

    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: vk::Fence) {
        for submit in submits {
            self.submits.borrow_mut().push(RecordedSubmit {
                command_buffers: submit.command_buffers().collect_vec(),
                wait_semaphores: submit.wait_semaphores().collect_vec(),
                signal_semaphores: submit.signal_semaphores().collect_vec(),
                fence,
            });
        }
        if fence != vk::Fence::null() {
            let mut fences = self.fences.borrow_mut();
            let state = fences.get_mut(&fence).expect("submitting with unknown fence");
            assert_eq!(*state, FakeFenceState::Unsignaled, "submitting with a fence that is not reset");
            *state = FakeFenceState::Pending;
        }
        self.events.borrow_mut().push(DeviceEvent::Submit { fence });
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(RecordedCommand::BindPipeline { pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(RecordedCommand::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(RecordedCommand::PushConstants {
            layout,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, group_cnt: glam::UVec3) {
        self.record(RecordedCommand::Dispatch { group_cnt });
    }

    fn cmd_pipeline_barrier2(&self, _cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo) {
        let (memory, images, buffers) = unsafe {
            let memory = raw_slice(dependency_info.p_memory_barriers, dependency_info.memory_barrier_count)
                .iter()
                .map(|b| Self::mask_of(b.src_stage_mask, b.src_access_mask, b.dst_stage_mask, b.dst_access_mask))
                .collect_vec();
            let images =
                raw_slice(dependency_info.p_image_memory_barriers, dependency_info.image_memory_barrier_count)
                    .iter()
                    .map(|b| RecordedImageBarrier {
                        image: b.image,
                        old_layout: b.old_layout,
                        new_layout: b.new_layout,
                        mask: Self::mask_of(b.src_stage_mask, b.src_access_mask, b.dst_stage_mask, b.dst_access_mask),
                    })
                    .collect_vec();
            let buffers =
                raw_slice(dependency_info.p_buffer_memory_barriers, dependency_info.buffer_memory_barrier_count)
                    .iter()
                    .map(|b| b.buffer)
                    .collect_vec();
            (memory, images, buffers)
        };
        self.record(RecordedCommand::Barrier {
            memory,
            images,
            buffers,
        });
    }

    fn cmd_fill_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        self.record(RecordedCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });

        let Some(allocation) = self.buffers.borrow().get(&buffer).copied() else {
            return;
        };
        let mut allocations = self.allocations.borrow_mut();
        let bytes = &mut allocations[allocation].bytes;
        let end = if size == vk::WHOLE_SIZE { bytes.len() } else { (offset + size) as usize };
        for word in bytes[offset as usize..end].chunks_exact_mut(4) {
            word.copy_from_slice(&data.to_ne_bytes());
        }
    }

    fn cmd_copy_buffer(&self, _cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.record(RecordedCommand::CopyBuffer {
            src,
            dst,
            size: regions.iter().map(|r| r.size).sum(),
        });

        let (Some(src_alloc), Some(dst_alloc)) =
            (self.buffers.borrow().get(&src).copied(), self.buffers.borrow().get(&dst).copied())
        else {
            return;
        };
        let mut allocations = self.allocations.borrow_mut();
        for region in regions {
            let data = allocations[src_alloc].bytes
                [region.src_offset as usize..(region.src_offset + region.size) as usize]
                .to_vec();
            allocations[dst_alloc].bytes[region.dst_offset as usize..(region.dst_offset + region.size) as usize]
                .copy_from_slice(&data);
        }
    }

    fn cmd_blit_image(&self, _cmd: vk::CommandBuffer, blit_info: &vk::BlitImageInfo2) {
        self.record(RecordedCommand::Blit {
            src: blit_info.src_image,
            src_layout: blit_info.src_image_layout,
            dst: blit_info.dst_image,
            dst_layout: blit_info.dst_image_layout,
        });
    }

    fn cmd_begin_label(&self, _cmd: vk::CommandBuffer, label: &CStr, _color: [f32; 4]) {
        self.record(RecordedCommand::BeginLabel {
            name: label.to_string_lossy().into_owned(),
        });
    }

    fn cmd_end_label(&self, _cmd: vk::CommandBuffer) {
        self.record(RecordedCommand::EndLabel);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> vk::DescriptorSetLayout {
        let layout = self.create_object("descriptor_set_layout");
        let bindings = bindings
            .iter()
            .map(|b| GfxDescriptorBinding::new(b.binding, b.descriptor_type, b.descriptor_count, b.stage_flags))
            .collect_vec();
        self.layouts.borrow_mut().insert(layout, (bindings, binding_flags.to_vec()));
        layout
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy_object("descriptor_set_layout", layout);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _pool_sizes: &[vk::DescriptorPoolSize]) -> vk::DescriptorPool {
        let pool = self.create_object("descriptor_pool");
        self.pools.borrow_mut().insert(
            pool,
            FakeDescriptorPool {
                capacity: max_sets,
                used: 0,
            },
        );
        pool
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy_object("descriptor_pool", pool);
        self.pools.borrow_mut().remove(&pool);
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) {
        if let Some(pool) = self.pools.borrow_mut().get_mut(&pool) {
            pool.used = 0;
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        if let Some(err) = self.allocation_failure.get() {
            return Err(err);
        }
        {
            let mut pools = self.pools.borrow_mut();
            let pool = pools.get_mut(&pool).expect("allocating from unknown descriptor pool");
            if pool.used >= pool.capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            pool.used += 1;
        }
        let set = self.next();
        self.set_layouts.borrow_mut().insert(set, layout);
        Ok(set)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        let mut recorded = self.writes.borrow_mut();
        for write in writes {
            let (image_views, buffers) = unsafe {
                if is_image_descriptor(write.descriptor_type) {
                    let views = raw_slice(write.p_image_info, write.descriptor_count)
                        .iter()
                        .map(|info| info.image_view)
                        .collect_vec();
                    (views, vec![])
                } else {
                    let buffers = raw_slice(write.p_buffer_info, write.descriptor_count)
                        .iter()
                        .map(|info| info.buffer)
                        .collect_vec();
                    (vec![], buffers)
                }
            };
            recorded.push(RecordedWrite {
                set: write.dst_set,
                binding: write.dst_binding,
                descriptor_type: write.descriptor_type,
                image_views,
                buffers,
            });
        }
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        if self.shader_module_failure.get() {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(self.create_object("shader_module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy_object("shader_module", module);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> vk::PipelineLayout {
        self.create_object("pipeline_layout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_object("pipeline_layout", layout);
    }

    fn create_compute_pipeline(
        &self,
        _module: vk::ShaderModule,
        _entry_point: &CStr,
        _layout: vk::PipelineLayout,
    ) -> VkResult<vk::Pipeline> {
        if self.pipeline_failure.get() {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        Ok(self.create_object("pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy_object("pipeline", pipeline);
    }

    fn create_image(&self, image_ci: &vk::ImageCreateInfo) -> (vk::Image, GfxAllocationHandle) {
        let image = self.create_object("image");
        self.images.borrow_mut().insert(
            image,
            FakeImageInfo {
                extent: image_ci.extent,
                format: image_ci.format,
                usage: image_ci.usage,
                mip_levels: image_ci.mip_levels,
            },
        );
        let allocation = self.allocations.borrow_mut().insert(FakeAllocation {
            bytes: Box::default(),
            host_visible: false,
        });
        (image, allocation)
    }

    fn destroy_image(&self, image: vk::Image, allocation: GfxAllocationHandle) {
        self.destroy_object("image", image);
        self.images.borrow_mut().remove(&image);
        self.allocations.borrow_mut().remove(allocation);
    }

    fn create_image_view(&self, _view_ci: &vk::ImageViewCreateInfo) -> vk::ImageView {
        self.create_object("image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy_object("image_view", view);
    }

    fn create_buffer(
        &self,
        buffer_ci: &vk::BufferCreateInfo,
        memory_usage: GfxMemoryUsage,
    ) -> (vk::Buffer, GfxAllocationHandle) {
        let buffer = self.create_object("buffer");
        let allocation = self.allocations.borrow_mut().insert(FakeAllocation {
            bytes: vec![0u8; buffer_ci.size as usize].into_boxed_slice(),
            host_visible: memory_usage != GfxMemoryUsage::DeviceLocal,
        });
        self.buffers.borrow_mut().insert(buffer, allocation);
        (buffer, allocation)
    }

    fn mapped_ptr(&self, allocation: GfxAllocationHandle) -> Option<*mut u8> {
        let mut allocations = self.allocations.borrow_mut();
        let allocation = allocations.get_mut(allocation)?;
        allocation.host_visible.then(|| allocation.bytes.as_mut_ptr())
    }

    fn flush_allocation(&self, allocation: GfxAllocationHandle, _offset: vk::DeviceSize, _size: vk::DeviceSize) {
        let pending_fences = self.pending_fences();
        self.events.borrow_mut().push(DeviceEvent::Flush {
            allocation,
            pending_fences,
        });
    }

    fn invalidate_allocation(&self, _allocation: GfxAllocationHandle, _offset: vk::DeviceSize, _size: vk::DeviceSize) {}

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: GfxAllocationHandle) {
        self.destroy_object("buffer", buffer);
        self.buffers.borrow_mut().remove(&buffer);
        self.allocations.borrow_mut().remove(allocation);
    }

    fn create_sampler(&self, _sampler_ci: &vk::SamplerCreateInfo) -> vk::Sampler {
        self.create_object("sampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy_object("sampler", sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_state_machine() {
        let device = RecordingDevice::new();
        let fence = device.create_fence(true);
        assert!(device.fence_signaled(fence));

        device.reset_fence(fence);
        assert_eq!(device.fence_state(fence), Some(FakeFenceState::Unsignaled));
        // 从未提交的 fence 等待会超时
        assert_eq!(device.wait_fence(fence, 0), Err(vk::Result::TIMEOUT));

        device.queue_submit(&[], fence);
        assert_eq!(device.fence_state(fence), Some(FakeFenceState::Pending));
        assert_eq!(device.wait_fence(fence, 0), Ok(()));
        assert!(device.fence_signaled(fence));

        device.destroy_fence(fence);
        assert_eq!(device.live_count("fence"), 0);
    }

    #[test]
    fn test_hang_never_signals() {
        let device = RecordingDevice::new();
        device.set_fence_hang(true);
        let fence = device.create_fence(false);
        device.queue_submit(&[], fence);
        assert_eq!(device.wait_fence(fence, 0), Err(vk::Result::TIMEOUT));
    }

    #[test]
    #[should_panic(expected = "not alive")]
    fn test_double_destroy_is_detected() {
        let device = RecordingDevice::new();
        let sampler = device.create_sampler(&vk::SamplerCreateInfo::default());
        device.destroy_sampler(sampler);
        device.destroy_sampler(sampler);
    }

    #[test]
    fn test_copy_is_applied_on_record() {
        let device = RecordingDevice::new();
        let ci = vk::BufferCreateInfo::default().size(8);
        let (src, _) = device.create_buffer(&ci, GfxMemoryUsage::DeviceLocal);
        let (dst, _) = device.create_buffer(&ci, GfxMemoryUsage::HostRead);

        device.write_buffer_memory(src, 0, &[1, 2, 3, 4]);
        device.cmd_fill_buffer(vk::CommandBuffer::null(), src, 4, 4, u32::from_ne_bytes([9, 9, 9, 9]));
        device.cmd_copy_buffer(vk::CommandBuffer::null(), src, dst, &[vk::BufferCopy::default().size(8)]);

        assert_eq!(device.read_buffer_memory(dst), vec![1, 2, 3, 4, 9, 9, 9, 9]);
    }
}
