use std::{ffi::CString, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier, GfxMemoryBarrier},
        command_pool::GfxCommandPool,
    },
    foundation::{debug_type::DebugType, device_api::GfxDeviceApi},
};

/// 命令缓冲封装
///
/// 提供后处理需要的计算、传输、屏障、调试标签命令。
///
/// # 使用示例
/// ```ignore
/// let cmd = pool.alloc_command_buffer("postfx");
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "postfx");
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
/// cmd.cmd_dispatch(glam::uvec3(8, 8, 1));
/// cmd.end();
/// ```
#[derive(Clone)]
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    device: Rc<dyn GfxDeviceApi>,

    name: String,
}
// new & init
impl GfxCommandBuffer {
    pub fn new(device: Rc<dyn GfxDeviceApi>, command_pool: &GfxCommandPool, debug_name: &str) -> Self {
        let cmd_buffer = GfxCommandBuffer {
            vk_handle: device.allocate_command_buffer(command_pool.handle()),
            device,
            name: debug_name.to_string(),
        };
        cmd_buffer.device.set_debug_name(&cmd_buffer, debug_name);
        cmd_buffer
    }
}
// Basic 命令
impl GfxCommandBuffer {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) {
        self.device.begin_command_buffer(self.vk_handle, usage_flag);
        self.begin_label(debug_label_name, glam::vec4(0.6, 0.6, 0.6, 1.0));
    }

    /// 结束录制 command
    ///
    /// 结束 debug label
    #[inline]
    pub fn end(&self) {
        self.end_label();
        self.device.end_command_buffer(self.vk_handle);
    }
}
// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// 数据传输类型
impl GfxCommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device.cmd_copy_buffer(self.vk_handle, src, dst, regions);
    }

    /// 用 4 字节的 data 填充 buffer 的一段区域，offset 与 size 都需要 4 字节对齐
    ///
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_fill_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        debug_assert!(offset % 4 == 0 && (size % 4 == 0 || size == vk::WHOLE_SIZE));
        self.device.cmd_fill_buffer(self.vk_handle, buffer, offset, size, data);
    }

    /// - command type: action
    /// - 支持的 queue：graphics
    #[inline]
    pub fn cmd_blit_image(&self, blit_info: &vk::BlitImageInfo2) {
        self.device.cmd_blit_image(self.vk_handle, blit_info);
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.device.cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
    }
}
// 状态绑定
impl GfxCommandBuffer {
    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.device.cmd_bind_descriptor_sets(self.vk_handle, bind_point, pipeline_layout, first_set, descriptor_sets);
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
    }
}
// 计算着色器相关命令
impl GfxCommandBuffer {
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        self.device.cmd_dispatch(self.vk_handle, group_cnt);
    }
}
// 同步相关命令
impl GfxCommandBuffer {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn memory_barrier(&self, barriers: &[GfxMemoryBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().memory_barriers(&barriers);
        self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn image_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers).dependency_flags(dependency_flags);
        self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn buffer_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(&barriers).dependency_flags(dependency_flags);
        self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
    }
}
// debug 相关命令
impl GfxCommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = CString::new(label_name.replace('\0', "")).unwrap_or_default();
        self.device.cmd_begin_label(self.vk_handle, name.as_c_str(), label_color.to_array());
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        self.device.cmd_end_label(self.vk_handle);
    }
}
impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
