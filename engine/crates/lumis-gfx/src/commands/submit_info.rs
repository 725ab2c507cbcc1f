use ash::vk;
use itertools::Itertools;

use crate::commands::{command_buffer::GfxCommandBuffer, semaphore::GfxSemaphore};

/// Gfx 关于 submitInfo 的封装，更易用
#[derive(Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[GfxCommandBuffer]) -> Self {
        let command_buffers = commands
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd.vk_handle()))
            .collect_vec();

        Self {
            command_buffers,
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(&self.command_buffers)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }

    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_infos.push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore.handle()).stage_mask(stage));
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.signal_infos.push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore.handle()).stage_mask(stage));
        self
    }
}
// getters
impl GfxSubmitInfo {
    pub fn command_buffers(&self) -> impl Iterator<Item = vk::CommandBuffer> + '_ {
        self.command_buffers.iter().map(|info| info.command_buffer)
    }

    pub fn wait_semaphores(&self) -> impl Iterator<Item = vk::Semaphore> + '_ {
        self.wait_infos.iter().map(|info| info.semaphore)
    }

    pub fn signal_semaphores(&self) -> impl Iterator<Item = vk::Semaphore> + '_ {
        self.signal_infos.iter().map(|info| info.semaphore)
    }
}
