use ash::vk;

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}
impl GfxBarrierMask {
    /// compute shader 写入之后，下一个 compute shader 读取或写入
    pub const COMPUTE_WRITE_TO_COMPUTE: Self = Self {
        src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        src_access: vk::AccessFlags2::SHADER_WRITE,
        dst_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_READ.as_raw() | vk::AccessFlags2::SHADER_WRITE.as_raw(),
        ),
    };

    /// transfer 写入（fill/copy）之后，compute shader 读取或写入
    pub const TRANSFER_WRITE_TO_COMPUTE: Self = Self {
        src_stage: vk::PipelineStageFlags2::TRANSFER,
        dst_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        src_access: vk::AccessFlags2::TRANSFER_WRITE,
        dst_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_READ.as_raw() | vk::AccessFlags2::SHADER_WRITE.as_raw(),
        ),
    };

    /// compute shader 写入之后，transfer 读取（copy/blit）
    pub const COMPUTE_WRITE_TO_TRANSFER: Self = Self {
        src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags2::TRANSFER,
        src_access: vk::AccessFlags2::SHADER_WRITE,
        dst_access: vk::AccessFlags2::TRANSFER_READ,
    };

    /// 帧开始时：之前提交的颜色输出、compute 读写、transfer 读写，与本帧的 compute 以及 transfer
    pub const FRAME_START: Self = Self {
        src_stage: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT.as_raw()
                | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw()
                | vk::PipelineStageFlags2::TRANSFER.as_raw(),
        ),
        dst_stage: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags2::TRANSFER.as_raw(),
        ),
        src_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::SHADER_WRITE.as_raw()
                | vk::AccessFlags2::TRANSFER_WRITE.as_raw(),
        ),
        dst_access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_READ.as_raw()
                | vk::AccessFlags2::SHADER_WRITE.as_raw()
                | vk::AccessFlags2::TRANSFER_READ.as_raw()
                | vk::AccessFlags2::TRANSFER_WRITE.as_raw(),
        ),
    };

    /// transfer 写入（copy 到回读 buffer）之后，CPU 读取
    pub const TRANSFER_WRITE_TO_HOST_READ: Self = Self {
        src_stage: vk::PipelineStageFlags2::TRANSFER,
        dst_stage: vk::PipelineStageFlags2::HOST,
        src_access: vk::AccessFlags2::TRANSFER_WRITE,
        dst_access: vk::AccessFlags2::HOST_READ,
    };
}

/// 全局的 memory barrier
#[derive(Copy, Clone)]
pub struct GfxMemoryBarrier {
    inner: vk::MemoryBarrier2<'static>,
}
impl GfxMemoryBarrier {
    pub fn new(mask: GfxBarrierMask) -> Self {
        Self {
            inner: vk::MemoryBarrier2::default()
                .src_stage_mask(mask.src_stage)
                .src_access_mask(mask.src_access)
                .dst_stage_mask(mask.dst_stage)
                .dst_access_mask(mask.dst_access),
        }
    }

    #[inline]
    pub fn inner(&self) -> &vk::MemoryBarrier2<'_> {
        &self.inner
    }
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Copy, Clone)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn mask(self, mask: GfxBarrierMask) -> Self {
        self.src_mask(mask.src_stage, mask.src_access).dst_mask(mask.dst_stage, mask.dst_access)
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[derive(Copy, Clone)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_barrier_covers_read_after_write() {
        let mask = GfxBarrierMask::COMPUTE_WRITE_TO_COMPUTE;
        assert_eq!(mask.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert!(mask.src_access.contains(vk::AccessFlags2::SHADER_WRITE));
        assert!(mask.dst_access.contains(vk::AccessFlags2::SHADER_READ));
        // 写后写也需要排序
        assert!(mask.dst_access.contains(vk::AccessFlags2::SHADER_WRITE));
    }

    #[test]
    fn test_image_barrier_builder() {
        let barrier = GfxImageBarrier::new()
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
            .mask(GfxBarrierMask::TRANSFER_WRITE_TO_COMPUTE);

        let inner = barrier.inner();
        assert_eq!(inner.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
