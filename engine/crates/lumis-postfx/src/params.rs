//! 各个 stage 的 push constant 布局，与 `shader/postfx/*.comp` 中的 `layout(push_constant)` 逐字段对应
//!
//! 所有结构体都按 16 字节对齐补齐，保证 std430 下没有隐式 padding。

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HistogramParams {
    pub min_log_luminance: f32,
    pub inv_log_luminance_range: f32,
    /// 本帧写入的槽位，取值 0 或 1
    pub new_role: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AverageLuminanceParams {
    pub min_log_luminance: f32,
    pub log_luminance_range: f32,
    pub lower_percent: f32,
    pub upper_percent: f32,

    pub time_coefficient: f32,
    pub compensation: f32,
    pub new_role: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DurandBilateralParams {
    pub sigma_space: f32,
    pub sigma_range: f32,
    pub radius: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DurandReconstructParams {
    pub compression: f32,
    pub detail_boost: f32,
    /// base 层以这个 log10 亮度为中心压缩，保持它的亮度不变
    pub log_reference: f32,
    pub _padding: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FusionExposureParams {
    pub shadows_ev: f32,
    pub highlights_ev: f32,
    pub well_exposed_sigma: f32,
    pub _padding: f32,
}

/// 金字塔上逐层执行的 stage 共用
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct LevelParams {
    pub level: u32,
    pub level_count: u32,
    pub _padding: [u32; 2],
}
impl LevelParams {
    #[inline]
    pub fn new(level: u32, level_count: u32) -> Self {
        Self {
            level,
            level_count,
            _padding: [0; 2],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BloomThresholdParams {
    pub threshold: f32,
    pub knee: f32,
    pub _padding: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BloomUpsampleParams {
    pub level: u32,
    pub level_count: u32,
    pub filter_radius: f32,
    pub _padding: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BloomCompositeParams {
    pub intensity: f32,
    pub _padding: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ToneMapParams {
    /// [`crate::tone_mapping::ToneMappingMode`] 的编号
    pub mode: u32,
    /// 非 0 时从亮度 buffer 读取曝光，否则使用 `manual_exposure`
    pub use_auto_exposure: u32,
    pub manual_exposure: f32,
    /// 读取上一帧最终结果的槽位
    pub old_role: u32,

    /// 大于 0 时代替上一帧的最大亮度作为白点
    pub white_point_override: f32,
    pub _padding: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GammaParams {
    /// [`crate::tone_mapping::GammaMode::as_index`]
    pub mode: u32,
    pub gamma: f32,
    pub _padding: [u32; 2],
}
