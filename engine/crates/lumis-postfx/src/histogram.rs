//! 亮度直方图与曝光适应
//!
//! GPU 上的亮度 buffer 有两个槽位，按帧号的奇偶轮换：
//! - `new_role = frame_id & 1`：本帧清零后累积直方图与最大亮度
//! - `old_role = new_role ^ 1`：上一帧已经完成的结果，色调映射读取这里的最大亮度
//!
//! 这里的函数与 `histogram.comp`、`average_luminance.comp` 一一对应，既是 GPU 算法的参考实现，
//! 也用来解释回读到 CPU 的数据。

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::{settings::ExposureSettings, tone_mapping::luminance};

pub const HISTOGRAM_BUCKETS: usize = 256;
/// 低于这个亮度（以及 NaN、负数）的像素落入 0 号桶，不参与平均
pub const MIN_LUMINANCE: f32 = 1e-5;
/// 中灰
pub const KEY_VALUE: f32 = 0.18;

/// 与 shader 中 `LuminanceBuffer` 的 std430 布局一致
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LuminanceBufferData {
    pub buckets: [[u32; HISTOGRAM_BUCKETS]; 2],
    /// 以 `f32::to_bits` 的形式做 atomicMax，亮度非负时与浮点大小顺序一致
    pub max_luminance: [f32; 2],
    /// 时间平滑之后的平均亮度
    pub average_luminance: f32,
    /// 本帧直方图得到的目标亮度
    pub target_average_luminance: f32,
    pub exposure: f32,
    pub _padding: [f32; 3],
}
impl Default for LuminanceBufferData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// 各个字段在 buffer 中的字节偏移
pub mod offsets {
    use super::HISTOGRAM_BUCKETS;

    pub const BUCKETS_SIZE: u64 = (HISTOGRAM_BUCKETS * size_of::<u32>()) as u64;
    pub const MAX_LUMINANCE: u64 = 2 * BUCKETS_SIZE;

    #[inline]
    pub fn buckets(role: usize) -> u64 {
        role as u64 * BUCKETS_SIZE
    }

    #[inline]
    pub fn max_luminance(role: usize) -> u64 {
        MAX_LUMINANCE + role as u64 * size_of::<f32>() as u64
    }
}

#[inline]
pub fn new_role(frame_id: u64) -> usize {
    (frame_id & 1) as usize
}

#[inline]
pub fn old_role(frame_id: u64) -> usize {
    new_role(frame_id) ^ 1
}

/// 0 号桶保存无效像素，其余像素按 log2 亮度线性映射到 `[1, 255]`
pub fn bucket_of(luminance: f32, settings: &ExposureSettings) -> usize {
    // NaN 比较结果为 false，同样落入 0 号桶
    if !(luminance >= MIN_LUMINANCE) {
        return 0;
    }
    let t = ((luminance.log2() - settings.min_log_luminance) / settings.log_luminance_range).clamp(0.0, 1.0);
    1 + (t * 254.0).round() as usize
}

/// 桶序号（可以是小数，即加权平均的结果）代表的亮度，与 [`bucket_of`] 互逆
pub fn index_luminance(index: f32, settings: &ExposureSettings) -> f32 {
    let t = (index - 1.0) / 254.0;
    (t * settings.log_luminance_range + settings.min_log_luminance).exp2()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub buckets: [u32; HISTOGRAM_BUCKETS],
    pub max_luminance: f32,
}
impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: [0; HISTOGRAM_BUCKETS],
            max_luminance: 0.0,
        }
    }
}
impl Histogram {
    pub fn build(pixels: impl IntoIterator<Item = Vec3>, settings: &ExposureSettings) -> Self {
        let mut histogram = Self::default();
        for pixel in pixels {
            let lum = luminance(pixel);
            histogram.buckets[bucket_of(lum, settings)] += 1;
            if lum.is_finite() && lum > histogram.max_luminance {
                histogram.max_luminance = lum;
            }
        }
        histogram
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|&c| c as u64).sum()
    }

    /// 百分位窗口内的加权平均亮度；没有有效像素时返回 `None`
    ///
    /// 窗口的下界是累计计数第一次超过 `lower * valid` 的桶，上界是累计计数第一次达到
    /// `upper * valid` 的桶，窗口内的桶按完整计数参与平均。
    pub fn target_luminance(&self, settings: &ExposureSettings) -> Option<f32> {
        let valid: u64 = self.buckets[1..].iter().map(|&c| c as u64).sum();
        if valid == 0 {
            return None;
        }

        let lower_rank = (settings.lower_percent as f64 * valid as f64).floor() as u64;
        let upper_rank = ((settings.upper_percent as f64 * valid as f64).ceil() as u64).clamp(1, valid);

        let mut lower_index = None;
        let mut upper_index = HISTOGRAM_BUCKETS - 1;
        let mut cumulative = 0u64;
        for (index, &count) in self.buckets.iter().enumerate().skip(1) {
            cumulative += count as u64;
            if lower_index.is_none() && cumulative > lower_rank {
                lower_index = Some(index);
            }
            if cumulative >= upper_rank {
                upper_index = index;
                break;
            }
        }
        // lower_rank < valid，一定能找到
        let lower_index = lower_index.unwrap_or(upper_index);
        let upper_index = upper_index.max(lower_index);

        let (weighted, count) = (lower_index..=upper_index).fold((0u64, 0u64), |(weighted, count), index| {
            let c = self.buckets[index] as u64;
            (weighted + c * index as u64, count + c)
        });
        let mean_index = weighted as f64 / count as f64;
        Some(index_luminance(mean_index as f32, settings))
    }
}

/// 向目标亮度靠近 `1 / tau`；没有历史（小于等于 0 或者非有限值）时直接取目标
pub fn adapt(previous: f32, target: f32, time_coefficient: f32) -> f32 {
    if !(previous > 0.0) || !previous.is_finite() || time_coefficient <= 1.0 {
        return target;
    }
    previous + (target - previous) / time_coefficient
}

/// `2^(compensation + log2(key / adapted))`
pub fn exposure_from_luminance(adapted: f32, compensation: f32) -> f32 {
    (compensation + (KEY_VALUE / adapted.max(MIN_LUMINANCE)).log2()).exp2()
}

/// 关闭曝光适应时只有曝光补偿
#[inline]
pub fn manual_exposure(compensation: f32) -> f32 {
    compensation.exp2()
}

// CPU 模拟
impl LuminanceBufferData {
    /// 按照 GPU 的步骤执行一帧：清空新槽位、统计、求平均、时间平滑、计算曝光
    pub fn simulate_frame(
        &mut self,
        frame_id: u64,
        pixels: impl IntoIterator<Item = Vec3>,
        settings: &ExposureSettings,
    ) {
        let role = new_role(frame_id);
        let histogram = Histogram::build(pixels, settings);
        self.buckets[role] = histogram.buckets;
        self.max_luminance[role] = histogram.max_luminance;

        // 没有有效像素时维持上一帧的状态
        let Some(target) = histogram.target_luminance(settings) else {
            return;
        };
        self.target_average_luminance = target;
        self.average_luminance = adapt(self.average_luminance, target, settings.time_coefficient);
        self.exposure = exposure_from_luminance(self.average_luminance, settings.compensation);
    }
}

/// 回读到 CPU 的亮度统计，用于 UI 展示与调试
#[derive(Clone, Debug, PartialEq)]
pub struct LuminanceReadback {
    /// 产生这份数据的帧
    pub frame_id: u64,
    pub histogram: Histogram,
    pub average_luminance: f32,
    pub target_average_luminance: f32,
    pub exposure: f32,
}
impl LuminanceReadback {
    /// `frame_id` 是写入这份数据的帧，读取它当时的新槽位
    pub fn from_buffer(data: &LuminanceBufferData, frame_id: u64) -> Self {
        let role = new_role(frame_id);
        Self {
            frame_id,
            histogram: Histogram {
                buckets: data.buckets[role],
                max_luminance: data.max_luminance[role],
            },
            average_luminance: data.average_luminance,
            target_average_luminance: data.target_average_luminance,
            exposure: data.exposure,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn settings() -> ExposureSettings {
        ExposureSettings::default()
    }

    #[test]
    fn test_bucket_zero_takes_invalid_pixels() {
        let s = settings();
        assert_eq!(bucket_of(0.0, &s), 0);
        assert_eq!(bucket_of(-1.0, &s), 0);
        assert_eq!(bucket_of(f32::NAN, &s), 0);
        assert_eq!(bucket_of(1e-6, &s), 0);

        // 区间两端
        assert_eq!(bucket_of(MIN_LUMINANCE, &s), 1);
        assert_eq!(bucket_of(2f32.powi(-10), &s), 1);
        assert_eq!(bucket_of(4.0, &s), 255);
        assert_eq!(bucket_of(1e9, &s), 255);
        assert_eq!(bucket_of(f32::INFINITY, &s), 255);
    }

    #[test]
    fn test_histogram_conserves_pixel_count() {
        let s = settings();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..8 {
            let count = rng.gen_range(1..5000);
            let pixels: Vec<Vec3> = (0..count)
                .map(|_| match rng.gen_range(0..10) {
                    0 => Vec3::splat(f32::NAN),
                    1 => Vec3::splat(-rng.gen_range(0.0..10.0f32)),
                    2 => Vec3::ZERO,
                    _ => Vec3::new(
                        rng.gen_range(0.0..100.0f32),
                        rng.gen_range(0.0..100.0f32),
                        rng.gen_range(0.0..100.0f32),
                    ),
                })
                .collect();

            let histogram = Histogram::build(pixels.iter().copied(), &s);
            assert_eq!(histogram.total(), count as u64);
        }
    }

    #[test]
    fn test_uniform_image_targets_its_bucket() {
        let s = settings();
        let histogram = Histogram::build(std::iter::repeat(Vec3::ONE).take(1024), &s);
        let bucket = bucket_of(1.0, &s);
        assert_eq!(histogram.buckets[bucket], 1024);

        let target = histogram.target_luminance(&s).unwrap();
        assert_eq!(target, index_luminance(bucket as f32, &s));
        assert!((histogram.max_luminance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_percentile_window_ignores_outliers() {
        let s = settings();
        let mut histogram = Histogram::default();
        // 10% 很暗，80% 位于 100 号桶，10% 很亮
        histogram.buckets[5] = 10;
        histogram.buckets[100] = 80;
        histogram.buckets[250] = 10;

        let target = histogram.target_luminance(&s).unwrap();
        assert_eq!(target, index_luminance(100.0, &s));
    }

    #[test]
    fn test_window_spanning_two_buckets_averages_them() {
        let s = settings();
        let mut histogram = Histogram::default();
        histogram.buckets[10] = 50;
        histogram.buckets[20] = 50;

        // 窗口 [45, 55] 跨过两个桶，两个桶计数相同
        let target = histogram.target_luminance(&s).unwrap();
        assert!((target - index_luminance(15.0, &s)).abs() < 1e-6);
    }

    #[test]
    fn test_only_invalid_pixels_gives_no_target() {
        let s = settings();
        let histogram = Histogram::build(std::iter::repeat(Vec3::ZERO).take(16), &s);
        assert_eq!(histogram.buckets[0], 16);
        assert_eq!(histogram.target_luminance(&s), None);
    }

    #[test]
    fn test_adaptation_converges_geometrically() {
        let tau = 4.0;
        let target = 2.0;
        let mut adapted = 0.5;
        for k in 1..=10 {
            adapted = adapt(adapted, target, tau);
            let expected_error = (0.5 - target) * (1.0 - 1.0 / tau).powi(k);
            assert!(((adapted - target) - expected_error).abs() < 1e-5, "frame {k}");
        }

        // tau = 1 一帧到位
        assert_eq!(adapt(0.5, target, 1.0), target);
        // 没有历史时直接取目标
        assert_eq!(adapt(0.0, target, tau), target);
        assert_eq!(adapt(f32::NAN, target, tau), target);
    }

    #[test]
    fn test_exposure_maps_adapted_luminance_to_key() {
        assert!((exposure_from_luminance(0.18, 0.0) - 1.0).abs() < 1e-6);
        assert!((exposure_from_luminance(0.36, 0.0) - 0.5).abs() < 1e-6);
        assert!((exposure_from_luminance(0.18, 1.0) - 2.0).abs() < 1e-6);
        assert_eq!(manual_exposure(-1.0), 0.5);
    }

    #[test]
    fn test_simulated_frames_alternate_roles() {
        let s = ExposureSettings {
            time_coefficient: 1.0,
            ..settings()
        };
        let mut data = LuminanceBufferData::default();

        data.simulate_frame(0, std::iter::repeat(Vec3::ONE).take(64), &s);
        data.simulate_frame(1, std::iter::repeat(Vec3::splat(0.25)).take(64), &s);

        // 第 1 帧写入槽位 1，槽位 0 仍然保留第 0 帧的结果
        assert!((data.max_luminance[old_role(1)] - 1.0).abs() < 1e-6);
        assert!((data.max_luminance[new_role(1)] - 0.25).abs() < 1e-6);
        assert_eq!(data.buckets[0][bucket_of(1.0, &s)], 64);
        assert_eq!(data.buckets[1][bucket_of(0.25, &s)], 64);

        // tau = 1 时平均亮度一帧收敛
        let target = index_luminance(bucket_of(0.25, &s) as f32, &s);
        assert_eq!(data.average_luminance, target);
        assert!((data.exposure - KEY_VALUE / target).abs() < 1e-4);

        let readback = LuminanceReadback::from_buffer(&data, 0);
        assert_eq!(readback.histogram.max_luminance, data.max_luminance[0]);
        assert_eq!(readback.histogram.buckets, data.buckets[0]);
    }

    #[test]
    fn test_layout_matches_offsets() {
        assert_eq!(size_of::<LuminanceBufferData>(), 2080);
        assert_eq!(offsets::buckets(1), 1024);
        assert_eq!(offsets::max_luminance(0), 2048);
        assert_eq!(offsets::max_luminance(1), 2052);
    }
}
