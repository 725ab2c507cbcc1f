//! 全局色调映射算子以及 gamma 的 CPU 参考实现
//!
//! 与 `shader/postfx/tone_map.comp`、`shader/postfx/gamma.comp` 中的实现逐项对应。

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// Rec.709 亮度权重
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

#[inline]
pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMINANCE_WEIGHTS)
}

/// 全局色调映射算子，数值就是 shader 中的算子编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum ToneMappingMode {
    Reinhard = 0,
    /// 白点取上一帧的最大亮度
    ReinhardExtended = 1,
    Uncharted2 = 2,
    #[default]
    AcesNarkowicz = 3,
    AcesHill = 4,
}
impl TryFrom<u32> for ToneMappingMode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reinhard),
            1 => Ok(Self::ReinhardExtended),
            2 => Ok(Self::Uncharted2),
            3 => Ok(Self::AcesNarkowicz),
            4 => Ok(Self::AcesHill),
            _ => Err(format!("invalid tone mapping mode {value}, expected 0..=4")),
        }
    }
}
impl From<ToneMappingMode> for u32 {
    #[inline]
    fn from(mode: ToneMappingMode) -> Self {
        mode as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GammaMode {
    Off,
    /// 线性 -> 显示：`c^(1/gamma)`
    #[default]
    #[serde(alias = "on")]
    Forward,
    /// 显示 -> 线性：`c^gamma`
    Inverse,
}
impl GammaMode {
    /// shader 中使用的编号
    #[inline]
    pub fn as_index(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Forward => 1,
            Self::Inverse => 2,
        }
    }
}

#[inline]
fn per_channel(color: Vec3, f: impl Fn(f32) -> f32) -> Vec3 {
    Vec3::new(f(color.x), f(color.y), f(color.z))
}

pub fn reinhard(color: Vec3) -> Vec3 {
    color / (color + Vec3::ONE)
}

/// `white` 处映射到 1；还没有白点（小于等于 0）时退化为 [`reinhard`]
pub fn reinhard_extended(color: Vec3, white: f32) -> Vec3 {
    if !(white > 0.0) {
        return reinhard(color);
    }
    color * (Vec3::ONE + color / (white * white)) / (Vec3::ONE + color)
}

pub fn uncharted2(color: Vec3) -> Vec3 {
    const EXPOSURE_BIAS: f32 = 2.0;
    const WHITE: f32 = 11.2;

    fn partial(x: Vec3) -> Vec3 {
        let a = 0.15;
        let b = 0.50;
        let c = 0.10;
        let d = 0.20;
        let e = 0.02;
        let f = 0.30;
        ((x * (x * a + Vec3::splat(c * b)) + Vec3::splat(d * e)) / (x * (x * a + Vec3::splat(b)) + Vec3::splat(d * f)))
            - Vec3::splat(e / f)
    }

    let curr = partial(color * EXPOSURE_BIAS);
    let white_scale = Vec3::ONE / partial(Vec3::splat(WHITE));
    (curr * white_scale).clamp(Vec3::ZERO, Vec3::ONE)
}

pub fn aces_narkowicz(color: Vec3) -> Vec3 {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    ((color * (color * a + Vec3::splat(b))) / (color * (color * c + Vec3::splat(d)) + Vec3::splat(e)))
        .clamp(Vec3::ZERO, Vec3::ONE)
}

/// Stephen Hill 的 RRT + ODT 拟合
pub fn aces_hill(color: Vec3) -> Vec3 {
    // sRGB => XYZ => D65_2_D60 => AP1 => RRT_SAT
    let input = Mat3::from_cols(
        Vec3::new(0.59719, 0.07600, 0.02840),
        Vec3::new(0.35458, 0.90834, 0.13383),
        Vec3::new(0.04823, 0.01566, 0.83777),
    );
    // ODT_SAT => XYZ => D60_2_D65 => sRGB
    let output = Mat3::from_cols(
        Vec3::new(1.60475, -0.10208, -0.00327),
        Vec3::new(-0.53108, 1.10813, -0.07276),
        Vec3::new(-0.07367, -0.00605, 1.07602),
    );

    let v = input * color;
    let fitted = (v * (v + Vec3::splat(0.0245786)) - Vec3::splat(0.000090537))
        / (v * (v * 0.983729 + Vec3::splat(0.4329510)) + Vec3::splat(0.238081));
    (output * fitted).clamp(Vec3::ZERO, Vec3::ONE)
}

/// 先乘曝光，再应用算子
///
/// `white` 只有 [`ToneMappingMode::ReinhardExtended`] 使用，单位与曝光之前的颜色相同
pub fn tone_map(mode: ToneMappingMode, color: Vec3, exposure: f32, white: f32) -> Vec3 {
    let exposed = color.max(Vec3::ZERO) * exposure;
    match mode {
        ToneMappingMode::Reinhard => reinhard(exposed),
        ToneMappingMode::ReinhardExtended => reinhard_extended(exposed, white * exposure),
        ToneMappingMode::Uncharted2 => uncharted2(exposed),
        ToneMappingMode::AcesNarkowicz => aces_narkowicz(exposed),
        ToneMappingMode::AcesHill => aces_hill(exposed),
    }
}

pub fn apply_gamma(mode: GammaMode, color: Vec3, gamma: f32) -> Vec3 {
    let color = color.max(Vec3::ZERO);
    match mode {
        GammaMode::Off => color,
        GammaMode::Forward => per_channel(color, |c| c.powf(1.0 / gamma)),
        GammaMode::Inverse => per_channel(color, |c| c.powf(gamma)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [ToneMappingMode; 5] = [
        ToneMappingMode::Reinhard,
        ToneMappingMode::ReinhardExtended,
        ToneMappingMode::Uncharted2,
        ToneMappingMode::AcesNarkowicz,
        ToneMappingMode::AcesHill,
    ];

    #[test]
    fn test_black_stays_black() {
        for mode in MODES {
            let mapped = tone_map(mode, Vec3::ZERO, 1.0, 4.0);
            assert!(mapped.max_element() < 1e-3, "{mode:?} maps black to {mapped}");
        }
    }

    #[test]
    fn test_operators_are_monotonic_and_bounded() {
        for mode in MODES {
            let mut prev = -1.0;
            for i in 0..200 {
                let x = i as f32 * 0.1;
                let y = tone_map(mode, Vec3::splat(x), 1.0, 20.0).x;
                assert!(y >= prev - 1e-5, "{mode:?} not monotonic at {x}");
                assert!(y <= 1.0 + 1e-4, "{mode:?} exceeds 1 at {x}: {y}");
                prev = y;
            }
        }
    }

    #[test]
    fn test_reinhard_extended_maps_white_to_one() {
        let mapped = reinhard_extended(Vec3::splat(8.0), 8.0);
        assert!((mapped - Vec3::ONE).abs().max_element() < 1e-5);

        // 白点与曝光一起缩放
        let mapped = tone_map(ToneMappingMode::ReinhardExtended, Vec3::splat(4.0), 0.5, 4.0);
        assert!((mapped.x - 1.0).abs() < 1e-5);

        // 第一帧还没有最大亮度
        assert_eq!(reinhard_extended(Vec3::splat(3.0), 0.0), reinhard(Vec3::splat(3.0)));
    }

    #[test]
    fn test_reinhard_half_at_one() {
        assert_eq!(reinhard(Vec3::ONE), Vec3::splat(0.5));
    }

    #[test]
    fn test_gamma_modes() {
        let c = Vec3::new(0.25, 0.5, 1.0);
        assert_eq!(apply_gamma(GammaMode::Off, c, 2.2), c);

        let forward = apply_gamma(GammaMode::Forward, c, 2.0);
        assert!((forward - Vec3::new(0.5, 0.70710677, 1.0)).abs().max_element() < 1e-5);

        let back = apply_gamma(GammaMode::Inverse, forward, 2.0);
        assert!((back - c).abs().max_element() < 1e-5);
    }

    #[test]
    fn test_mode_from_number() {
        assert_eq!(ToneMappingMode::try_from(4), Ok(ToneMappingMode::AcesHill));
        assert!(ToneMappingMode::try_from(5).is_err());
        assert_eq!(u32::from(ToneMappingMode::Uncharted2), 2);
    }
}
