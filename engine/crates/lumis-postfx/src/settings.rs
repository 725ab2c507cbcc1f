use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    effect::Effect,
    tone_mapping::{GammaMode, ToneMappingMode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocalToneMappingMode {
    #[default]
    #[serde(alias = "durand")]
    Durand,
    #[serde(alias = "fusion")]
    Fusion,
}

/// 曝光适应（直方图 + 时间平滑）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExposureSettings {
    /// 直方图覆盖的 log2 亮度区间：`[min, min + range]`
    pub min_log_luminance: f32,
    pub log_luminance_range: f32,
    /// 只统计亮度排序后位于这个百分位窗口内的像素
    pub lower_percent: f32,
    pub upper_percent: f32,
    /// 每帧向目标靠近 `1 / tau`，1 表示立即收敛
    pub time_coefficient: f32,
    /// 曝光补偿，单位 EV
    pub compensation: f32,
}
impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            min_log_luminance: -10.0,
            log_luminance_range: 12.0,
            lower_percent: 0.45,
            upper_percent: 0.55,
            time_coefficient: 20.0,
            compensation: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DurandSettings {
    pub sigma_space: f32,
    pub sigma_range: f32,
    /// 双边滤波的半径，单位像素
    pub radius: u32,
    /// base 层的压缩系数，越小对比度越低
    pub compression: f32,
    pub detail_boost: f32,
    /// 压缩时保持不变的亮度
    pub reference_luminance: f32,
}
impl Default for DurandSettings {
    fn default() -> Self {
        Self {
            sigma_space: 4.0,
            sigma_range: 0.4,
            radius: 6,
            compression: 0.5,
            detail_boost: 1.0,
            reference_luminance: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusionSettings {
    /// 合成的三张曝光分别是 `shadows_ev`、0、`highlights_ev`
    pub shadows_ev: f32,
    pub highlights_ev: f32,
    pub well_exposed_sigma: f32,
    /// 金字塔层数，受分辨率限制
    pub levels: u32,
}
impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            shadows_ev: 1.5,
            highlights_ev: -1.5,
            well_exposed_sigma: 0.2,
            levels: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloomSettings {
    pub threshold: f32,
    /// 阈值附近的软过渡宽度
    pub knee: f32,
    /// 上采样 tent filter 的半径，单位为目标层的 texel
    pub filter_radius: f32,
    pub intensity: f32,
    pub levels: u32,
}
impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            knee: 0.5,
            filter_radius: 1.0,
            intensity: 0.05,
            levels: 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToneMappingSettings {
    /// 不设置时使用上一帧的最大亮度作为 Reinhard-Extended 的白点
    pub white_point: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GammaSettings {
    pub gamma: f32,
}
impl Default for GammaSettings {
    fn default() -> Self {
        Self { gamma: 2.2 }
    }
}

/// 后处理的全部可调参数，可以从 toml 加载
///
/// ```toml
/// toneMappingMode = 4
/// gammaMode = "forward"
/// enableBloom = false
///
/// [exposure]
/// timeCoefficient = 10.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostFxSettings {
    pub tone_mapping_mode: ToneMappingMode,
    pub gamma_mode: GammaMode,

    pub enable_adaptation: bool,
    pub enable_bloom: bool,
    pub enable_tone_mapping: bool,
    pub enable_local_tone_mapping: bool,
    pub local_tone_mapping_mode: LocalToneMappingMode,

    /// 存放 `*.comp.spv` 的目录
    pub shader_dir: PathBuf,

    pub exposure: ExposureSettings,
    pub durand: DurandSettings,
    pub fusion: FusionSettings,
    pub bloom: BloomSettings,
    pub tone_mapping: ToneMappingSettings,
    pub gamma: GammaSettings,
}
impl Default for PostFxSettings {
    fn default() -> Self {
        Self {
            tone_mapping_mode: ToneMappingMode::default(),
            gamma_mode: GammaMode::default(),
            enable_adaptation: true,
            enable_bloom: true,
            enable_tone_mapping: true,
            enable_local_tone_mapping: false,
            local_tone_mapping_mode: LocalToneMappingMode::default(),
            shader_dir: PathBuf::from("shader/.build/postfx"),
            exposure: ExposureSettings::default(),
            durand: DurandSettings::default(),
            fusion: FusionSettings::default(),
            bloom: BloomSettings::default(),
            tone_mapping: ToneMappingSettings::default(),
            gamma: GammaSettings::default(),
        }
    }
}
// new & init
impl PostFxSettings {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(text).context("failed to parse postfx settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read postfx settings: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid postfx settings: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let invalid = self.clone().sanitize();
        anyhow::ensure!(invalid.is_empty(), "invalid postfx parameters: {}", invalid.join(", "));
        Ok(())
    }

    /// 把会让 shader 产生 inf/NaN 的参数恢复为默认值，返回被修正的字段
    ///
    /// UI 可以通过 `settings_mut` 直接修改参数，每帧录制之前都会调用一次
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let defaults = Self::default();
        let mut fixed = vec![];

        let e = &mut self.exposure;
        let d = &defaults.exposure;
        reset_unless(
            &mut e.min_log_luminance,
            d.min_log_luminance,
            |v| v.is_finite(),
            "exposure.minLogLuminance",
            &mut fixed,
        );
        reset_unless(
            &mut e.log_luminance_range,
            d.log_luminance_range,
            positive,
            "exposure.logLuminanceRange",
            &mut fixed,
        );
        reset_unless(
            &mut e.time_coefficient,
            d.time_coefficient,
            |v| v.is_finite() && v >= 1.0,
            "exposure.timeCoefficient",
            &mut fixed,
        );
        reset_unless(&mut e.compensation, d.compensation, |v| v.is_finite(), "exposure.compensation", &mut fixed);
        let window_ok = (0.0..=1.0).contains(&e.lower_percent)
            && (0.0..=1.0).contains(&e.upper_percent)
            && e.lower_percent <= e.upper_percent;
        if !window_ok {
            e.lower_percent = d.lower_percent;
            e.upper_percent = d.upper_percent;
            fixed.push("exposure.lowerPercent/upperPercent");
        }

        let durand = &mut self.durand;
        let d = &defaults.durand;
        reset_unless(&mut durand.sigma_space, d.sigma_space, positive, "durand.sigmaSpace", &mut fixed);
        reset_unless(&mut durand.sigma_range, d.sigma_range, positive, "durand.sigmaRange", &mut fixed);
        reset_unless(&mut durand.compression, d.compression, |v| v.is_finite(), "durand.compression", &mut fixed);
        reset_unless(&mut durand.detail_boost, d.detail_boost, |v| v.is_finite(), "durand.detailBoost", &mut fixed);
        reset_unless(
            &mut durand.reference_luminance,
            d.reference_luminance,
            positive,
            "durand.referenceLuminance",
            &mut fixed,
        );

        let fusion = &mut self.fusion;
        let d = &defaults.fusion;
        reset_unless(&mut fusion.shadows_ev, d.shadows_ev, |v| v.is_finite(), "fusion.shadowsEv", &mut fixed);
        reset_unless(&mut fusion.highlights_ev, d.highlights_ev, |v| v.is_finite(), "fusion.highlightsEv", &mut fixed);
        reset_unless(
            &mut fusion.well_exposed_sigma,
            d.well_exposed_sigma,
            positive,
            "fusion.wellExposedSigma",
            &mut fixed,
        );
        if fusion.levels == 0 {
            fusion.levels = d.levels;
            fixed.push("fusion.levels");
        }

        let bloom = &mut self.bloom;
        let d = &defaults.bloom;
        reset_unless(&mut bloom.threshold, d.threshold, |v| v.is_finite(), "bloom.threshold", &mut fixed);
        reset_unless(&mut bloom.knee, d.knee, |v| v.is_finite() && v >= 0.0, "bloom.knee", &mut fixed);
        reset_unless(&mut bloom.filter_radius, d.filter_radius, positive, "bloom.filterRadius", &mut fixed);
        reset_unless(&mut bloom.intensity, d.intensity, |v| v.is_finite() && v >= 0.0, "bloom.intensity", &mut fixed);
        if bloom.levels == 0 {
            bloom.levels = d.levels;
            fixed.push("bloom.levels");
        }

        // 白点 <= 0 在 shader 中会退化为 Reinhard，只有 inf/NaN 需要处理
        if self.tone_mapping.white_point.is_some_and(|w| !w.is_finite()) {
            self.tone_mapping.white_point = None;
            fixed.push("toneMapping.whitePoint");
        }
        reset_unless(&mut self.gamma.gamma, defaults.gamma.gamma, positive, "gamma.gamma", &mut fixed);

        fixed
    }
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn reset_unless(
    value: &mut f32,
    default: f32,
    valid: impl Fn(f32) -> bool,
    name: &'static str,
    fixed: &mut Vec<&'static str>,
) {
    if !valid(*value) {
        *value = default;
        fixed.push(name);
    }
}
// tools
impl PostFxSettings {
    pub fn is_effect_enabled(&self, effect: Effect) -> bool {
        match effect {
            Effect::ExposureAdaptation => self.enable_adaptation,
            Effect::LocalToneMapDurand => {
                self.enable_local_tone_mapping && self.local_tone_mapping_mode == LocalToneMappingMode::Durand
            }
            Effect::LocalToneMapFusion => {
                self.enable_local_tone_mapping && self.local_tone_mapping_mode == LocalToneMappingMode::Fusion
            }
            Effect::Bloom => self.enable_bloom,
            Effect::GlobalToneMap => self.enable_tone_mapping,
            Effect::Gamma => self.gamma_mode != GammaMode::Off,
        }
    }

    /// 两种局部色调映射互斥，打开其中一种会关闭另一种
    pub fn set_effect_enabled(&mut self, effect: Effect, enabled: bool) {
        match effect {
            Effect::ExposureAdaptation => self.enable_adaptation = enabled,
            Effect::LocalToneMapDurand | Effect::LocalToneMapFusion => {
                let mode = if effect == Effect::LocalToneMapDurand {
                    LocalToneMappingMode::Durand
                } else {
                    LocalToneMappingMode::Fusion
                };
                if enabled {
                    self.enable_local_tone_mapping = true;
                    self.local_tone_mapping_mode = mode;
                } else if self.local_tone_mapping_mode == mode {
                    self.enable_local_tone_mapping = false;
                }
            }
            Effect::Bloom => self.enable_bloom = enabled,
            Effect::GlobalToneMap => self.enable_tone_mapping = enabled,
            Effect::Gamma => match (enabled, self.gamma_mode) {
                (true, GammaMode::Off) => self.gamma_mode = GammaMode::Forward,
                (false, _) => self.gamma_mode = GammaMode::Off,
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let settings = PostFxSettings::from_toml_str("").unwrap();
        assert_eq!(settings, PostFxSettings::default());
        assert_eq!(settings.tone_mapping_mode, ToneMappingMode::AcesNarkowicz);
        assert_eq!(settings.exposure.lower_percent, 0.45);
    }

    #[test]
    fn test_parse_nested_tables() {
        let text = r#"
            toneMappingMode = 1
            gammaMode = "on"
            enableBloom = false
            enableLocalToneMapping = true
            localToneMappingMode = "fusion"

            [exposure]
            timeCoefficient = 1.0
            compensation = -0.5

            [bloom]
            levels = 3

            [toneMapping]
            whitePoint = 8.0
        "#;
        let settings = PostFxSettings::from_toml_str(text).unwrap();
        assert_eq!(settings.tone_mapping_mode, ToneMappingMode::ReinhardExtended);
        assert_eq!(settings.gamma_mode, GammaMode::Forward);
        assert_eq!(settings.exposure.time_coefficient, 1.0);
        assert_eq!(settings.exposure.compensation, -0.5);
        // 未出现的字段保持默认值
        assert_eq!(settings.exposure.min_log_luminance, -10.0);
        assert_eq!(settings.bloom.levels, 3);
        assert_eq!(settings.tone_mapping.white_point, Some(8.0));

        assert!(!settings.is_effect_enabled(Effect::Bloom));
        assert!(settings.is_effect_enabled(Effect::LocalToneMapFusion));
        assert!(!settings.is_effect_enabled(Effect::LocalToneMapDurand));
    }

    #[test]
    fn test_invalid_tone_mapping_mode_is_rejected() {
        let err = PostFxSettings::from_toml_str("toneMappingMode = 9").unwrap_err();
        assert!(format!("{err:#}").contains("invalid tone mapping mode 9"));
    }

    #[test]
    fn test_validation_rejects_inverted_window() {
        let text = "[exposure]\nlowerPercent = 0.8\nupperPercent = 0.2\n";
        assert!(PostFxSettings::from_toml_str(text).is_err());

        let text = "[exposure]\ntimeCoefficient = 0.5\n";
        assert!(PostFxSettings::from_toml_str(text).is_err());
    }

    #[test]
    fn test_degenerate_values_are_rejected_by_name() {
        let cases = [
            ("[durand]\nsigmaSpace = 0.0\n", "durand.sigmaSpace"),
            ("[durand]\nreferenceLuminance = -1.0\n", "durand.referenceLuminance"),
            ("[fusion]\nwellExposedSigma = 0.0\n", "fusion.wellExposedSigma"),
            ("[gamma]\ngamma = 0.0\n", "gamma.gamma"),
            ("[exposure]\nlogLuminanceRange = 0.0\n", "exposure.logLuminanceRange"),
            ("[bloom]\nknee = -0.5\n", "bloom.knee"),
            ("[toneMapping]\nwhitePoint = inf\n", "toneMapping.whitePoint"),
        ];
        for (text, field) in cases {
            let err = PostFxSettings::from_toml_str(text).unwrap_err();
            assert!(format!("{err:#}").contains(field), "{text} -> {err:#}");
        }
    }

    #[test]
    fn test_sanitize_restores_defaults() {
        let mut settings = PostFxSettings::default();
        settings.durand.sigma_space = 0.0;
        settings.fusion.well_exposed_sigma = -0.1;
        settings.gamma.gamma = f32::NAN;
        settings.exposure.log_luminance_range = 0.0;
        settings.durand.reference_luminance = 0.0;

        let mut fixed = settings.sanitize();
        fixed.sort();
        assert_eq!(
            fixed,
            vec![
                "durand.referenceLuminance",
                "durand.sigmaSpace",
                "exposure.logLuminanceRange",
                "fusion.wellExposedSigma",
                "gamma.gamma",
            ]
        );
        assert_eq!(settings, PostFxSettings::default());
        assert!(settings.sanitize().is_empty());
    }

    #[test]
    fn test_load_missing_file_names_the_path() {
        let err = PostFxSettings::load("/definitely/not/here/postfx.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here/postfx.toml"));
    }

    #[test]
    fn test_local_tone_mapping_modes_are_exclusive() {
        let mut settings = PostFxSettings::default();
        settings.set_effect_enabled(Effect::LocalToneMapDurand, true);
        assert!(settings.is_effect_enabled(Effect::LocalToneMapDurand));

        settings.set_effect_enabled(Effect::LocalToneMapFusion, true);
        assert!(settings.is_effect_enabled(Effect::LocalToneMapFusion));
        assert!(!settings.is_effect_enabled(Effect::LocalToneMapDurand));

        // 关闭当前没有选中的模式不影响另一个
        settings.set_effect_enabled(Effect::LocalToneMapDurand, false);
        assert!(settings.is_effect_enabled(Effect::LocalToneMapFusion));
    }

    #[test]
    fn test_gamma_toggle_keeps_direction() {
        let mut settings = PostFxSettings::default();
        settings.gamma_mode = GammaMode::Inverse;
        settings.set_effect_enabled(Effect::Gamma, true);
        assert_eq!(settings.gamma_mode, GammaMode::Inverse);

        settings.set_effect_enabled(Effect::Gamma, false);
        assert!(!settings.is_effect_enabled(Effect::Gamma));
        settings.set_effect_enabled(Effect::Gamma, true);
        assert_eq!(settings.gamma_mode, GammaMode::Forward);
    }
}
