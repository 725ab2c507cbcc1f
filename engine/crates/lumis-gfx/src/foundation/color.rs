/// debug label 的颜色，在 RenderDoc / Nsight 中区分层级
pub struct LabelColor;
impl LabelColor {
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);

    /// 一整段后处理
    pub const COLOR_PASS: glam::Vec4 = Self::BLUE;
    /// 单个效果
    pub const COLOR_STAGE: glam::Vec4 = Self::YELLOW;
    /// 拷贝、blit 等零散命令
    pub const COLOR_CMD: glam::Vec4 = Self::GREEN;
}
