use std::path::{Path, PathBuf};

/// 基于 workspace 根目录的路径
///
/// 根目录由本 crate 的 `CARGO_MANIFEST_DIR` 推导，与当前工作目录无关。
pub struct LumisPath;
impl LumisPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // lumis-crate-tools 位于 workspace 根目录下
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }

    /// 编译输出的 SPIR-V 所在目录，结构与 `shader/` 下的源码一致
    pub fn shader_build_path() -> PathBuf {
        Self::shader_root_path().join(".build")
    }

    /// 后处理 shader 的 SPIR-V 目录
    pub fn postfx_spirv_path() -> PathBuf {
        Self::shader_build_path().join("postfx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_workspace_root() {
        let root = LumisPath::workspace_path();
        assert!(root.join("lumis-crate-tools").join("Cargo.toml").exists());
        assert!(LumisPath::postfx_spirv_path().starts_with(root.join("shader")));
        assert!(LumisPath::postfx_spirv_path().ends_with(".build/postfx"));
    }
}
