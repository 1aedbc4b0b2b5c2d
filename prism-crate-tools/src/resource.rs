use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = PrismPath::config_path("prism.toml"); // prism.toml
/// ```
pub struct PrismPath {}
impl PrismPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // 当前包位于工作区根目录下一级
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    /// 工作区根目录下的配置文件
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_contains_manifest() {
        assert!(PrismPath::workspace_path().join("Cargo.toml").exists());
        assert!(PrismPath::config_path("prism.toml").ends_with("prism.toml"));
    }
}
