//! 证书路径解析。

use std::path::{Path, PathBuf};
use tracing::warn;

/// 证书目录：`<data>/etc/certs`，存在 `pem/` 子目录时使用该子目录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn from_env() -> Self {
        Self::new(mqs_config::data_dir().join("etc").join("certs"))
    }

    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let pem = base.join("pem");
        let dir = if pem.is_dir() { pem } else { base };
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 返回 `<dir>/<name>.pem`；文件不可读时只记录告警，由连接尝试报告真实错误。
    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = self.dir.join(format!("{}.pem", name));
        if let Err(err) = std::fs::File::open(&path) {
            warn!(
                target: "mqs.connection",
                path = %path.display(),
                error = %err,
                "certificate_unreadable"
            );
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn uses_pem_subdirectory_when_present() {
        let dir = TempDir::new().unwrap();
        assert_eq!(CertificateStore::new(dir.path()).dir(), dir.path());

        std::fs::create_dir(dir.path().join("pem")).unwrap();
        let store = CertificateStore::new(dir.path());
        assert_eq!(store.dir(), dir.path().join("pem"));
        assert_eq!(store.resolve("ca"), dir.path().join("pem").join("ca.pem"));
    }

    #[test]
    fn missing_file_still_resolves() {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());
        assert_eq!(store.resolve("absent"), dir.path().join("absent.pem"));
    }
}
