//! 进程级共享脚本引擎。
//!
//! 所有插件实例共用一个 Rhai 引擎，引擎状态（引擎本体与脚本搜索路径）
//! 由一把执行锁保护；任何对引擎的调用都必须先取得 [`EngineGuard`]。

use rhai::{Engine, Position};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

/// 脚本文件扩展名。
pub const SCRIPT_EXTENSION: &str = "rhai";

static SHARED: OnceLock<Arc<ScriptEngine>> = OnceLock::new();

/// 受执行锁保护的引擎状态。
pub struct EngineState {
    engine: Engine,
    search_paths: Vec<PathBuf>,
}

impl EngineState {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// 按给定路径或搜索路径定位脚本文件。
    ///
    /// 给定路径存在时直接使用；否则在搜索路径中查找 `<identity>.rhai`。
    pub fn resolve(&self, path: &Path, identity: &str) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        let file_name = format!("{}.{}", identity, SCRIPT_EXTENSION);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

/// 执行锁守卫；离开作用域时释放锁。
pub type EngineGuard<'a> = MutexGuard<'a, EngineState>;

/// 共享脚本引擎服务。
pub struct ScriptEngine {
    state: Mutex<EngineState>,
}

impl ScriptEngine {
    /// 创建独立引擎（测试或需要隔离时使用）。
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_print(|text| info!(target: "mqs.script", output = %text, "script_print"));
        engine.on_debug(|text, source, pos: Position| {
            debug!(
                target: "mqs.script",
                output = %text,
                source = ?source,
                line = ?pos.line(),
                "script_debug"
            );
        });
        Self {
            state: Mutex::new(EngineState {
                engine,
                search_paths: Vec::new(),
            }),
        }
    }

    /// 获取进程级共享引擎（首次调用时创建，之后一直存活）。
    pub fn shared() -> Arc<Self> {
        SHARED.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// 取得执行锁。
    pub fn lock(&self) -> EngineGuard<'_> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加脚本搜索路径（已存在则忽略）。
    pub fn add_search_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.lock();
        if !state.search_paths.contains(&path) {
            debug!(target: "mqs.script", path = %path.display(), "script_search_path_added");
            state.search_paths.push(path);
        }
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.lock().search_paths.clone()
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 由脚本路径得到模块标识（去掉目录与扩展名）。
pub fn module_identity(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| stem.to_string())
}
