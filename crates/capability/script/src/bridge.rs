//! 脚本转换桥：加载用户脚本并按 `convert(message, topic)` 约定调用。

use crate::convert::{TransformResult, classify};
use crate::engine::{EngineGuard, ScriptEngine, module_identity};
use crate::error::{ScriptError, describe_at};
use mqs_telemetry::{record_transform_failure, record_transform_suppressed};
use rhai::{AST, CallFnOptions, Dynamic, Scope};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 入口函数名。
pub const ENTRY_POINT: &str = "convert";

/// 失败锁定状态下每跳过多少次调用输出一次告警；
/// 连续调用异常时同样按此间隔汇总输出。
pub const SUPPRESSED_REPORT_INTERVAL: u32 = 100;

/// 已加载的脚本单元。
struct ScriptBinding {
    identity: String,
    path: PathBuf,
    ast: AST,
    scope: Scope<'static>,
}

/// 单个插件实例的脚本转换桥。
pub struct ScriptBridge {
    name: String,
    engine: Arc<ScriptEngine>,
    binding: Option<ScriptBinding>,
    failed: bool,
    suppressed: u32,
    call_failures: u32,
    unreported_failures: u32,
}

impl ScriptBridge {
    /// 绑定进程级共享引擎，并加入 `<data>/scripts` 搜索路径。
    pub fn new(name: impl Into<String>) -> Self {
        let engine = ScriptEngine::shared();
        engine.add_search_path(mqs_config::data_dir().join("scripts"));
        Self::with_engine(name, engine)
    }

    pub fn with_engine(name: impl Into<String>, engine: Arc<ScriptEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
            binding: None,
            failed: false,
            suppressed: 0,
            call_failures: 0,
            unreported_failures: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前绑定的模块标识。
    pub fn module_identity(&self) -> Option<&str> {
        self.binding.as_ref().map(|binding| binding.identity.as_str())
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.binding.as_ref().map(|binding| binding.path.as_path())
    }

    /// 是否处于失败锁定状态（加载失败或返回值违反约定）。
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// 自上次告警以来被跳过的调用次数。
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }

    /// 当前连续调用异常次数（成功调用或重新加载后清零）。
    pub fn call_failures(&self) -> u32 {
        self.call_failures
    }

    /// 自上次输出日志以来未单独输出的调用异常次数。
    pub fn unreported_failures(&self) -> u32 {
        self.unreported_failures
    }

    /// 加载或重新加载脚本。
    ///
    /// 模块标识与当前绑定一致时原地重新加载，否则释放旧绑定后重新导入。
    /// 失败时进入失败锁定状态，直到下一次加载成功。
    pub fn load_script(&mut self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let path = path.as_ref();
        info!(
            target: "mqs.script",
            instance = %self.name,
            script = %path.display(),
            "script_load_requested"
        );
        let engine = Arc::clone(&self.engine);
        let guard = engine.lock();
        match self.load_locked(&guard, path) {
            Ok(()) => {
                self.failed = false;
                self.suppressed = 0;
                self.call_failures = 0;
                self.unreported_failures = 0;
                Ok(())
            }
            Err(err) => {
                self.binding = None;
                self.failed = true;
                error!(
                    target: "mqs.script",
                    instance = %self.name,
                    script = %path.display(),
                    error = %err,
                    "script_load_failed"
                );
                Err(err)
            }
        }
    }

    fn load_locked(&mut self, guard: &EngineGuard<'_>, path: &Path) -> Result<(), ScriptError> {
        let identity = module_identity(path)
            .ok_or_else(|| ScriptError::InvalidPath(path.display().to_string()))?;
        let resolved = guard
            .resolve(path, &identity)
            .ok_or_else(|| ScriptError::NotFound(path.display().to_string()))?;
        let source = std::fs::read_to_string(&resolved).map_err(|source| ScriptError::Io {
            script: identity.clone(),
            source,
        })?;

        let engine = guard.engine();
        let ast = engine.compile(&source).map_err(|err| ScriptError::Syntax {
            script: identity.clone(),
            detail: describe_at(
                &err.err_type().to_string(),
                &err.to_string(),
                err.position(),
                &source,
            ),
        })?;

        let arity = ast
            .iter_functions()
            .filter(|function| function.name == ENTRY_POINT)
            .map(|function| function.params.len())
            .collect::<Vec<_>>();
        if arity.is_empty() {
            return Err(ScriptError::MissingEntryPoint(identity));
        }
        if !arity.contains(&2) {
            return Err(ScriptError::EntryPointNotCallable {
                script: identity,
                arity: arity[0],
            });
        }

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| ScriptError::Runtime {
                script: identity.clone(),
                detail: describe_at(&err.to_string(), &err.to_string(), err.position(), &source),
            })?;

        match self.binding.as_mut() {
            Some(binding) if binding.identity == identity => {
                binding.path = resolved;
                binding.ast = ast;
                binding.scope = scope;
                info!(target: "mqs.script", instance = %self.name, module = %identity, "script_reloaded");
            }
            _ => {
                self.binding = None;
                info!(
                    target: "mqs.script",
                    instance = %self.name,
                    module = %identity,
                    path = %resolved.display(),
                    "script_imported"
                );
                self.binding = Some(ScriptBinding {
                    identity,
                    path: resolved,
                    ast,
                    scope,
                });
            }
        }
        Ok(())
    }

    /// 以 (message, topic) 调用 convert 并归类返回值。
    pub fn execute(&mut self, message: &str, topic: &str) -> TransformResult {
        if self.failed || self.binding.is_none() {
            self.suppressed += 1;
            record_transform_suppressed();
            if self.suppressed >= SUPPRESSED_REPORT_INTERVAL {
                warn!(
                    target: "mqs.script",
                    instance = %self.name,
                    suppressed = self.suppressed,
                    "script_unavailable_messages_dropped"
                );
                self.suppressed = 0;
            }
            return TransformResult::Empty;
        }

        let engine = Arc::clone(&self.engine);
        let guard = engine.lock();
        let Some(binding) = self.binding.as_mut() else {
            return TransformResult::Empty;
        };
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let outcome = guard.engine().call_fn_with_options::<Dynamic>(
            options,
            &mut binding.scope,
            &binding.ast,
            ENTRY_POINT,
            (message.to_string(), topic.to_string()),
        );
        let result = match outcome {
            Ok(value) => classify(value),
            Err(err) => {
                let identity = binding.identity.clone();
                drop(guard);
                let detail = err.to_string();
                self.call_failed(&identity, topic, &detail);
                return TransformResult::Failure(detail);
            }
        };
        drop(guard);
        self.call_recovered();

        match &result {
            TransformResult::Failure(reason) => {
                record_transform_failure();
                self.failed = true;
                error!(
                    target: "mqs.script",
                    instance = %self.name,
                    topic = %topic,
                    reason = %reason,
                    "script_contract_violation"
                );
            }
            TransformResult::Empty => {
                debug!(target: "mqs.script", instance = %self.name, topic = %topic, "script_returned_no_data");
            }
            TransformResult::Mapping(document) | TransformResult::Pair { document, .. } => {
                debug!(
                    target: "mqs.script",
                    instance = %self.name,
                    topic = %topic,
                    asset = ?result.asset(),
                    members = document.len(),
                    "script_converted"
                );
            }
        }
        result
    }

    /// 调用异常不锁定，但与锁定状态共用汇总间隔：首次输出错误，之后每累计
    /// `SUPPRESSED_REPORT_INTERVAL` 次输出一条汇总。
    fn call_failed(&mut self, identity: &str, topic: &str, detail: &str) {
        record_transform_failure();
        self.call_failures += 1;
        if self.call_failures == 1 {
            error!(
                target: "mqs.script",
                instance = %self.name,
                module = %identity,
                topic = %topic,
                error = %detail,
                "script_convert_failed"
            );
            return;
        }
        self.unreported_failures += 1;
        if self.unreported_failures >= SUPPRESSED_REPORT_INTERVAL {
            warn!(
                target: "mqs.script",
                instance = %self.name,
                module = %identity,
                failures = self.call_failures,
                unreported = self.unreported_failures,
                last_error = %detail,
                "script_convert_still_failing"
            );
            self.unreported_failures = 0;
        }
    }

    fn call_recovered(&mut self) {
        if self.call_failures > 0 {
            info!(
                target: "mqs.script",
                instance = %self.name,
                failures = self.call_failures,
                "script_convert_recovered"
            );
            self.call_failures = 0;
            self.unreported_failures = 0;
        }
    }
}
