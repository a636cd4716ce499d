use mqs_script::{SUPPRESSED_REPORT_INTERVAL, ScriptBridge, ScriptEngine, ScriptError, TransformResult};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const MESSAGE: &str = r#"{ "a" : "b" }"#;
const TOPIC: &str = "unittest";

fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).expect("write script");
    path
}

fn bridge() -> ScriptBridge {
    ScriptBridge::with_engine("Test1", Arc::new(ScriptEngine::new()))
}

#[test]
fn simple_script_returns_mapping() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "script.rhai",
        "fn convert(message, topic) {\n    #{ a: \"b\" }\n}\n",
    );
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    assert_eq!(bridge.module_identity(), Some("script"));

    let result = bridge.execute(MESSAGE, TOPIC);
    let document = result.document().expect("document");
    assert_eq!(document.get("a"), Some(&Value::from("b")));
    assert!(result.asset().is_none());
}

#[test]
fn loading_another_script_replaces_the_binding() {
    let dir = TempDir::new().expect("tempdir");
    let first = write_script(
        &dir,
        "update.rhai",
        "fn convert(message, topic) { #{ a: \"b\" } }",
    );
    let second = write_script(
        &dir,
        "update2.rhai",
        "fn convert(message, topic) { #{ temperature: 98 } }",
    );
    let mut bridge = bridge();
    bridge.load_script(&first).expect("load first");
    assert!(bridge.execute(MESSAGE, TOPIC).document().is_some());

    bridge.load_script(&second).expect("load second");
    assert_eq!(bridge.module_identity(), Some("update2"));
    let result = bridge.execute(MESSAGE, TOPIC);
    let document = result.document().expect("document");
    assert_eq!(document.get("temperature"), Some(&Value::from(98)));
    assert!(document.get("a").is_none());
}

#[test]
fn reload_in_place_picks_up_new_content() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "inplace.rhai", "fn convert(message, topic) { #{ v: 1 } }");
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");

    std::fs::write(&path, "fn convert(message, topic) { #{ v: 2 } }").expect("rewrite");
    bridge.load_script(&path).expect("reload");
    assert_eq!(bridge.module_identity(), Some("inplace"));
    let result = bridge.execute(MESSAGE, TOPIC);
    assert_eq!(result.document().and_then(|d| d.get("v")), Some(&Value::from(2)));
}

#[test]
fn loading_identical_content_twice_preserves_behaviour() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "same.rhai",
        "let scale = 10;\nfn convert(message, topic) { #{ topic: topic, size: message.len() } }",
    );
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    let before = bridge.execute(MESSAGE, TOPIC);
    bridge.load_script(&path).expect("reload");
    let after = bridge.execute(MESSAGE, TOPIC);
    assert_eq!(before, after);
    assert_eq!(
        after.document().and_then(|d| d.get("topic")),
        Some(&Value::from(TOPIC))
    );
}

#[test]
fn bare_string_return_is_a_failure() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "error.rhai", "fn convert(message, topic) { \"a\" }");
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    let result = bridge.execute(MESSAGE, TOPIC);
    assert!(result.is_failure());
    assert!(result.document().is_none());
    assert!(bridge.is_failed());

    // 失败锁定后不再调用脚本
    assert_eq!(bridge.execute(MESSAGE, TOPIC), TransformResult::Empty);
    assert_eq!(bridge.suppressed(), 1);
}

#[test]
fn missing_convert_fails_to_load() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "error2.rhai", "fn foo(message, topic) { \"a\" }");
    let mut bridge = bridge();
    let err = bridge.load_script(&path).expect_err("missing entry point");
    assert!(matches!(err, ScriptError::MissingEntryPoint(ref name) if name == "error2"));
    assert!(bridge.is_failed());
    assert_eq!(bridge.execute(MESSAGE, TOPIC), TransformResult::Empty);
}

#[test]
fn convert_with_wrong_arity_is_not_callable() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "arity.rhai", "fn convert(message) { #{} }");
    let mut bridge = bridge();
    let err = bridge.load_script(&path).expect_err("wrong arity");
    assert!(matches!(err, ScriptError::EntryPointNotCallable { arity: 1, .. }));
}

#[test]
fn runtime_error_fails_the_call_only() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "syntax.rhai", "fn convert(message, topic) {\n    nonsense\n}");
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    let result = bridge.execute(MESSAGE, TOPIC);
    assert!(result.is_failure());
    assert!(!bridge.is_failed());
}

#[test]
fn syntax_error_fails_to_load_with_line() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "rt2.rhai",
        "fn convert(message, topic) {\n    if a < b return 2;\n    1\n}",
    );
    let mut bridge = bridge();
    let err = bridge.load_script(&path).expect_err("syntax error");
    match err {
        ScriptError::Syntax { script, detail } => {
            assert_eq!(script, "rt2");
            assert!(detail.contains("line 2"), "detail: {}", detail);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(bridge.execute(MESSAGE, TOPIC), TransformResult::Empty);
}

#[test]
fn top_level_error_fails_to_load() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "toplevel.rhai",
        "throw \"boom\";\nfn convert(message, topic) { #{} }",
    );
    let mut bridge = bridge();
    let err = bridge.load_script(&path).expect_err("top level error");
    assert!(matches!(err, ScriptError::Runtime { .. }));
}

#[test]
fn missing_file_fails_to_load() {
    let mut bridge = bridge();
    let err = bridge.load_script("none.rhai").expect_err("no file");
    assert!(matches!(err, ScriptError::NotFound(_)));
    assert!(bridge.execute(MESSAGE, TOPIC).document().is_none());
}

#[test]
fn search_path_resolves_bare_identity() {
    let dir = TempDir::new().expect("tempdir");
    write_script(&dir, "from_search.rhai", "fn convert(message, topic) { #{ ok: 1 } }");
    let engine = Arc::new(ScriptEngine::new());
    engine.add_search_path(dir.path());
    let mut bridge = ScriptBridge::with_engine("Test2", engine);
    bridge.load_script("from_search").expect("load via search path");
    assert_eq!(
        bridge.script_path(),
        Some(dir.path().join("from_search.rhai").as_path())
    );
}

#[test]
fn pair_return_sets_asset() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "pair.rhai",
        "fn convert(message, topic) { [\"boiler\", #{ t: 1.5, raw: blob(2, 0x41) }] }",
    );
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    let result = bridge.execute(MESSAGE, TOPIC);
    assert_eq!(result.asset(), Some("boiler"));
    let document = result.document().expect("document");
    assert_eq!(document.get("t"), Some(&Value::from(1.5)));
    assert_eq!(document.get("raw"), Some(&Value::from("AA")));
}

#[test]
fn empty_asset_name_is_a_failure() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "noasset.rhai", "fn convert(message, topic) { [\"\", #{ t: 1 }] }");
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    assert!(bridge.execute(MESSAGE, TOPIC).is_failure());
    assert!(bridge.is_failed());
}

#[test]
fn unit_return_is_empty_and_not_sticky() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "drop.rhai", "fn convert(message, topic) { () }");
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");
    assert_eq!(bridge.execute(MESSAGE, TOPIC), TransformResult::Empty);
    assert!(!bridge.is_failed());
    assert_eq!(bridge.suppressed(), 0);
}

#[test]
fn suppressed_counter_resets_every_interval() {
    let mut bridge = bridge();
    let _ = bridge.load_script("does_not_exist.rhai");
    for _ in 0..SUPPRESSED_REPORT_INTERVAL - 1 {
        bridge.execute(MESSAGE, TOPIC);
    }
    assert_eq!(bridge.suppressed(), SUPPRESSED_REPORT_INTERVAL - 1);
    bridge.execute(MESSAGE, TOPIC);
    assert_eq!(bridge.suppressed(), 0);
}

#[test]
fn repeated_call_errors_are_reported_every_interval() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(
        &dir,
        "flaky.rhai",
        "fn convert(message, topic) {\n    if message == \"bad\" { throw \"boom\"; }\n    #{ ok: 1 }\n}",
    );
    let mut bridge = bridge();
    bridge.load_script(&path).expect("load");

    // 首次异常立即输出，不计入待汇总
    assert!(bridge.execute("bad", TOPIC).is_failure());
    assert_eq!(bridge.call_failures(), 1);
    assert_eq!(bridge.unreported_failures(), 0);

    for _ in 1..SUPPRESSED_REPORT_INTERVAL {
        bridge.execute("bad", TOPIC);
    }
    assert_eq!(bridge.unreported_failures(), SUPPRESSED_REPORT_INTERVAL - 1);
    bridge.execute("bad", TOPIC);
    assert_eq!(bridge.unreported_failures(), 0);

    for _ in 0..149 {
        assert!(bridge.execute("bad", TOPIC).is_failure());
    }
    assert_eq!(bridge.call_failures(), 250);
    assert_eq!(bridge.unreported_failures(), 49);
    assert!(!bridge.is_failed());
    assert_eq!(bridge.suppressed(), 0);

    assert!(bridge.execute(MESSAGE, TOPIC).document().is_some());
    assert_eq!(bridge.call_failures(), 0);
    assert_eq!(bridge.unreported_failures(), 0);
}

#[test]
fn successful_reload_clears_sticky_failure() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_script(&dir, "recover.rhai", "fn nothing() { 1 }");
    let mut bridge = bridge();
    assert!(bridge.load_script(&path).is_err());
    assert!(bridge.is_failed());

    std::fs::write(&path, "fn convert(message, topic) { #{ ok: 1 } }").expect("rewrite");
    bridge.load_script(&path).expect("reload");
    assert!(!bridge.is_failed());
    assert!(bridge.execute(MESSAGE, TOPIC).document().is_some());
}
