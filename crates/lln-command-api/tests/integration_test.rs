//! Integration tests for lln-command-api.
//!
//! These tests cover:
//! - Full bridge lifecycle: register → build → load → dispatch → teardown
//! - Build cache decisions and marker persistence
//! - Dispatch policies for unknown, malformed and mistyped statements
//! - Async handlers, lifecycle hooks and callback failures
//! - Detection of artifacts built from different declarations


use async_trait::async_trait;
use fixtures::{fake_pointer, write_script, FakeCompiler, FakeEngine};
use lln_command_api::{
    AsyncCommandHandler, Bridge, BuildCache, BuildLayout, BuildOutcome, CommandArgs,
    CommandRegistry, CommandResult, DispatchOptions, DispatchState, MalformedPolicy,
    RegistryBuilder,
};
use lln_runtime::{
    AbiError, ArgType, ArgValue, BridgeError, BuildError, BuildManifest, CallableEntry,
    CallbackError, NativeId, ScriptErrorKind,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// `!printf(str, int)` appending to `log` and adding to `total`.
fn printf_registry(log: &Log, total: &Arc<Mutex<i64>>) -> RegistryBuilder {
    let mut builder = RegistryBuilder::new();
    let log = Arc::clone(log);
    let total = Arc::clone(total);
    builder
        .register("!printf", ["str", "int"], move |args: &CommandArgs| -> CommandResult {
            let label = args.str(0)?.unwrap_or("<null>").to_string();
            let value = args.int(1)?;
            log.lock().unwrap().push(format!("{}={}", label, value));
            *total.lock().unwrap() += i64::from(value);
            Ok(())
        })
        .unwrap();
    builder
}

fn new_bridge(registry: CommandRegistry, dir: &Path, options: DispatchOptions) -> Bridge<FakeCompiler> {
    let cache = BuildCache::new(BuildLayout::new(dir.join("lln_build")), FakeCompiler::new());
    Bridge::new(registry, cache, options)
}

// ==============================================================================
// Bridge Lifecycle Tests
// ==============================================================================

#[test]
fn test_printf_accumulates_in_script_order() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let registry = printf_registry(&log, &total).build();

    let script = write_script(
        temp_dir.path(),
        "hello.lln",
        "!printf(\"a\", 1)\n!printf(\"b\", 2)\n!printf(\"c\", 3)\n",
    );

    let bridge = new_bridge(registry, temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(report.state, DispatchState::Done);
    assert_eq!(report.invocations, 3);
    assert_eq!(report.count("!printf"), 3);
    assert!(report.diagnostics.is_empty());
    assert_eq!(*total.lock().unwrap(), 6);
    assert_eq!(entries(&log), vec!["a=1", "b=2", "c=3"]);

    assert_eq!(engine.teardowns, 1);
    let artifact = engine.loaded_artifact.clone().unwrap();
    assert_eq!(artifact, bridge.cache().layout().artifact_path());
    assert!(artifact.is_file());
}

#[test]
fn test_empty_script_reaches_done() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let registry = printf_registry(&log, &total).build();
    let script = write_script(temp_dir.path(), "empty.lln", "");

    let bridge = new_bridge(registry, temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(report.state, DispatchState::Done);
    assert_eq!(report.invocations, 0);
    assert!(report.per_command.is_empty());
    assert!(entries(&log).is_empty());
    assert_eq!(engine.records_served, 0);
}

#[test]
fn test_values_reach_handler_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let seen: Arc<Mutex<Vec<ArgValue>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut builder = RegistryBuilder::new();
    builder
        .register(
            "!show",
            [ArgType::Str, ArgType::Str, ArgType::Int, ArgType::Float, ArgType::Bool],
            move |args: &CommandArgs| -> CommandResult {
                sink.lock().unwrap().extend(args.values().iter().cloned());
                Ok(())
            },
        )
        .unwrap();

    let script = write_script(
        temp_dir.path(),
        "values.lln",
        "!show(null, \"text\", -7, 2.5, false)\n",
    );
    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    bridge.run(&mut engine, &script).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ArgValue::Str(None),
            ArgValue::Str(Some("text".to_string())),
            ArgValue::Int(-7),
            ArgValue::Float(2.5),
            ArgValue::Bool(false),
        ]
    );
}

#[test]
fn test_engine_coercions_are_applied() {
    let temp_dir = TempDir::new().unwrap();
    let seen: Arc<Mutex<Vec<ArgValue>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut builder = RegistryBuilder::new();
    builder
        .register(
            "!cast",
            ["float", "bool", "int"],
            move |args: &CommandArgs| -> CommandResult {
                sink.lock().unwrap().extend(args.values().iter().cloned());
                Ok(())
            },
        )
        .unwrap();

    let script = write_script(temp_dir.path(), "cast.lln", "!cast(3, 0, true)\n");
    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    bridge.run(&mut engine, &script).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ArgValue::Float(3.0), ArgValue::Bool(false), ArgValue::Int(1)]
    );
}

#[test]
fn test_resolve_returns_registered_entry() {
    let mut builder = RegistryBuilder::new();
    builder
        .register("!ping", Vec::<ArgType>::new(), |_: &CommandArgs| -> CommandResult { Ok(()) })
        .unwrap();
    let registry = builder.build();

    let first = registry.resolve_by_name("!ping").unwrap();
    let second = registry.resolve_by_name("!ping").unwrap();
    assert!(Arc::ptr_eq(first, second));

    let id = NativeId::from_ptr(fake_pointer(0));
    let map = registry
        .identity_map(&[CallableEntry {
            index: 0,
            name: "!ping".into(),
            signature: vec![],
            native_id: id,
        }])
        .unwrap();
    let by_pointer = registry.resolve_by_native_identity(&map, id).unwrap();
    assert!(Arc::ptr_eq(first, by_pointer));

    assert!(matches!(
        registry.resolve_by_name("!pong"),
        Err(BridgeError::UnknownCommand(name)) if name == "!pong"
    ));
}

// ==============================================================================
// Dispatch Policy Tests
// ==============================================================================

const WITH_UNKNOWN: &str = "!printf(\"a\", 1)\n!nope(\"x\")\n!printf(\"c\", 3)\n";

#[test]
fn test_unknown_command_lenient_skips() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let registry = printf_registry(&log, &total).build();
    let script = write_script(temp_dir.path(), "unknown.lln", WITH_UNKNOWN);

    let bridge = new_bridge(registry, temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["a=1", "c=3"]);
    assert_eq!(report.skipped(), 1);
    let diagnostic = &report.diagnostics[0];
    assert_eq!(diagnostic.kind, ScriptErrorKind::UnknownCommand);
    assert_eq!(diagnostic.location.row, 2);
    assert_eq!(diagnostic.message(), "Command '!nope' doesn't exist.");
    assert!(diagnostic.render().contains("   2 | !nope(\"x\")"));
}

#[test]
fn test_unknown_command_strict_aborts() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let registry = printf_registry(&log, &total).build();
    let script = write_script(temp_dir.path(), "unknown.lln", WITH_UNKNOWN);

    let bridge = new_bridge(registry, temp_dir.path(), DispatchOptions::strict());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let err = bridge.run(&mut engine, &script).unwrap_err();

    match err {
        BridgeError::Script(script_err) => {
            assert_eq!(script_err.kind, ScriptErrorKind::UnknownCommand);
            assert_eq!(script_err.command, "!nope");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(entries(&log), vec!["a=1"]);
    assert_eq!(engine.teardowns, 1);
}

#[test]
fn test_arity_and_type_errors_follow_policy() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let registry = printf_registry(&log, &total).build();
    let script = write_script(
        temp_dir.path(),
        "bad_args.lln",
        "!printf(\"a\")\n!printf(1, \"x\")\n!printf(\"ok\", 5)\n",
    );

    let bridge = new_bridge(registry, temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["ok=5"]);
    let kinds: Vec<_> = report.diagnostics.iter().map(|d| d.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            ScriptErrorKind::ArityMismatch {
                expected: 2,
                found: 1
            },
            ScriptErrorKind::TypeMismatch {
                index: 0,
                expected: ArgType::Str,
                found: ArgType::Int,
            },
        ]
    );
}

#[test]
fn test_malformed_skip_and_abort() {
    let temp_dir = TempDir::new().unwrap();
    let content = "!printf(\"a\", 1)\n!printf(\"b\", 2\n!printf(\"c\", 3)\n";

    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let script = write_script(temp_dir.path(), "malformed.lln", content);
    let skip = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine = FakeEngine::for_registry(skip.registry());
    let report = skip.run(&mut engine, &script).unwrap();
    assert_eq!(entries(&log), vec!["a=1", "c=3"]);
    assert_eq!(report.diagnostics[0].kind, ScriptErrorKind::Malformed);

    let log = new_log();
    let options = DispatchOptions {
        malformed: MalformedPolicy::Abort,
        ..DispatchOptions::default()
    };
    let abort = new_bridge(printf_registry(&log, &total).build(), temp_dir.path(), options);
    let mut engine = FakeEngine::for_registry(abort.registry());
    let err = abort.run(&mut engine, &script).unwrap_err();
    assert!(matches!(err, BridgeError::Script(ref e) if e.kind == ScriptErrorKind::Malformed));
    assert_eq!(entries(&log), vec!["a=1"]);
}

#[test]
fn test_policies_need_every_parsed_statement() {
    let temp_dir = TempDir::new().unwrap();
    let content = "!printf(\"a\", 1)\n!nope(\"x\")\n!printf(\"b\", 2\n!printf(2, 2)\n!printf(\"c\", 3)\n";
    let script = write_script(temp_dir.path(), "mixed.lln", content);
    let total = Arc::new(Mutex::new(0));

    // A pre-filtered stream leaves nothing for the policies to act on.
    let log = new_log();
    let bridge = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::strict(),
    );
    let mut engine = FakeEngine::for_registry(bridge.registry()).validating();
    let report = bridge.run(&mut engine, &script).unwrap();
    assert_eq!(entries(&log), vec!["a=1", "c=3"]);
    assert!(report.diagnostics.is_empty());
    assert_eq!(engine.records_served, 2);

    // The unfiltered stream reports each rejected statement.
    let log = new_log();
    let lenient = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine = FakeEngine::for_registry(lenient.registry());
    let report = lenient.run(&mut engine, &script).unwrap();
    assert_eq!(entries(&log), vec!["a=1", "c=3"]);
    let rows: Vec<_> = report
        .diagnostics
        .iter()
        .map(|d| (d.location.row, d.kind.clone()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (2, ScriptErrorKind::UnknownCommand),
            (3, ScriptErrorKind::Malformed),
            (
                4,
                ScriptErrorKind::TypeMismatch {
                    index: 0,
                    expected: ArgType::Str,
                    found: ArgType::Int,
                }
            ),
        ]
    );

    let log = new_log();
    let strict = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::strict(),
    );
    let mut engine = FakeEngine::for_registry(strict.registry());
    let err = strict.run(&mut engine, &script).unwrap_err();
    assert!(matches!(err, BridgeError::Script(ref e) if e.command == "!nope"));
    assert_eq!(entries(&log), vec!["a=1"]);
}

#[test]
fn test_invalid_argument_tag_only_in_malformed_records() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    // `oops` cannot be parsed, so the engine marks the record malformed and
    // stores its invalid tag; that must not count as an ABI mismatch.
    let script = write_script(
        temp_dir.path(),
        "invalid.lln",
        "!printf(\"a\", oops)\n!printf(\"b\", 2)\n",
    );

    let bridge = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(entries(&log), vec!["b=2"]);
}

#[test]
fn test_unknown_discriminant_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let script = write_script(temp_dir.path(), "abi.lln", "!printf(\"a\", 1)\n");

    let bridge = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine = FakeEngine::for_registry(bridge.registry()).with_tag_override(1, 42);
    let err = bridge.run(&mut engine, &script).unwrap_err();

    assert!(matches!(
        err,
        BridgeError::AbiMismatch(AbiError::UnknownDiscriminant { value: 42, .. })
    ));
    assert_eq!(err.class(), "ABIMismatchError");
    assert!(entries(&log).is_empty());
    assert_eq!(engine.teardowns, 1);
}

#[test]
fn test_stale_artifact_table_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let script = write_script(temp_dir.path(), "skew.lln", "!printf(\"a\", 1)\n");

    let bridge = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine =
        FakeEngine::with_table(&[("!printf".to_string(), vec![ArgType::Str, ArgType::Float])]);
    let err = bridge.run(&mut engine, &script).unwrap_err();

    assert!(matches!(err, BridgeError::AbiMismatch(AbiError::TableMismatch(_))));
    assert!(entries(&log).is_empty());
    assert_eq!(engine.records_served, 0);
}

#[test]
fn test_foreign_pointer_falls_back_to_name() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let mut builder = printf_registry(&log, &total);
    let other = Arc::clone(&log);
    builder
        .register("!mark", Vec::<ArgType>::new(), move |_: &CommandArgs| -> CommandResult {
            other.lock().unwrap().push("mark".to_string());
            Ok(())
        })
        .unwrap();
    let script = write_script(temp_dir.path(), "ptr.lln", "!mark()\n!printf(\"a\", 1)\n");

    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    // `!mark` arrives carrying `!printf`'s pointer, `!printf` an unknown one.
    let mut engine = FakeEngine::for_registry(bridge.registry())
        .with_pointer_override(1, fake_pointer(0))
        .with_pointer_override(2, 0xdead0 as *const std::os::raw::c_void);
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["mark", "a=1"]);
    assert_eq!(report.count("!mark"), 1);
}

#[test]
fn test_unreadable_script() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let bridge = new_bridge(
        printf_registry(&log, &total).build(),
        temp_dir.path(),
        DispatchOptions::default(),
    );
    let mut engine = FakeEngine::for_registry(bridge.registry());

    let err = bridge
        .run(&mut engine, &temp_dir.path().join("missing.lln"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::ScriptUnreadable { .. }));
    assert_eq!(engine.teardowns, 1);
}

// ==============================================================================
// Callback, Hook and Async Tests
// ==============================================================================

#[test]
fn test_callback_error_aborts_run() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let sink = Arc::clone(&log);

    let mut builder = RegistryBuilder::new();
    builder
        .register("!check", ["int"], move |args: &CommandArgs| -> CommandResult {
            let n = args.int(0)?;
            if n < 0 {
                return Err(CallbackError::new(format!("{} is negative", n)));
            }
            sink.lock().unwrap().push(n.to_string());
            Ok(())
        })
        .unwrap();
    let script = write_script(temp_dir.path(), "cb.lln", "!check(1)\n!check(-2)\n!check(3)\n");

    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let err = bridge.run(&mut engine, &script).unwrap_err();

    match err {
        BridgeError::Callback {
            command,
            location,
            source,
        } => {
            assert_eq!(command, "!check");
            assert_eq!(location.row, 2);
            assert_eq!(source.message(), "-2 is negative");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(entries(&log), vec!["1"]);
    assert_eq!(engine.teardowns, 1);
}

#[test]
fn test_panicking_callback_is_contained() {
    let temp_dir = TempDir::new().unwrap();
    let mut builder = RegistryBuilder::new();
    builder
        .register("!explode", Vec::<ArgType>::new(), |_: &CommandArgs| -> CommandResult {
            panic!("kaboom")
        })
        .unwrap();
    let script = write_script(temp_dir.path(), "panic.lln", "!explode()\n");

    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let err = bridge.run(&mut engine, &script).unwrap_err();

    assert_eq!(err.class(), "CallbackError");
    assert!(err.to_string().contains("panicked: kaboom"));
    assert_eq!(engine.teardowns, 1);
}

#[test]
fn test_hooks_wrap_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let mut builder = printf_registry(&log, &total);
    let start = Arc::clone(&log);
    let finish = Arc::clone(&log);
    builder
        .on_start(move || {
            start.lock().unwrap().push("start".to_string());
            Ok(())
        })
        .on_finish(move || {
            finish.lock().unwrap().push("finish".to_string());
            Ok(())
        });
    let script = write_script(temp_dir.path(), "hooks.lln", "!printf(\"a\", 1)\n");

    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["start", "a=1", "finish"]);
}

#[test]
fn test_failing_start_hook() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let total = Arc::new(Mutex::new(0));
    let mut builder = printf_registry(&log, &total);
    builder.on_start(|| Err(CallbackError::new("not ready")));
    let script = write_script(temp_dir.path(), "hooks.lln", "!printf(\"a\", 1)\n");

    let bridge = new_bridge(builder.build(), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let err = bridge.run(&mut engine, &script).unwrap_err();

    assert!(matches!(err, BridgeError::Hook { hook: "on_start", .. }));
    assert!(entries(&log).is_empty());
}

struct DelayedRecorder {
    log: Log,
}

#[async_trait]
impl AsyncCommandHandler for DelayedRecorder {
    async fn call(&self, args: &CommandArgs) -> CommandResult {
        let millis = args.float(0)?;
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
        self.log.lock().unwrap().push(format!("slept {}", millis));
        Ok(())
    }
}

fn async_registry(log: &Log) -> CommandRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register_async("!wait", ["float"], DelayedRecorder { log: Arc::clone(log) })
        .unwrap();
    let sync_log = Arc::clone(log);
    builder
        .register("!after", Vec::<ArgType>::new(), move |_: &CommandArgs| -> CommandResult {
            sync_log.lock().unwrap().push("after".to_string());
            Ok(())
        })
        .unwrap();
    builder.build()
}

#[test]
fn test_async_handler_completes_before_next_statement() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let script = write_script(temp_dir.path(), "async.lln", "!wait(5)\n!after()\n");

    let bridge = new_bridge(async_registry(&log), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    let report = bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["slept 5", "after"]);
    assert_eq!(report.invocations, 2);
}

#[tokio::test]
async fn test_async_handler_inside_running_runtime() {
    let temp_dir = TempDir::new().unwrap();
    let log = new_log();
    let script = write_script(temp_dir.path(), "async.lln", "!wait(1.5)\n!after()\n");

    let bridge = new_bridge(async_registry(&log), temp_dir.path(), DispatchOptions::default());
    let mut engine = FakeEngine::for_registry(bridge.registry());
    bridge.run(&mut engine, &script).unwrap();

    assert_eq!(entries(&log), vec!["slept 1.5", "after"]);
}

// ==============================================================================
// Build Cache Tests
// ==============================================================================

fn plain_registry(params: Vec<ArgType>) -> CommandRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register("!cmd", params, |_: &CommandArgs| -> CommandResult { Ok(()) })
        .unwrap();
    builder.build()
}

#[test]
fn test_identical_content_is_not_recompiled() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BuildCache::new(BuildLayout::new(temp_dir.path()), FakeCompiler::new());

    let first = cache.ensure(&plain_registry(vec![ArgType::Int])).unwrap();
    assert_eq!(first.outcome, BuildOutcome::Rebuilt);

    // A fresh but identical registry, as after a process restart.
    let second = cache.ensure(&plain_registry(vec![ArgType::Int])).unwrap();
    assert_eq!(second.outcome, BuildOutcome::Cached);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(cache.compiler().calls(), 1);

    let source = std::fs::read_to_string(cache.layout().source_path()).unwrap();
    assert!(source.contains("lln_host_cmd_0"));
    let marker = BuildManifest::from_file(&cache.layout().marker_path()).unwrap();
    assert_eq!(marker.fingerprint, first.fingerprint);
    assert_eq!(marker.command_count, 1);
    assert_eq!(marker.compiler, "fake-cc");
}

#[test]
fn test_changed_signature_is_recompiled() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BuildCache::new(BuildLayout::new(temp_dir.path()), FakeCompiler::new());

    let first = cache.ensure(&plain_registry(vec![ArgType::Int])).unwrap();
    let second = cache.ensure(&plain_registry(vec![ArgType::Float])).unwrap();

    assert_eq!(second.outcome, BuildOutcome::Rebuilt);
    assert_ne!(first.fingerprint, second.fingerprint);
    assert_eq!(cache.compiler().calls(), 2);
}

#[test]
fn test_changed_compiler_flags_are_recompiled() {
    let temp_dir = TempDir::new().unwrap();
    let layout = BuildLayout::new(temp_dir.path());
    let registry = plain_registry(vec![ArgType::Int]);

    let plain = BuildCache::new(layout.clone(), FakeCompiler::new());
    let first = plain.ensure(&registry).unwrap();

    let optimized = BuildCache::new(layout.clone(), FakeCompiler::new().with_flags(&["-O2"]));
    let second = optimized.ensure(&registry).unwrap();
    assert_eq!(second.outcome, BuildOutcome::Rebuilt);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(optimized.compiler().calls(), 1);
    assert_eq!(optimized.manifest().unwrap().compiler, "fake-cc -O2");

    assert_eq!(optimized.ensure(&registry).unwrap().outcome, BuildOutcome::Cached);
    assert_eq!(optimized.compiler().calls(), 1);

    assert_eq!(plain.ensure(&registry).unwrap().outcome, BuildOutcome::Rebuilt);
    assert_eq!(plain.compiler().calls(), 2);
}

#[test]
fn test_missing_artifact_or_corrupt_marker_rebuilds() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BuildCache::new(BuildLayout::new(temp_dir.path()), FakeCompiler::new());
    let registry = plain_registry(vec![ArgType::Str]);

    cache.ensure(&registry).unwrap();
    std::fs::remove_file(cache.layout().artifact_path()).unwrap();
    assert_eq!(cache.ensure(&registry).unwrap().outcome, BuildOutcome::Rebuilt);

    std::fs::write(cache.layout().marker_path(), "fingerprint = [not toml").unwrap();
    assert_eq!(cache.last_fingerprint(), None);
    assert_eq!(cache.ensure(&registry).unwrap().outcome, BuildOutcome::Rebuilt);

    assert_eq!(cache.compiler().calls(), 3);
}

#[test]
fn test_failed_compile_keeps_previous_state() {
    let temp_dir = TempDir::new().unwrap();
    let layout = BuildLayout::new(temp_dir.path().join("build"));

    let good = BuildCache::new(layout.clone(), FakeCompiler::new());
    let built = good.ensure(&plain_registry(vec![ArgType::Int])).unwrap();

    let bad = BuildCache::new(layout.clone(), FakeCompiler::failing());
    let err = bad.ensure(&plain_registry(vec![ArgType::Bool])).unwrap_err();
    match err {
        BridgeError::Build(BuildError::CompilerFailed { stderr, .. }) => {
            assert!(stderr.contains("error"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The marker still describes the artifact from the successful build.
    assert_eq!(bad.last_fingerprint(), Some(built.fingerprint));
    let names: Vec<String> = std::fs::read_dir(layout.dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 3, "unexpected files: {names:?}");
}

#[test]
fn test_compiler_without_output() {
    let temp_dir = TempDir::new().unwrap();
    let cache = BuildCache::new(BuildLayout::new(temp_dir.path()), FakeCompiler::silent());

    let err = cache.ensure(&plain_registry(vec![])).unwrap_err();
    assert!(matches!(err, BridgeError::Build(BuildError::MissingOutput(_))));
    assert!(!cache.layout().marker_path().exists());
    assert!(!cache.layout().artifact_path().exists());
}
