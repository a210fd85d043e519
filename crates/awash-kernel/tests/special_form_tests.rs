//! Special form behavior: control flow, scoping forms, module loading.

use std::sync::Arc;

use awash_kernel::eval::{
    Chan, EvalError, Evaler, Frame, Ns, NullStore, Port, PortFile, SrcKind, SrcMeta, UpView,
    Value, CHAN_BUF,
};
use awash_kernel::parser;

fn new_evaler() -> Arc<Evaler> {
    Arc::new(Evaler::new(Arc::new(NullStore), None))
}

fn evaler_with_lib(dir: &std::path::Path) -> Arc<Evaler> {
    Arc::new(Evaler::new(Arc::new(NullStore), Some(dir.to_path_buf())))
}

async fn eval_capture(
    ev: &Arc<Evaler>,
    src: &str,
) -> (Vec<Value>, Result<Vec<Value>, EvalError>) {
    let chan = Chan::bounded(CHAN_BUF);
    let drain = chan.clone();
    let closer = chan.clone();
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(v) = drain.recv().await {
            out.push(v);
        }
        out
    });
    let result = match parser::parse("test", src) {
        Ok(chunk) => {
            let out = Port {
                file: PortFile::None,
                chan,
                owns_file: false,
                owns_chan: true,
            };
            ev.eval_tree_with_out("test", src, &chunk, out).await
        }
        Err(e) => Err(EvalError::Compile(e)),
    };
    closer.close();
    let outputs = collector.await.expect("collector task failed");
    (outputs, result)
}

async fn outputs_of(src: &str) -> Vec<Value> {
    let ev = new_evaler();
    let (outputs, result) = eval_capture(&ev, src).await;
    result.expect("evaluation failed");
    outputs
}

async fn error_of(src: &str) -> EvalError {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, src).await;
    result.expect_err("expected an error")
}

// ── and / or ─────────────────────────────────────────────────────────

#[tokio::test]
async fn and_short_circuits_before_the_failing_capture() {
    // The capture would raise, but the $false stops evaluation first.
    let ev = new_evaler();
    let (outputs, result) = eval_capture(&ev, "and $true $false (fail nope)").await;
    result.expect("and must not raise");
    assert_eq!(outputs, vec![Value::Bool(false)]);
}

#[tokio::test]
async fn or_short_circuits_on_the_first_truthy_value() {
    let ev = new_evaler();
    let (outputs, result) = eval_capture(&ev, "or $false $true (fail nope)").await;
    result.expect("or must not raise");
    assert_eq!(outputs, vec![Value::Bool(true)]);
}

#[tokio::test]
async fn and_or_defaults_for_empty_argument_lists() {
    assert_eq!(outputs_of("and").await, vec![Value::Bool(true)]);
    assert_eq!(outputs_of("or").await, vec![Value::Bool(false)]);
}

#[tokio::test]
async fn and_yields_the_last_value_when_all_truthy() {
    assert_eq!(outputs_of("and a b c").await, vec![Value::str("c")]);
}

// ── if / while / for ─────────────────────────────────────────────────

#[tokio::test]
async fn if_takes_the_first_truthy_branch() {
    assert_eq!(
        outputs_of("if $false { put no } elif $true { put yes } else { put never }").await,
        vec![Value::str("yes")]
    );
    assert_eq!(
        outputs_of("if $false { put no } else { put fallback }").await,
        vec![Value::str("fallback")]
    );
}

#[tokio::test]
async fn if_requires_all_condition_values_truthy() {
    // A multi-valued condition is true only if every value is true.
    assert_eq!(
        outputs_of("if (put $true $false) { put yes } else { put no }").await,
        vec![Value::str("no")]
    );
}

#[tokio::test]
async fn while_loops_until_condition_falls() {
    assert_eq!(
        outputs_of("x = 0; while (== $x 0) { put tick; x = 1 }; put $x").await,
        vec![Value::str("tick"), Value::str("1")]
    );
}

#[tokio::test]
async fn while_break_exits_cleanly() {
    assert_eq!(
        outputs_of("while $true { put once; break }; put after").await,
        vec![Value::str("once"), Value::str("after")]
    );
}

#[tokio::test]
async fn for_iterates_in_order() {
    assert_eq!(
        outputs_of("for x [a b c] { put $x }").await,
        vec![Value::str("a"), Value::str("b"), Value::str("c")]
    );
}

#[tokio::test]
async fn for_continue_skips_and_break_stops() {
    assert_eq!(
        outputs_of("for x [a b c] { continue; put $x }").await,
        Vec::<Value>::new()
    );
    assert_eq!(
        outputs_of("for x [a b c] { put $x; break }").await,
        vec![Value::str("a")]
    );
}

#[tokio::test]
async fn for_else_runs_only_on_empty_iteration() {
    assert_eq!(
        outputs_of("for x [] { put item } else { put empty }").await,
        vec![Value::str("empty")]
    );
    assert_eq!(
        outputs_of("for x [a] { put $x } else { put empty }").await,
        vec![Value::str("a")]
    );
}

#[tokio::test]
async fn for_rejects_rest_pattern_targets() {
    let err = error_of("for @xs [a b] { put $xs }").await;
    match err {
        EvalError::Compile(list) => assert!(list.to_string().contains("rest not allowed")),
        other => panic!("expected compile error, got {other:?}"),
    }
}

// ── try ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn try_except_catches_and_binds() {
    assert_eq!(
        outputs_of("try { fail boom } except e { put caught }").await,
        vec![Value::str("caught")]
    );
    // The bound variable carries the failure.
    let outputs = outputs_of("try { fail boom } except e { put $e }").await;
    assert_eq!(outputs.len(), 1);
    assert!(matches!(
        &outputs[0],
        Value::Exitus(awash_kernel::Exitus::Failure(msg)) if msg == "boom"
    ));
}

#[tokio::test]
async fn try_else_runs_without_exception() {
    assert_eq!(
        outputs_of("try { put body } else { put else }").await,
        vec![Value::str("body"), Value::str("else")]
    );
}

#[tokio::test]
async fn try_finally_always_runs() {
    assert_eq!(
        outputs_of("try { put a } except e { put x } finally { put fin }").await,
        vec![Value::str("a"), Value::str("fin")]
    );

    // With no except clause the exception re-raises after finally.
    let ev = new_evaler();
    let (outputs, result) = eval_capture(&ev, "try { fail boom } finally { put fin }").await;
    assert_eq!(outputs, vec![Value::str("fin")]);
    match result {
        Err(EvalError::Exception(e)) => assert_eq!(e.to_string(), "boom"),
        other => panic!("expected the original exception, got {other:?}"),
    }
}

#[tokio::test]
async fn try_rethrows_exception_from_except_body() {
    let err = error_of("try { fail first } except e { fail second }").await;
    match err {
        EvalError::Exception(e) => assert_eq!(e.to_string(), "second"),
        other => panic!("expected exception, got {other:?}"),
    }
}

// ── del ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn del_removes_the_name_statically_and_dynamically() {
    // After del, a later get in the same chunk no longer compiles.
    let err = error_of("x = 1; del x; put $x").await;
    assert!(matches!(err, EvalError::Compile(_)));

    // Deleting leaves the namespace without the binding.
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "y = 1; del y").await;
    result.expect("evaluation failed");
    assert!(!ev.global().has("y"));
}

#[tokio::test]
async fn del_element_removes_map_keys_and_list_items() {
    assert_eq!(
        outputs_of("m = [&a=1 &b=2]; del m[a]; put (count $m)").await,
        vec![Value::str("1")]
    );
    assert_eq!(
        outputs_of("l = [a b c]; del l[0]; put $l[0]").await,
        vec![Value::str("b")]
    );
}

#[tokio::test]
async fn del_argument_validation() {
    for (src, msg) in [
        ("x = 1; del $x", "drop $"),
        ("x = [a]; del @x", "leading @"),
        ("del missing", "no variable $missing in local scope"),
        ("x = 1; del up:x", "only variables in local: or E:"),
    ] {
        let err = error_of(src).await;
        match err {
            EvalError::Compile(list) => {
                let shown = list.to_string();
                assert!(shown.contains(msg), "{src}: {shown}");
            }
            other => panic!("expected compile error for {src}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn del_env_unsets() {
    std::env::set_var("AWASH_DEL_TEST", "x");
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "del E:AWASH_DEL_TEST").await;
    result.expect("evaluation failed");
    assert!(std::env::var("AWASH_DEL_TEST").is_err());
}

// ── use / modules ────────────────────────────────────────────────────

#[tokio::test]
async fn use_loads_a_module_from_the_lib_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("m.elv"), "greeting = hello\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (outputs, result) = eval_capture(&ev, "use m; put $m:greeting").await;
    result.expect("evaluation failed");
    assert_eq!(outputs, vec![Value::str("hello")]);
}

#[tokio::test]
async fn module_functions_are_callable_through_the_namespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("m.elv"), "fn greet { put hi-from-m }\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (outputs, result) = eval_capture(&ev, "use m; m:greet").await;
    result.expect("evaluation failed");
    assert_eq!(outputs, vec![Value::str("hi-from-m")]);
}

#[tokio::test]
async fn modules_are_memoized_by_resolved_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("shared.elv"), "x = 1\n").expect("write");
    std::fs::write(dir.path().join("m1.elv"), "use shared\n").expect("write");
    std::fs::write(dir.path().join("m2.elv"), "use shared\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use m1; use m2").await;
    result.expect("evaluation failed");

    let first = ev.module("shared").expect("shared must be cached");
    let second = ev.module("shared").expect("shared must be cached");
    assert!(first.ptr_eq(&second));
}

#[tokio::test]
async fn mutual_module_imports_terminate() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.elv"), "use b\nfrom-a = 1\n").expect("write");
    std::fs::write(dir.path().join("b.elv"), "use a\nfrom-b = 2\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use a").await;
    result.expect("mutual imports must not recurse forever");
    assert!(ev.module("a").is_some());
    assert!(ev.module("b").is_some());
}

#[tokio::test]
async fn failing_module_bodies_are_evicted_from_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("broken.elv"), "fail nope\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use broken").await;
    assert!(result.is_err());
    assert!(ev.module("broken").is_none());
}

#[tokio::test]
async fn invalid_utf8_module_does_not_enter_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("bad.elv"), [0xff, 0xfe]).expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use bad").await;
    match result {
        Err(EvalError::Exception(e)) => {
            assert!(e.to_string().contains("not valid UTF-8"));
        }
        other => panic!("expected exception, got {other:?}"),
    }
    assert!(ev.module("bad").is_none());
}

#[tokio::test]
async fn relative_use_is_only_legal_from_modules() {
    let err = error_of("use ./mod").await;
    match err {
        EvalError::Exception(e) => {
            assert_eq!(e.to_string(), "Relative use not from module");
        }
        other => panic!("expected exception, got {other:?}"),
    }
}

#[tokio::test]
async fn relative_use_resolves_against_the_importing_module() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("pkg")).expect("mkdir");
    std::fs::write(dir.path().join("pkg/outer.elv"), "use ./inner\nx = 1\n").expect("write");
    std::fs::write(dir.path().join("pkg/inner.elv"), "y = 2\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use pkg/outer").await;
    result.expect("relative import must resolve");
    assert!(ev.module("pkg/inner").is_some());
}

#[tokio::test]
async fn relative_use_may_not_escape_the_lib_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("m.elv"), "use ../../escape\n").expect("write");
    let ev = evaler_with_lib(dir.path());
    let (_, result) = eval_capture(&ev, "use m").await;
    match result {
        Err(EvalError::Exception(e)) => {
            assert_eq!(e.to_string(), "Module outside library directory");
        }
        other => panic!("expected exception, got {other:?}"),
    }
}

#[tokio::test]
async fn bundled_modules_are_a_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ev = Arc::new(
        Evaler::new(Arc::new(NullStore), Some(dir.path().to_path_buf()))
            .with_bundled("builtinmod", "x = from-bundle\n"),
    );
    let (outputs, result) = eval_capture(&ev, "use builtinmod; put $builtinmod:x").await;
    result.expect("bundled module must load");
    assert_eq!(outputs, vec![Value::str("from-bundle")]);
}

#[tokio::test]
async fn use_arity_is_checked_at_compile_time() {
    for (src, msg) in [
        ("use", "lack module name"),
        ("use a b", "superfluous argument(s)"),
    ] {
        let err = error_of(src).await;
        match err {
            EvalError::Compile(list) => {
                assert!(list.to_string().contains(msg), "{src}");
            }
            other => panic!("expected compile error for {src}, got {other:?}"),
        }
    }
}

// ── frames ───────────────────────────────────────────────────────────

#[tokio::test]
async fn forked_frames_do_not_alias_local_bindings() {
    let ev = new_evaler();
    let frame = Frame {
        ev: ev.clone(),
        src: SrcMeta {
            name: "test".to_string(),
            text: Arc::from(""),
            kind: SrcKind::Top,
        },
        context: "top".to_string(),
        local: Ns::new(),
        up: UpView::new(),
        ports: Vec::new(),
        traceback: Vec::new(),
    };
    frame
        .local
        .set("kept", awash_kernel::eval::ptr_var(Value::str("1")));

    let forked = frame.fork("child");
    forked
        .local
        .set("added", awash_kernel::eval::ptr_var(Value::str("2")));
    forked.local.del("kept");

    assert!(frame.local.has("kept"));
    assert!(!frame.local.has("added"));
}

#[tokio::test]
async fn forked_ports_never_own_resources() {
    let ev = new_evaler();
    let frame = Frame {
        ev: ev.clone(),
        src: SrcMeta {
            name: "test".to_string(),
            text: Arc::from(""),
            kind: SrcKind::Top,
        },
        context: "top".to_string(),
        local: Ns::new(),
        up: UpView::new(),
        ports: vec![Port {
            file: PortFile::None,
            chan: Chan::bounded(1),
            owns_file: true,
            owns_chan: true,
        }],
        traceback: Vec::new(),
    };
    let forked = frame.fork("child");
    assert!(!forked.ports[0].owns_file);
    assert!(!forked.ports[0].owns_chan);

    // Closing the fork's ports must not close the parent's channel.
    forked.close_ports();
    assert!(frame.ports[0].chan.send(Value::str("live")).await);
}
