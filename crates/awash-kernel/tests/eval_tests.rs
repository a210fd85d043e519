//! End-to-end evaluator tests: the public `Evaler` API driven with
//! real source text, capturing the top-level output channel.

use std::sync::Arc;

use awash_kernel::eval::{
    has_failure, Chan, EvalError, Evaler, Exitus, NullStore, Port, PortFile, Value, CHAN_BUF,
};
use awash_kernel::parser;

fn new_evaler() -> Arc<Evaler> {
    Arc::new(Evaler::new(Arc::new(NullStore), None))
}

/// Evaluate a chunk with the output channel captured. Returns the
/// values that arrived on the channel and the evaluation result.
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
    // A compile error returns before the frame closes the port.
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

#[tokio::test]
async fn put_outputs_values() {
    assert_eq!(
        outputs_of("put hello world").await,
        vec![Value::str("hello"), Value::str("world")]
    );
}

#[tokio::test]
async fn capture_splices_arithmetic_output() {
    // put (+ 1 2) → one value, the string "3".
    assert_eq!(outputs_of("put (+ 1 2)").await, vec![Value::str("3")]);
}

#[tokio::test]
async fn fn_defines_a_callable_function() {
    assert_eq!(
        outputs_of("fn sq [x]{ * $x $x }; sq 4").await,
        vec![Value::str("16")]
    );
}

#[tokio::test]
async fn fn_converts_return_to_clean_exit() {
    assert_eq!(
        outputs_of("fn f { put before; return; put after }; f; put end").await,
        vec![Value::str("before"), Value::str("end")]
    );
}

#[tokio::test]
async fn functions_can_recurse_through_their_own_name() {
    let src = "fn f [n]{ if (== $n 0) { put done } else { f 0 } }; f 1";
    assert_eq!(outputs_of(src).await, vec![Value::str("done")]);
}

#[tokio::test]
async fn closures_see_value_mutation_through_shared_cells() {
    let src = "x = outer; fn show { put $x }; x = changed; show";
    assert_eq!(outputs_of(src).await, vec![Value::str("changed")]);
}

#[tokio::test]
async fn assignment_and_variable_reference() {
    assert_eq!(outputs_of("x = 5; put $x").await, vec![Value::str("5")]);
}

#[tokio::test]
async fn multi_assignment_with_rest() {
    let src = "a b @rest = 1 2 3 4; put $a $b (count $rest)";
    assert_eq!(
        outputs_of(src).await,
        vec![Value::str("1"), Value::str("2"), Value::str("2")]
    );
}

#[tokio::test]
async fn explode_splices_list_elements() {
    assert_eq!(
        outputs_of("lst = [a b c]; put $@lst").await,
        vec![Value::str("a"), Value::str("b"), Value::str("c")]
    );
}

#[tokio::test]
async fn indexing_lists_and_maps() {
    assert_eq!(
        outputs_of("l = [x y]; put $l[1]").await,
        vec![Value::str("y")]
    );
    assert_eq!(
        outputs_of("m = [&k=v]; put $m[k]").await,
        vec![Value::str("v")]
    );
}

#[tokio::test]
async fn compound_concatenation() {
    assert_eq!(
        outputs_of("a = foo; put prefix-$a").await,
        vec![Value::str("prefix-foo")]
    );
}

#[tokio::test]
async fn env_variables_round_trip() {
    let src = "E:AWASH_EVAL_TEST = hello; put $E:AWASH_EVAL_TEST";
    assert_eq!(outputs_of(src).await, vec![Value::str("hello")]);
    std::env::remove_var("AWASH_EVAL_TEST");
}

#[tokio::test]
async fn value_channel_pipeline() {
    assert_eq!(
        outputs_of("put a b | all").await,
        vec![Value::str("a"), Value::str("b")]
    );
}

#[tokio::test]
async fn byte_pipeline_through_external_command() {
    // echo writes bytes into the pipe; cat forwards them into the
    // capture, which splits lines back into values.
    assert_eq!(
        outputs_of("put (echo hi | /bin/cat)").await,
        vec![Value::str("hi")]
    );
}

#[tokio::test]
async fn external_exit_status_is_an_exitus_value() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "/bin/true").await;
    let values = result.expect("evaluation failed");
    assert_eq!(values, vec![Value::Exitus(Exitus::Ok)]);

    let (_, result) = eval_capture(&ev, "/bin/false").await;
    let values = result.expect("evaluation failed");
    assert!(has_failure(&values));
}

#[tokio::test]
async fn command_not_found_is_a_failure_not_an_exception() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "no-such-command-awash").await;
    let values = result.expect("evaluation failed");
    assert!(has_failure(&values));
}

#[tokio::test]
async fn chunk_yields_last_pipeline_values() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "put a; put b").await;
    // Both forms succeed; the chunk reports the last pipeline's exitus.
    assert_eq!(result.expect("evaluation failed"), vec![Value::Exitus(Exitus::Ok)]);
}

#[tokio::test]
async fn fail_raises_an_exception_with_a_traceback() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "fail boom").await;
    match result {
        Err(EvalError::Exception(e)) => {
            assert_eq!(e.to_string(), "boom");
            assert!(!e.traceback.is_empty());
        }
        other => panic!("expected exception, got {other:?}"),
    }
}

#[tokio::test]
async fn flow_escaping_to_top_level_is_an_error() {
    let ev = new_evaler();
    for (src, msg) in [
        ("return", "unexpected return"),
        ("break", "unexpected break"),
        ("continue", "unexpected continue"),
    ] {
        let (_, result) = eval_capture(&ev, src).await;
        match result {
            Err(EvalError::Exception(e)) => assert_eq!(e.to_string(), msg),
            other => panic!("expected exception for {src}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn unknown_variable_is_a_compile_error() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "put $nosuchvar").await;
    match result {
        Err(EvalError::Compile(list)) => {
            assert!(list.to_string().contains("variable $nosuchvar not found"));
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[tokio::test]
async fn multiple_compile_errors_report_together() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "put $missing1 $missing2").await;
    match result {
        Err(EvalError::Compile(list)) => assert_eq!(list.errors.len(), 2),
        other => panic!("expected compile errors, got {other:?}"),
    }
}

#[tokio::test]
async fn compile_errors_do_not_execute_anything() {
    // The first form would write into the global namespace, but the
    // second form fails to compile, so nothing runs.
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "x = 1\nput $undefined").await;
    assert!(matches!(result, Err(EvalError::Compile(_))));
    assert!(!ev.global().has("x"));
}

#[tokio::test]
async fn scope_purity_without_assignments() {
    let ev = new_evaler();
    let before = ev.global().names();
    let (_, result) = eval_capture(&ev, "put hello; put (+ 1 2)").await;
    result.expect("evaluation failed");
    assert_eq!(ev.global().names(), before);
}

#[tokio::test]
async fn top_level_assignments_mutate_the_global() {
    let ev = new_evaler();
    let (_, result) = eval_capture(&ev, "x = 5").await;
    result.expect("evaluation failed");
    assert!(ev.global().has("x"));
    let var = ev.global().get("x").expect("x must exist");
    assert_eq!(var.get().expect("get failed"), Value::str("5"));
}

#[tokio::test]
async fn invalid_utf8_script_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.elv");
    std::fs::write(&path, [0xff, 0xfe, 0x00]).expect("write");
    let ev = new_evaler();
    let err = ev.eval_source(&path).await.expect_err("must fail");
    let msg = err.to_string();
    assert!(msg.contains("bad.elv"));
    assert!(msg.contains("not valid UTF-8"));
}
