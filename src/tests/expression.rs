use crate::expression::{ExpressionInner, IoValue, ProgramName, StdioStream};
use crate::Expression;

#[test]
fn cmd_builds_a_bare_name_leaf_with_no_args() {
    let expr = Expression::cmd("echo");
    match &*expr.0 {
        ExpressionInner::Cmd { program, args } => {
            assert!(matches!(program, ProgramName::Name(n) if n == "echo"));
            assert!(args.is_empty());
        }
        _ => panic!("expected a Cmd node"),
    }
}

#[test]
fn cmd_path_is_distinguished_from_cmd() {
    let expr = Expression::cmd_path("./build.sh");
    match &*expr.0 {
        ExpressionInner::Cmd { program, .. } => {
            assert!(matches!(program, ProgramName::Path(_)));
        }
        _ => panic!("expected a Cmd node"),
    }
}

#[test]
fn arg_and_args_append_in_order() {
    let expr = Expression::cmd("sh").arg("-c").args(["echo hi", "ignored"]);
    match &*expr.0 {
        ExpressionInner::Cmd { args, .. } => {
            let rendered: Vec<_> = args.iter().map(|a| a.to_string_lossy()).collect();
            assert_eq!(rendered, vec!["-c", "echo hi", "ignored"]);
        }
        _ => panic!("expected a Cmd node"),
    }
}

#[test]
#[should_panic(expected = "Cmd expression")]
fn arg_panics_on_a_non_cmd_expression() {
    let _ = Expression::cmd("echo").pipe(Expression::cmd("cat")).arg("oops");
}

#[test]
fn pipe_and_bitor_build_the_same_tree_shape() {
    let via_method = Expression::cmd("a").pipe(Expression::cmd("b"));
    let via_operator = Expression::cmd("a") | Expression::cmd("b");
    assert!(matches!(&*via_method.0, ExpressionInner::Pipe(_, _)));
    assert!(matches!(&*via_operator.0, ExpressionInner::Pipe(_, _)));
}

#[test]
fn stdout_capture_sets_the_right_stream_and_value() {
    let expr = Expression::cmd("echo").stdout_capture();
    match &*expr.0 {
        ExpressionInner::IoRedir { stream, value, .. } => {
            assert_eq!(*stream, StdioStream::Stdout);
            assert!(matches!(value, IoValue::Capture));
        }
        _ => panic!("expected an IoRedir node"),
    }
}

#[test]
fn unchecked_wraps_without_disturbing_the_inner_tree() {
    let inner = Expression::cmd("false");
    let expr = inner.clone().unchecked();
    match &*expr.0 {
        ExpressionInner::Unchecked(wrapped) => {
            assert!(matches!(&*wrapped.0, ExpressionInner::Cmd { .. }));
        }
        _ => panic!("expected an Unchecked node"),
    }
}

#[test]
fn cloning_an_expression_is_cheap_and_shares_the_tree() {
    let expr = Expression::cmd("echo").arg("shared");
    let clone = expr.clone();
    assert!(std::sync::Arc::ptr_eq(&expr.0, &clone.0));
}
