mod common;

use common::{Output, capture};
use hyacinth::{
    HyacinthError, Interpreter, Literal, LiteralArray, LiteralKind, NativeStatus,
    literal::TypeLiteral, scope::Scope,
};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> (Interpreter, Output) {
    let mut interpreter = Interpreter::new();
    let output = capture(&mut interpreter);
    if let Err(err) = interpreter.eval_source(source) {
        panic!("evaluation failed with {err}: {:?}", output.errors());
    }
    (interpreter, output)
}

fn eval_error(source: &str) -> Output {
    let mut interpreter = Interpreter::new();
    let output = capture(&mut interpreter);
    match interpreter.eval_source(source) {
        Ok(()) => panic!("expected an error, printed {:?}", output.printed()),
        Err(err) => assert!(matches!(err, HyacinthError::Halted), "{err}"),
    }
    output
}

fn printed(source: &str) -> Vec<String> {
    eval(source).1.printed()
}

fn first_error(output: &Output) -> String {
    output.errors().first().cloned().unwrap_or_default()
}

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(printed("print 2 + 2 * 10;"), vec!["22"]);
    assert_eq!(printed("print (2 + 2) * 10 % 7;"), vec!["5"]);
    assert_eq!(printed("print 7 / 2;"), vec!["3.5"]);
    assert_eq!(printed("print -3 + 1;"), vec!["-2"]);
}

#[test]
fn concatenates_and_compares_strings() {
    assert_eq!(
        printed(r#"print "hya" + "cinth"; print "a" < "b";"#),
        vec!["hyacinth", "true"]
    );
}

#[test]
fn globals_are_visible_after_run() {
    let (interpreter, _) = eval("var x = 40; x = x + 2;");
    assert_eq!(interpreter.global("x"), Some(Literal::Number(42.0)));
    assert_eq!(interpreter.global("missing"), None);
}

#[test]
fn while_loop_accumulates_sum() {
    let output = printed(
        r#"
        var sum = 0
        var i = 0
        while i < 5 {
            i = i + 1
            if i == 3 {
                continue
            }
            sum = sum + i
        }
        print sum
        "#,
    );
    assert_eq!(output, vec!["12"]);
}

#[test]
fn break_leaves_nested_scopes() {
    let output = printed(
        r#"
        var i = 0
        while true {
            var step = 1
            {
                var inner = step
                if i >= 2 {
                    break
                }
            }
            i = i + step
        }
        print i
        var step = "outer"
        print step
        "#,
    );
    assert_eq!(output, vec!["2", "outer"]);
}

#[test]
fn else_if_chains_pick_one_branch() {
    let output = printed(
        r#"
        fn classify(n) {
            if n < 0 {
                return "negative"
            } else if n == 0 {
                return "zero"
            } else {
                return "positive"
            }
        }
        print classify(-4)
        print classify(0)
        print classify(9)
        "#,
    );
    assert_eq!(output, vec!["negative", "zero", "positive"]);
}

#[test]
fn recursive_function_evaluates() {
    let output = printed(
        r#"
        fn fib(n) {
            if n <= 1 {
                return n
            }
            return fib(n - 1) + fib(n - 2)
        }

        print fib(10)
        "#,
    );
    assert_eq!(output, vec!["55"]);
}

#[test]
fn callers_observe_the_first_return_value() {
    assert_eq!(
        printed("fn pair() { return 1, 2; } print pair();"),
        vec!["1"]
    );
    assert_eq!(printed("fn nothing() { } print nothing();"), vec!["null"]);
}

#[test]
fn functions_see_their_declaring_scope() {
    let output = printed(
        r#"
        var base = 10
        fn offset(n) {
            fn inner(m) { return m + base; }
            return inner(n) * 2
        }
        base = 20
        print offset(1)
        "#,
    );
    assert_eq!(output, vec!["42"]);
}

#[test]
fn logical_operators_short_circuit() {
    let output = printed(
        r#"
        fn boom() { assert false, "evaluated"; }
        print false && boom()
        print true || boom()
        print 1 && "yes"
        print null || 0
        "#,
    );
    assert_eq!(output, vec!["false", "true", "true", "false"]);
}

#[test]
fn map_field_assignment_updates_value() {
    let output = printed(
        r#"
        var inventory = {
            "apples": 3,
            "bananas": 7
        }
        inventory.bananas = inventory.bananas + 5
        inventory["pears"] = 1
        print inventory.bananas
        print inventory["pears"]
        print inventory.missing
        "#,
    );
    assert_eq!(output, vec!["12", "1", "null"]);
}

#[test]
fn array_element_assignment_updates_value() {
    let (interpreter, output) = eval(
        r#"
        var numbers = [1, 2, 3]
        numbers[1] = numbers[1] + 5
        print numbers
        print "abc"[2]
        "#,
    );
    assert_eq!(output.printed(), vec!["[1, 7, 3]", "c"]);
    let expected: LiteralArray = vec![
        Literal::Number(1.0),
        Literal::Number(7.0),
        Literal::Number(3.0),
    ]
    .into();
    assert_eq!(interpreter.global("numbers"), Some(Literal::array(expected)));
}

#[test]
fn const_assignment_is_rejected() {
    let output = eval_error(
        r#"
        const answer = 42
        answer = 13
        "#,
    );
    let message = first_error(&output);
    assert!(message.contains("can't assign to constant `answer`"), "{message}");
}

#[test]
fn typed_variables_reject_other_kinds() {
    let output = eval_error(r#"var count: number = 1; count = "two";"#);
    let message = first_error(&output);
    assert!(message.contains("of type number"), "{message}");

    let (interpreter, _) = eval("var maybe: string = \"a\"; maybe = null;");
    assert_eq!(interpreter.global("maybe"), Some(Literal::Null));
}

#[test]
fn redeclaration_in_one_scope_is_rejected() {
    let output = eval_error("var a = 1; var a = 2;");
    assert!(first_error(&output).contains("can't redefine the variable `a`"));

    assert_eq!(printed("var a = 1; { var a = 2; print a; } print a;"), vec!["2", "1"]);
}

#[test]
fn undeclared_variable_is_reported() {
    let output = eval_error("print ghost;");
    assert!(first_error(&output).contains("undeclared variable `ghost`"));
}

#[test]
fn division_by_zero_is_reported() {
    let output = eval_error("print 1 / 0;");
    assert!(first_error(&output).contains("can't divide by zero"));
}

#[test]
fn wrong_arity_is_reported() {
    let output = eval_error("fn add(a, b) { return a + b; } add(1);");
    assert!(first_error(&output).contains("function expected 2 arguments but received 1"));
}

#[test]
fn calling_a_number_is_reported() {
    let output = eval_error("var n = 3; n();");
    assert!(first_error(&output).contains("can't call a number value"));
}

#[test]
fn failing_assert_goes_to_the_assert_sink() {
    let output = eval_error(r#"print "before"; assert 1 == 2, "numbers differ"; print "after";"#);
    assert_eq!(output.printed(), vec!["before"]);
    assert_eq!(output.asserts(), vec!["numbers differ"]);
    assert!(output.errors().is_empty());
}

#[test]
fn parse_errors_are_reported_as_diagnostics() {
    let output = eval_error("var = 3;");
    let message = first_error(&output);
    assert!(message.starts_with("Parser:"), "{message}");
}

#[test]
fn break_outside_loop_is_a_compile_error() {
    let output = eval_error("break;");
    let message = first_error(&output);
    assert!(message.starts_with("Compiler:"), "{message}");
    assert!(message.contains("outside of a loop"), "{message}");
}

#[test]
fn unknown_library_is_reported() {
    let output = eval_error("import missing;");
    assert!(first_error(&output).contains("unknown library `missing`"));
}

fn native_sum(interpreter: &mut Interpreter, arguments: &mut LiteralArray) -> NativeStatus {
    let mut total = 0.0;
    while !arguments.is_empty() {
        let argument = interpreter.resolve_identifier(arguments.pop());
        match argument.as_number() {
            Some(n) => total += n,
            None => {
                interpreter.report_error("sum: expected numbers");
                return NativeStatus::Failed;
            }
        }
    }
    interpreter.push(Literal::Number(total));
    NativeStatus::Returned
}

#[test]
fn injected_natives_resolve_their_arguments() {
    let mut interpreter = Interpreter::new();
    let output = capture(&mut interpreter);
    interpreter
        .inject_native_fn("sum", native_sum)
        .expect("inject native");
    interpreter
        .eval_source("var x = 4; print sum(1, x, 3);")
        .expect("script runs");
    assert_eq!(output.printed(), vec!["8"]);

    let err = interpreter.eval_source(r#"sum("a");"#).unwrap_err();
    assert!(matches!(err, HyacinthError::Halted));
    assert_eq!(output.errors(), vec!["sum: expected numbers"]);
}

#[test]
fn injecting_twice_is_rejected() {
    let mut interpreter = Interpreter::new();
    interpreter
        .inject_native_fn("sum", native_sum)
        .expect("first injection");
    let err = interpreter
        .inject_native_fn("sum", native_sum)
        .expect_err("second injection");
    assert!(err.message.contains("can't override an existing variable"));
}

#[test]
fn injected_natives_are_constant() {
    let mut interpreter = Interpreter::new();
    let output = capture(&mut interpreter);
    interpreter
        .inject_native_fn("sum", native_sum)
        .expect("inject native");
    assert!(interpreter.eval_source("sum = 1;").is_err());
    assert!(first_error(&output).contains("can't assign to constant `sum`"));
}

fn hook_answer(
    interpreter: &mut Interpreter,
    _identifier: &Literal,
    alias: &Literal,
) -> Result<(), hyacinth::Diagnostic> {
    let name = if alias.is_null() {
        Literal::identifier("answer")
    } else {
        alias.clone()
    };
    let ty = TypeLiteral::new(LiteralKind::Number).constant();
    Scope::declare(interpreter.scope(), &name, &ty);
    Scope::set(interpreter.scope(), &name, &Literal::Number(42.0), false)
}

#[test]
fn import_runs_registered_hooks() {
    let mut interpreter = Interpreter::new();
    let output = capture(&mut interpreter);
    interpreter.inject_native_hook("answers", hook_answer);
    interpreter
        .eval_source("import answers; import answers as other; print answer + other;")
        .expect("script runs");
    assert_eq!(output.printed(), vec!["84"]);
}

#[test]
fn call_literal_fn_returns_every_value() {
    let (mut interpreter, _) = eval("fn pair(a) { return a, a * 2; }");
    let pair = interpreter.global("pair").expect("pair declared");
    let values = interpreter
        .call_literal_fn(&pair, vec![Literal::Number(4.0)].into())
        .expect("call succeeds");
    assert_eq!(values.len(), 2);
    assert_eq!(values.get(1), Some(&Literal::Number(8.0)));
    assert_eq!(interpreter.stack_len(), 0);
}

#[test]
fn reset_discards_globals() {
    let (mut interpreter, output) = eval("var kept = 1;");
    interpreter.reset();
    assert_eq!(interpreter.global("kept"), None);
    interpreter
        .eval_source("var kept = 2; print kept;")
        .expect("redeclaration after reset");
    assert_eq!(output.printed(), vec!["2"]);
}

#[test]
fn recursion_below_the_call_limit_completes() {
    assert_eq!(
        printed("fn f(n) { if n == 0 { return 0; } return f(n - 1); } print f(200);"),
        vec!["0"]
    );
}

#[test]
fn runaway_recursion_reports_call_stack_overflow() {
    let output = eval_error("fn f(n) { return f(n + 1); } f(0);");
    let message = first_error(&output);
    assert!(message.contains("call stack overflow"), "{message}");
    assert!(message.contains("note: scripts may nest at most 256 calls"), "{message}");
    assert_eq!(output.errors().len(), 1);
}

#[test]
fn nan_dictionary_keys_are_a_runtime_error() {
    let source = r#"
        var huge = 1;
        var i = 0;
        while i < 400 { huge = huge * 10; i = i + 1; }
        var m = {};
        m[huge - huge] = 1;
    "#;
    let message = first_error(&eval_error(source));
    assert!(message.contains("dictionaries can't have NaN keys"), "{message}");

    let source = r#"
        var huge = 1;
        var i = 0;
        while i < 400 { huge = huge * 10; i = i + 1; }
        var m = {"k": 1};
        print m[huge - huge];
    "#;
    let message = first_error(&eval_error(source));
    assert!(message.contains("dictionaries can't have NaN keys"), "{message}");
}
