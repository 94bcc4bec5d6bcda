mod common;

use std::{fs, path::Path};

use common::{Output, capture};
use hyacinth::{
    HyacinthError, Interpreter, Literal, Runner, RunnerError, compiler, interpreter_with_runner,
    runner::{RunnerArena, ScriptRunner},
};
use pretty_assertions::assert_eq;
use tempfile::{TempDir, tempdir};

struct Host {
    interpreter: Interpreter,
    output: Output,
    dir: TempDir,
}

impl Host {
    fn new() -> Self {
        let dir = tempdir().expect("create temp dir");
        let mut interpreter = interpreter_with_runner();
        interpreter.mount("scripts", dir.path());
        let output = capture(&mut interpreter);
        Self {
            interpreter,
            output,
            dir,
        }
    }

    fn write(&self, name: &str, source: &str) {
        write_file(self.dir.path(), name, source.as_bytes());
    }

    fn eval(&mut self, source: &str) {
        if let Err(err) = self.interpreter.eval_source(source) {
            panic!("host script failed with {err}: {:?}", self.output.errors());
        }
    }

    /// Runs a host script that must halt and returns the first reported error.
    fn eval_error(&mut self, source: &str) -> String {
        match self.interpreter.eval_source(source) {
            Ok(()) => panic!("expected failure, printed {:?}", self.output.printed()),
            Err(err) => assert!(matches!(err, HyacinthError::Halted), "{err}"),
        }
        self.output.errors().first().cloned().unwrap_or_default()
    }
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).expect("write fixture");
}

#[test]
fn reads_a_global_of_an_executed_script() {
    let mut host = Host::new();
    host.write("child.hy", "var x = 42;");
    host.eval(
        r#"
        import runner;
        var r = loadScript("scripts:/child.hy");
        runScript(r);
        print getScriptVar(r, "x");
        print getScriptVar(r, "missing");
        "#,
    );
    assert_eq!(host.output.printed(), vec!["42", "null"]);
    assert_eq!(host.interpreter.global("x"), None);
}

#[test]
fn calls_a_function_of_an_executed_script() {
    let mut host = Host::new();
    host.write("math.hy", "fn add(a, b) { return a + b; }");
    host.eval(
        r#"
        import runner;
        var r = loadScript("scripts:/math.hy");
        runScript(r);
        var two = 2;
        print callScriptFn(r, "add", two, 3);
        var name = "add";
        print callScriptFn(r, name, "hya", "cinth");
        "#,
    );
    assert_eq!(host.output.printed(), vec!["5", "hyacinth"]);
}

#[test]
fn reset_then_run_reproduces_the_same_globals() {
    let mut host = Host::new();
    host.write(
        "counter.hy",
        r#"
        var counter = 1
        counter = counter + 1
        print "child ran"
        "#,
    );
    host.eval(
        r#"
        import runner
        var r = loadScript("scripts:/counter.hy")
        print checkScriptDirty(r)
        runScript(r)
        print checkScriptDirty(r)
        print getScriptVar(r, "counter")
        resetScript(r)
        print checkScriptDirty(r)
        runScript(r)
        print getScriptVar(r, "counter")
        "#,
    );
    assert_eq!(
        host.output.printed(),
        vec!["false", "child ran", "true", "2", "false", "child ran", "2"]
    );
}

#[test]
fn freed_runner_rejects_every_operation() {
    let mut host = Host::new();
    host.write("child.hy", "var x = 1;");
    host.eval(
        r#"
        import runner;
        var r = loadScript("scripts:/child.hy");
        runScript(r);
        freeScript(r);
        "#,
    );
    for call in [
        "runScript(r);",
        "getScriptVar(r, \"x\");",
        "callScriptFn(r, \"x\");",
        "resetScript(r);",
        "checkScriptDirty(r);",
        "freeScript(r);",
    ] {
        host.output.error.borrow_mut().clear();
        let message = host.eval_error(call);
        assert!(message.contains("stale"), "{call}: {message}");
    }
}

#[test]
fn lifecycle_violations_are_reported() {
    let mut host = Host::new();
    host.write("child.hy", "fn f() { return 1; }");
    host.eval(r#"import runner; var r = loadScript("scripts:/child.hy");"#);

    let message = host.eval_error(r#"getScriptVar(r, "f");"#);
    assert_eq!(
        message,
        "getScriptVar: can't access a variable from a non-dirty script (try running it first)"
    );
    host.output.error.borrow_mut().clear();
    let message = host.eval_error(r#"callScriptFn(r, "f");"#);
    assert_eq!(
        message,
        "callScriptFn: can't call a function from a non-dirty script (try running it first)"
    );
    host.output.error.borrow_mut().clear();
    let message = host.eval_error("resetScript(r);");
    assert_eq!(
        message,
        "resetScript: can't reset a non-dirty script (try running it first)"
    );

    host.eval("runScript(r);");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error("runScript(r);");
    assert_eq!(
        message,
        "runScript: can't re-run a dirty script (try resetting it first)"
    );
}

#[test]
fn argument_errors_are_reported() {
    let mut host = Host::new();
    host.eval("import runner;");
    let cases = [
        ("runScript();", "runScript: expected 1 argument(s), found 0"),
        ("runScript(nope);", "runScript: undeclared variable `nope`"),
        ("runScript(42);", "runScript: expected a script runner, found number"),
        ("loadScript(1);", "loadScript: expected a string, found number"),
        ("callScriptFn(1);", "callScriptFn: expected at least 2 arguments, found 1"),
        ("getScriptVar(1, 2, 3);", "getScriptVar: expected 2 argument(s), found 3"),
    ];
    for (call, expected) in cases {
        host.output.error.borrow_mut().clear();
        assert_eq!(host.eval_error(call), expected, "{call}");
    }
}

#[test]
fn unresolvable_paths_are_reported() {
    let mut host = Host::new();
    host.write("broken.hy", "var = ;");
    host.eval("import runner;");

    let message = host.eval_error(r#"loadScript("scripts:/../outside.hy");"#);
    assert!(message.contains("leaves its drive"), "{message}");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error(r#"loadScript("nowhere:/child.hy");"#);
    assert!(message.contains("unknown drive `nowhere`"), "{message}");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error(r#"loadScript("child.hy");"#);
    assert!(message.contains("malformed drive path"), "{message}");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error(r#"loadScript("scripts:/absent.hy");"#);
    assert!(message.starts_with("loadScript: can't read"), "{message}");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error(r#"loadScript("scripts:/broken.hy");"#);
    assert!(message.starts_with("loadScript: can't compile"), "{message}");
}

#[test]
fn nested_scripts_cannot_see_host_globals() {
    let mut host = Host::new();
    host.write("peek.hy", "print \"peeking\"; print secret;");
    host.eval(
        r#"
        import runner;
        var secret = "host only";
        var r = loadScript("scripts:/peek.hy");
        runScript(r);
        print checkScriptDirty(r);
        "#,
    );
    assert_eq!(host.output.printed(), vec!["peeking", "true"]);
    let errors = host.output.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("undeclared variable `secret`"), "{errors:?}");
}

#[test]
fn calling_a_non_function_is_reported() {
    let mut host = Host::new();
    host.write("child.hy", "var x = 1;");
    host.eval(r#"import runner; var r = loadScript("scripts:/child.hy"); runScript(r);"#);
    let message = host.eval_error(r#"print callScriptFn(r, "x");"#);
    assert_eq!(message, "callScriptFn: `x` is not a function");
    assert!(host.output.printed().is_empty());
}

#[test]
fn failing_nested_call_is_reported() {
    let mut host = Host::new();
    host.write("child.hy", "fn fail(n) { return n / 0; }");
    host.eval(r#"import runner; var r = loadScript("scripts:/child.hy"); runScript(r);"#);
    host.eval_error(r#"callScriptFn(r, "fail", 1);"#);
    let errors = host.output.errors();
    assert!(errors[0].contains("can't divide by zero"), "{errors:?}");
    assert_eq!(errors[1], "callScriptFn: call to `fail` failed");
}

#[test]
fn alias_import_builds_a_constant_dictionary() {
    let mut host = Host::new();
    host.write("child.hy", "var greeting = \"hello\";");
    host.eval(
        r#"
        import runner as rt;
        var r = rt.loadScript("scripts:/child.hy");
        rt.runScript(r);
        print rt["getScriptVar"](r, "greeting");
        "#,
    );
    assert_eq!(host.output.printed(), vec!["hello"]);
    assert_eq!(host.interpreter.global("loadScript"), None);

    let message = host.eval_error("rt = 1;");
    assert!(message.contains("can't assign to constant `rt`"), "{message}");
    host.output.error.borrow_mut().clear();
    let message = host.eval_error("import runner as rt;");
    assert!(message.contains("can't override an existing variable `rt`"), "{message}");
}

#[test]
fn importing_twice_into_one_scope_is_rejected() {
    let mut host = Host::new();
    let message = host.eval_error("import runner; import runner;");
    assert!(
        message.contains("can't override an existing variable `loadScript`"),
        "{message}"
    );
}

#[test]
fn loads_precompiled_bytecode() {
    let mut host = Host::new();
    let bytecode = compiler::compile("var answer = 6 * 7;").expect("compile child");
    write_file(host.dir.path(), "child.hyb", &bytecode);
    host.eval(
        r#"
        import runner;
        var r = loadScriptBytecode("scripts:/child.hyb");
        runScript(r);
        print getScriptVar(r, "answer");
        "#,
    );
    assert_eq!(host.output.printed(), vec!["42"]);
}

#[test]
fn rejects_bytecode_with_a_bad_header() {
    let mut host = Host::new();
    write_file(host.dir.path(), "junk.hyb", b"nope, not bytecode");
    host.eval("import runner;");
    let message = host.eval_error(r#"loadScriptBytecode("scripts:/junk.hyb");"#);
    assert!(message.starts_with("loadScriptBytecode: invalid bytecode"), "{message}");
    assert!(message.contains("missing `HYCB` header"), "{message}");
}

#[test]
fn handles_from_a_nested_interpreter_are_foreign() {
    let mut host = Host::new();
    host.write("leaf.hy", "var leaf = true;");
    host.write(
        "middle.hy",
        r#"import runner; var inner = loadScript("scripts:/leaf.hy");"#,
    );
    host.eval(
        r#"
        import runner;
        var r = loadScript("scripts:/middle.hy");
        runScript(r);
        var inner = getScriptVar(r, "inner");
        "#,
    );
    let message = host.eval_error("runScript(inner);");
    assert!(message.contains("another interpreter"), "{message}");
}

#[test]
fn nested_output_reaches_the_host_sinks() {
    let mut host = Host::new();
    host.write("child.hy", r#"print "from child"; assert false, "child assert";"#);
    host.eval(
        r#"
        import runner;
        var r = loadScript("scripts:/child.hy");
        runScript(r);
        print "from host";
        "#,
    );
    assert_eq!(host.output.printed(), vec!["from child", "from host"]);
    assert_eq!(host.output.asserts(), vec!["child assert"]);
}

#[test]
fn self_loading_script_stops_at_the_nesting_limit() {
    let mut host = Host::new();
    host.write(
        "rec.hy",
        r#"import runner; var r = loadScript("scripts:/rec.hy"); runScript(r);"#,
    );
    host.eval(r#"import runner; var r = loadScript("scripts:/rec.hy"); runScript(r);"#);
    assert_eq!(
        host.output.errors(),
        vec!["loadScript: runners are nested too deeply (limit 256)"]
    );
    assert_eq!(host.interpreter.depth(), 0);
}

#[test]
fn nested_interpreters_inherit_the_call_depth() {
    let host = Interpreter::new();
    let nested = Interpreter::nested(&host);
    assert_eq!(nested.depth(), 1);
    assert_eq!(Interpreter::nested(&nested).depth(), 2);
}

#[test]
fn typestate_lifecycle_through_the_api() {
    let host = Interpreter::new();
    let runner = Runner::from_source(&host, "var x = 1; fn twice(n) { return n * 2; }")
        .expect("compile");
    assert!(!runner.bytecode().is_empty());

    let mut executed = runner.run();
    assert_eq!(executed.variable("x"), Literal::Number(1.0));
    let doubled = executed
        .call("twice", vec![Literal::Number(21.0)].into())
        .expect("call twice");
    assert_eq!(doubled, Literal::Number(42.0));
    assert!(matches!(
        executed.call("x", Default::default()),
        Err(RunnerError::NotAFunction(name)) if name == "x"
    ));

    let reset = executed.reset();
    let executed = reset.run();
    assert_eq!(executed.variable("x"), Literal::Number(1.0));
    executed.free();
}

#[test]
fn bytecode_header_is_checked_through_the_api() {
    let host = Interpreter::new();
    assert!(Runner::from_bytecode(&host, b"HYCB".to_vec()).is_err());
    let bytecode = compiler::compile("var y = 2;").expect("compile");
    let runner = Runner::from_bytecode(&host, bytecode).expect("valid header");
    assert_eq!(runner.run().variable("y"), Literal::Number(2.0));
}

#[test]
fn arena_invalidates_handles_on_remove_and_clear() {
    let host = Interpreter::new();
    let loaded = |source: &str| {
        let bytecode = compiler::compile(source).expect("compile");
        ScriptRunner::Loaded(Runner::new(&host, bytecode))
    };
    let mut arena = RunnerArena::new();
    let first = arena.insert(loaded("var a = 1;"));
    assert_eq!(arena.len(), 1);
    assert!(!arena.get(first).expect("live handle").is_dirty());

    arena.remove(first).expect("remove").free();
    assert!(arena.is_empty());
    assert!(matches!(arena.get(first), Err(RunnerError::StaleHandle)));
    assert!(matches!(arena.remove(first), Err(RunnerError::StaleHandle)));

    let second = arena.insert(loaded("var b = 2;"));
    assert_eq!(second.index, first.index);
    assert_ne!(second.generation, first.generation);

    let other = RunnerArena::new();
    assert!(matches!(other.get(second), Err(RunnerError::StaleHandle)));

    arena.clear();
    assert!(arena.is_empty());
    assert!(matches!(arena.get_mut(second), Err(RunnerError::StaleHandle)));
}
