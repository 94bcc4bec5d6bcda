use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn hyacinth() -> Command {
    Command::cargo_bin("hyacinth").expect("binary exists")
}

#[test]
fn hyacinth_run_prints_output() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("hello.hy");
    fs::write(&script, r#"print "Hello from Hyacinth!";"#).expect("write script");

    hyacinth()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello from Hyacinth!"));
}

#[test]
fn hyacinth_run_mounts_the_script_directory() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("child.hy"), "var x = 42;").expect("write child");
    let script = dir.path().join("main.hy");
    fs::write(
        &script,
        r#"
        import runner;
        var r = loadScript("scripts:/child.hy");
        runScript(r);
        print getScriptVar(r, "x");
        freeScript(r);
        "#,
    )
    .expect("write script");

    hyacinth()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn hyacinth_run_accepts_extra_drives() {
    let scripts = tempdir().expect("create script dir");
    let library = tempdir().expect("create library dir");
    fs::write(
        library.path().join("lib.hy"),
        "fn greet(name) { return \"hi \" + name; }",
    )
    .expect("write library");
    let script = scripts.path().join("main.hy");
    fs::write(
        &script,
        r#"
        import runner as rt;
        var lib = rt.loadScript("lib:/lib.hy");
        rt.runScript(lib);
        print rt.callScriptFn(lib, "greet", "there");
        "#,
    )
    .expect("write script");

    let drive = format!("lib={}", library.path().display());
    hyacinth()
        .arg("run")
        .arg(&script)
        .arg("--drive")
        .arg(drive)
        .assert()
        .success()
        .stdout(predicate::str::contains("hi there"));
}

#[test]
fn hyacinth_run_reports_runtime_errors() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("broken.hy");
    fs::write(&script, "print missing;").expect("write script");

    hyacinth()
        .arg("run")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("undeclared variable `missing`"));
}

#[test]
fn hyacinth_rejects_malformed_drive_options() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("main.hy");
    fs::write(&script, "print 1;").expect("write script");

    hyacinth()
        .arg("run")
        .arg(&script)
        .arg("--drive")
        .arg("no-separator")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected NAME=PATH"));
}

#[test]
fn hyacinth_compile_then_exec() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("sum.hy");
    fs::write(&script, "var total = 0; var i = 1; while i <= 4 { total = total + i; i = i + 1; } print total;")
        .expect("write script");

    hyacinth().arg("compile").arg(&script).assert().success();
    let bytecode = dir.path().join("sum.hyb");
    assert!(bytecode.exists(), "compile should write sum.hyb");
    let bytes = fs::read(&bytecode).expect("read bytecode");
    assert!(bytes.starts_with(b"HYCB"), "bytecode should carry its header");

    hyacinth()
        .arg("exec")
        .arg(&bytecode)
        .assert()
        .success()
        .stdout(predicate::str::contains("10"));
}

#[test]
fn hyacinth_compile_reports_syntax_errors() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("bad.hy");
    fs::write(&script, "fn (").expect("write script");
    let output = dir.path().join("bad.hyb");

    hyacinth()
        .arg("compile")
        .arg(&script)
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Parser"));
    assert!(!output.exists());
}

#[test]
fn hyacinth_exec_rejects_foreign_files() {
    let dir = tempdir().expect("create temp dir");
    let bogus = dir.path().join("bogus.hyb");
    fs::write(&bogus, "print 1;").expect("write file");

    hyacinth()
        .arg("exec")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing `HYCB` header"));
}
