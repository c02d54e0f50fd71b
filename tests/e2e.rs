use std::path::Path;
use std::process::Command;

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// Run the binary inside `dir` so no stray `stencil.toml` is picked up.
fn run_in(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_stencil"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to execute stencil");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_stencil(args: &[&str]) -> (String, String, bool) {
    let dir = tempfile::tempdir().unwrap();
    run_in(dir.path(), args)
}

fn assert_success(args: &[&str]) -> String {
    let (stdout, stderr, success) = run_stencil(args);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(args: &[&str]) -> String {
    let (_, stderr, success) = run_stencil(args);
    assert!(!success, "command should fail");
    stderr
}

fn render(bundle: &str, data: &str, strategy: &str) -> String {
    let bundle = fixture(bundle);
    let data = fixture(data);
    assert_success(&["render", &bundle, "--data", &data, "--strategy", strategy])
}

#[test]
fn test_render_greeting() {
    let stdout = render("greeting.json", "greeting_data.json", "lazy");
    assert_eq!(stdout, "<p class=\"greeting\">Hello, World!</p>\n");
}

#[test]
fn test_render_without_data() {
    let stdout = assert_success(&["render", &fixture("greeting.json")]);
    assert_eq!(stdout.trim(), r#"<p class="greeting">Hello, !</p>"#);
}

#[test]
fn test_render_list() {
    let stdout = render("list.json", "list_data.json", "lazy");
    assert_eq!(stdout.trim(), "<ul><li>0: a</li><li>1: b</li></ul>");
}

#[test]
fn test_render_components() {
    let stdout = render("components.json", "components_data.json", "lazy");
    assert_eq!(
        stdout.trim(),
        r#"<div class="card highlighted"><h2>Hello</h2>status: ok</div><span>new</span>"#
    );
}

#[test]
fn test_render_helpers() {
    let stdout = render("helpers.json", "helpers_data.json", "lazy");
    assert_eq!(
        stdout.trim(),
        r#"<section data-id="7">STENCIL vm | html [admin] (c) 2024</section>"#
    );
}

#[test]
fn test_strategies_agree() {
    for (bundle, data) in [
        ("greeting.json", "greeting_data.json"),
        ("list.json", "list_data.json"),
        ("components.json", "components_data.json"),
        ("helpers.json", "helpers_data.json"),
    ] {
        assert_eq!(
            render(bundle, data, "lazy"),
            render(bundle, data, "eager"),
            "{}",
            bundle
        );
    }
}

#[test]
fn test_unknown_helper() {
    let stderr = assert_failure(&["render", &fixture("unknown_helper.json")]);
    assert!(stderr.contains("compile error"), "stderr: {}", stderr);
    assert!(stderr.contains("unknown helper `missing`"), "stderr: {}", stderr);
}

#[test]
fn test_missing_bundle() {
    let stderr = assert_failure(&["render", "/nonexistent/bundle.json"]);
    assert!(stderr.contains("cannot read"), "stderr: {}", stderr);
}

#[test]
fn test_compile_summary() {
    let stdout = assert_success(&["compile", &fixture("list.json")]);
    assert!(stdout.contains("entry #0"), "stdout: {}", stdout);
    assert!(stdout.contains("1 blocks"), "stdout: {}", stdout);

    let stdout = assert_success(&["compile", &fixture("list.json"), "--strategy", "eager"]);
    assert!(stdout.contains("3 blocks"), "stdout: {}", stdout);
}

#[test]
fn test_dump_bytecode() {
    let stdout = assert_success(&["compile", &fixture("greeting.json"), "--dump-bytecode"]);
    assert!(stdout.contains("== Block #0"), "stdout: {}", stdout);
    assert!(stdout.contains("OpenElement"));
    assert!(stdout.contains("FlushElement"));
    assert!(stdout.contains("Return"));
    assert!(stdout.contains("== String Constants =="));
}

#[test]
fn test_compile_then_dump() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("list.stencil");
    let program = program.to_str().unwrap();

    let (_, stderr, success) = run_in(
        dir.path(),
        &[
            "compile",
            &fixture("list.json"),
            "--strategy",
            "eager",
            "-o",
            program,
        ],
    );
    assert!(success, "compile should succeed, stderr:\n{}", stderr);

    let (listing, stderr, success) = run_in(dir.path(), &["dump", program]);
    assert!(success, "dump should succeed, stderr:\n{}", stderr);

    let (expected, _, _) = run_in(
        dir.path(),
        &[
            "compile",
            &fixture("list.json"),
            "--strategy",
            "eager",
            "--dump-bytecode",
        ],
    );
    assert_eq!(listing, expected);
    assert!(listing.contains("== Block #1"));
    assert!(listing.contains("Iterate"));
}

#[test]
fn test_lazy_program_cannot_be_written() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("list.stencil");
    let (_, stderr, success) = run_in(
        dir.path(),
        &["compile", &fixture("list.json"), "-o", program.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("eager"), "stderr: {}", stderr);
    assert!(!program.exists());
}

#[test]
fn test_dump_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("garbage.stencil");
    std::fs::write(&program, b"not a program").unwrap();
    let (_, stderr, success) = run_in(dir.path(), &["dump", program.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("error:"), "stderr: {}", stderr);
}

#[test]
fn test_config_file_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("stencil.toml"),
        "[compiler]\nstrategy = \"eager\"\n",
    )
    .unwrap();

    // Eager is the only strategy that can write a program.
    let program = dir.path().join("list.stencil");
    let (_, stderr, success) = run_in(
        dir.path(),
        &["compile", &fixture("list.json"), "-o", program.to_str().unwrap()],
    );
    assert!(success, "compile should succeed, stderr:\n{}", stderr);
    assert!(program.exists());
}

#[test]
fn test_config_stack_limit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stencil.toml"), "[runtime]\nmax_stack = 1\n").unwrap();
    let (_, stderr, success) = run_in(
        dir.path(),
        &["render", &fixture("greeting.json"), "--data", &fixture("greeting_data.json")],
    );
    assert!(!success);
    assert!(stderr.contains("runtime error"), "stderr: {}", stderr);
    assert!(stderr.contains("stack overflow"), "stderr: {}", stderr);
}

#[test]
fn test_explicit_config_flag() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "[runtime]\nmax_stack = 1\n").unwrap();
    let (_, stderr, success) = run_stencil(&[
        "render",
        &fixture("greeting.json"),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(!success);
    assert!(stderr.contains("stack overflow"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stencil.toml"), "[runtime]\njit = true\n").unwrap();
    let (_, stderr, success) = run_in(dir.path(), &["render", &fixture("greeting.json")]);
    assert!(!success);
    assert!(stderr.contains("invalid config"), "stderr: {}", stderr);
}
