use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run_cli(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stepwise"))
        .args(args)
        .current_dir(cwd)
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env_remove("STEPWISE_MODEL")
        .env_remove("STEPWISE_REPO")
        .output()
        .expect("cli process should start")
}

#[test]
fn help_lists_the_main_flags() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["--help"], temp.path());

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("--repo"));
    assert!(stdout.contains("--mcp-server"));
    assert!(stdout.contains("--enable-context-refine"));
}

#[test]
fn missing_api_key_is_a_configuration_error() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["what is here?"], temp.path());

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY is not set"), "stderr:\n{stderr}");
}

#[test]
fn missing_repository_is_a_configuration_error() {
    let temp = TempDir::new().expect("tempdir should create");
    let missing = temp.path().join("nope");
    let output = run_cli(
        &[
            "--repo",
            missing.to_str().expect("path should be utf8"),
            "--api-key",
            "test-key",
            "goal",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("repository"), "stderr:\n{stderr}");
}

#[test]
fn unreachable_provider_fails_the_goal() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(
        &[
            "--api-key",
            "test-key",
            "--base-url",
            "http://127.0.0.1:9",
            "--request-timeout-secs",
            "5",
            "say hi",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr:\n{stderr}");
}

#[test]
fn list_tools_prints_listing_without_credentials() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["--list-tools"], temp.path());

    assert!(output.status.success(), "stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("\"inputSchema\""));
    assert!(stdout.contains("\"name\": \"finish_task\""));
}
