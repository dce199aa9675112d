//! Integration tests for the `quill enrich` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const PAPERS: &str = "\
Title,Abstract,Year
Enzyme kinetics,We measure turnover rates of three enzymes.,2001
Untitled,,2002
Soil microbes,A survey of nitrogen fixing bacteria.,2003
";

/// Command isolated from the developer's settings and credentials.
fn quill(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("quill").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("QUILL_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("QUILL_BASE_URL")
        .env_remove("QUILL_MODEL")
        .env_remove("QUILL_STRICT_PROMPTS")
        .env_remove("RUST_LOG");
    cmd
}

fn write_input(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("papers.csv");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_enrich_mock_writes_result_column_and_summary() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--concurrency", "2"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("quill enrich"))
        .stdout(predicate::str::contains("(3 rows)"))
        .stdout(predicate::str::contains("Wrote"));

    let written = std::fs::read_to_string(&output).unwrap();
    let first_line = written.lines().next().unwrap();
    assert_eq!(first_line, "Title,Abstract,Year,AI Result (gpt-4o-mini)");
    assert!(written.contains("SKIPPED: empty input"));
    assert!(written.contains("Success,2"));
    assert!(written.contains("Skipped,1"));
    assert!(written.contains("Failed,0"));
    assert!(written.contains("Errored,0"));
    assert!(written.contains("Model,gpt-4o-mini"));
}

#[test]
fn test_enrich_mock_json_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let output = temp_dir.path().join("out.csv");
    let json = temp_dir.path().join("out.json");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--model", "offline-model"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--json")
        .arg(&json)
        .assert()
        .success();

    let artifact: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(artifact["headers"][3], "AI Result (offline-model)");
    assert_eq!(artifact["rows"].as_array().unwrap().len(), 3);
    assert_eq!(artifact["summary"]["model"], "offline-model");
    assert_eq!(artifact["statuses"][1], "skipped");
}

#[test]
fn test_enrich_literal_prompt_with_mock() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--prompt", "Classify {{title}} from {{year}}"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("Classify Enzyme kinetics from 2001"));
}

#[test]
fn test_enrich_without_api_key_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--no-progress"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key configured"));

    assert!(!output.exists());
}

#[test]
fn test_enrich_missing_input_fails() {
    let temp_dir = TempDir::new().unwrap();

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--input", "missing.csv", "--output", "out.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read input file"));
}

#[test]
fn test_enrich_missing_required_column_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), "Title,Year\nA,2001\n");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--output", "out.csv"])
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("abstract"));
}

#[test]
fn test_enrich_unknown_prompt_id_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--prompt-id", "nope", "--output", "out.csv"])
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown prompt id 'nope'"));
}

#[test]
fn test_enrich_stored_prompt_from_directory() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let prompts = temp_dir.path().join("prompts");
    std::fs::create_dir(&prompts).unwrap();
    std::fs::write(prompts.join("keywords.md"), "Keywords for {{title}}").unwrap();
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--prompt-id", "keywords"])
        .arg("--prompts-dir")
        .arg(&prompts)
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 1 stored prompts"));

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("Keywords for Soil microbes"));
}

#[test]
fn test_enrich_against_http_endpoint() {
    let mut server = mockito::Server::new();
    let body = serde_json::json!({
        "id": "chatcmpl-cli",
        "model": "cli-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "{\"topic\":\"biology\"}"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
    })
    .to_string();
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-cli-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(2)
        .create();

    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .env("QUILL_API_KEY", "sk-cli-test")
        .env("QUILL_BASE_URL", server.url())
        .env("QUILL_MODEL", "cli-model")
        .args(["enrich", "--no-progress"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Requests:      2"))
        .stdout(predicate::str::contains("Tokens:        28 (20 prompt, 8 completion)"));

    mock.assert();
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("AI Result (cli-model)"));
    assert!(written.contains("biology"));
    assert!(written.contains("Success,2"));
}

#[test]
fn test_enrich_respects_local_settings_file() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), "Name,Summary\nA,Some text\nB,More text\n");
    std::fs::write(
        temp_dir.path().join(".quillrc"),
        "[fields]\nprimary = \"Summary\"\nsecondary = \"Name\"\n\n[api]\nmodel = \"local-model\"\n",
    )
    .unwrap();
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("Name,Summary,AI Result (local-model)"));
    assert!(written.contains("Success,2"));
}

#[test]
fn test_enrich_strict_prompts_mark_rows_errored() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_input(temp_dir.path(), PAPERS);
    std::fs::write(temp_dir.path().join(".quillrc"), "[prompts]\nstrict = true\n").unwrap();
    let output = temp_dir.path().join("out.csv");

    quill(&temp_dir)
        .args(["enrich", "--mock", "--no-progress", "--prompt", "Classify {{abstract}} for {{journal}}"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Requests:      0"));

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("ERROR: Prompt rendering failed: missing placeholder value: journal"));
    assert!(written.contains("Errored,2"));
    assert!(written.contains("Skipped,1"));
    assert!(written.contains("Success,0"));
}
