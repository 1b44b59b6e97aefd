use std::io::Write;
use std::process::{Command, Output};

fn monexpr(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_monexpr"))
        .args(args)
        .output()
        .expect("failed to execute process")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn evaluates_math_expression() {
    let output = monexpr(&["eval", "1 + 2 * 3", "--rules", "math"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "7");
}

#[test]
fn evaluates_trigger_with_macros_and_functionids() {
    let output = monexpr(&[
        "eval",
        "{1} > {$LIMIT}",
        "--rules",
        "trigger",
        "--macro",
        "{$LIMIT}=10K",
        "--functionid",
        "1=20000",
        "--postfix",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["{1} {$LIMIT} >", "1"]);
}

#[test]
fn reports_evaluation_failure() {
    let output = monexpr(&["eval", "1 / 0"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("division by zero"));
}

#[test]
fn check_prints_postfix_and_infix() {
    let output = monexpr(&["check", "(1 + 2) * 3"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("postfix: 1 2 + 3 *"));
    assert!(text.contains("infix: (1 + 2) * 3"));
}

#[test]
fn filter_reports_template_and_match() {
    let output = monexpr(&[
        "filter",
        r#"group = "Linux" and tag = "env:prod""#,
        "--group",
        "Linux",
        "--tag",
        "env:prod",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("template: {0} [\"Linux\"]"));
    assert!(text.contains("match: true"));

    let output = monexpr(&["filter", r#"group = "Linux""#, "--group", "Windows"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("match: false"));
}

fn batch_file(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn batch_prints_one_line_per_expression() {
    let file = batch_file(
        r#"
rules: trigger
timestamp: 1700000000
macros:
  - name: "{$LIMIT}"
    value: "10K"
functionids:
  - id: 1
    value: "5"
expressions:
  - name: cpu
    expression: "{1} > {$LIMIT}"
    expect: "0"
  - name: sum
    expression: "{1} + 1"
    expect: "6"
"#,
    );
    let output = monexpr(&["batch", file.path().to_str().unwrap()]);
    assert!(output.status.success());

    let text = stdout(&output);
    let outcomes: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["name"], "cpu");
    assert!(outcomes.iter().all(|o| o["passed"] == true));
}

#[test]
fn batch_fails_on_unmet_expectation() {
    let file = batch_file(
        r#"
rules: math
expressions:
  - name: wrong
    expression: "2 * 2"
    expect: "5"
"#,
    );
    let output = monexpr(&["batch", file.path().to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1 of 1 expressions"));
}
