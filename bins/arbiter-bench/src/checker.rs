/// Structural Checker - External Toolchain Validation
///
/// **Core Responsibility:**
/// Run the configured language toolchain against candidate code and report
/// validity, errors, and warnings.
///
/// **Critical Properties:**
/// - Knows nothing about scoring rules
/// - Every invocation is bounded by a hard timeout
/// - A missing toolchain binary is a soft failure for the structural check
///   (code treated as valid, warning recorded) - grading must never block
///   on an absent tool
/// - The functional harness runner has no such escape hatch: a harness that
///   never ran is a failed harness
use crate::config::{ToolCommand, ToolchainConfig};
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one structural check invocation.
#[derive(Debug, Clone)]
pub struct SyntaxReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checker backed by the configured language toolchain.
pub struct ToolchainChecker {
    config: ToolchainConfig,
}

enum ToolOutcome {
    Finished { success: bool, output: String },
    TimedOut,
    ToolMissing(String),
    Failed(String),
}

impl ToolchainChecker {
    pub fn new(config: ToolchainConfig) -> Self {
        ToolchainChecker { config }
    }

    /// Run the structural check on `code`.
    ///
    /// Classifies toolchain output lines into errors and warnings. Timeout
    /// is reported as an error; a missing binary fails open with a warning.
    pub async fn check(&self, code: &str) -> SyntaxReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let outcome = self
            .run_tool(&self.config.check, code)
            .await;

        let is_valid = match outcome {
            ToolOutcome::Finished { success, output } => {
                for line in output.lines() {
                    let line = line.trim();
                    if line.starts_with("Error:")
                        || (line.to_lowercase().contains("error") && line.contains(':'))
                    {
                        errors.push(line.to_string());
                    } else if line.starts_with("Warning:") {
                        warnings.push(line.to_string());
                    }
                }
                success
            }
            ToolOutcome::TimedOut => {
                errors.push("Syntax check timed out".to_string());
                false
            }
            ToolOutcome::ToolMissing(cmd) => {
                warn!(command = %cmd, "Toolchain binary not found - skipping syntax validation");
                warnings.push(format!(
                    "'{}' command not found - skipping syntax validation",
                    cmd
                ));
                true
            }
            ToolOutcome::Failed(message) => {
                errors.push(format!("Syntax check failed: {}", message));
                false
            }
        };

        SyntaxReport {
            is_valid,
            errors,
            warnings,
        }
    }

    /// Run the functional harness: candidate code concatenated with the
    /// test harness, executed in isolation.
    ///
    /// Returns `(passed, combined_output)`.
    pub async fn run_harness(&self, code: &str, harness: &str) -> (bool, String) {
        let combined = format!("{}\n\n{}", code, harness);

        match self.run_tool(&self.config.test, &combined).await {
            ToolOutcome::Finished { success, output } => (success, output),
            ToolOutcome::TimedOut => (false, "Functional test timed out".to_string()),
            ToolOutcome::ToolMissing(cmd) => (
                false,
                format!("Functional test failed to run: '{}' command not found", cmd),
            ),
            ToolOutcome::Failed(message) => {
                (false, format!("Functional test failed to run: {}", message))
            }
        }
    }

    /// Write `code` to a temp file and run `tool` against it with a hard
    /// timeout. The child is killed if the timeout fires.
    async fn run_tool(&self, tool: &ToolCommand, code: &str) -> ToolOutcome {
        let mut file = match tempfile::Builder::new()
            .suffix(&format!(".{}", self.config.file_extension))
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => return ToolOutcome::Failed(e.to_string()),
        };
        if let Err(e) = file.write_all(code.as_bytes()) {
            return ToolOutcome::Failed(e.to_string());
        }

        debug!(
            command = %tool.command,
            timeout_secs = tool.timeout_secs,
            "Invoking toolchain"
        );

        let mut command = Command::new(&tool.command);
        command
            .args(&tool.args)
            .arg(file.path())
            .kill_on_drop(true);

        let result =
            tokio::time::timeout(Duration::from_secs(tool.timeout_secs), command.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                ToolOutcome::Finished {
                    success: output.status.success(),
                    output: combined,
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                ToolOutcome::ToolMissing(tool.command.clone())
            }
            Ok(Err(e)) => ToolOutcome::Failed(e.to_string()),
            // Dropping the output future kills the child via kill_on_drop
            Err(_) => ToolOutcome::TimedOut,
        }
    }
}

/// Heuristic structural lint, used when the external check is disabled.
///
/// Returns `[WARN]`-prefixed complaints; the scorer penalizes per complaint,
/// capped at half the maximum score.
pub fn lint_structure(code: &str) -> Vec<String> {
    let mut complaints = Vec::new();
    let mut open_braces: i64 = 0;
    let mut open_parens: i64 = 0;
    let mut open_brackets: i64 = 0;
    let mut in_string: Option<char> = None;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote || c == '\n' {
                in_string = None;
                if c == '\n' {
                    complaints.push("[WARN] Unterminated string literal".to_string());
                }
            }
            continue;
        }

        match c {
            '"' | '\'' => in_string = Some(c),
            '#' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '{' => open_braces += 1,
            '}' => open_braces -= 1,
            '(' => open_parens += 1,
            ')' => open_parens -= 1,
            '[' => open_brackets += 1,
            ']' => open_brackets -= 1,
            _ => {}
        }
    }

    if in_string.is_some() {
        complaints.push("[WARN] Unterminated string literal".to_string());
    }
    if open_braces != 0 {
        complaints.push(format!("[WARN] Unbalanced braces ({:+})", open_braces));
    }
    if open_parens != 0 {
        complaints.push(format!("[WARN] Unbalanced parentheses ({:+})", open_parens));
    }
    if open_brackets != 0 {
        complaints.push(format!("[WARN] Unbalanced brackets ({:+})", open_brackets));
    }

    complaints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;

    fn checker_with(command: &str, timeout_secs: u64) -> ToolchainChecker {
        let tool = ToolCommand {
            command: command.to_string(),
            args: Vec::new(),
            timeout_secs,
        };
        ToolchainChecker::new(ToolchainConfig {
            language: "testlang".to_string(),
            file_extension: "tl".to_string(),
            check: tool.clone(),
            test: tool,
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_passes_on_zero_exit() {
        let checker = checker_with("true", 5);
        let report = checker.check("anything").await;
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_fails_on_nonzero_exit() {
        let checker = checker_with("false", 5);
        let report = checker.check("anything").await;
        assert!(!report.is_valid);
    }

    #[tokio::test]
    async fn test_missing_tool_fails_open() {
        let checker = checker_with("arbiter-no-such-tool-3f9a", 5);
        let report = checker.check("anything").await;
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_harness() {
        let checker = checker_with("arbiter-no-such-tool-3f9a", 5);
        let (passed, output) = checker.run_harness("code", "harness").await;
        assert!(!passed);
        assert!(output.contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_reported_as_error() {
        // The temp file path lands in $0; the shell just sleeps
        let tool = ToolCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
            timeout_secs: 1,
        };
        let config = ToolchainConfig {
            language: "testlang".to_string(),
            file_extension: "tl".to_string(),
            check: tool.clone(),
            test: tool,
        };
        let checker = ToolchainChecker::new(config);
        let report = checker.check("anything").await;
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("timed out"));
    }

    #[test]
    fn test_lint_clean_code() {
        let code = "walker w {\n    print(\"ok\");\n}\n";
        assert!(lint_structure(code).is_empty());
    }

    #[test]
    fn test_lint_unbalanced_delimiters() {
        let code = "walker w {\n    print((1);\n";
        let complaints = lint_structure(code);
        assert_eq!(complaints.len(), 2);
        assert!(complaints.iter().any(|c| c.contains("braces")));
        assert!(complaints.iter().any(|c| c.contains("parentheses")));
    }

    #[test]
    fn test_lint_ignores_comments_and_strings() {
        let code = "# { [ (\nprint(\"{ not real\");\n";
        assert!(lint_structure(code).is_empty());
    }
}
