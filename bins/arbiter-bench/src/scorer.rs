/// Scorer - Rubric Scoring Logic
///
/// **Core Responsibility:**
/// Grade one (test case, code) pair into an `EvaluationResult` with a full
/// penalty breakdown.
///
/// **Scoring Rules (applied in this fixed order):**
/// 1. Required elements: partial credit, `found/total * points`
/// 2. Forbidden elements: capped penalty, `found/total * points * 0.4`
/// 3. Structural check: flat 50% penalty when the toolchain rejects the
///    code; heuristic per-complaint penalty when the check is disabled
/// 4. Functional harness (functional tests only): all-or-nothing gate -
///    a failing harness wipes the remaining score
///
/// Deterministic given identical inputs; the only external influence is
/// the toolchain's availability, which is recorded in the result.
use crate::checker::{lint_structure, ToolchainChecker};
use arbiter_common::types::{round2, EvaluationResult, PenaltyBreakdown, TestCase};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Strict element match: token-boundary aware, not naive substring.
///
/// `walk` must not match inside `walker`, and whitespace between tokens is
/// flexible. Elements that neither start nor end with identifier
/// characters fall back to literal matching.
pub fn contains_element_strict(code: &str, element: &str) -> bool {
    let trimmed = element.trim();
    if trimmed.is_empty() {
        return true;
    }

    let starts_word = trimmed
        .chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);
    let ends_word = trimmed
        .chars()
        .last()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);

    let mut pattern = String::new();
    if starts_word {
        pattern.push_str(r"\b");
    }
    let parts: Vec<String> = trimmed.split_whitespace().map(regex::escape).collect();
    pattern.push_str(&parts.join(r"\s+"));
    if ends_word {
        pattern.push_str(r"\b");
    }

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(code),
        Err(_) => code.contains(trimmed),
    }
}

/// Scores candidate code against the rubric.
pub struct Scorer {
    checker: Arc<ToolchainChecker>,
    /// When false, the external structural check is skipped and a heuristic
    /// lint penalty applies instead.
    structural_check: bool,
}

impl Scorer {
    pub fn new(checker: Arc<ToolchainChecker>, structural_check: bool) -> Self {
        Scorer {
            checker,
            structural_check,
        }
    }

    /// Grade `code` against `test`.
    pub async fn score(&self, test: &TestCase, code: &str) -> EvaluationResult {
        let max_score = test.points;
        let mut passed_checks = Vec::new();
        let mut failed_checks = Vec::new();
        let mut penalties = PenaltyBreakdown::default();

        // Step 1: required elements, strict matching with partial credit
        let mut required_found = 0usize;
        for element in &test.required_elements {
            if contains_element_strict(code, element) {
                required_found += 1;
                passed_checks.push(format!("[PASS] Found required element: '{}'", element));
            } else {
                failed_checks.push(format!("[FAIL] Missing required element: '{}'", element));
            }
        }

        // Step 2: forbidden elements, plain substring presence
        let mut forbidden_found = 0usize;
        for element in &test.forbidden_elements {
            if code.contains(element.as_str()) {
                forbidden_found += 1;
                failed_checks.push(format!("[FAIL] Contains forbidden element: '{}'", element));
            } else {
                passed_checks.push(format!("[PASS] Correctly avoided: '{}'", element));
            }
        }

        let total_required = test.required_elements.len();
        let total_forbidden = test.forbidden_elements.len();

        let required_score = if total_required > 0 {
            let earned = (required_found as f64 / total_required as f64) * max_score;
            penalties.required = max_score - earned;
            earned
        } else {
            max_score
        };

        if total_forbidden > 0 {
            penalties.forbidden =
                (forbidden_found as f64 / total_forbidden as f64) * (max_score * 0.4);
        }

        let mut score = (required_score - penalties.forbidden).max(0.0);

        // Step 3: structural validity
        let syntax_feedback = lint_structure(code);
        let mut syntax_errors = 0u32;
        let mut check_valid = true;
        let mut check_errors = Vec::new();
        let mut check_warnings = Vec::new();

        if self.structural_check {
            let report = self.checker.check(code).await;
            check_valid = report.is_valid;
            check_errors = report.errors;
            check_warnings = report.warnings;
            if !check_valid {
                penalties.structural_check = max_score * 0.50;
                score = (score - penalties.structural_check).max(0.0);
                failed_checks.push(format!(
                    "[FAIL] Structural check failed: {} errors",
                    check_errors.len()
                ));
            } else {
                passed_checks.push("[PASS] Structural check passed".to_string());
            }
        } else {
            syntax_errors = syntax_feedback
                .iter()
                .filter(|c| c.starts_with("[WARN]"))
                .count() as u32;
            penalties.syntax =
                (syntax_errors as f64 * 0.10 * max_score).min(max_score * 0.50);
            score = (score - penalties.syntax).max(0.0);
        }

        // Step 4: functional gate. Runs only when the structural check
        // passed (or was skipped); failure wipes the remaining score, and a
        // functional test that does not even parse is wiped as well.
        if let Some(harness) = test.harness() {
            if check_valid {
                let (func_passed, func_output) = self.checker.run_harness(code, harness).await;
                if func_passed {
                    passed_checks.push("[PASS] Functional tests passed".to_string());
                } else {
                    penalties.functional = score;
                    score = 0.0;
                    failed_checks.push(format!(
                        "[FAIL] Functional tests failed:\n{}...",
                        truncate(&func_output, 500)
                    ));
                }
            } else {
                penalties.functional = score;
                score = 0.0;
                failed_checks.push(
                    "[FAIL] Functional tests skipped due to failed structural check".to_string(),
                );
            }
        }

        let percentage = if max_score > 0.0 {
            round2(score / max_score * 100.0)
        } else {
            0.0
        };

        debug!(
            test_id = %test.id,
            score = round2(score),
            max_score,
            required_found,
            forbidden_found,
            check_valid,
            "Scored test case"
        );

        EvaluationResult {
            test_id: test.id.clone(),
            category: test.category.clone(),
            level: test.level,
            score: round2(score),
            max_score,
            score_breakdown: penalties,
            percentage,
            required_found: format!("{}/{}", required_found, total_required),
            forbidden_found: forbidden_found as u32,
            passed_checks,
            failed_checks,
            syntax_feedback,
            syntax_errors,
            check_valid,
            check_errors,
            check_warnings,
            code: code.to_string(),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ToolCommand, ToolchainConfig};
    use arbiter_common::types::TestKind;

    fn missing_toolchain() -> Arc<ToolchainChecker> {
        let tool = ToolCommand {
            command: "arbiter-no-such-tool-3f9a".to_string(),
            args: Vec::new(),
            timeout_secs: 5,
        };
        Arc::new(ToolchainChecker::new(ToolchainConfig {
            language: "testlang".to_string(),
            file_extension: "tl".to_string(),
            check: tool.clone(),
            test: tool,
        }))
    }

    fn make_test(points: f64, required: &[&str], forbidden: &[&str]) -> TestCase {
        TestCase {
            id: "t1".to_string(),
            level: 1,
            category: "basics".to_string(),
            task: "write a walker".to_string(),
            points,
            required_elements: required.iter().map(|s| s.to_string()).collect(),
            forbidden_elements: forbidden.iter().map(|s| s.to_string()).collect(),
            hints: Vec::new(),
            kind: TestKind::Generate,
        }
    }

    #[test]
    fn test_strict_match_rejects_partial_identifiers() {
        assert!(contains_element_strict("walker greet {}", "walker"));
        assert!(!contains_element_strict("walker greet {}", "walk"));
        assert!(!contains_element_strict("skywalker", "walker"));
    }

    #[test]
    fn test_strict_match_flexible_whitespace() {
        assert!(contains_element_strict("walker  greet", "walker greet"));
        assert!(contains_element_strict("with entry {", "with entry {"));
    }

    #[test]
    fn test_strict_match_punctuation_literal() {
        assert!(contains_element_strict("a ::> b", "::>"));
        assert!(!contains_element_strict("a :> b", "::>"));
    }

    #[tokio::test]
    async fn test_full_marks_with_all_elements() {
        // Structural check fails open (tool missing), so a response with
        // every required element and no forbidden ones scores max.
        let scorer = Scorer::new(missing_toolchain(), true);
        let test = make_test(10.0, &["walker", "entry"], &["import"]);
        let result = scorer.score(&test, "walker w { with entry { } }").await;

        assert_eq!(result.score, 10.0);
        assert_eq!(result.percentage, 100.0);
        assert_eq!(result.required_found, "2/2");
        assert_eq!(result.score_breakdown, PenaltyBreakdown::default());
        assert!(result.check_valid);
    }

    #[tokio::test]
    async fn test_half_required_elements_halves_score() {
        let scorer = Scorer::new(missing_toolchain(), false);
        let test = make_test(10.0, &["walker", "entry"], &[]);
        let result = scorer.score(&test, "walker w {}").await;

        assert_eq!(result.score, 5.0);
        assert_eq!(result.score_breakdown.required, 5.0);
        assert_eq!(result.required_found, "1/2");
    }

    #[tokio::test]
    async fn test_forbidden_penalty_capped_at_40_percent() {
        let scorer = Scorer::new(missing_toolchain(), false);
        let test = make_test(10.0, &["walker"], &["eval", "exec"]);
        let result = scorer.score(&test, "walker w { eval; exec; }").await;

        // Full required credit minus the full forbidden cap
        assert_eq!(result.score_breakdown.forbidden, 4.0);
        assert_eq!(result.score, 6.0);
        assert_eq!(result.forbidden_found, 2);
    }

    #[tokio::test]
    async fn test_score_never_negative() {
        let scorer = Scorer::new(missing_toolchain(), false);
        let test = make_test(10.0, &["missing_a", "missing_b"], &["bad"]);
        let result = scorer.score(&test, "bad { { {").await;

        assert_eq!(result.score, 0.0);
        assert!(result.score >= 0.0 && result.score <= result.max_score);
    }

    #[tokio::test]
    async fn test_heuristic_syntax_penalty_when_check_disabled() {
        let scorer = Scorer::new(missing_toolchain(), false);
        let test = make_test(10.0, &["walker"], &[]);
        // One unbalanced brace complaint -> 10% of max
        let result = scorer.score(&test, "walker w {").await;

        assert_eq!(result.syntax_errors, 1);
        assert_eq!(result.score_breakdown.syntax, 1.0);
        assert_eq!(result.score, 9.0);
    }

    #[tokio::test]
    async fn test_functional_failure_wipes_score() {
        // Toolchain is missing: structural check passes open, but the
        // harness runner cannot fail open, so the functional gate zeroes
        // the score despite every required element being present.
        let scorer = Scorer::new(missing_toolchain(), true);
        let mut test = make_test(15.0, &["add"], &[]);
        test.kind = TestKind::Functional {
            test_harness: "test add { assert add(1, 2) == 3; }".to_string(),
        };
        let result = scorer.score(&test, "def add(a, b) { return a + b; }").await;

        assert_eq!(result.score, 0.0);
        assert_eq!(result.score_breakdown.functional, 15.0);
        assert_eq!(result.percentage, 0.0);
        assert!(result
            .failed_checks
            .iter()
            .any(|c| c.contains("Functional tests failed")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_functional_pass_keeps_score() {
        // "true" exits 0 for both the structural check and the harness
        let tool = ToolCommand {
            command: "true".to_string(),
            args: Vec::new(),
            timeout_secs: 5,
        };
        let checker = Arc::new(ToolchainChecker::new(ToolchainConfig {
            language: "testlang".to_string(),
            file_extension: "tl".to_string(),
            check: tool.clone(),
            test: tool,
        }));
        let scorer = Scorer::new(checker, true);
        let mut test = make_test(15.0, &["add"], &[]);
        test.kind = TestKind::Functional {
            test_harness: "test add { }".to_string(),
        };
        let result = scorer.score(&test, "def add(a, b) { return a + b; }").await;

        assert_eq!(result.score, 15.0);
        assert_eq!(result.score_breakdown.functional, 0.0);
        assert!(result
            .passed_checks
            .iter()
            .any(|c| c.contains("Functional tests passed")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_functional_skipped_when_structurally_invalid() {
        // "false" makes the structural check fail; the functional gate then
        // zeroes whatever survived the 50% structural penalty.
        let tool = ToolCommand {
            command: "false".to_string(),
            args: Vec::new(),
            timeout_secs: 5,
        };
        let checker = Arc::new(ToolchainChecker::new(ToolchainConfig {
            language: "testlang".to_string(),
            file_extension: "tl".to_string(),
            check: tool.clone(),
            test: tool,
        }));
        let scorer = Scorer::new(checker, true);
        let mut test = make_test(10.0, &["add"], &[]);
        test.kind = TestKind::Functional {
            test_harness: "test add { }".to_string(),
        };
        let result = scorer.score(&test, "def add(a, b) { return a + b; }").await;

        assert_eq!(result.score, 0.0);
        assert_eq!(result.score_breakdown.structural_check, 5.0);
        assert_eq!(result.score_breakdown.functional, 5.0);
        assert!(result
            .failed_checks
            .iter()
            .any(|c| c.contains("skipped due to failed structural check")));
    }

    #[tokio::test]
    async fn test_scoring_is_deterministic() {
        let scorer = Scorer::new(missing_toolchain(), false);
        let test = make_test(12.0, &["node", "edge"], &["import"]);
        let code = "node city {} edge road {}";

        let first = scorer.score(&test, code).await;
        let second = scorer.score(&test, code).await;

        assert_eq!(first.score, second.score);
        assert_eq!(first.score_breakdown, second.score_breakdown);
        assert_eq!(first.passed_checks, second.passed_checks);
    }
}
