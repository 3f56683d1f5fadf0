/// Evaluation Engine - Response-Set Grading
///
/// **Core Responsibility:**
/// Fan scoring out across every test case of a response set on a bounded
/// worker pool, then aggregate into category and level summaries.
///
/// **Critical Properties:**
/// - Test cases with no response are first-class zero-score results, never
///   dispatched to the scorer
/// - Candidate code is delimiter-repaired before scoring
/// - Aggregation is deterministic: results are reassembled in rubric order
///   regardless of completion order
/// - Pure computation: no persistence, no progress events
use crate::checker::ToolchainChecker;
use crate::repair::patch_unbalanced_delimiters;
use crate::scorer::Scorer;
use arbiter_common::types::{
    round2, CategorySummary, EvaluationReport, EvaluationResult, GroupStats, LevelSummary,
    PenaltyBreakdown, RubricStats, TestCase,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

/// Worker pool sized to the host, floored at 4. Scoring workers spawn
/// toolchain subprocesses, so the pool reflects that cost rather than pure
/// CPU throughput.
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub parallelism: usize,
    /// Run the external structural check (true) or the heuristic lint
    /// penalty (false).
    pub structural_check: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallelism: default_parallelism(),
            structural_check: true,
        }
    }
}

/// Grades full response sets against the loaded rubric.
pub struct EvaluationEngine {
    tests: Vec<TestCase>,
    scorer: Arc<Scorer>,
    parallelism: usize,
}

impl EvaluationEngine {
    pub fn new(tests: Vec<TestCase>, checker: Arc<ToolchainChecker>, config: EngineConfig) -> Self {
        EvaluationEngine {
            tests,
            scorer: Arc::new(Scorer::new(checker, config.structural_check)),
            parallelism: config.parallelism.max(1),
        }
    }

    /// Evaluate a response map against the rubric.
    ///
    /// `test_ids` restricts evaluation to the given ids; with no filter the
    /// whole rubric is graded. Registered tests without a response are
    /// scored 0 with their full points charged to the `required` bucket.
    pub async fn evaluate(
        &self,
        responses: &HashMap<String, String>,
        test_ids: Option<&[String]>,
    ) -> EvaluationReport {
        let filter: Option<HashSet<&str>> =
            test_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let mut tasks: Vec<(&TestCase, &String)> = Vec::new();
        let mut missing_tests: Vec<&TestCase> = Vec::new();
        for test in &self.tests {
            if let Some(wanted) = &filter {
                if !wanted.contains(test.id.as_str()) {
                    continue;
                }
            }
            match responses.get(&test.id) {
                Some(code) => tasks.push((test, code)),
                None => missing_tests.push(test),
            }
        }

        info!(
            tasks = tasks.len(),
            missing = missing_tests.len(),
            parallelism = self.parallelism,
            "Evaluating response set"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut futures = FuturesUnordered::new();
        for (position, (test, code)) in tasks.into_iter().enumerate() {
            let scorer = Arc::clone(&self.scorer);
            let semaphore = Arc::clone(&semaphore);
            let test = test.clone();
            let code = code.clone();
            futures.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("scoring semaphore closed");
                let (patched, _) = patch_unbalanced_delimiters(&code);
                (position, scorer.score(&test, &patched).await)
            });
        }

        let mut scored: Vec<(usize, EvaluationResult)> = Vec::new();
        while let Some(item) = futures.next().await {
            scored.push(item);
        }
        // Workers settle out of order; rubric order keeps reports stable
        scored.sort_by_key(|(position, _)| *position);

        let mut results: Vec<EvaluationResult> =
            scored.into_iter().map(|(_, result)| result).collect();
        let tests_missing = missing_tests.len();
        for test in missing_tests {
            results.push(missing_result(test));
        }

        self.build_report(results, tests_missing)
    }

    fn build_report(
        &self,
        results: Vec<EvaluationResult>,
        tests_missing: usize,
    ) -> EvaluationReport {
        let mut category_breakdown: BTreeMap<String, CategorySummary> = BTreeMap::new();
        let mut level_breakdown: BTreeMap<u32, LevelSummary> = BTreeMap::new();

        for result in &results {
            let category = category_breakdown.entry(result.category.clone()).or_default();
            category.score += result.score;
            category.max += result.max_score;
            category.count += 1;
            category.penalties.accumulate(&result.score_breakdown);

            let level = level_breakdown.entry(result.level).or_default();
            level.score += result.score;
            level.max += result.max_score;
            level.count += 1;
        }

        for summary in category_breakdown.values_mut() {
            summary.percentage = if summary.max > 0.0 {
                round2(summary.score / summary.max * 100.0)
            } else {
                0.0
            };
            summary.score = round2(summary.score);
            summary.penalties = summary.penalties.rounded();
        }
        for summary in level_breakdown.values_mut() {
            summary.percentage = if summary.max > 0.0 {
                round2(summary.score / summary.max * 100.0)
            } else {
                0.0
            };
            summary.score = round2(summary.score);
        }

        let total_score: f64 = results.iter().map(|r| r.score).sum();
        let max_score: f64 = results.iter().map(|r| r.max_score).sum();
        let percentage = if max_score > 0.0 {
            round2(total_score / max_score * 100.0)
        } else {
            0.0
        };

        EvaluationReport {
            tests_completed: results.len(),
            tests_missing,
            results,
            category_breakdown,
            level_breakdown,
            total_score: round2(total_score),
            max_score,
            percentage,
        }
    }

    /// Rubric statistics, independent of any response set.
    pub fn stats(&self) -> RubricStats {
        let mut levels: BTreeMap<u32, GroupStats> = BTreeMap::new();
        let mut categories: BTreeMap<String, GroupStats> = BTreeMap::new();

        for test in &self.tests {
            let level = levels.entry(test.level).or_default();
            level.count += 1;
            level.points += test.points;

            let category = categories.entry(test.category.clone()).or_default();
            category.count += 1;
            category.points += test.points;
        }

        RubricStats {
            total_tests: self.tests.len(),
            total_points: self.tests.iter().map(|t| t.points).sum(),
            levels,
            categories,
        }
    }
}

/// Zero-score result for a registered test with no response.
fn missing_result(test: &TestCase) -> EvaluationResult {
    EvaluationResult {
        test_id: test.id.clone(),
        category: test.category.clone(),
        level: test.level,
        score: 0.0,
        max_score: test.points,
        score_breakdown: PenaltyBreakdown {
            required: test.points,
            ..Default::default()
        },
        percentage: 0.0,
        required_found: "0/0".to_string(),
        forbidden_found: 0,
        passed_checks: Vec::new(),
        failed_checks: vec!["[FAIL] No response generated for this test".to_string()],
        syntax_feedback: Vec::new(),
        syntax_errors: 0,
        check_valid: false,
        check_errors: vec!["No code to check".to_string()],
        check_warnings: Vec::new(),
        code: String::new(),
    }
}
