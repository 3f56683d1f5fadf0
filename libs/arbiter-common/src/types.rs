use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Round to two decimal places - all reported scores and percentages use this.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One rubric entry a candidate code sample is graded against.
///
/// Loaded from the external test registry and treated as read-only by the
/// core. `kind` carries the type-specific payload (broken code to fix,
/// partial code to complete, etc.) as a tagged union keyed by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub level: u32,
    pub category: String,
    pub task: String,
    pub points: f64,
    pub required_elements: Vec<String>,
    #[serde(default)]
    pub forbidden_elements: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(flatten)]
    pub kind: TestKind,
}

/// Type-specific payload for a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestKind {
    /// Write code from scratch based on the task description.
    Generate,
    /// Fix the provided broken code.
    Debug {
        broken_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_hint: Option<String>,
    },
    /// Fill in the blanks in the partial code.
    Complete {
        partial_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completion_hint: Option<String>,
    },
    /// Translate the provided Python code.
    Refactor { python_code: String },
    /// Generated code must also pass an executable test harness.
    Functional { test_harness: String },
}

impl TestCase {
    /// The executable harness for functional test cases, if any.
    pub fn harness(&self) -> Option<&str> {
        match &self.kind {
            TestKind::Functional { test_harness } => Some(test_harness),
            _ => None,
        }
    }
}

/// Named deductions that explain a score's gap from max.
///
/// Every bucket is always present so per-category sums stay comparable
/// across test types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyBreakdown {
    pub required: f64,
    pub forbidden: f64,
    pub syntax: f64,
    pub structural_check: f64,
    pub functional: f64,
}

impl PenaltyBreakdown {
    pub fn accumulate(&mut self, other: &PenaltyBreakdown) {
        self.required += other.required;
        self.forbidden += other.forbidden;
        self.syntax += other.syntax;
        self.structural_check += other.structural_check;
        self.functional += other.functional;
    }

    pub fn rounded(&self) -> PenaltyBreakdown {
        PenaltyBreakdown {
            required: round2(self.required),
            forbidden: round2(self.forbidden),
            syntax: round2(self.syntax),
            structural_check: round2(self.structural_check),
            functional: round2(self.functional),
        }
    }
}

/// Outcome of grading one (test case, code) pair.
///
/// Invariant: `0 <= score <= max_score`. `percentage` is 0 when `max_score`
/// is 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub test_id: String,
    pub category: String,
    pub level: u32,
    pub score: f64,
    pub max_score: f64,
    pub score_breakdown: PenaltyBreakdown,
    pub percentage: f64,
    /// Display string "found/total" for required elements.
    pub required_found: String,
    pub forbidden_found: u32,
    pub passed_checks: Vec<String>,
    pub failed_checks: Vec<String>,
    /// Heuristic lint complaints, only populated when the external
    /// structural check is disabled.
    pub syntax_feedback: Vec<String>,
    pub syntax_errors: u32,
    pub check_valid: bool,
    pub check_errors: Vec<String>,
    pub check_warnings: Vec<String>,
    pub code: String,
}

/// Running sums for one category of results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorySummary {
    pub score: f64,
    pub max: f64,
    pub percentage: f64,
    pub count: usize,
    pub penalties: PenaltyBreakdown,
}

/// Running sums for one difficulty level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelSummary {
    pub score: f64,
    pub max: f64,
    pub percentage: f64,
    pub count: usize,
}

/// Full evaluation report for one response set.
///
/// Invariants: the category scores sum to `total_score` and the category
/// max values sum to `max_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub results: Vec<EvaluationResult>,
    pub category_breakdown: BTreeMap<String, CategorySummary>,
    pub level_breakdown: BTreeMap<u32, LevelSummary>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub tests_completed: usize,
    pub tests_missing: usize,
}

/// A contiguous slice of the rubric assigned to one generation call.
/// Batch numbers are 1-based.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub number: u32,
    pub tests: Vec<TestCase>,
}

/// Lifecycle of one batch within an orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchState::Pending => write!(f, "pending"),
            BatchState::Running => write!(f, "running"),
            BatchState::Completed => write!(f, "completed"),
            BatchState::Failed => write!(f, "failed"),
        }
    }
}

/// Per-batch status, owned by the orchestrator run and snapshotted into
/// progress events. Sinks must never mutate it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchStatus {
    pub state: BatchState,
    pub retry: u32,
    pub max_retries: u32,
}

impl BatchStatus {
    pub fn pending(max_retries: u32) -> Self {
        BatchStatus {
            state: BatchState::Pending,
            retry: 0,
            max_retries,
        }
    }
}

/// Final output of one orchestrator run.
///
/// `responses` is the union of all successful batches; ids from failed
/// batches are simply absent and the evaluation engine grades them as
/// missing. Partial success is the normal case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub model: String,
    pub num_responses: usize,
    pub responses: HashMap<String, String>,
    pub failed_batches: u32,
    pub errors: Vec<String>,
}

/// Count/points totals for one level or category of the rubric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GroupStats {
    pub count: usize,
    pub points: f64,
}

/// Rubric statistics, independent of any run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricStats {
    pub total_tests: usize,
    pub total_points: f64,
    pub levels: BTreeMap<u32, GroupStats>,
    pub categories: BTreeMap<String, GroupStats>,
}
