//! Prompt assembly for generation calls.
//!
//! Each batch becomes one prompt: the documentation text, the batch's test
//! cases as JSON, and per-type instructions. Only the fields the model
//! needs are serialized - required and forbidden elements stay out of the
//! prompt so the rubric cannot be gamed.

use arbiter_common::types::{TestCase, TestKind};
use serde::Serialize;
use serde_json::json;

/// Test case as presented to the model.
#[derive(Serialize)]
struct PromptTest<'a> {
    id: &'a str,
    level: u32,
    category: &'a str,
    task: &'a str,
    points: f64,
    hints: &'a [String],
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    broken_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion_hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    python_code: Option<&'a str>,
}

impl<'a> PromptTest<'a> {
    fn from_case(test: &'a TestCase) -> Self {
        let mut view = PromptTest {
            id: &test.id,
            level: test.level,
            category: &test.category,
            task: &test.task,
            points: test.points,
            hints: &test.hints,
            kind: "generate",
            broken_code: None,
            error_hint: None,
            partial_code: None,
            completion_hint: None,
            python_code: None,
        };
        match &test.kind {
            TestKind::Generate => {}
            TestKind::Debug {
                broken_code,
                error_hint,
            } => {
                view.kind = "debug";
                view.broken_code = Some(broken_code);
                view.error_hint = error_hint.as_deref();
            }
            TestKind::Complete {
                partial_code,
                completion_hint,
            } => {
                view.kind = "complete";
                view.partial_code = Some(partial_code);
                view.completion_hint = completion_hint.as_deref();
            }
            TestKind::Refactor { python_code } => {
                view.kind = "refactor";
                view.python_code = Some(python_code);
            }
            // The harness is never shown to the model
            TestKind::Functional { .. } => view.kind = "functional",
        }
        view
    }
}

/// Build the full generation prompt for one batch.
pub fn build_prompt(language: &str, doc_content: &str, tests: &[TestCase]) -> String {
    let formatted: Vec<PromptTest<'_>> = tests.iter().map(PromptTest::from_case).collect();
    let test_prompts = json!({ "tests": formatted });
    let test_prompts_json =
        serde_json::to_string_pretty(&test_prompts).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are a {language} programming language expert. Write valid {language} code for each test case based on the documentation.

# Documentation
{doc_content}

# Test Cases
{test_prompts_json}

# Instructions by Test Type
- **generate**: Write complete {language} code from scratch based on the task description.
- **debug**: Fix the provided broken_code. Return the corrected, working {language} code.
- **complete**: Fill in the blanks (marked with ____) in the partial_code. Return the complete code.
- **refactor**: Convert the provided python_code to equivalent {language} code.
- **functional**: Write complete {language} code that fulfils the task; it will be executed against tests.

# Task
Return a JSON object mapping each test ID to {language} code. Use \n for newlines and \" for quotes in the code strings.
"#
    )
}

/// JSON schema enforcing one string response per test id, used as the
/// provider's structured-output contract.
pub fn response_schema(tests: &[TestCase]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    for test in tests {
        properties.insert(test.id.clone(), json!({ "type": "string" }));
    }
    let required: Vec<&str> = tests.iter().map(|t| t.id.as_str()).collect();

    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "benchmark_responses",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::TestKind;

    fn make_test(id: &str, kind: TestKind) -> TestCase {
        TestCase {
            id: id.to_string(),
            level: 1,
            category: "basics".to_string(),
            task: "do the thing".to_string(),
            points: 10.0,
            required_elements: vec!["secret_marker".to_string()],
            forbidden_elements: vec!["hidden_trap".to_string()],
            hints: vec!["a hint".to_string()],
            kind,
        }
    }

    #[test]
    fn test_prompt_contains_tests_but_not_rubric() {
        let tests = vec![
            make_test("t1", TestKind::Generate),
            make_test(
                "t2",
                TestKind::Debug {
                    broken_code: "walkr W {}".to_string(),
                    error_hint: Some("keyword".to_string()),
                },
            ),
        ];
        let prompt = build_prompt("jac", "the docs", &tests);

        assert!(prompt.contains("the docs"));
        assert!(prompt.contains("\"t1\""));
        assert!(prompt.contains("walkr W {}"));
        assert!(prompt.contains("a hint"));
        // Grading internals never leak into the prompt
        assert!(!prompt.contains("secret_marker"));
        assert!(!prompt.contains("hidden_trap"));
    }

    #[test]
    fn test_harness_not_shown_to_model() {
        let tests = vec![make_test(
            "f1",
            TestKind::Functional {
                test_harness: "test covert { }".to_string(),
            },
        )];
        let prompt = build_prompt("jac", "", &tests);
        assert!(prompt.contains("\"functional\""));
        assert!(!prompt.contains("test covert"));
    }

    #[test]
    fn test_schema_requires_every_id() {
        let tests = vec![make_test("t1", TestKind::Generate), make_test("t2", TestKind::Generate)];
        let schema = response_schema(&tests);

        let required = schema["json_schema"]["schema"]["required"]
            .as_array()
            .unwrap();
        assert_eq!(required.len(), 2);
        assert!(schema["json_schema"]["schema"]["properties"]["t1"].is_object());
        assert_eq!(
            schema["json_schema"]["schema"]["additionalProperties"],
            serde_json::Value::Bool(false)
        );
    }
}
