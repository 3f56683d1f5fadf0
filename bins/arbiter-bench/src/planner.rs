//! Batch planning: split the rubric into the slices sent per generation
//! call. Batch numbers are 1-based and ordering follows the rubric.

use arbiter_common::error::PlanningError;
use arbiter_common::types::{BatchJob, TestCase};

/// Split `tests` into fixed-size batches, the last one possibly short.
pub fn plan_fixed(tests: &[TestCase], batch_size: usize) -> Result<Vec<BatchJob>, PlanningError> {
    if batch_size == 0 {
        return Err(PlanningError("Batch size must be at least 1".to_string()));
    }

    Ok(tests
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| BatchJob {
            number: (i + 1) as u32,
            tests: chunk.to_vec(),
        })
        .collect())
}

/// Split `tests` according to explicit batch sizes.
///
/// Sizes must not overshoot the test count; if they undersubscribe it, the
/// unassigned tail forms one trailing batch.
pub fn plan_custom(tests: &[TestCase], sizes: &[usize]) -> Result<Vec<BatchJob>, PlanningError> {
    let requested: usize = sizes.iter().sum();
    if requested > tests.len() {
        return Err(PlanningError(format!(
            "Sum of custom batch sizes ({}) exceeds total tests ({})",
            requested,
            tests.len()
        )));
    }
    if sizes.iter().any(|&size| size == 0) {
        return Err(PlanningError(
            "Custom batch sizes must be at least 1".to_string(),
        ));
    }

    let mut batches = Vec::new();
    let mut start = 0usize;
    for &size in sizes {
        let end = (start + size).min(tests.len());
        batches.push(BatchJob {
            number: (batches.len() + 1) as u32,
            tests: tests[start..end].to_vec(),
        });
        start = end;
        if start >= tests.len() {
            break;
        }
    }

    if start < tests.len() {
        batches.push(BatchJob {
            number: (batches.len() + 1) as u32,
            tests: tests[start..].to_vec(),
        });
    }

    Ok(batches)
}

/// Plan with custom sizes when supplied, fixed size otherwise.
pub fn plan(
    tests: &[TestCase],
    batch_size: usize,
    custom_sizes: Option<&[usize]>,
) -> Result<Vec<BatchJob>, PlanningError> {
    match custom_sizes {
        Some(sizes) if !sizes.is_empty() => plan_custom(tests, sizes),
        _ => plan_fixed(tests, batch_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_common::types::TestKind;

    fn make_tests(count: usize) -> Vec<TestCase> {
        (0..count)
            .map(|i| TestCase {
                id: format!("t{}", i + 1),
                level: 1,
                category: "basics".to_string(),
                task: "task".to_string(),
                points: 10.0,
                required_elements: Vec::new(),
                forbidden_elements: Vec::new(),
                hints: Vec::new(),
                kind: TestKind::Generate,
            })
            .collect()
    }

    #[test]
    fn test_fixed_split_with_remainder() {
        let tests = make_tests(10);
        let batches = plan_fixed(&tests, 4).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].number, 1);
        assert_eq!(batches[0].tests.len(), 4);
        assert_eq!(batches[2].number, 3);
        assert_eq!(batches[2].tests.len(), 2);
    }

    #[test]
    fn test_fixed_zero_size_rejected() {
        let tests = make_tests(5);
        assert!(plan_fixed(&tests, 0).is_err());
    }

    #[test]
    fn test_custom_undersubscribed_gets_trailing_batch() {
        let tests = make_tests(20);
        let batches = plan_custom(&tests, &[5, 5]).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].tests.len(), 5);
        assert_eq!(batches[1].tests.len(), 5);
        assert_eq!(batches[2].tests.len(), 10);
        assert_eq!(batches[2].number, 3);
        // Ordering preserved across the split
        assert_eq!(batches[2].tests[0].id, "t11");
    }

    #[test]
    fn test_custom_exact_coverage_has_no_trailing_batch() {
        let tests = make_tests(10);
        let batches = plan_custom(&tests, &[6, 4]).unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_custom_overshoot_rejected() {
        let tests = make_tests(8);
        let err = plan_custom(&tests, &[5, 5]).unwrap_err();
        assert!(err.to_string().contains("exceeds total tests"));
    }

    #[test]
    fn test_plan_prefers_custom_sizes() {
        let tests = make_tests(10);
        let batches = plan(&tests, 45, Some(&[3, 3])).unwrap();
        assert_eq!(batches.len(), 3);

        let batches = plan(&tests, 45, None).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tests.len(), 10);
    }
}
