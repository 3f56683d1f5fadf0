//! Best-effort delimiter repair for candidate code.
//!
//! Generated code frequently arrives truncated by a token limit, losing the
//! last closing brace or two. Scoring such a response as structurally
//! invalid wipes half its points for what is essentially a transcription
//! artifact, so unbalanced block delimiters are closed before scoring.
//!
//! The repair is intentionally conservative: it only ever appends closers
//! for delimiters that are still open at end of input. Code with stray
//! closers or interleaved delimiters is returned untouched - rewriting the
//! middle of a sample could change its meaning.

/// Close unbalanced `{`, `(` and `[` delimiters at the end of `code`.
///
/// Returns the patched code and the number of closers appended (0 means the
/// input was returned unchanged). Delimiters inside string literals and
/// line comments are ignored.
pub fn patch_unbalanced_delimiters(code: &str) -> (String, usize) {
    let mut stack: Vec<char> = Vec::new();
    let mut chars = code.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => in_string = Some(c),
            '#' => {
                // Line comment - skip to end of line
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '{' | '(' | '[' => stack.push(c),
            '}' | ')' | ']' => {
                let expected = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                match stack.pop() {
                    Some(open) if open == expected => {}
                    // Mismatched or stray closer: not repairable here
                    _ => return (code.to_string(), 0),
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        return (code.to_string(), 0);
    }

    let mut patched = code.to_string();
    if !patched.ends_with('\n') {
        patched.push('\n');
    }
    let added = stack.len();
    for open in stack.into_iter().rev() {
        let closer = match open {
            '{' => '}',
            '(' => ')',
            _ => ']',
        };
        patched.push(closer);
        patched.push('\n');
    }

    (patched, added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_code_unchanged() {
        let code = "walker greet {\n    can speak with entry {\n        print(\"hi\");\n    }\n}\n";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 0);
        assert_eq!(patched, code);
    }

    #[test]
    fn test_single_missing_brace_closed() {
        let code = "walker greet {\n    print(\"hi\");\n";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 1);
        assert!(patched.ends_with("}\n"));
    }

    #[test]
    fn test_nested_closers_in_order() {
        let code = "node a {\n    can act {\n        items = [1, 2";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 3);
        // Innermost delimiter closes first
        let tail: String = patched.chars().filter(|c| "]})".contains(*c)).collect();
        assert_eq!(tail, "]}}");
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        let code = "print(\"open { and [ stay strings\");\n";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 0);
        assert_eq!(patched, code);
    }

    #[test]
    fn test_braces_in_comments_ignored() {
        let code = "# opening { in a comment\nwalker w {\n";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 1);
    }

    #[test]
    fn test_stray_closer_left_alone() {
        let code = "walker w }\n";
        let (patched, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 0);
        assert_eq!(patched, code);
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let code = "print(\"a \\\" { b\");\n";
        let (_, added) = patch_unbalanced_delimiters(code);
        assert_eq!(added, 0);
    }
}
