//! Turns a raw generation response into a compilable JUnit suite.
//!
//! The response is expected to hold a fenced Java block with one test class.
//! Imports, the `@RunWith` annotation and non-test members are kept so that
//! each test case can be rendered on its own or together with the others.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LlmError, LlmResult};
use crate::source::{matching_brace, scan_source, SourceScan};

const REQUIRED_IMPORTS: &[&str] = &["import org.junit.Test;", "import static org.junit.Assert.*;"];

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[ \t]*(?:java|Java)?[ \t]*\r?\n").expect("valid regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*((?:@\w+(?:\([^)]*\))?\s+)*)(?:public\s+|final\s+)*class\s+(\w+)[^{]*\{")
            .expect("valid regex")
    })
}

fn run_with_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@RunWith\s*\([^)]*\)").expect("valid regex"))
}

fn test_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(?:org\.junit\.)?Test\b").expect("valid regex"))
}

fn test_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bvoid\s+(\w+)\s*\(").expect("valid regex"))
}

/// One generated test method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTestCase {
    /// Method name, unique within the suite
    pub name: String,
    /// Method source including annotations, without class indentation
    pub source: String,
    /// False when the response was cut off inside this method
    pub expected_to_compile: bool,
}

/// Test cases plus the class-level text needed to compile them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTestSuite {
    pub package: String,
    pub imports: Vec<String>,
    pub run_with: Option<String>,
    /// Fields, helpers and other non-test members
    pub other_info: Vec<String>,
    pub test_cases: Vec<GeneratedTestCase>,
}

impl GeneratedTestSuite {
    /// Render a test class holding the given cases.
    pub fn render(&self, class_name: &str, cases: &[&GeneratedTestCase]) -> String {
        let mut out = String::new();

        if !self.package.is_empty() {
            out.push_str(&format!("package {};\n\n", self.package));
        }

        for import in &self.imports {
            out.push_str(import);
            out.push('\n');
        }
        if !self.imports.is_empty() {
            out.push('\n');
        }

        if let Some(run_with) = &self.run_with {
            out.push_str(run_with);
            out.push('\n');
        }
        out.push_str(&format!("public class {} {{\n", class_name));

        let members = self
            .other_info
            .iter()
            .map(String::as_str)
            .chain(cases.iter().map(|c| c.source.as_str()));
        for member in members {
            out.push('\n');
            out.push_str(&indent(member));
        }

        out.push_str("}\n");
        out
    }

    /// Render a test class holding a single case.
    pub fn render_single(&self, class_name: &str, case: &GeneratedTestCase) -> String {
        self.render(class_name, &[case])
    }

    /// Render a test class holding every case.
    #[cfg(test)]
    pub fn render_all(&self, class_name: &str) -> String {
        let cases: Vec<&GeneratedTestCase> = self.test_cases.iter().collect();
        self.render(class_name, &cases)
    }

    /// Look up a case by name.
    #[cfg(test)]
    pub fn test_case(&self, name: &str) -> Option<&GeneratedTestCase> {
        self.test_cases.iter().find(|c| c.name == name)
    }
}

/// Build a suite from a raw response.
///
/// Fails when the response is empty or contains no `@Test` method.
pub fn assemble(response: &str, package: &str) -> LlmResult<GeneratedTestSuite> {
    if response.trim().is_empty() {
        return Err(LlmError::Assembly {
            message: "empty response".to_string(),
        });
    }

    let code = extract_code(response);
    let mut suite = GeneratedTestSuite {
        package: package.to_string(),
        ..Default::default()
    };

    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("import ") && !suite.imports.iter().any(|i| i == trimmed) {
            suite.imports.push(trimmed.to_string());
        }
    }
    for required in REQUIRED_IMPORTS {
        if !suite.imports.iter().any(|i| i == required) {
            suite.imports.push(required.to_string());
        }
    }

    let scan = scan_source(code);
    let depths = &scan.depths;
    let (body_start, body_end, body_depth, truncated) = match class_re().captures(code) {
        Some(caps) => {
            let annotations = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            suite.run_with = run_with_re()
                .find(annotations)
                .map(|m| m.as_str().to_string());

            // The match always ends on the opening brace
            let open = caps.get(0).map(|m| m.end()).unwrap_or(1).saturating_sub(1);
            let body_depth = depths.get(open).copied().unwrap_or(0) + 1;
            match matching_brace(depths, code, open) {
                Some(close) => (open + 1, close, body_depth, false),
                None => (open + 1, code.len(), body_depth, true),
            }
        }
        // Bare methods without an enclosing class
        None => (0, code.len(), 0, true),
    };

    let mut seen: HashSet<String> = HashSet::new();
    for (member, complete) in split_members(code, &scan, body_start, body_end, body_depth) {
        if member.trim_start().starts_with("import ") || member.trim_start().starts_with("package ")
        {
            continue;
        }
        let text = dedent(&member);

        if !test_annotation_re().is_match(&text) {
            if complete {
                suite.other_info.push(text);
            }
            continue;
        }

        let Some(range) = test_name_re()
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.range())
        else {
            debug!(member = %text, "Skipping @Test member without a method name");
            continue;
        };
        let original = text[range.clone()].to_string();
        let name = unique_name(&original, &seen);
        let source = if name == original {
            text
        } else {
            format!("{}{}{}", &text[..range.start], name, &text[range.end..])
        };
        seen.insert(name.clone());

        suite.test_cases.push(GeneratedTestCase {
            name,
            source,
            expected_to_compile: complete || !truncated,
        });
    }

    if suite.test_cases.is_empty() {
        return Err(LlmError::Assembly {
            message: "response contains no @Test methods".to_string(),
        });
    }

    debug!(
        tests = suite.test_cases.len(),
        imports = suite.imports.len(),
        other = suite.other_info.len(),
        "Assembled generated suite"
    );
    Ok(suite)
}

/// Code inside the first fenced block, or the whole response.
fn extract_code(response: &str) -> &str {
    match fence_re().find(response) {
        Some(open) => {
            let rest = &response[open.end()..];
            match rest.find("```") {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => response,
    }
}

/// Split a class body into members with a completeness flag.
///
/// Only `;` and `}` in code at body depth end a member; comments and
/// literals stay with the member that follows them.
fn split_members(
    code: &str,
    scan: &SourceScan,
    start: usize,
    end: usize,
    body_depth: u32,
) -> Vec<(String, bool)> {
    let bytes = code.as_bytes();
    let mut members = Vec::new();
    let mut seg_start = start;

    for i in start..end.min(bytes.len()) {
        if !scan.is_code(i) || scan.depths.get(i) != Some(&body_depth) {
            continue;
        }
        match bytes[i] {
            b';' => {
                push_member(&mut members, &code[seg_start..=i], true);
                seg_start = i + 1;
            }
            b'}' => {
                // Array initializers end with `};`
                let next = code[i + 1..end].trim_start().chars().next();
                if next != Some(';') {
                    push_member(&mut members, &code[seg_start..=i], true);
                    seg_start = i + 1;
                }
            }
            _ => {}
        }
    }

    if seg_start < end {
        push_member(&mut members, &code[seg_start..end.min(code.len())], false);
    }
    members
}

fn push_member(members: &mut Vec<(String, bool)>, text: &str, complete: bool) {
    if !text.trim().is_empty() {
        members.push((text.to_string(), complete));
    }
}

fn unique_name(name: &str, seen: &HashSet<String>) -> String {
    if !seen.contains(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !seen.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Strip blank edges and common indentation.
///
/// The margin is counted in characters so non-ASCII whitespace is safe.
fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text
        .trim_end()
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .collect();
    let margin = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| strip_margin(l, margin))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_margin(line: &str, margin: usize) -> &str {
    let mut rest = line;
    for _ in 0..margin {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if c.is_whitespace() => rest = chars.as_str(),
            _ => break,
        }
    }
    rest
}

fn indent(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if !line.trim().is_empty() {
            out.push_str("    ");
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RESPONSE: &str = r#"Here are the tests:

```java
package pkg;

import org.junit.Test;
import static org.junit.Assert.assertEquals;

public class CalcTest {

    private final Calc calc = new Calc();

    @Test
    public void testAdd_shouldReturn5() {
        assertEquals(5, calc.add(2, 3));
    }

    @Test
    public void testAdd_negative() {
        String s = "}";
        assertEquals(-1, calc.add(2, -3));
    }
}
```

These cover the add method."#;

    #[test]
    fn test_assemble_splits_members() {
        let suite = assemble(RESPONSE, "pkg").unwrap();

        let names: Vec<&str> = suite.test_cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["testAdd_shouldReturn5", "testAdd_negative"]);
        assert!(suite.test_cases.iter().all(|c| c.expected_to_compile));
        assert_eq!(
            suite.other_info,
            vec!["private final Calc calc = new Calc();".to_string()]
        );
        assert!(suite
            .imports
            .contains(&"import static org.junit.Assert.assertEquals;".to_string()));
        assert!(suite.test_case("testAdd_negative").unwrap().source.starts_with("@Test"));
    }

    #[test]
    fn test_render_single_is_self_contained() {
        let suite = assemble(RESPONSE, "pkg").unwrap();
        let rendered = suite.render_single("CalcCase0", &suite.test_cases[0]);

        assert!(rendered.starts_with("package pkg;\n"));
        assert!(rendered.contains("public class CalcCase0 {"));
        assert!(rendered.contains("    private final Calc calc = new Calc();"));
        assert!(rendered.contains("    public void testAdd_shouldReturn5()"));
        assert!(!rendered.contains("testAdd_negative"));
        assert!(rendered.trim_end().ends_with('}'));
    }

    #[test]
    fn test_run_with_and_required_imports() {
        let response = "```java\n@RunWith(MockitoJUnitRunner.class)\npublic class FooTest {\n    @Test\n    public void a() {}\n}\n```";
        let suite = assemble(response, "").unwrap();

        assert_eq!(
            suite.run_with.as_deref(),
            Some("@RunWith(MockitoJUnitRunner.class)")
        );
        assert!(suite.imports.contains(&"import org.junit.Test;".to_string()));
        assert!(suite
            .imports
            .contains(&"import static org.junit.Assert.*;".to_string()));
        assert!(suite.render_all("FooTest").contains("@RunWith(MockitoJUnitRunner.class)\npublic class FooTest {"));
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let response = "```java\npublic class T {\n    @Test\n    public void same() {}\n    @Test\n    public void same() {}\n}\n```";
        let suite = assemble(response, "p").unwrap();

        assert_eq!(suite.test_cases[1].name, "same_2");
        assert!(suite.test_cases[1].source.contains("void same_2()"));
    }

    #[test]
    fn test_truncated_last_member() {
        let response = "```java\npublic class T {\n    @Test\n    public void done() {}\n    @Test\n    public void cut() {\n        int x = ";
        let suite = assemble(response, "p").unwrap();

        assert_eq!(suite.test_cases.len(), 2);
        assert!(suite.test_cases[0].expected_to_compile);
        assert!(!suite.test_cases[1].expected_to_compile);
    }

    #[test]
    fn test_array_initializer_stays_one_member() {
        let response = "```java\npublic class T {\n    int[] values = {1, 2};\n    @Test\n    public void a() {}\n}\n```";
        let suite = assemble(response, "p").unwrap();
        assert_eq!(suite.other_info, vec!["int[] values = {1, 2};".to_string()]);
    }

    #[test]
    fn test_empty_and_testless_responses() {
        assert!(matches!(
            assemble("   ", "p"),
            Err(LlmError::Assembly { .. })
        ));
        assert!(matches!(
            assemble("```java\npublic class T { int x; }\n```", "p"),
            Err(LlmError::Assembly { .. })
        ));
    }

    #[test]
    fn test_response_without_fence() {
        let suite = assemble("public class T {\n  @Test\n  public void plain() {}\n}", "p").unwrap();
        assert_eq!(suite.test_cases[0].name, "plain");
        assert_eq!(suite.test_cases[0].source, "@Test\npublic void plain() {}");
    }

    #[test]
    fn test_mixed_unicode_indentation() {
        let response = "```java\npublic class CalcTest {\n\t@Test\n\tpublic void testAdd() {\n\u{a0}\u{a0}assertTrue(true);\n\t}\n}\n```";
        let suite = assemble(response, "pkg").unwrap();

        assert_eq!(suite.test_cases[0].name, "testAdd");
        assert_eq!(
            suite.test_cases[0].source,
            "@Test\npublic void testAdd() {\n\u{a0}assertTrue(true);\n}"
        );
    }

    #[test]
    fn test_comments_stay_with_their_member() {
        let response = "```java\npublic class CalcTest {\n    private final Calc calc = new Calc();\n\n    // Adding two numbers; should return 5\n    @Test\n    public void testAdd() {\n        assertEquals(5, calc.add(2, 3));\n    }\n\n    /**\n     * Divides; by zero.\n     */\n    @Test\n    public void testDivide() {\n        char sep = ';';\n        calc.divide(1, 0);\n    }\n}\n```";
        let suite = assemble(response, "pkg").unwrap();

        assert_eq!(
            suite.other_info,
            vec!["private final Calc calc = new Calc();".to_string()]
        );
        let names: Vec<&str> = suite.test_cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["testAdd", "testDivide"]);
        assert!(suite.test_cases[0]
            .source
            .starts_with("// Adding two numbers; should return 5\n@Test"));
        assert!(suite.test_cases[1].source.starts_with("/**\n * Divides; by zero.\n */\n@Test"));

        // Comment text must not leak out as code
        let rendered = suite.render_all("CalcTest");
        let scan = scan_source(&rendered);
        assert_eq!(scan.depths.last(), Some(&0));
        assert!(!rendered.lines().any(|l| l.trim() == "should return 5"));
        assert_eq!(rendered.matches("/**").count(), 1);
        assert!(rendered.contains("    public void testDivide() {"));
    }
}
