//! Regex-driven extraction of type and method declarations from Java sources.
//!
//! This is not a Java parser. It recognises declarations at the brace depth
//! where they can legally appear, which is enough to locate class bodies,
//! method signatures, method bodies and their line ranges.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::{MethodDescriptor, TypeDescriptor, TypeKind};

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").expect("valid regex"))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)\s*;").expect("valid regex")
    })
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(class|interface|enum|record)\s+(\w+)\s*(?:<[^{]*?>)?\s*(?:\([^)]*\)\s*)?(?:extends\s+([\w.$<>,?\s]+?))?\s*(?:implements\s+([\w.$<>,?\s]+?))?\s*\{",
        )
        .expect("valid regex")
    })
}

fn method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*((?:@\w+(?:\([^)]*\))?\s+)*)((?:(?:public|protected|private|static|final|abstract|synchronized|native|default|strictfp)\s+)*)(?:<[^>]*>\s+)?(?:([\w.$?]+(?:\s*<[^<>()]*(?:<[^<>()]*>[^<>()]*)*>)?(?:\[\])*)\s+)?(\w+)\s*\(([^)]*)\)\s*(?:throws\s+[\w.$,\s]+?)?\s*(\{|;)",
        )
        .expect("valid regex")
    })
}

const NOT_METHOD_NAMES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "synchronized", "else", "throw",
    "try", "do",
];

/// Per-byte lexical view of a Java source text.
pub(crate) struct SourceScan {
    /// Brace depth at every byte, plus one trailing entry
    pub depths: Vec<u32>,
    /// Whether the byte is code, as opposed to a comment or a string/char literal
    pub in_code: Vec<bool>,
}

impl SourceScan {
    fn push(&mut self, depth: u32, code: bool) {
        self.depths.push(depth);
        self.in_code.push(code);
    }

    /// Whether the byte at `offset` is code.
    pub fn is_code(&self, offset: usize) -> bool {
        self.in_code.get(offset).copied().unwrap_or(false)
    }
}

/// Scan `src`, ignoring braces inside strings, chars and comments.
pub(crate) fn scan_source(src: &str) -> SourceScan {
    let bytes = src.as_bytes();
    let mut scan = SourceScan {
        depths: Vec::with_capacity(bytes.len() + 1),
        in_code: Vec::with_capacity(bytes.len()),
    };
    let mut depth: u32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    scan.push(depth, false);
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                scan.push(depth, false);
                scan.push(depth, false);
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    scan.push(depth, false);
                    i += 1;
                }
                let end = (i + 2).min(bytes.len());
                while i < end {
                    scan.push(depth, false);
                    i += 1;
                }
                continue;
            }
            b'"' | b'\'' => {
                let quote = b;
                scan.push(depth, false);
                i += 1;
                while i < bytes.len() && bytes[i] != quote && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        scan.push(depth, false);
                        i += 1;
                    }
                    scan.push(depth, false);
                    i += 1;
                }
                if i < bytes.len() {
                    scan.push(depth, false);
                    i += 1;
                }
                continue;
            }
            b'{' => {
                scan.push(depth, true);
                depth += 1;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                scan.push(depth, true);
            }
            _ => scan.push(depth, true),
        }
        i += 1;
    }
    scan.depths.push(depth);
    scan
}

/// Per-byte brace depth, ignoring braces inside strings, chars and comments.
pub(crate) fn brace_depths(src: &str) -> Vec<u32> {
    scan_source(src).depths
}

/// Offset of the `}` closing the `{` at `open`.
pub(crate) fn matching_brace(depths: &[u32], src: &str, open: usize) -> Option<usize> {
    let target = *depths.get(open)?;
    src.char_indices()
        .skip_while(|(i, _)| *i <= open)
        .find(|(i, c)| *c == '}' && depths.get(*i) == Some(&target))
        .map(|(i, _)| i)
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-based line containing `offset`
    fn line_of(&self, offset: usize) -> u32 {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }
}

/// Strip generics, array suffixes and whitespace from a type reference.
pub(crate) fn erase_type(raw: &str) -> String {
    let mut out = String::new();
    let mut angle = 0;
    for c in raw.chars() {
        match c {
            '<' => angle += 1,
            '>' => angle -= 1,
            _ if angle == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out.trim_end_matches("...")
        .trim_end_matches("[]")
        .trim_end_matches("[]")
        .to_string()
}

fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut angle = 0;
    for c in list.chars() {
        match c {
            '<' => {
                angle += 1;
                current.push(c);
            }
            '>' => {
                angle -= 1;
                current.push(c);
            }
            ',' if angle == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parameter types of a parameter list, whitespace-normalized.
fn parameter_types(params: &str) -> Vec<String> {
    split_top_level(params)
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|param| {
            let tokens: Vec<&str> = param
                .split_whitespace()
                .filter(|t| !t.starts_with('@') && *t != "final")
                .collect();
            let ty = if tokens.len() > 1 {
                tokens[..tokens.len() - 1].join(" ")
            } else {
                tokens.join(" ")
            };
            ty.split_whitespace().collect::<String>()
        })
        .collect()
}

/// Parse every top-level type declared in one Java file.
pub fn parse_file(path: &Path, src: &str) -> Vec<TypeDescriptor> {
    let package = package_re()
        .captures(src)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let imports: Vec<String> = import_re()
        .captures_iter(src)
        .map(|c| c[1].to_string())
        .collect();

    let depths = brace_depths(src);
    let lines = LineIndex::new(src);
    let mut types = Vec::new();

    for caps in type_re().captures_iter(src) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if depths.get(whole.start()) != Some(&0) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = matching_brace(&depths, src, open) else {
            continue;
        };

        let kind = match &caps[1] {
            "interface" => TypeKind::Interface,
            "enum" => TypeKind::Enum,
            "record" => TypeKind::Record,
            _ => TypeKind::Class,
        };
        let simple_name = caps[2].to_string();
        let extends: Vec<String> = caps
            .get(3)
            .map(|m| split_top_level(m.as_str()))
            .unwrap_or_default();
        let mut interfaces: Vec<String> = caps
            .get(4)
            .map(|m| split_top_level(m.as_str()))
            .unwrap_or_default();

        let superclass_ref = if kind == TypeKind::Interface {
            interfaces.extend(extends);
            None
        } else {
            extends.into_iter().next()
        };

        // Include leading modifiers and annotations on the declaration line.
        let decl_line_start = src[..whole.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let source = src[decl_line_start..=close].to_string();

        let methods = parse_methods(src, &depths, &lines, open, close, &simple_name);

        let qualified_name = if package.is_empty() {
            simple_name.clone()
        } else {
            format!("{}.{}", package, simple_name)
        };

        types.push(TypeDescriptor {
            qualified_name,
            package: package.clone(),
            simple_name,
            kind,
            superclass_ref,
            superclass: None,
            interfaces,
            imports: imports.clone(),
            source,
            file_path: path.to_path_buf(),
            start_line: lines.line_of(whole.start()),
            end_line: lines.line_of(close),
            methods,
        });
    }

    types
}

fn parse_methods(
    src: &str,
    depths: &[u32],
    lines: &LineIndex,
    open: usize,
    close: usize,
    type_name: &str,
) -> Vec<MethodDescriptor> {
    let body_depth = depths.get(open).copied().unwrap_or(0) + 1;
    let body = &src[open + 1..close];
    let mut methods = Vec::new();

    for caps in method_re().captures_iter(body) {
        let (Some(whole), Some(name_match)) = (caps.get(0), caps.get(4)) else {
            continue;
        };
        let name = name_match.as_str().to_string();
        let name_offset = open + 1 + name_match.start();
        if depths.get(name_offset) != Some(&body_depth) || NOT_METHOD_NAMES.contains(&name.as_str()) {
            continue;
        }

        let return_type = caps.get(3).map(|m| m.as_str().split_whitespace().collect::<String>());
        let is_constructor = return_type.is_none();
        if is_constructor && name != type_name {
            continue;
        }
        if return_type.as_deref() == Some("new") || return_type.as_deref() == Some("return") {
            continue;
        }

        let start = open + 1 + whole.start();
        let terminator = open + 1 + whole.end() - 1;
        let end = if &caps[6] == "{" {
            match matching_brace(depths, src, terminator) {
                Some(end) => end,
                None => continue,
            }
        } else {
            terminator
        };

        let annotations_len = caps.get(1).map(|m| m.len()).unwrap_or(0);
        let signature_start = start + leading_ws(&body[whole.start()..]) + annotations_len;
        let signature = src[signature_start..terminator].trim().to_string();

        methods.push(MethodDescriptor {
            name,
            parameter_types: parameter_types(&caps[5]),
            return_type,
            is_constructor,
            signature,
            body: src[signature_start..=end].to_string(),
            start_line: lines.line_of(signature_start),
            end_line: lines.line_of(end),
        });
    }

    methods
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CALC: &str = r#"package pkg;

import java.util.List;

/** Simple calculator. */
public class Calc extends Base implements Comparable<Calc> {
    private int last;

    public Calc() {
        this.last = 0;
    }

    public int add(int a, int b) {
        if (a > 0) { last = a; }
        return a + b;
    }

    // a "brace" } in a comment
    public static <T> List<T> wrap(final T value, String... rest) {
        String s = "}";
        return List.of(value);
    }

    public int compareTo(Calc other) { return 0; }
}
"#;

    #[test]
    fn test_parse_class_header() {
        let types = parse_file(Path::new("src/pkg/Calc.java"), CALC);
        assert_eq!(types.len(), 1);
        let calc = &types[0];
        assert_eq!(calc.qualified_name, "pkg.Calc");
        assert_eq!(calc.kind, TypeKind::Class);
        assert_eq!(calc.superclass_ref.as_deref(), Some("Base"));
        assert_eq!(calc.interfaces, vec!["Comparable<Calc>".to_string()]);
        assert_eq!(calc.imports, vec!["java.util.List".to_string()]);
        assert_eq!(calc.start_line, 6);
    }

    #[test]
    fn test_parse_methods_and_lines() {
        let types = parse_file(Path::new("Calc.java"), CALC);
        let names: Vec<&str> = types[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Calc", "add", "wrap", "compareTo"]);

        let add = &types[0].methods[1];
        assert_eq!(add.descriptor(), "add(int,int)");
        assert_eq!(add.return_type.as_deref(), Some("int"));
        assert_eq!(add.start_line, 13);
        assert_eq!(add.end_line, 16);
        assert!(add.body.trim_end().ends_with('}'));

        let wrap = &types[0].methods[2];
        assert_eq!(wrap.parameter_types, vec!["T".to_string(), "String...".to_string()]);
        assert!(types[0].methods[0].is_constructor);
    }

    #[test]
    fn test_interface_extends_become_interfaces() {
        let src = "package a;\npublic interface Shape extends Named, Sized {\n    double area();\n}\n";
        let types = parse_file(Path::new("Shape.java"), src);
        assert_eq!(types[0].kind, TypeKind::Interface);
        assert!(types[0].superclass_ref.is_none());
        assert_eq!(types[0].interfaces.len(), 2);
        assert_eq!(types[0].methods[0].descriptor(), "area()");
    }

    #[test]
    fn test_nested_types_are_not_top_level() {
        let src = "class Outer {\n  static class Inner { void f() {} }\n  void g() {}\n}\n";
        let types = parse_file(Path::new("Outer.java"), src);
        assert_eq!(types.len(), 1);
        let names: Vec<&str> = types[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["g"]);
    }

    #[test]
    fn test_erase_type() {
        assert_eq!(erase_type("List<Map<String, Integer>>"), "List");
        assert_eq!(erase_type("int[]"), "int");
        assert_eq!(erase_type("String..."), "String");
        assert_eq!(erase_type("pkg.Money"), "pkg.Money");
    }

    #[test]
    fn test_scan_marks_comments_and_literals() {
        let src = "int a; // b; }\nString s = \"c;\"; /* d; */ char e = ';';";
        let scan = scan_source(src);

        let code_semicolons: Vec<usize> = src
            .match_indices(';')
            .map(|(i, _)| i)
            .filter(|i| scan.is_code(*i))
            .collect();
        assert_eq!(code_semicolons.len(), 3);
        assert_eq!(scan.depths.last(), Some(&0));
        assert!(!scan.is_code(src.len()));
    }
}
