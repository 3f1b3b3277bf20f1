//! Generation context selection.
//!
//! Collects the unit under test together with its project-declared ancestors
//! so that requests can show supertype members to the model.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::{TypeDescriptor, TypeResolver};

/// Namespace prefix of standard-library types, which are never part of a context.
pub const STANDARD_LIBRARY_PREFIX: &str = "java.";

/// What to generate tests for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CodeFragmentTarget {
    /// The whole class under test.
    Class,
    /// One method, identified by a `name(types)` descriptor.
    Method(String),
    /// One source line (1-based).
    Line(u32),
}

impl std::fmt::Display for CodeFragmentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeFragmentTarget::Class => write!(f, "class"),
            CodeFragmentTarget::Method(descriptor) => write!(f, "method {}", descriptor),
            CodeFragmentTarget::Line(line) => write!(f, "line {}", line),
        }
    }
}

/// Expansion depths used when rendering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDepths {
    /// How many supertype levels are shown.
    pub polymorphism: u32,
    /// How many levels of parameter types are expanded.
    pub input_params: u32,
}

/// Minimum value either depth can be reduced to.
pub const DEPTH_FLOOR: u32 = 1;

impl PromptDepths {
    /// Create a depth pair.
    pub fn new(polymorphism: u32, input_params: u32) -> Self {
        Self {
            polymorphism,
            input_params,
        }
    }

    /// Next smaller depth pair, polymorphism first, or `None` when both are at the floor.
    pub fn reduced(self) -> Option<(Self, DepthKnob)> {
        if self.polymorphism > DEPTH_FLOOR {
            Some((
                Self {
                    polymorphism: self.polymorphism - 1,
                    ..self
                },
                DepthKnob::Polymorphism,
            ))
        } else if self.input_params > DEPTH_FLOOR {
            Some((
                Self {
                    input_params: self.input_params - 1,
                    ..self
                },
                DepthKnob::InputParams,
            ))
        } else {
            None
        }
    }
}

/// Which depth a reduction step lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthKnob {
    /// Supertype depth.
    Polymorphism,
    /// Parameter-type expansion depth.
    InputParams,
}

/// Ordered types for a request plus the depths to render them with.
#[derive(Debug, Clone)]
pub struct GenerationContext<'a> {
    /// Unit under test first, then ancestors nearest-first.
    pub types: Vec<&'a TypeDescriptor>,
    /// Initial expansion depths.
    pub depths: PromptDepths,
}

impl<'a> GenerationContext<'a> {
    /// The unit under test.
    pub fn target_type(&self) -> &'a TypeDescriptor {
        self.types[0]
    }

    /// Ancestors of the unit under test.
    pub fn ancestors(&self) -> &[&'a TypeDescriptor] {
        &self.types[1..]
    }
}

/// Walk the superclass chain of `start`, returning at most `max_depth` types.
///
/// Stops early at a standard-library ancestor or one the resolver cannot find.
pub fn select_types<'a>(
    resolver: &'a dyn TypeResolver,
    start: &'a TypeDescriptor,
    max_depth: u32,
) -> Vec<&'a TypeDescriptor> {
    let mut selected: Vec<&'a TypeDescriptor> = Vec::new();
    let mut current = start;

    for _ in 0..max_depth.max(DEPTH_FLOOR) {
        if !selected
            .iter()
            .any(|t| t.qualified_name == current.qualified_name)
        {
            selected.push(current);
        }

        let next = match current.superclass.as_deref() {
            Some(name) if !name.starts_with(STANDARD_LIBRARY_PREFIX) => resolver.resolve(name),
            _ => None,
        };
        match next {
            Some(parent) => current = parent,
            None => break,
        }
    }

    debug!(
        type_name = %start.qualified_name,
        selected = selected.len(),
        max_depth,
        "Context types selected"
    );
    selected
}

/// Build a generation context for `start` using the configured depths.
pub fn select_context<'a>(
    resolver: &'a dyn TypeResolver,
    start: &'a TypeDescriptor,
    depths: PromptDepths,
) -> GenerationContext<'a> {
    GenerationContext {
        types: select_types(resolver, start, depths.polymorphism),
        depths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceIndex;

    fn chain_index() -> SourceIndex {
        SourceIndex::from_sources(vec![
            ("a/C.java", "package a;\npublic class C extends B {}\n".to_string()),
            ("a/B.java", "package a;\npublic class B extends A {}\n".to_string()),
            ("a/A.java", "package a;\npublic class A extends RuntimeException {}\n".to_string()),
            ("a/Loop.java", "package a;\npublic class Loop extends Loop {}\n".to_string()),
        ])
    }

    fn names(types: &[&TypeDescriptor]) -> Vec<String> {
        types.iter().map(|t| t.qualified_name.clone()).collect()
    }

    #[test]
    fn test_depth_limits_chain() {
        let index = chain_index();
        let c = index.resolve("a.C").unwrap();

        assert_eq!(names(&select_types(&index, c, 1)), vec!["a.C"]);
        assert_eq!(names(&select_types(&index, c, 2)), vec!["a.C", "a.B"]);
        assert_eq!(names(&select_types(&index, c, 3)), vec!["a.C", "a.B", "a.A"]);
    }

    #[test]
    fn test_stops_at_standard_library() {
        let index = chain_index();
        let c = index.resolve("a.C").unwrap();

        let selected = select_types(&index, c, 10);
        assert_eq!(names(&selected), vec!["a.C", "a.B", "a.A"]);
        assert!(selected
            .iter()
            .all(|t| !t.qualified_name.starts_with(STANDARD_LIBRARY_PREFIX)));
    }

    #[test]
    fn test_self_cycle_is_not_duplicated() {
        let index = chain_index();
        let looped = index.resolve("a.Loop").unwrap();
        assert_eq!(names(&select_types(&index, looped, 5)), vec!["a.Loop"]);
    }

    #[test]
    fn test_unresolvable_parent_stops() {
        let index = SourceIndex::from_sources(vec![(
            "x/Y.java",
            "package x;\nimport lib.External;\npublic class Y extends External {}\n".to_string(),
        )]);
        let y = index.resolve("x.Y").unwrap();
        assert_eq!(names(&select_types(&index, y, 3)), vec!["x.Y"]);
    }

    #[test]
    fn test_depth_reduction_order() {
        let depths = PromptDepths::new(2, 2);
        let (step1, knob1) = depths.reduced().unwrap();
        assert_eq!(step1, PromptDepths::new(1, 2));
        assert_eq!(knob1, DepthKnob::Polymorphism);

        let (step2, knob2) = step1.reduced().unwrap();
        assert_eq!(step2, PromptDepths::new(1, 1));
        assert_eq!(knob2, DepthKnob::InputParams);

        assert!(step2.reduced().is_none());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(CodeFragmentTarget::Class.to_string(), "class");
        assert_eq!(
            CodeFragmentTarget::Method("add(int,int)".to_string()).to_string(),
            "method add(int,int)"
        );
        assert_eq!(CodeFragmentTarget::Line(7).to_string(), "line 7");
    }
}
