//! Generation request rendering with adaptive size reduction.
//!
//! A request is rendered from the [`GenerationContext`] for a
//! [`CodeFragmentTarget`]. When it exceeds the provider's character budget,
//! the polymorphism depth and then the input-parameter depth are lowered one
//! step at a time until the request fits or both are at [`DEPTH_FLOOR`].

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::context::{CodeFragmentTarget, DepthKnob, GenerationContext, PromptDepths, DEPTH_FLOOR};
use crate::error::{PipelineError, PipelineResult};
use crate::prompts::{
    render, CLASS_REQUEST, CLASS_SOURCE_INTRO, LINE_REQUEST, METHOD_REQUEST, METHOD_SOURCE_INTRO,
    PARAMETER_TYPE_INTRO, SUPERTYPE_INTRO, TEST_GUIDELINES,
};
use crate::source::{MethodDescriptor, TypeDescriptor, TypeResolver};

/// A rendered request together with the depths it was rendered at.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    /// Request text.
    pub text: String,
    /// Depths the final text was rendered with.
    pub depths: PromptDepths,
    /// Number of polymorphism-depth reductions applied.
    pub poly_depth_reductions: u32,
    /// Number of input-parameter-depth reductions applied.
    pub input_params_depth_reductions: u32,
    /// Whether the text fits the budget.
    pub within_budget: bool,
}

impl BuiltRequest {
    /// Whether any reduction step was applied.
    pub fn was_reduced(&self) -> bool {
        self.poly_depth_reductions + self.input_params_depth_reductions > 0
    }

    /// One-time user-facing warning describing the reduction, if any happened.
    pub fn reduction_warning(&self) -> Option<String> {
        if !self.was_reduced() {
            return None;
        }
        let mut message = format!(
            "The request was too large and has been reduced.\nMaximum depth of polymorphism is {}.\nMaximum depth for input parameters is {}.",
            self.depths.polymorphism, self.depths.input_params
        );
        if !self.within_budget {
            message.push_str("\nThe request still exceeds the size limit of the provider.");
        }
        Some(message)
    }
}

/// Renders bounded-size generation requests.
pub struct RequestBuilder<'a> {
    resolver: &'a dyn TypeResolver,
    max_chars: usize,
}

impl<'a> RequestBuilder<'a> {
    /// Create a builder with the provider's character budget.
    pub fn new(resolver: &'a dyn TypeResolver, max_chars: usize) -> Self {
        Self {
            resolver,
            max_chars,
        }
    }

    /// Whether `text` fits the character budget.
    pub fn is_within_limit(&self, text: &str) -> bool {
        text.chars().count() <= self.max_chars
    }

    /// Render the request for `target` at the given depths.
    pub fn build(
        &self,
        context: &GenerationContext<'_>,
        target: &CodeFragmentTarget,
        depths: PromptDepths,
    ) -> PipelineResult<String> {
        let cut = context.target_type();
        let mut sections: Vec<String> = Vec::new();

        let focus: Vec<&MethodDescriptor> = match target {
            CodeFragmentTarget::Class => {
                sections.push(render(CLASS_REQUEST, &[("class", cut.simple_name.as_str())]));
                sections.push(TEST_GUIDELINES.to_string());
                sections.push(format!("{}\n```java\n{}\n```", CLASS_SOURCE_INTRO, cut.source));
                cut.methods.iter().collect()
            }
            CodeFragmentTarget::Method(descriptor) => {
                let method = cut.method_by_descriptor(descriptor).ok_or_else(|| {
                    PipelineError::MethodNotFound {
                        class_fqn: cut.qualified_name.clone(),
                        descriptor: descriptor.clone(),
                    }
                })?;
                sections.push(render(
                    METHOD_REQUEST,
                    &[("class", cut.simple_name.as_str()), ("method", method.descriptor().as_str())],
                ));
                sections.push(TEST_GUIDELINES.to_string());
                sections.push(format!("{}\n```java\n{}\n```", METHOD_SOURCE_INTRO, method.body));
                sections.push(format!(
                    "{}\n```java\n{}\n```",
                    CLASS_SOURCE_INTRO,
                    cut.signature_summary()
                ));
                vec![method]
            }
            CodeFragmentTarget::Line(line) => {
                let out_of_range = || PipelineError::LineOutOfRange {
                    class_fqn: cut.qualified_name.clone(),
                    line: *line,
                };
                let text = cut.line_text(*line).ok_or_else(out_of_range)?;
                let number = line.to_string();
                sections.push(render(
                    LINE_REQUEST,
                    &[
                        ("class", cut.simple_name.as_str()),
                        ("line", text.trim()),
                        ("number", number.as_str()),
                    ],
                ));
                sections.push(TEST_GUIDELINES.to_string());
                match cut.method_at_line(*line) {
                    Some(method) => {
                        sections.push(format!(
                            "{}\n```java\n{}\n```",
                            METHOD_SOURCE_INTRO, method.body
                        ));
                        sections.push(format!(
                            "{}\n```java\n{}\n```",
                            CLASS_SOURCE_INTRO,
                            cut.signature_summary()
                        ));
                        vec![method]
                    }
                    None => {
                        sections.push(format!(
                            "{}\n```java\n{}\n```",
                            CLASS_SOURCE_INTRO, cut.source
                        ));
                        Vec::new()
                    }
                }
            }
        };

        sections.extend(self.supertype_sections(context, depths.polymorphism));
        sections.extend(self.parameter_sections(context, &focus, depths.input_params));

        Ok(sections.join("\n\n"))
    }

    /// Render the request, reducing depths until it fits the budget.
    pub fn build_within_budget(
        &self,
        context: &GenerationContext<'_>,
        target: &CodeFragmentTarget,
    ) -> PipelineResult<BuiltRequest> {
        let mut depths = context.depths;
        let mut poly_depth_reductions = 0;
        let mut input_params_depth_reductions = 0;

        loop {
            let text = self.build(context, target, depths)?;
            let within_budget = self.is_within_limit(&text);

            if within_budget {
                return Ok(BuiltRequest {
                    text,
                    depths,
                    poly_depth_reductions,
                    input_params_depth_reductions,
                    within_budget,
                });
            }

            match depths.reduced() {
                Some((next, knob)) => {
                    match knob {
                        DepthKnob::Polymorphism => poly_depth_reductions += 1,
                        DepthKnob::InputParams => input_params_depth_reductions += 1,
                    }
                    info!(
                        chars = text.chars().count(),
                        budget = self.max_chars,
                        poly_depth = next.polymorphism,
                        input_params_depth = next.input_params,
                        "Request over budget, reducing depth"
                    );
                    depths = next;
                }
                None => {
                    warn!(
                        chars = text.chars().count(),
                        budget = self.max_chars,
                        "Request still over budget at depth floor"
                    );
                    return Ok(BuiltRequest {
                        text,
                        depths,
                        poly_depth_reductions,
                        input_params_depth_reductions,
                        within_budget,
                    });
                }
            }
        }
    }

    /// Supertypes shown at the given polymorphism depth.
    ///
    /// Depth 1 shows only the class under test; each extra level adds one
    /// ancestor from the context and, from depth 2, the project interfaces
    /// the class implements.
    fn supertype_sections(&self, context: &GenerationContext<'_>, polymorphism: u32) -> Vec<String> {
        let cut = context.target_type();
        let mut shown: Vec<&TypeDescriptor> = context
            .ancestors()
            .iter()
            .take(polymorphism.saturating_sub(DEPTH_FLOOR) as usize)
            .copied()
            .collect();

        if polymorphism > DEPTH_FLOOR {
            for interface in &cut.interfaces {
                if let Some(found) = self.resolver.resolve_reference(cut, interface) {
                    if !shown.iter().any(|t| t.qualified_name == found.qualified_name) {
                        shown.push(found);
                    }
                }
            }
        }

        shown
            .into_iter()
            .map(|supertype| {
                format!(
                    "{}\n```java\n{}\n```",
                    render(
                        SUPERTYPE_INTRO,
                        &[
                            ("class", cut.simple_name.as_str()),
                            ("supertype", supertype.qualified_name.as_str())
                        ]
                    ),
                    supertype.signature_summary()
                )
            })
            .collect()
    }

    /// Project types reachable from the focus methods' parameters, breadth-first up to `depth`.
    fn parameter_sections(
        &self,
        context: &GenerationContext<'_>,
        focus: &[&MethodDescriptor],
        depth: u32,
    ) -> Vec<String> {
        let cut = context.target_type();
        let mut seen: HashSet<&str> = context
            .types
            .iter()
            .map(|t| t.qualified_name.as_str())
            .collect();
        let mut queue: VecDeque<(&TypeDescriptor, u32)> = VecDeque::new();

        for method in focus {
            for param in &method.parameter_types {
                if let Some(found) = self.resolver.resolve_reference(cut, param) {
                    if seen.insert(found.qualified_name.as_str()) {
                        queue.push_back((found, 1));
                    }
                }
            }
        }

        let mut sections = Vec::new();
        while let Some((ty, level)) = queue.pop_front() {
            if level > depth {
                continue;
            }
            debug!(type_name = %ty.qualified_name, level, "Expanding parameter type");
            sections.push(format!(
                "{}\n```java\n{}\n```",
                PARAMETER_TYPE_INTRO,
                ty.signature_summary()
            ));

            for method in &ty.methods {
                for param in &method.parameter_types {
                    if let Some(found) = self.resolver.resolve_reference(ty, param) {
                        if seen.insert(found.qualified_name.as_str()) {
                            queue.push_back((found, level + 1));
                        }
                    }
                }
            }
        }
        sections
    }
}
