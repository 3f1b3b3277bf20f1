//! Centralized prompt definitions for test generation requests
//!
//! Request bodies are assembled by [`crate::prompt`] from these fragments.
//! Keeping the wording here makes it easier to maintain, test, and version.

/// System message sent at the start of every generation conversation.
pub const SYSTEM_PROMPT: &str = r#"You are an expert Java developer who writes focused, compilable JUnit 4 unit tests.

Always answer with a single ```java code block that contains one complete test class:
- the package declaration and every import the tests need
- one method per test case, each annotated with @Test
- no explanations outside the code block"#;

/// Instructions shared by class, method and line requests.
pub const TEST_GUIDELINES: &str = r#"Don't use @Before and @After test methods.
Make tests as atomic as possible.
All tests should be for JUnit 4.
In case of mocking, use Mockito 5. But, do not use mocking for all tests.
Name all methods according to the template - [MethodUnderTest][Scenario]Test, and use only English letters."#;

/// Header for a class-level request. `{class}` is the simple class name.
pub const CLASS_REQUEST: &str =
    "Generate unit tests in Java for {class} to achieve 100% line coverage for this class.";

/// Header for a method-level request.
pub const METHOD_REQUEST: &str =
    "Generate unit tests in Java for {class} to achieve 100% line coverage for method {method}.";

/// Header for a line-level request.
pub const LINE_REQUEST: &str =
    "Generate unit tests in Java for {class} only those that cover the line: `{line}` on line number {number}.";

/// Intro for the class under test source.
pub const CLASS_SOURCE_INTRO: &str = "The source code of class under test is as follows:";

/// Intro for the focused method source.
pub const METHOD_SOURCE_INTRO: &str = "The source code of method under test is as follows:";

/// Intro for a supertype signature block.
pub const SUPERTYPE_INTRO: &str = "{class} inherits from {supertype}, whose members are:";

/// Intro for a parameter type signature block.
pub const PARAMETER_TYPE_INTRO: &str =
    "The following type is used as an input parameter, its members are:";

/// Follow-up message sent when none of the generated tests compiled.
pub const COMPILATION_FEEDBACK: &str = r#"I received the following compilation errors for the tests you generated:
{errors}

Fix the errors and return the complete corrected test class."#;

/// Render a template by substituting `{key}` placeholders.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
