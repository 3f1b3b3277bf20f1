//! Source index for the project under test.
//!
//! Scans Java source roots and exposes the declared types through the
//! [`TypeResolver`] trait consumed by context selection and prompt building.

mod parser;

pub use parser::parse_file;
pub(crate) use parser::{erase_type, matching_brace, scan_source, SourceScan};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult};

/// Well-known `java.lang` types that never need an import.
const JAVA_LANG: &[&str] = &[
    "Object",
    "String",
    "Exception",
    "RuntimeException",
    "Error",
    "Throwable",
    "Thread",
    "Number",
    "Enum",
    "Record",
    "Comparable",
    "Runnable",
    "Iterable",
    "AutoCloseable",
    "Cloneable",
    "CharSequence",
];

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// `class`
    Class,
    /// `interface`
    Interface,
    /// `enum`
    Enum,
    /// `record`
    Record,
}

/// A method or constructor declared in a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Simple method name.
    pub name: String,
    /// Whitespace-normalized parameter types in declaration order.
    pub parameter_types: Vec<String>,
    /// Return type, `None` for constructors.
    pub return_type: Option<String>,
    /// Whether this is a constructor.
    pub is_constructor: bool,
    /// Declaration text up to the body.
    pub signature: String,
    /// Full declaration text including the body.
    pub body: String,
    /// First line of the declaration (1-based).
    pub start_line: u32,
    /// Last line of the declaration (1-based).
    pub end_line: u32,
}

impl MethodDescriptor {
    /// Descriptor in `name(type,type)` form.
    pub fn descriptor(&self) -> String {
        format!("{}({})", self.name, self.parameter_types.join(","))
    }

    /// Whether `line` falls inside this declaration.
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A type declared in the project sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Fully-qualified name.
    pub qualified_name: String,
    /// Package name, empty for the default package.
    pub package: String,
    /// Simple name.
    pub simple_name: String,
    /// Declaration kind.
    pub kind: TypeKind,
    /// Superclass as written in the source.
    pub superclass_ref: Option<String>,
    /// Resolved superclass FQN, filled in by the index.
    pub superclass: Option<String>,
    /// Implemented (or, for interfaces, extended) interfaces as written.
    pub interfaces: Vec<String>,
    /// Import declarations of the enclosing file.
    pub imports: Vec<String>,
    /// Declaration source text.
    pub source: String,
    /// File the type is declared in.
    pub file_path: PathBuf,
    /// First line of the declaration (1-based).
    pub start_line: u32,
    /// Last line of the declaration (1-based).
    pub end_line: u32,
    /// Declared methods and constructors.
    pub methods: Vec<MethodDescriptor>,
}

impl TypeDescriptor {
    /// Source file path relative to its source root, `pkg/sub/Name.java`.
    pub fn qualified_file_path(&self) -> String {
        let file_name = self
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.java", self.simple_name));
        if self.package.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.package.replace('.', "/"), file_name)
        }
    }

    /// Look up a method by `name(types)` descriptor, or by bare name.
    pub fn method_by_descriptor(&self, descriptor: &str) -> Option<&MethodDescriptor> {
        let wanted: String = descriptor.split_whitespace().collect();
        if wanted.contains('(') {
            self.methods.iter().find(|m| m.descriptor() == wanted)
        } else {
            self.methods.iter().find(|m| m.name == wanted)
        }
    }

    /// The method whose declaration spans `line`.
    pub fn method_at_line(&self, line: u32) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.contains_line(line))
    }

    /// Text of an absolute source line, if it belongs to this declaration.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line < self.start_line || line > self.end_line {
            return None;
        }
        self.source
            .lines()
            .nth((line - self.start_line) as usize)
    }

    /// Declaration header plus member signatures, without bodies.
    pub fn signature_summary(&self) -> String {
        let header = self.source.lines().next().unwrap_or_default().trim_end();
        let mut out = String::from(header);
        out.push('\n');
        for method in &self.methods {
            out.push_str("    ");
            out.push_str(&method.signature);
            out.push_str(";\n");
        }
        out.push('}');
        out
    }

    /// Best-effort qualification of a type reference used inside this type.
    pub fn qualify(&self, raw: &str) -> String {
        let name = erase_type(raw);
        if name.contains('.') || is_primitive(&name) {
            return name;
        }
        if let Some(import) = self
            .imports
            .iter()
            .find(|i| i.rsplit('.').next() == Some(name.as_str()))
        {
            return import.clone();
        }
        if JAVA_LANG.contains(&name.as_str()) {
            return format!("java.lang.{}", name);
        }
        if self.package.is_empty() {
            name
        } else {
            format!("{}.{}", self.package, name)
        }
    }
}

fn is_primitive(name: &str) -> bool {
    matches!(
        name,
        "int" | "long" | "short" | "byte" | "char" | "boolean" | "float" | "double" | "void"
    )
}

/// Lookup of project types by name.
pub trait TypeResolver: Send + Sync {
    /// Find a type by its fully-qualified name.
    fn resolve(&self, qualified_name: &str) -> Option<&TypeDescriptor>;

    /// Find the project type a reference inside `from` points to.
    fn resolve_reference(&self, from: &TypeDescriptor, name: &str) -> Option<&TypeDescriptor> {
        self.resolve(&from.qualify(name))
    }
}

/// In-memory index of the types declared under a set of source roots.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    types: HashMap<String, TypeDescriptor>,
    roots: Vec<PathBuf>,
}

impl SourceIndex {
    /// Scan all `.java` files below the given roots.
    pub fn scan(roots: &[PathBuf]) -> BuildResult<Self> {
        let mut files = Vec::new();
        for root in roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "Source root does not exist, skipping");
                continue;
            }
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                let path = entry.path();
                if entry.file_type().is_file()
                    && path.extension().map(|e| e == "java").unwrap_or(false)
                {
                    let text = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                    files.push((path.to_path_buf(), text));
                }
            }
        }

        let mut index = Self::from_sources(files);
        index.roots = roots.to_vec();
        info!(
            roots = roots.len(),
            types = index.types.len(),
            "Source index built"
        );
        Ok(index)
    }

    /// Build an index from `(path, source)` pairs.
    pub fn from_sources<P: AsRef<Path>>(files: impl IntoIterator<Item = (P, String)>) -> Self {
        let mut types = HashMap::new();
        for (path, text) in files {
            for ty in parse_file(path.as_ref(), &text) {
                debug!(type_name = %ty.qualified_name, methods = ty.methods.len(), "Indexed type");
                types.insert(ty.qualified_name.clone(), ty);
            }
        }

        let mut index = Self {
            types,
            roots: Vec::new(),
        };
        index.link_superclasses();
        index
    }

    fn link_superclasses(&mut self) {
        let resolved: Vec<(String, String)> = self
            .types
            .values()
            .filter_map(|ty| {
                let raw = ty.superclass_ref.as_ref()?;
                Some((ty.qualified_name.clone(), self.qualify_known(ty, raw)))
            })
            .collect();

        for (name, superclass) in resolved {
            if let Some(ty) = self.types.get_mut(&name) {
                ty.superclass = Some(superclass);
            }
        }
    }

    /// Qualify a reference, preferring project types reachable through wildcard imports.
    fn qualify_known(&self, from: &TypeDescriptor, raw: &str) -> String {
        let qualified = from.qualify(raw);
        if self.types.contains_key(&qualified) {
            return qualified;
        }
        let name = erase_type(raw);
        from.imports
            .iter()
            .filter_map(|i| i.strip_suffix(".*"))
            .map(|prefix| format!("{}.{}", prefix, name))
            .find(|candidate| self.types.contains_key(candidate))
            .unwrap_or(qualified)
    }

    /// Source roots the index was built from.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Number of indexed types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeResolver for SourceIndex {
    fn resolve(&self, qualified_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(qualified_name)
    }

    fn resolve_reference(&self, from: &TypeDescriptor, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(&self.qualify_known(from, name))
    }
}
