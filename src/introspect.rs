//! Java declaration introspection using tree-sitter AST parsing.
//!
//! Loading a type means parsing the file that declares it and reading the
//! annotations written on the type, its methods and its properties (fields,
//! record components and enum constants). Annotation names are resolved to
//! fully-qualified names through the file's package and imports.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser};

/// Member name used for constructors, as in JVM descriptors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

const JAVA_LANG: &[&str] = &[
    "Deprecated",
    "FunctionalInterface",
    "Override",
    "SafeVarargs",
    "SuppressWarnings",
];

const JAVA_LANG_ANNOTATION: &[&str] = &[
    "Documented",
    "Inherited",
    "Native",
    "Repeatable",
    "Retention",
    "Target",
];

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("type '{0}' has no known source location")]
    UnknownType(String),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: source has syntax errors", .0.display())]
    Syntax(PathBuf),
    #[error("type '{type_name}' is not declared in {}", .path.display())]
    TypeNotDeclared { type_name: String, path: PathBuf },
    #[error("type '{type_name}' has no {kind} '{member}'")]
    MemberNotFound {
        type_name: String,
        kind: MemberKind,
        member: String,
    },
    #[error("annotation '{kind}' (occurrence {occurrence}) no longer present on {target}")]
    AnnotationNotFound {
        kind: String,
        target: String,
        occurrence: usize,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Class,
    Interface,
    Enum,
    Record,
    AnnotationType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Property,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberKind::Method => f.write_str("method"),
            MemberKind::Property => f.write_str("property"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Argument>,
}

/// One `name = value` element. The single-element form `@A(x)` has no name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Char(String),
    Null,
    Class(String),
    Constant(String),
    Array(Vec<Value>),
    Annotation(Box<Annotation>),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub kind: MemberKind,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub kind: DeclKind,
    pub annotations: Vec<Annotation>,
    pub members: Vec<Member>,
}

/// What the extractor needs from a loaded type.
pub trait Introspectable {
    fn name(&self) -> &str;

    fn kind(&self) -> DeclKind;

    fn declared_annotations(&self) -> &[Annotation];

    fn declared_members(&self) -> &[Member];
}

impl Introspectable for TypeDecl {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeclKind {
        self.kind
    }

    fn declared_annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    fn declared_members(&self) -> &[Member] {
        &self.members
    }
}

impl TypeDecl {
    pub fn member(&self, kind: MemberKind, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.kind == kind && m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilationUnit {
    pub package: Option<String>,
    pub types: Vec<TypeDecl>,
}

impl CompilationUnit {
    /// Parses a Java source file. Returns `None` if the source is empty or has
    /// syntax errors. `known` reports whether a fully-qualified type exists in
    /// the scanned tree and is used to resolve on-demand imports.
    pub fn parse(source: &str, known: &dyn Fn(&str) -> bool) -> Option<Self> {
        if source.trim().is_empty() {
            return None;
        }

        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .ok()?;
        let tree = parser.parse(source, None)?;
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }
        let bytes = source.as_bytes();

        let mut scope = Scope {
            package: None,
            imports: HashMap::new(),
            wildcards: Vec::new(),
            known,
        };

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "package_declaration" => scope.package = extract_package(&child, bytes),
                "import_declaration" => scope.add_import(&child, bytes),
                _ => {}
            }
        }

        let mut types = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            collect_types(&child, scope.package.as_deref(), bytes, &scope, &mut types);
        }

        Some(Self {
            package: scope.package,
            types,
        })
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|t| t.name == type_name)
    }

    pub fn into_type(self, type_name: &str) -> Option<TypeDecl> {
        self.types.into_iter().find(|t| t.name == type_name)
    }
}

/// Loads types from source, either at a given path or by name through a
/// location table. Holds no mutable state.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    locations: HashMap<String, PathBuf>,
    extra_known: HashSet<String>,
}

impl SourceLoader {
    pub fn new(locations: HashMap<String, PathBuf>) -> Self {
        Self {
            locations,
            extra_known: HashSet::new(),
        }
    }

    /// Also treats `names` as existing types when resolving wildcard and
    /// same-package annotation names.
    pub fn with_known<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.extra_known.extend(names);
        self
    }

    pub fn locations(&self) -> &HashMap<String, PathBuf> {
        &self.locations
    }

    pub fn load_unit(&self, path: &Path) -> Result<CompilationUnit, IntrospectionError> {
        let bytes = std::fs::read(path).map_err(|source| IntrospectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = String::from_utf8_lossy(&bytes);
        let known = |t: &str| self.locations.contains_key(t) || self.extra_known.contains(t);
        CompilationUnit::parse(&source, &known)
            .ok_or_else(|| IntrospectionError::Syntax(path.to_path_buf()))
    }

    pub fn load_at(&self, path: &Path, type_name: &str) -> Result<TypeDecl, IntrospectionError> {
        self.load_unit(path)?
            .into_type(type_name)
            .ok_or_else(|| IntrospectionError::TypeNotDeclared {
                type_name: type_name.to_string(),
                path: path.to_path_buf(),
            })
    }

    pub fn load(&self, type_name: &str) -> Result<TypeDecl, IntrospectionError> {
        let path = self
            .locations
            .get(type_name)
            .ok_or_else(|| IntrospectionError::UnknownType(type_name.to_string()))?;
        self.load_at(path, type_name)
    }
}

struct Scope<'k> {
    package: Option<String>,
    imports: HashMap<String, String>,
    wildcards: Vec<String>,
    known: &'k dyn Fn(&str) -> bool,
}

impl Scope<'_> {
    fn add_import(&mut self, node: &Node, source: &[u8]) {
        let mut path = String::new();
        let mut is_static = false;
        let mut wildcard = false;

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "static" => is_static = true,
                "scoped_identifier" | "identifier" => {
                    path = node_text(&child, source).to_string();
                }
                "asterisk" => wildcard = true,
                _ => {}
            }
        }

        if path.is_empty() || is_static {
            return;
        }
        if wildcard {
            self.wildcards.push(path);
        } else if let Some((_, simple)) = path.rsplit_once('.') {
            self.imports.insert(simple.to_string(), path.clone());
        }
    }

    /// Resolves an annotation name as written to a fully-qualified name.
    fn resolve(&self, written: &str) -> String {
        let written: String = written.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(fqn) = self.lookup(&written) {
            return fqn;
        }

        let local = self.local(&written);
        if !self.wildcards.is_empty() {
            debug!(
                "No known type for @{written} under on-demand imports [{}]; assuming {local}",
                self.wildcards.join(", ")
            );
        }
        local
    }

    /// Resolution that does not fall back to guessing the file's package.
    fn lookup(&self, written: &str) -> Option<String> {
        if let Some((head, rest)) = written.split_once('.') {
            return Some(match self.imports.get(head) {
                Some(fqn) => format!("{fqn}.{rest}"),
                None => written.to_string(),
            });
        }

        if let Some(fqn) = self.imports.get(written) {
            return Some(fqn.clone());
        }

        let local = self.local(written);
        if (self.known)(&local) {
            return Some(local);
        }

        if JAVA_LANG.contains(&written) {
            return Some(format!("java.lang.{written}"));
        }

        self.wildcards.iter().find_map(|pkg| {
            let candidate = format!("{pkg}.{written}");
            let builtin = pkg == "java.lang.annotation" && JAVA_LANG_ANNOTATION.contains(&written);
            (builtin || (self.known)(&candidate)).then_some(candidate)
        })
    }

    fn local(&self, written: &str) -> String {
        match self.package.as_deref() {
            Some(pkg) => format!("{pkg}.{written}"),
            None => written.to_string(),
        }
    }
}

/// Pushes the type declared by `node`, then its member types as
/// `Outer.Inner`, outer first.
fn collect_types(
    node: &Node,
    prefix: Option<&str>,
    source: &[u8],
    scope: &Scope<'_>,
    types: &mut Vec<TypeDecl>,
) {
    let Some(kind) = decl_kind(node.kind()) else {
        return;
    };
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    let simple = node_text(&name, source);
    let name = match prefix {
        Some(prefix) => format!("{prefix}.{simple}"),
        None => simple.to_string(),
    };
    types.push(TypeDecl {
        name: name.clone(),
        kind,
        annotations: modifier_annotations(node, source, scope),
        members: extract_members(node, source, scope),
    });

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if child.kind() == "enum_body_declarations" {
            let mut inner = child.walk();
            for nested in child.named_children(&mut inner) {
                collect_types(&nested, Some(&name), source, scope, types);
            }
        } else {
            collect_types(&child, Some(&name), source, scope, types);
        }
    }
}

fn decl_kind(kind: &str) -> Option<DeclKind> {
    match kind {
        "class_declaration" => Some(DeclKind::Class),
        "interface_declaration" => Some(DeclKind::Interface),
        "enum_declaration" => Some(DeclKind::Enum),
        "record_declaration" => Some(DeclKind::Record),
        "annotation_type_declaration" => Some(DeclKind::AnnotationType),
        _ => None,
    }
}

fn extract_package(node: &Node, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
            return Some(node_text(&child, source).to_string());
        }
    }
    None
}

fn extract_members(node: &Node, source: &[u8], scope: &Scope<'_>) -> Vec<Member> {
    let mut members = Vec::new();

    if let Some(params) = node.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if param.kind() != "formal_parameter" {
                continue;
            }
            if let Some(name) = param.child_by_field_name("name") {
                members.push(Member {
                    name: node_text(&name, source).to_string(),
                    kind: MemberKind::Property,
                    annotations: modifier_annotations(&param, source, scope),
                });
            }
        }
    }

    let Some(body) = node.child_by_field_name("body") else {
        return members;
    };

    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        match child.kind() {
            "enum_constant" => {
                if let Some(name) = child.child_by_field_name("name") {
                    members.push(Member {
                        name: node_text(&name, source).to_string(),
                        kind: MemberKind::Property,
                        annotations: modifier_annotations(&child, source, scope),
                    });
                }
            }
            "enum_body_declarations" => {
                let mut inner_cursor = child.walk();
                for inner in child.named_children(&mut inner_cursor) {
                    push_body_member(&inner, source, scope, &mut members);
                }
            }
            _ => push_body_member(&child, source, scope, &mut members),
        }
    }

    members
}

fn push_body_member(node: &Node, source: &[u8], scope: &Scope<'_>, members: &mut Vec<Member>) {
    match node.kind() {
        "field_declaration" | "constant_declaration" => {
            let annotations = modifier_annotations(node, source, scope);
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                if let Some(name) = declarator.child_by_field_name("name") {
                    members.push(Member {
                        name: node_text(&name, source).to_string(),
                        kind: MemberKind::Property,
                        annotations: annotations.clone(),
                    });
                }
            }
        }
        "method_declaration" | "annotation_type_element_declaration" => {
            if let Some(name) = node.child_by_field_name("name") {
                members.push(Member {
                    name: node_text(&name, source).to_string(),
                    kind: MemberKind::Method,
                    annotations: modifier_annotations(node, source, scope),
                });
            }
        }
        "constructor_declaration" | "compact_constructor_declaration" => {
            members.push(Member {
                name: CONSTRUCTOR_NAME.to_string(),
                kind: MemberKind::Method,
                annotations: modifier_annotations(node, source, scope),
            });
        }
        _ => {}
    }
}

fn modifier_annotations(node: &Node, source: &[u8], scope: &Scope<'_>) -> Vec<Annotation> {
    let mut cursor = node.walk();
    let Some(modifiers) = node
        .children(&mut cursor)
        .find(|c| c.kind() == "modifiers")
    else {
        return Vec::new();
    };

    let mut annotations = Vec::new();
    let mut cursor = modifiers.walk();
    for child in modifiers.children(&mut cursor) {
        if let Some(annotation) = read_annotation(&child, source, scope) {
            annotations.push(annotation);
        }
    }
    annotations
}

fn read_annotation(node: &Node, source: &[u8], scope: &Scope<'_>) -> Option<Annotation> {
    if !matches!(node.kind(), "annotation" | "marker_annotation") {
        return None;
    }
    let name = node.child_by_field_name("name")?;
    let kind = scope.resolve(node_text(&name, source));

    let arguments = match node.child_by_field_name("arguments") {
        Some(list) => read_arguments(&list, source, scope),
        None => Vec::new(),
    };

    Some(Annotation { kind, arguments })
}

fn read_arguments(list: &Node, source: &[u8], scope: &Scope<'_>) -> Vec<Argument> {
    let mut arguments = Vec::new();
    let mut cursor = list.walk();
    for child in list.named_children(&mut cursor) {
        if is_comment(&child) {
            continue;
        }
        if child.kind() == "element_value_pair" {
            let (Some(key), Some(value)) = (
                child.child_by_field_name("key"),
                child.child_by_field_name("value"),
            ) else {
                continue;
            };
            arguments.push(Argument {
                name: Some(node_text(&key, source).to_string()),
                value: read_value(&value, source, scope),
            });
        } else {
            arguments.push(Argument {
                name: None,
                value: read_value(&child, source, scope),
            });
        }
    }
    arguments
}

fn read_value(node: &Node, source: &[u8], scope: &Scope<'_>) -> Value {
    let text = node_text(node, source);
    match node.kind() {
        "string_literal" => Value::String(unquote_string(text)),
        "character_literal" => Value::Char(unescape(text.trim_matches('\''))),
        "decimal_integer_literal"
        | "hex_integer_literal"
        | "octal_integer_literal"
        | "binary_integer_literal" => parse_integer(text)
            .map(Value::Integer)
            .unwrap_or_else(|| Value::Expression(text.to_string())),
        "decimal_floating_point_literal" => parse_float(text)
            .map(Value::Float)
            .unwrap_or_else(|| Value::Expression(text.to_string())),
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        "null_literal" => Value::Null,
        "class_literal" => {
            let ty = text.trim_end_matches("class").trim_end();
            Value::Class(normalize_whitespace(ty.trim_end_matches('.')))
        }
        "identifier" | "field_access" | "scoped_identifier" => {
            Value::Constant(normalize_whitespace(text))
        }
        "element_value_array_initializer" => {
            let mut cursor = node.walk();
            let values = node
                .named_children(&mut cursor)
                .filter(|c| !is_comment(c))
                .map(|c| read_value(&c, source, scope))
                .collect();
            Value::Array(values)
        }
        "annotation" | "marker_annotation" => match read_annotation(node, source, scope) {
            Some(annotation) => Value::Annotation(Box::new(annotation)),
            None => Value::Expression(normalize_whitespace(text)),
        },
        "parenthesized_expression" => {
            let mut cursor = node.walk();
            let inner = node.named_children(&mut cursor).find(|c| !is_comment(c));
            match inner {
                Some(inner) => read_value(&inner, source, scope),
                None => Value::Expression(normalize_whitespace(text)),
            }
        }
        "unary_expression" => negated_literal(node, source, scope)
            .unwrap_or_else(|| Value::Expression(normalize_whitespace(text))),
        _ => Value::Expression(normalize_whitespace(text)),
    }
}

fn negated_literal(node: &Node, source: &[u8], scope: &Scope<'_>) -> Option<Value> {
    let operator = node.child_by_field_name("operator")?;
    if node_text(&operator, source) != "-" {
        return None;
    }
    let operand = node.child_by_field_name("operand")?;
    match read_value(&operand, source, scope) {
        Value::Integer(v) => Some(Value::Integer(v.wrapping_neg())),
        Value::Float(v) => Some(Value::Float(-v)),
        _ => None,
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let digits: String = text
        .trim_end_matches(['l', 'L'])
        .chars()
        .filter(|c| *c != '_')
        .collect();
    let lower = digits.to_ascii_lowercase();

    if let Some(hex) = lower.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as i64);
    }
    if let Some(bin) = lower.strip_prefix("0b") {
        return u64::from_str_radix(bin, 2).ok().map(|v| v as i64);
    }
    if lower.len() > 1 && lower.starts_with('0') {
        return u64::from_str_radix(&lower[1..], 8).ok().map(|v| v as i64);
    }
    lower.parse::<i64>().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    let digits: String = text
        .trim_end_matches(['f', 'F', 'd', 'D'])
        .chars()
        .filter(|c| *c != '_')
        .collect();
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn unquote_string(text: &str) -> String {
    if let Some(block) = text
        .strip_prefix("\"\"\"")
        .and_then(|t| t.strip_suffix("\"\"\""))
    {
        let body = block.strip_prefix('\n').unwrap_or(block);
        return unescape(&strip_text_block_indent(body));
    }
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    unescape(inner)
}

fn strip_text_block_indent(body: &str) -> String {
    let indent = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|l| {
            let cut = indent.min(l.len() - l.trim_start().len());
            l[cut..].trim_end()
        })
        .collect::<Vec<_>>()
        .join("\n")
        + if body.ends_with('\n') { "\n" } else { "" }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('s') => out.push(' '),
            Some('u') => {
                while chars.peek() == Some(&'u') {
                    chars.next();
                }
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(next) if code * 8 + next <= 0o377 => {
                            code = code * 8 + next;
                            chars.next();
                        }
                        _ => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\0'));
            }
            Some('\n') => {}
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn is_comment(node: &Node) -> bool {
    matches!(node.kind(), "line_comment" | "block_comment")
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
