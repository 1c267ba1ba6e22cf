use tree_sitter::{Node, Parser};

use crate::application::ChunkerService;
use crate::domain::{ChunkKind, DomainError, Language, RawChunk};

/// Tree-sitter backed symbol chunker.
///
/// Grammars form a registry keyed by [`Language`]; adding a language means
/// wiring one more grammar into `get_ts_language` plus a kind-name mapping,
/// never subclassing. Extraction walks the tree directly rather than using
/// query patterns: parent tracking across nested classes is what the
/// hierarchy needs most, and a cursor walk keeps it exact. Top-level
/// functions become function chunks; each class yields a header chunk plus
/// one chunk per method; nested classes recurse with a dotted parent path.
pub struct TreeSitterChunker {
    supported_languages: Vec<Language>,
}

impl TreeSitterChunker {
    pub fn new() -> Self {
        Self {
            supported_languages: vec![
                Language::Python,
                Language::Rust,
                Language::JavaScript,
                Language::TypeScript,
                Language::Go,
            ],
        }
    }

    fn get_ts_language(&self, language: Language) -> Option<tree_sitter::Language> {
        match language {
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }
}

impl Default for TreeSitterChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkerService for TreeSitterChunker {
    fn chunk(
        &self,
        source: &str,
        path: &str,
        language: Language,
    ) -> Result<Vec<RawChunk>, DomainError> {
        let ts_language = self
            .get_ts_language(language)
            .ok_or_else(|| DomainError::parse(format!("Unsupported language: {:?}", language)))?;

        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| DomainError::parse(format!("Failed to set language: {}", e)))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| DomainError::parse("Failed to parse file"))?;

        let mut extractor = Extractor {
            source,
            path,
            language,
            chunks: Vec::new(),
        };
        extractor.walk_container(tree.root_node(), None);
        Ok(extractor.chunks)
    }

    fn supported_languages(&self) -> Vec<Language> {
        self.supported_languages.clone()
    }
}

struct Extractor<'a> {
    source: &'a str,
    path: &'a str,
    language: Language,
    chunks: Vec<RawChunk>,
}

impl<'a> Extractor<'a> {
    fn text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }

    fn walk_container(&mut self, node: Node, parent_class: Option<&str>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, parent_class, Vec::new());
        }
    }

    fn visit(&mut self, node: Node, parent_class: Option<&str>, decorators: Vec<String>) {
        match (self.language, node.kind()) {
            (Language::Python, "decorated_definition") => {
                let mut decorators = decorators;
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in &children {
                    if child.kind() == "decorator" {
                        decorators.push(self.text(*child).trim().to_string());
                    }
                }
                for child in children {
                    if child.kind() != "decorator" {
                        self.visit(child, parent_class, std::mem::take(&mut decorators));
                    }
                }
            }
            (Language::Python, "function_definition") => {
                self.emit_python_function(node, parent_class, decorators);
            }
            (Language::Python, "class_definition") => {
                self.emit_python_class(node, parent_class, decorators);
            }

            (Language::Rust, "function_item") => {
                self.emit_rust_function(node, parent_class);
            }
            (Language::Rust, "struct_item")
            | (Language::Rust, "enum_item")
            | (Language::Rust, "trait_item") => {
                self.emit_rust_type(node);
            }
            (Language::Rust, "impl_item") => {
                let type_name = node
                    .child_by_field_name("type")
                    .map(|t| self.text(t).trim().to_string());
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_container(body, type_name.as_deref());
                }
            }
            (Language::Rust, "mod_item") => {
                // Inline modules keep their items top-level for chunking.
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_container(body, parent_class);
                }
            }

            (Language::JavaScript, "export_statement")
            | (Language::TypeScript, "export_statement") => {
                if let Some(declaration) = node.child_by_field_name("declaration") {
                    self.visit(declaration, parent_class, decorators);
                }
            }
            (Language::JavaScript, "function_declaration")
            | (Language::TypeScript, "function_declaration") => {
                self.emit_js_function(node, parent_class);
            }
            (Language::JavaScript, "class_declaration")
            | (Language::TypeScript, "class_declaration") => {
                self.emit_js_class(node, parent_class);
            }
            (Language::TypeScript, "interface_declaration") => {
                self.emit_header_only(node, ChunkKind::ClassHeader, parent_class);
            }

            (Language::Go, "function_declaration") => {
                self.emit_go_function(node);
            }
            (Language::Go, "method_declaration") => {
                self.emit_go_method(node);
            }
            (Language::Go, "type_declaration") => {
                self.emit_go_type(node);
            }

            _ => {}
        }
    }

    fn base_chunk(&self, node: Node, kind: ChunkKind) -> RawChunk {
        RawChunk::new(
            self.path,
            self.language,
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
            kind,
            self.text(node),
        )
    }

    fn emit_python_function(
        &mut self,
        node: Node,
        parent_class: Option<&str>,
        decorators: Vec<String>,
    ) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let kind = if parent_class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };
        let mut chunk = self
            .base_chunk(node, kind)
            .with_symbol_name(self.text(name))
            .with_decorators(decorators)
            .with_parameters(self.parameter_names(node.child_by_field_name("parameters")));
        if let Some(parent) = parent_class {
            chunk = chunk.with_parent_symbol(parent);
        }
        if let Some(docstring) = self.python_docstring(node) {
            chunk = chunk.with_docstring(docstring);
        }
        self.chunks.push(chunk);
    }

    fn emit_python_class(
        &mut self,
        node: Node,
        parent_class: Option<&str>,
        decorators: Vec<String>,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let class_path = match parent_class {
            Some(outer) => format!("{}.{}", outer, name),
            None => name.clone(),
        };

        // Header chunk: signature line plus the class docstring. The span
        // covers only those lines; the class body is represented by its
        // method chunks, so a bare class wrapper stays below the min-lines
        // rule and produces no symbol document of its own.
        let signature = self
            .text(node)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        let docstring = self.python_docstring(node);
        let header_content = match &docstring {
            Some(doc) => format!("{}\n    \"\"\"{}\"\"\"", signature, doc),
            None => signature,
        };
        let start_line = node.start_position().row as u32 + 1;
        let header_lines = header_content.lines().count().max(1) as u32;
        let mut header = RawChunk::new(
            self.path,
            self.language,
            start_line,
            start_line + header_lines - 1,
            ChunkKind::ClassHeader,
            header_content,
        )
        .with_symbol_name(&name)
        .with_decorators(decorators);
        if let Some(parent) = parent_class {
            header = header.with_parent_symbol(parent);
        }
        if let Some(doc) = docstring {
            header = header.with_docstring(doc);
        }
        self.chunks.push(header);

        if let Some(body) = node.child_by_field_name("body") {
            self.walk_container(body, Some(&class_path));
        }
    }

    /// First statement of a Python definition body, when it is a string.
    fn python_docstring(&self, node: Node) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first = body.named_children(&mut cursor).next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let mut inner_cursor = first.walk();
        let string_node = first
            .named_children(&mut inner_cursor)
            .find(|n| n.kind() == "string")?;
        let raw = self.text(string_node);
        let stripped = raw
            .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F'])
            .trim_start_matches("\"\"\"")
            .trim_start_matches("'''")
            .trim_start_matches(['"', '\''])
            .trim_end_matches("\"\"\"")
            .trim_end_matches("'''")
            .trim_end_matches(['"', '\''])
            .trim();
        if stripped.is_empty() {
            None
        } else {
            Some(stripped.to_string())
        }
    }

    fn emit_rust_function(&mut self, node: Node, parent_class: Option<&str>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let kind = if parent_class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };
        let mut chunk = self
            .base_chunk(node, kind)
            .with_symbol_name(self.text(name))
            .with_parameters(self.parameter_names(node.child_by_field_name("parameters")));
        if let Some(parent) = parent_class {
            chunk = chunk.with_parent_symbol(parent);
        }
        if let Some(doc) = self.leading_line_comments(node, "///") {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    fn emit_rust_type(&mut self, node: Node) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut chunk = self
            .base_chunk(node, ChunkKind::ClassHeader)
            .with_symbol_name(self.text(name));
        if let Some(doc) = self.leading_line_comments(node, "///") {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    fn emit_js_function(&mut self, node: Node, parent_class: Option<&str>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut chunk = self
            .base_chunk(node, ChunkKind::Function)
            .with_symbol_name(self.text(name))
            .with_parameters(self.parameter_names(node.child_by_field_name("parameters")));
        if let Some(parent) = parent_class {
            chunk = chunk.with_parent_symbol(parent);
        }
        if let Some(doc) = self.leading_block_comment(node) {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    fn emit_js_class(&mut self, node: Node, parent_class: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let class_path = match parent_class {
            Some(outer) => format!("{}.{}", outer, name),
            None => name.clone(),
        };
        self.emit_header_only(node, ChunkKind::ClassHeader, parent_class);

        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            let members: Vec<Node> = body.named_children(&mut cursor).collect();
            for member in members {
                if member.kind() == "method_definition" {
                    let Some(method_name) = member.child_by_field_name("name") else {
                        continue;
                    };
                    let mut chunk = self
                        .base_chunk(member, ChunkKind::Method)
                        .with_symbol_name(self.text(method_name))
                        .with_parent_symbol(&class_path)
                        .with_parameters(
                            self.parameter_names(member.child_by_field_name("parameters")),
                        );
                    if let Some(doc) = self.leading_block_comment(member) {
                        chunk = chunk.with_docstring(doc);
                    }
                    self.chunks.push(chunk);
                } else if member.kind() == "class_declaration" {
                    self.emit_js_class(member, Some(&class_path));
                }
            }
        }
    }

    fn emit_go_function(&mut self, node: Node) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut chunk = self
            .base_chunk(node, ChunkKind::Function)
            .with_symbol_name(self.text(name))
            .with_parameters(self.parameter_names(node.child_by_field_name("parameters")));
        if let Some(doc) = self.leading_line_comments(node, "//") {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    fn emit_go_method(&mut self, node: Node) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let receiver_type = node.child_by_field_name("receiver").and_then(|receiver| {
            let mut cursor = receiver.walk();
            let result = receiver
                .named_children(&mut cursor)
                .next()
                .and_then(|param| param.child_by_field_name("type"))
                .map(|t| self.text(t).trim_start_matches(['*', '&']).to_string());
            result
        });
        let mut chunk = self
            .base_chunk(node, ChunkKind::Method)
            .with_symbol_name(self.text(name))
            .with_parameters(self.parameter_names(node.child_by_field_name("parameters")));
        if let Some(receiver) = receiver_type {
            chunk = chunk.with_parent_symbol(receiver);
        }
        if let Some(doc) = self.leading_line_comments(node, "//") {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    fn emit_go_type(&mut self, node: Node) {
        let mut cursor = node.walk();
        let specs: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "type_spec")
            .collect();
        for spec in specs {
            let Some(name) = spec.child_by_field_name("name") else {
                continue;
            };
            let mut chunk = self
                .base_chunk(node, ChunkKind::ClassHeader)
                .with_symbol_name(self.text(name));
            if let Some(doc) = self.leading_line_comments(node, "//") {
                chunk = chunk.with_docstring(doc);
            }
            self.chunks.push(chunk);
        }
    }

    fn emit_header_only(&mut self, node: Node, kind: ChunkKind, parent_class: Option<&str>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let signature = self
            .text(node)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        let start_line = node.start_position().row as u32 + 1;
        let mut chunk = RawChunk::new(
            self.path,
            self.language,
            start_line,
            start_line,
            kind,
            signature,
        )
        .with_symbol_name(self.text(name));
        if let Some(parent) = parent_class {
            chunk = chunk.with_parent_symbol(parent);
        }
        if let Some(doc) = self.leading_block_comment(node) {
            chunk = chunk.with_docstring(doc);
        }
        self.chunks.push(chunk);
    }

    /// Names from a parameter list node, annotations stripped.
    fn parameter_names(&self, parameters: Option<Node>) -> Vec<String> {
        let Some(parameters) = parameters else {
            return Vec::new();
        };
        let raw = self.text(parameters);
        let inner = raw
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();
        if inner.is_empty() {
            return Vec::new();
        }
        split_top_level(inner)
            .into_iter()
            .map(|p| {
                p.split([':', '='])
                    .next()
                    .unwrap_or(&p)
                    .trim()
                    .trim_start_matches(['*', '&'])
                    .to_string()
            })
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Contiguous `prefix`-style line comments directly above a node.
    fn leading_line_comments(&self, node: Node, prefix: &str) -> Option<String> {
        let mut lines = Vec::new();
        let mut current = node.prev_sibling();
        while let Some(sibling) = current {
            if sibling.kind() != "line_comment" && sibling.kind() != "comment" {
                break;
            }
            let text = self.text(sibling).trim();
            if !text.starts_with(prefix) {
                break;
            }
            lines.push(text.trim_start_matches(prefix).trim().to_string());
            current = sibling.prev_sibling();
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        Some(lines.join(" "))
    }

    /// A `/** ... */` block comment directly above a node.
    fn leading_block_comment(&self, node: Node) -> Option<String> {
        let sibling = node.prev_sibling()?;
        if sibling.kind() != "comment" {
            return None;
        }
        let raw = self.text(sibling).trim();
        if !raw.starts_with("/**") {
            return None;
        }
        let body = raw
            .trim_start_matches("/**")
            .trim_end_matches("*/")
            .lines()
            .map(|l| l.trim().trim_start_matches('*').trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if body.is_empty() {
            None
        } else {
            Some(body)
        }
    }
}

/// Split a parameter list on commas that are not nested inside brackets.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in input.chars() {
        match ch {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_source(source: &str, path: &str, language: Language) -> Vec<RawChunk> {
        TreeSitterChunker::new()
            .chunk(source, path, language)
            .expect("chunking failed")
    }

    #[test]
    fn test_python_top_level_functions() {
        let source = r#"
def add(a, b):
    """Add two numbers."""
    return a + b


def sub(a, b):
    return a - b
"#;
        let chunks = chunk_source(source, "util.py", Language::Python);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbol_name(), Some("add"));
        assert_eq!(chunks[0].kind(), ChunkKind::Function);
        assert_eq!(chunks[0].docstring(), Some("Add two numbers."));
        assert_eq!(chunks[0].parameters(), &["a".to_string(), "b".to_string()]);
        assert_eq!(chunks[1].symbol_name(), Some("sub"));
        assert!(chunks[1].parent_symbol().is_none());
    }

    #[test]
    fn test_python_class_with_methods() {
        let source = r#"
class Greeter:
    """Greets people."""

    def hello(self, name):
        """Say hello."""
        return f"hi {name}"

    class Inner:
        def poke(self):
            pass
"#;
        let chunks = chunk_source(source, "greet.py", Language::Python);

        let header = chunks
            .iter()
            .find(|c| c.kind() == ChunkKind::ClassHeader && c.symbol_name() == Some("Greeter"))
            .expect("missing class header");
        assert_eq!(header.docstring(), Some("Greets people."));
        assert!(header.content().contains("class Greeter"));

        let method = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("hello"))
            .expect("missing method");
        assert_eq!(method.kind(), ChunkKind::Method);
        assert_eq!(method.parent_symbol(), Some("Greeter"));

        // Nested classes recurse with a dotted parent path.
        let nested_method = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("poke"))
            .expect("missing nested method");
        assert_eq!(nested_method.parent_symbol(), Some("Greeter.Inner"));
    }

    #[test]
    fn test_python_decorators_carried() {
        let source = r#"
@staticmethod
def helper(x):
    return x
"#;
        let chunks = chunk_source(source, "deco.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].decorators(), &["@staticmethod".to_string()]);
    }

    #[test]
    fn test_rust_functions_and_impl_methods() {
        let source = r#"
/// Adds numbers.
pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub struct Counter {
    value: i32,
}

impl Counter {
    pub fn increment(&mut self) {
        self.value += 1;
    }
}
"#;
        let chunks = chunk_source(source, "lib.rs", Language::Rust);

        let add = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("add"))
            .expect("missing add");
        assert_eq!(add.kind(), ChunkKind::Function);
        assert_eq!(add.docstring(), Some("Adds numbers."));

        let counter = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("Counter") && c.kind() == ChunkKind::ClassHeader);
        assert!(counter.is_some());

        let increment = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("increment"))
            .expect("missing method");
        assert_eq!(increment.kind(), ChunkKind::Method);
        assert_eq!(increment.parent_symbol(), Some("Counter"));
    }

    #[test]
    fn test_javascript_class_and_function() {
        let source = r#"
function greet(name) {
  return "hi " + name;
}

class Greeter {
  hello(name) {
    return greet(name);
  }
}
"#;
        let chunks = chunk_source(source, "app.js", Language::JavaScript);
        assert!(chunks
            .iter()
            .any(|c| c.symbol_name() == Some("greet") && c.kind() == ChunkKind::Function));
        assert!(chunks
            .iter()
            .any(|c| c.symbol_name() == Some("hello")
                && c.kind() == ChunkKind::Method
                && c.parent_symbol() == Some("Greeter")));
    }

    #[test]
    fn test_go_method_receiver_becomes_parent() {
        let source = r#"
package main

type Server struct{}

// Start boots the server.
func (s *Server) Start() error {
    return nil
}

func main() {}
"#;
        let chunks = chunk_source(source, "main.go", Language::Go);
        let start = chunks
            .iter()
            .find(|c| c.symbol_name() == Some("Start"))
            .expect("missing method");
        assert_eq!(start.kind(), ChunkKind::Method);
        assert_eq!(start.parent_symbol(), Some("Server"));
        assert_eq!(start.docstring(), Some("Start boots the server."));
    }

    #[test]
    fn test_split_top_level_keeps_nested_commas() {
        assert_eq!(
            split_top_level("a: Map<K, V>, b: int"),
            vec!["a: Map<K, V>".to_string(), "b: int".to_string()]
        );
    }
}
