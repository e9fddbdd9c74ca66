//! AST-based chunking of Python source using tree-sitter.
//!
//! Chunks follow semantic boundaries (classes, functions, methods) rather than
//! arbitrary line counts. Each chunk carries the imports and module-level
//! variables its body references, plus the enclosing class or function, and
//! that context is rendered in front of the definition so a chunk reads on
//! its own.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use super::packer::TokenPacker;
use super::ChunkDraft;
use crate::error::{Result, SearchError};
use crate::types::{ChunkContext, ChunkType};

/// Elision marker rendered under a parent stub.
const ELISION: &str = "    # ... (more)";

/// The syntax node kinds the chunker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntaxKind {
    Class,
    Function,
    Decorated,
    Import,
    ImportFrom,
    ExpressionStatement,
    Identifier,
    Other,
}

impl SyntaxKind {
    fn of(node: &Node) -> Self {
        match node.kind() {
            "class_definition" => Self::Class,
            "function_definition" => Self::Function,
            "decorated_definition" => Self::Decorated,
            "import_statement" => Self::Import,
            "import_from_statement" => Self::ImportFrom,
            "expression_statement" => Self::ExpressionStatement,
            "identifier" => Self::Identifier,
            _ => Self::Other,
        }
    }
}

/// Enclosing definitions of the node being visited.
#[derive(Debug, Clone, Default)]
struct Scope {
    parent_class: Option<String>,
    parent_function: Option<String>,
}

impl Scope {
    fn in_class(&self, class: &str) -> Self {
        Self {
            parent_class: Some(class.to_string()),
            parent_function: self.parent_function.clone(),
        }
    }

    fn in_function(&self, function: &str) -> Self {
        Self {
            parent_class: self.parent_class.clone(),
            parent_function: Some(function.to_string()),
        }
    }
}

/// A class, function or method cut from the tree, before rendering.
#[derive(Debug, Clone)]
struct CodeElement {
    chunk_type: ChunkType,
    name: String,
    definition: String,
    context: Option<ChunkContext>,
}

impl CodeElement {
    /// Context lines, parent stubs, then the raw definition. Class chunks use
    /// the compact form without the indented spacer.
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ctx) = &self.context {
            if !ctx.imports.is_empty() {
                out.push_str(&join_lines(&ctx.imports));
                out.push('\n');
            }
            if !ctx.module_variables.is_empty() {
                out.push_str(&join_lines(&ctx.module_variables));
                out.push('\n');
            }
            if let Some(class) = &ctx.parent_class {
                out.push_str(&format!("\nclass: {}\n{}\n", class, ELISION));
            }
            if let Some(function) = &ctx.parent_function {
                out.push_str(&format!("\ndef: {}\n{}\n", function, ELISION));
            }
            out.push('\n');
            if self.chunk_type != ChunkType::Class {
                out.push_str("    ");
            }
        }
        out.push_str(&self.definition);
        out
    }
}

fn join_lines(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

/// Python chunker producing context-annotated class/function/method chunks.
pub struct CodeChunker {
    packer: TokenPacker,
}

impl CodeChunker {
    pub fn new(packer: TokenPacker) -> Self {
        Self { packer }
    }

    /// Chunk Python `source`. `document` only labels errors and logs.
    pub fn chunk(&self, source: &str, document: &str) -> Result<Vec<ChunkDraft>> {
        let mut parser = Parser::new();
        let language: Language = tree_sitter_python::LANGUAGE.into();
        parser
            .set_language(&language)
            .map_err(|e| SearchError::Parser(e.to_string()))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| malformed(document, "parser produced no tree"))?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(malformed(document, "source contains syntax errors"));
        }

        let mut visitor = Visitor::new(source, root);
        visitor.visit_module(root);

        let mut drafts = Vec::new();
        for element in visitor.elements {
            let rendered = element.render();
            let non_blank = rendered.lines().filter(|l| !l.trim().is_empty()).count();
            if non_blank <= 1 {
                debug!(document, name = %element.name, "Dropping single-line code chunk");
                continue;
            }
            for piece in self.packer.pack(&rendered) {
                drafts.push(ChunkDraft {
                    text: piece.clone(),
                    chunk: piece,
                    chunk_type: Some(element.chunk_type),
                    context: element.context.clone(),
                });
            }
        }

        debug!(document, chunks = drafts.len(), "Chunked source code");
        Ok(drafts)
    }
}

fn malformed(document: &str, reason: &str) -> SearchError {
    SearchError::MalformedDocument {
        document: document.to_string(),
        reason: reason.to_string(),
    }
}

/// Walks the tree, threading the enclosing [`Scope`] through each call.
struct Visitor<'s> {
    source: &'s str,
    /// Bound name -> import statement text
    imports: HashMap<String, String>,
    module_variables: HashSet<String>,
    elements: Vec<CodeElement>,
}

impl<'s> Visitor<'s> {
    fn new(source: &'s str, root: Node) -> Self {
        let mut visitor = Self {
            source,
            imports: HashMap::new(),
            module_variables: HashSet::new(),
            elements: Vec::new(),
        };
        visitor.collect_module_names(root);
        visitor
    }

    fn text(&self, node: Node) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn collect_module_names(&mut self, root: Node) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match SyntaxKind::of(&child) {
                SyntaxKind::Import | SyntaxKind::ImportFrom => {
                    let statement = self.text(child).to_string();
                    let mut names = child.walk();
                    for name in child.children_by_field_name("name", &mut names) {
                        let bound = match name.kind() {
                            "aliased_import" => name.child_by_field_name("alias"),
                            _ => Some(name),
                        };
                        if let Some(bound) = bound {
                            // `import a.b` binds `a`
                            let key = self.text(bound).split('.').next().unwrap_or_default();
                            self.imports.insert(key.to_string(), statement.clone());
                        }
                    }
                }
                SyntaxKind::ExpressionStatement => {
                    let target = child
                        .named_child(0)
                        .filter(|n| n.kind() == "assignment")
                        .and_then(|n| n.child_by_field_name("left"))
                        .filter(|n| SyntaxKind::of(n) == SyntaxKind::Identifier);
                    if let Some(target) = target {
                        self.module_variables.insert(self.text(target).to_string());
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_module(&mut self, root: Node) {
        let scope = Scope::default();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match SyntaxKind::of(&child) {
                SyntaxKind::Class => self.visit_class(child, None, &scope),
                SyntaxKind::Function => self.visit_function(child, None, &scope),
                SyntaxKind::Decorated => self.visit_decorated(child, &scope),
                _ => {}
            }
        }
    }

    fn visit_decorated(&mut self, node: Node, scope: &Scope) {
        let Some(definition) = node.child_by_field_name("definition") else {
            return;
        };
        match SyntaxKind::of(&definition) {
            SyntaxKind::Class => self.visit_class(definition, Some(node), scope),
            SyntaxKind::Function => self.visit_function(definition, Some(node), scope),
            _ => {}
        }
    }

    fn visit_class(&mut self, node: Node, decorated: Option<Node>, scope: &Scope) {
        let (Some(name), Some(body)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("body"),
        ) else {
            return;
        };
        let name = self.text(name).to_string();
        let outer = decorated.unwrap_or(node);

        let mut identifiers = HashSet::new();
        if let Some(decorated) = decorated {
            self.collect_decorators(decorated, &mut identifiers);
        }
        if let Some(bases) = node.child_by_field_name("superclasses") {
            self.collect_identifiers(bases, &mut identifiers);
        }

        let mut attributes = Vec::new();
        let mut constructor = None;
        let mut methods = Vec::new();

        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            match SyntaxKind::of(&child) {
                SyntaxKind::ExpressionStatement => {
                    if let Some(assignment) =
                        child.named_child(0).filter(|n| n.kind() == "assignment")
                    {
                        attributes.push(self.text(assignment));
                        self.collect_identifiers(assignment, &mut identifiers);
                    }
                }
                SyntaxKind::Function => {
                    if self.definition_name(child) == Some("__init__") {
                        constructor = Some(child);
                    } else {
                        methods.push((child, None));
                    }
                }
                SyntaxKind::Decorated => {
                    let Some(inner) = child
                        .child_by_field_name("definition")
                        .filter(|n| SyntaxKind::of(n) == SyntaxKind::Function)
                    else {
                        continue;
                    };
                    if self.definition_name(inner) == Some("__init__") {
                        constructor = Some(child);
                    } else {
                        methods.push((inner, Some(child)));
                    }
                }
                _ => {}
            }
        }

        let mut definition = self.source[outer.start_byte()..body.start_byte()]
            .trim_end()
            .to_string();
        for attribute in attributes {
            definition.push_str("\n    ");
            definition.push_str(attribute);
        }
        if let Some(constructor) = constructor {
            definition.push_str("\n\n\n    ");
            definition.push_str(self.text(constructor));
        }

        let context = self.resolve(&identifiers, scope);
        self.elements.push(CodeElement {
            chunk_type: ChunkType::Class,
            name: name.clone(),
            definition,
            context,
        });

        let method_scope = scope.in_class(&name);
        for (method, decorated) in methods {
            self.visit_function(method, decorated, &method_scope);
        }
    }

    fn visit_function(&mut self, node: Node, decorated: Option<Node>, scope: &Scope) {
        let (Some(name), Some(body)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("body"),
        ) else {
            return;
        };
        let name = self.text(name).to_string();

        let mut identifiers = HashSet::new();
        self.collect_identifiers(body, &mut identifiers);
        self.collect_signature(node, &mut identifiers);
        if let Some(decorated) = decorated {
            self.collect_decorators(decorated, &mut identifiers);
        }

        let chunk_type = if scope.parent_class.is_some() {
            ChunkType::Method
        } else {
            ChunkType::Function
        };

        let context = self.resolve(&identifiers, scope);
        let definition = self.text(decorated.unwrap_or(node)).to_string();
        self.elements.push(CodeElement {
            chunk_type,
            name: name.clone(),
            definition,
            context,
        });

        let nested = scope.in_function(&name);
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            match SyntaxKind::of(&child) {
                SyntaxKind::Function => self.visit_function(child, None, &nested),
                SyntaxKind::Decorated => self.visit_decorated(child, &nested),
                _ => {}
            }
        }
    }

    fn definition_name(&self, node: Node) -> Option<&'s str> {
        node.child_by_field_name("name").map(|n| self.text(n))
    }

    /// Identifiers under `node`, not descending into nested definition bodies.
    fn collect_identifiers(&self, node: Node, out: &mut HashSet<String>) {
        match SyntaxKind::of(&node) {
            SyntaxKind::Identifier => {
                out.insert(self.text(node).to_string());
            }
            SyntaxKind::Function | SyntaxKind::Class => self.collect_signature(node, out),
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.collect_identifiers(child, out);
                }
            }
        }
    }

    /// Identifiers in parameter lists, annotations and return types.
    fn collect_signature(&self, node: Node, out: &mut HashSet<String>) {
        for field in ["parameters", "return_type"] {
            if let Some(child) = node.child_by_field_name(field) {
                self.collect_identifiers(child, out);
            }
        }
    }

    fn collect_decorators(&self, decorated: Node, out: &mut HashSet<String>) {
        let mut cursor = decorated.walk();
        for child in decorated.named_children(&mut cursor) {
            if child.kind() == "decorator" {
                self.collect_identifiers(child, out);
            }
        }
    }

    fn resolve(&self, identifiers: &HashSet<String>, scope: &Scope) -> Option<ChunkContext> {
        let mut context = ChunkContext {
            parent_class: scope.parent_class.clone(),
            parent_function: scope.parent_function.clone(),
            ..Default::default()
        };
        for ident in identifiers {
            if let Some(statement) = self.imports.get(ident) {
                context.imports.insert(statement.clone());
            }
            if self.module_variables.contains(ident) {
                context.module_variables.insert(ident.clone());
            }
        }
        context.into_option()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn chunker(budget: usize) -> CodeChunker {
        CodeChunker::new(TokenPacker::new(budget, Arc::new(WhitespaceTokenizer)))
    }

    #[test]
    fn test_class_with_constructor_and_two_methods() {
        let source = r#"class Greeter:
    def __init__(self, name):
        self.name = name

    def greet(self):
        return "hello " + self.name

    def leave(self):
        return "bye " + self.name
"#;
        let chunks = chunker(500).chunk(source, "greeter.py").unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_type, Some(ChunkType::Class));
        assert!(chunks[0].chunk.contains("def __init__(self, name):"));
        for method in &chunks[1..] {
            assert_eq!(method.chunk_type, Some(ChunkType::Method));
            let ctx = method.context.as_ref().unwrap();
            assert_eq!(ctx.parent_class.as_deref(), Some("Greeter"));
        }
        assert!(chunks[1].chunk.contains("def greet(self):"));
        assert!(chunks[2].chunk.contains("def leave(self):"));
    }

    #[test]
    fn test_class_skeleton_rendering() {
        let source = r#"class Config:
    name = "x"
    retries: int = 3

    def __init__(self, path):
        self.path = path

    def load(self):
        return self.path
"#;
        let chunks = chunker(500).chunk(source, "config.py").unwrap();
        assert_eq!(
            chunks[0].chunk,
            "class Config:\n    name = \"x\"\n    retries: int = 3\n\n\n    def __init__(self, path):\n        self.path = path"
        );
        assert!(chunks[0].context.is_none());
        assert_eq!(chunks[1].chunk_type, Some(ChunkType::Method));
    }

    #[test]
    fn test_function_context_resolves_imports_and_module_variables() {
        let source = r#"import os
from typing import List
import numpy as np

LIMIT = 10
UNUSED = 3

def load(paths: List[str]) -> int:
    total = 0
    for p in paths:
        total += os.path.getsize(p)
    return min(total, LIMIT)
"#;
        let chunks = chunker(500).chunk(source, "load.py").unwrap();
        assert_eq!(chunks.len(), 1);
        let ctx = chunks[0].context.as_ref().unwrap();
        let imports: Vec<_> = ctx.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["from typing import List", "import os"]);
        let vars: Vec<_> = ctx.module_variables.iter().map(String::as_str).collect();
        assert_eq!(vars, vec!["LIMIT"]);
        assert!(chunks[0]
            .chunk
            .starts_with("from typing import List\nimport os\nLIMIT\n\n    def load("));
        assert_eq!(chunks[0].chunk_type, Some(ChunkType::Function));
    }

    #[test]
    fn test_nested_function_carries_parent_function() {
        let source = r#"def outer(x):
    def inner(y):
        return y * 2
    return inner(x)
"#;
        let chunks = chunker(500).chunk(source, "nested.py").unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].context.is_none());
        let ctx = chunks[1].context.as_ref().unwrap();
        assert_eq!(ctx.parent_function.as_deref(), Some("outer"));
        assert!(ctx.parent_class.is_none());
        assert!(chunks[1]
            .chunk
            .starts_with("\ndef: outer\n    # ... (more)\n\n    def inner(y):"));
    }

    #[test]
    fn test_decorator_arguments_contribute_context() {
        let source = r#"from functools import lru_cache
SIZE = 128

@lru_cache(maxsize=SIZE)
def cached(n):
    return n + 1
"#;
        let chunks = chunker(500).chunk(source, "cached.py").unwrap();
        assert_eq!(chunks.len(), 1);
        let ctx = chunks[0].context.as_ref().unwrap();
        assert!(ctx.imports.contains("from functools import lru_cache"));
        assert!(ctx.module_variables.contains("SIZE"));
        assert!(chunks[0].chunk.contains("@lru_cache(maxsize=SIZE)\ndef cached(n):"));
    }

    #[test]
    fn test_single_line_and_module_statements_are_dropped() {
        let chunks = chunker(500)
            .chunk("x = 1\nprint(x)\ndef f(): return 1\n", "flat.py")
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_syntax_error_is_malformed() {
        let err = chunker(500)
            .chunk("def broken(:\n    pass\n", "broken.py")
            .unwrap_err();
        assert!(matches!(err, SearchError::MalformedDocument { document, .. } if document == "broken.py"));
    }

    #[test]
    fn test_oversized_definition_is_repacked() {
        let source = "def explain():\n    \"\"\"First sentence here. Second sentence follows. Third one ends.\"\"\"\n    return None\n";
        let chunks = chunker(4).chunk(source, "explain.py").unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chunk_type == Some(ChunkType::Function)));
        let joined: String = chunks.iter().map(|c| c.chunk.as_str()).collect();
        assert_eq!(joined, source.trim_end());
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let source = "import os\n\ndef a():\n    return os.sep\n\ndef b():\n    return os.getcwd()\n";
        let first = chunker(500).chunk(source, "d.py").unwrap();
        let second = chunker(500).chunk(source, "d.py").unwrap();
        assert_eq!(first, second);
    }
}
