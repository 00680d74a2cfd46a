//! Parsing phase: tree-sitter fact extraction.
//!
//! Pure extraction: (path, contents) -> [`ParsedFile`] with symbol,
//! import, call, and heritage facts. No filesystem access, no global
//! state. Resolution against the project-wide symbol table happens in the
//! later phases; this module only records what each file says about
//! itself.

use anyhow::Result;

use crate::lang::{detect_language, Language};
use crate::model::NodeLabel;

/// Kind of heritage clause observed in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeritageKind {
    /// class -> class
    Extends,
    /// class -> interface
    Implements,
    /// interface -> interface
    Inherits,
}

/// A symbol definition found in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFact {
    pub name: String,
    pub label: NodeLabel,
    /// Enclosing class name for methods
    pub parent: Option<String>,
    /// 1-indexed
    pub start_line: u64,
    pub end_line: u64,
}

/// An import statement found in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFact {
    /// Import specifier as written (`./util`, `pkg.mod`, `crate::foo`)
    pub specifier: String,
    /// Named items imported, when the syntax lists them
    pub names: Vec<String>,
    pub line: u64,
}

/// A call site found in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFact {
    /// Name of the enclosing function/method, None for top-level calls
    pub caller: Option<String>,
    /// Callee name as written (last path segment for qualified calls)
    pub callee: String,
    pub line: u64,
}

/// A heritage clause found in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeritageFact {
    pub child: String,
    pub kind: HeritageKind,
    pub parent: String,
}

/// All facts extracted from one file in one run.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: String,
    pub language: Language,
    pub symbols: Vec<SymbolFact>,
    pub imports: Vec<ImportFact>,
    pub calls: Vec<CallFact>,
    pub heritage: Vec<HeritageFact>,
}

/// Walk context: enclosing class and function names.
#[derive(Debug, Clone, Default)]
struct Scope {
    class: Option<String>,
    func: Option<String>,
}

/// Parser bundle holding one tree-sitter parser per supported grammar.
pub struct SourceParser {
    typescript: tree_sitter::Parser,
    javascript: tree_sitter::Parser,
    python: tree_sitter::Parser,
    rust: tree_sitter::Parser,
}

impl SourceParser {
    pub fn new() -> Result<Self> {
        let mut typescript = tree_sitter::Parser::new();
        typescript.set_language(&tree_sitter_typescript::language_typescript())?;
        let mut javascript = tree_sitter::Parser::new();
        javascript.set_language(&tree_sitter_javascript::language())?;
        let mut python = tree_sitter::Parser::new();
        python.set_language(&tree_sitter_python::language())?;
        let mut rust = tree_sitter::Parser::new();
        rust.set_language(&tree_sitter_rust::language())?;
        Ok(Self {
            typescript,
            javascript,
            python,
            rust,
        })
    }

    /// Parse one file into facts.
    ///
    /// Returns None for unsupported languages and for source that
    /// tree-sitter cannot produce a tree for; callers skip those files.
    pub fn parse_file(&mut self, path: &str, content: &str) -> Option<ParsedFile> {
        let language = detect_language(path)?;
        let parser = match language {
            Language::TypeScript => &mut self.typescript,
            Language::JavaScript => &mut self.javascript,
            Language::Python => &mut self.python,
            Language::Rust => &mut self.rust,
        };
        let tree = parser.parse(content, None)?;

        let mut out = ParsedFile {
            path: path.to_string(),
            language,
            symbols: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            heritage: Vec::new(),
        };

        let root = tree.root_node();
        let src = content.as_bytes();
        match language {
            Language::TypeScript | Language::JavaScript => {
                walk_ts_js(&root, src, &Scope::default(), &mut out)
            }
            Language::Python => walk_python(&root, src, &Scope::default(), &mut out),
            Language::Rust => walk_rust(&root, src, &Scope::default(), &mut out),
        }

        Some(out)
    }
}

fn node_text(node: &tree_sitter::Node, src: &[u8]) -> String {
    std::str::from_utf8(&src[node.byte_range()])
        .unwrap_or("")
        .to_string()
}

fn field_text(node: &tree_sitter::Node, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(&n, src))
        .filter(|s| !s.is_empty())
}

fn line_of(node: &tree_sitter::Node) -> u64 {
    node.start_position().row as u64 + 1
}

fn end_line_of(node: &tree_sitter::Node) -> u64 {
    node.end_position().row as u64 + 1
}

fn push_symbol(
    out: &mut ParsedFile,
    name: String,
    label: NodeLabel,
    parent: Option<String>,
    node: &tree_sitter::Node,
) {
    out.symbols.push(SymbolFact {
        name,
        label,
        parent,
        start_line: line_of(node),
        end_line: end_line_of(node),
    });
}

// ---------------------------------------------------------------------------
// TypeScript / JavaScript
// ---------------------------------------------------------------------------

fn walk_ts_js(node: &tree_sitter::Node, src: &[u8], scope: &Scope, out: &mut ParsedFile) {
    let mut next = scope.clone();

    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name.clone(), NodeLabel::Function, None, node);
                next.func = Some(name);
            }
        }
        "class_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name.clone(), NodeLabel::Class, None, node);
                extract_ts_heritage(node, src, &name, NodeLabel::Class, out);
                next.class = Some(name);
            }
        }
        "interface_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name.clone(), NodeLabel::Interface, None, node);
                extract_ts_heritage(node, src, &name, NodeLabel::Interface, out);
            }
        }
        "type_alias_declaration" | "enum_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name, NodeLabel::Type, None, node);
            }
        }
        "method_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                // constructors are not useful call-graph endpoints
                if name != "constructor" {
                    push_symbol(
                        out,
                        name.clone(),
                        NodeLabel::Method,
                        scope.class.clone(),
                        node,
                    );
                }
                next.func = Some(name);
            }
        }
        "variable_declarator" => {
            if scope.func.is_none() {
                if let Some(name) = field_text(node, "name", src) {
                    let is_function_value = node
                        .child_by_field_name("value")
                        .map(|v| {
                            matches!(
                                v.kind(),
                                "arrow_function" | "function_expression" | "function"
                            )
                        })
                        .unwrap_or(false);
                    if is_function_value {
                        push_symbol(out, name.clone(), NodeLabel::Function, None, node);
                        next.func = Some(name);
                    } else if scope.class.is_none() {
                        push_symbol(out, name, NodeLabel::Variable, None, node);
                    }
                }
            }
        }
        "call_expression" => {
            if let Some(callee) = ts_js_callee_name(node, src) {
                out.calls.push(CallFact {
                    caller: scope.func.clone(),
                    callee,
                    line: line_of(node),
                });
            }
        }
        "new_expression" => {
            if let Some(ctor) = field_text(node, "constructor", src) {
                if let Some(simple) = ctor.split('.').last() {
                    out.calls.push(CallFact {
                        caller: scope.func.clone(),
                        callee: simple.to_string(),
                        line: line_of(node),
                    });
                }
            }
        }
        "import_statement" => {
            if let Some(source) = node.child_by_field_name("source") {
                let specifier = node_text(&source, src)
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_string();
                out.imports.push(ImportFact {
                    specifier,
                    names: collect_kind_texts(node, src, &["identifier"]),
                    line: line_of(node),
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_ts_js(&child, src, &next, out);
    }
}

/// Extract callee name from a TS/JS call expression.
///
/// `foo(...)` -> foo, `obj.method(...)` -> method. Computed member access
/// and immediately-invoked expressions yield None.
fn ts_js_callee_name(node: &tree_sitter::Node, src: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(node_text(&function, src)),
        "member_expression" => function
            .child_by_field_name("property")
            .filter(|p| p.kind() == "property_identifier")
            .map(|p| node_text(&p, src)),
        _ => None,
    }
}

/// Extract extends/implements clauses from a TS/JS class or interface.
///
/// The TypeScript grammar nests `extends_clause`/`implements_clause` under
/// `class_heritage`; interfaces use `extends_type_clause`. The JavaScript
/// grammar puts the extended expression directly under `class_heritage`.
fn extract_ts_heritage(
    node: &tree_sitter::Node,
    src: &[u8],
    child_name: &str,
    child_label: NodeLabel,
    out: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for clause in node.children(&mut cursor) {
        match clause.kind() {
            "class_heritage" => {
                let mut inner = clause.walk();
                for part in clause.children(&mut inner) {
                    match part.kind() {
                        "extends_clause" => {
                            for parent in collect_kind_texts(&part, src, &["identifier"]) {
                                out.heritage.push(HeritageFact {
                                    child: child_name.to_string(),
                                    kind: HeritageKind::Extends,
                                    parent,
                                });
                            }
                        }
                        "implements_clause" => {
                            for parent in
                                collect_kind_texts(&part, src, &["type_identifier", "identifier"])
                            {
                                out.heritage.push(HeritageFact {
                                    child: child_name.to_string(),
                                    kind: HeritageKind::Implements,
                                    parent,
                                });
                            }
                        }
                        // JS grammar: `class A extends B` puts B right here
                        "identifier" => {
                            out.heritage.push(HeritageFact {
                                child: child_name.to_string(),
                                kind: HeritageKind::Extends,
                                parent: node_text(&part, src),
                            });
                        }
                        _ => {}
                    }
                }
            }
            "extends_type_clause" => {
                let kind = if child_label == NodeLabel::Interface {
                    HeritageKind::Inherits
                } else {
                    HeritageKind::Extends
                };
                for parent in collect_kind_texts(&clause, src, &["type_identifier", "identifier"]) {
                    out.heritage.push(HeritageFact {
                        child: child_name.to_string(),
                        kind,
                        parent,
                    });
                }
            }
            _ => {}
        }
    }
}

/// Collect text of all descendant nodes matching the given kinds.
fn collect_kind_texts(node: &tree_sitter::Node, src: &[u8], kinds: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    collect_kind_texts_into(node, src, kinds, &mut found);
    found
}

fn collect_kind_texts_into(
    node: &tree_sitter::Node,
    src: &[u8],
    kinds: &[&str],
    found: &mut Vec<String>,
) {
    if kinds.contains(&node.kind()) {
        found.push(node_text(node, src));
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_kind_texts_into(&child, src, kinds, found);
    }
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn walk_python(node: &tree_sitter::Node, src: &[u8], scope: &Scope, out: &mut ParsedFile) {
    let mut next = scope.clone();

    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                let (label, parent) = if scope.class.is_some() && scope.func.is_none() {
                    (NodeLabel::Method, scope.class.clone())
                } else {
                    (NodeLabel::Function, None)
                };
                push_symbol(out, name.clone(), label, parent, node);
                next.func = Some(name);
            }
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name.clone(), NodeLabel::Class, None, node);
                if let Some(supers) = node.child_by_field_name("superclasses") {
                    for parent in collect_kind_texts(&supers, src, &["identifier"]) {
                        out.heritage.push(HeritageFact {
                            child: name.clone(),
                            kind: HeritageKind::Extends,
                            parent,
                        });
                    }
                }
                next.class = Some(name);
                next.func = None;
            }
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                let callee = match function.kind() {
                    "identifier" => Some(node_text(&function, src)),
                    "attribute" => field_text(&function, "attribute", src),
                    _ => None,
                };
                if let Some(callee) = callee {
                    out.calls.push(CallFact {
                        caller: scope.func.clone(),
                        callee,
                        line: line_of(node),
                    });
                }
            }
        }
        "import_statement" => {
            for specifier in collect_kind_texts(node, src, &["dotted_name"]) {
                out.imports.push(ImportFact {
                    names: vec![specifier
                        .rsplit('.')
                        .next()
                        .unwrap_or(&specifier)
                        .to_string()],
                    specifier,
                    line: line_of(node),
                });
            }
        }
        "import_from_statement" => {
            if let Some(module) = field_text(node, "module_name", src) {
                let mut names = collect_kind_texts(node, src, &["dotted_name", "identifier"]);
                names.retain(|n| n != &module);
                out.imports.push(ImportFact {
                    specifier: module,
                    names,
                    line: line_of(node),
                });
            }
        }
        "assignment" => {
            if scope.func.is_none() && scope.class.is_none() {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        push_symbol(
                            out,
                            node_text(&left, src),
                            NodeLabel::Variable,
                            None,
                            node,
                        );
                    }
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_python(&child, src, &next, out);
    }
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

fn walk_rust(node: &tree_sitter::Node, src: &[u8], scope: &Scope, out: &mut ParsedFile) {
    let mut next = scope.clone();

    match node.kind() {
        "function_item" => {
            if let Some(name) = field_text(node, "name", src) {
                let (label, parent) = if scope.class.is_some() {
                    (NodeLabel::Method, scope.class.clone())
                } else {
                    (NodeLabel::Function, None)
                };
                push_symbol(out, name.clone(), label, parent, node);
                next.func = Some(name);
            }
        }
        "struct_item" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name, NodeLabel::Class, None, node);
            }
        }
        "trait_item" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name, NodeLabel::Interface, None, node);
            }
        }
        "enum_item" | "type_item" => {
            if let Some(name) = field_text(node, "name", src) {
                push_symbol(out, name, NodeLabel::Type, None, node);
            }
        }
        "static_item" | "const_item" => {
            if scope.func.is_none() && scope.class.is_none() {
                if let Some(name) = field_text(node, "name", src) {
                    push_symbol(out, name, NodeLabel::Variable, None, node);
                }
            }
        }
        "impl_item" => {
            if let Some(type_name) = field_text(node, "type", src) {
                let simple = last_path_segment(&type_name);
                if let Some(trait_name) = field_text(node, "trait", src) {
                    out.heritage.push(HeritageFact {
                        child: simple.clone(),
                        kind: HeritageKind::Implements,
                        parent: last_path_segment(&trait_name),
                    });
                }
                next.class = Some(simple);
            }
        }
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                let callee = match function.kind() {
                    "identifier" => Some(node_text(&function, src)),
                    "scoped_identifier" => field_text(&function, "name", src),
                    "field_expression" => field_text(&function, "field", src),
                    _ => None,
                };
                if let Some(callee) = callee {
                    out.calls.push(CallFact {
                        caller: scope.func.clone(),
                        callee,
                        line: line_of(node),
                    });
                }
            }
        }
        "use_declaration" => {
            if let Some(arg) = node.child_by_field_name("argument") {
                let specifier = node_text(&arg, src);
                out.imports.push(ImportFact {
                    names: vec![last_path_segment(&specifier)],
                    specifier,
                    line: line_of(node),
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_rust(&child, src, &next, out);
    }
}

fn last_path_segment(path: &str) -> String {
    path.rsplit("::")
        .next()
        .unwrap_or(path)
        .trim_matches(|c| c == '{' || c == '}' || c == '*' || c == ' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, content: &str) -> ParsedFile {
        SourceParser::new()
            .unwrap()
            .parse_file(path, content)
            .unwrap()
    }

    #[test]
    fn typescript_function_and_call() {
        let parsed = parse(
            "b.ts",
            "import { foo } from './a';\nexport function bar() { return foo(); }\n",
        );

        assert_eq!(parsed.symbols.len(), 1);
        assert_eq!(parsed.symbols[0].name, "bar");
        assert_eq!(parsed.symbols[0].label, NodeLabel::Function);
        assert_eq!(parsed.symbols[0].start_line, 2);

        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].specifier, "./a");
        assert_eq!(parsed.imports[0].names, vec!["foo".to_string()]);

        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].caller.as_deref(), Some("bar"));
        assert_eq!(parsed.calls[0].callee, "foo");
    }

    #[test]
    fn typescript_class_with_heritage_and_methods() {
        let source = r#"
interface Runner { run(): void; }
class Base {}
class Worker extends Base implements Runner {
    run() { this.step(); }
    step() {}
}
"#;
        let parsed = parse("worker.ts", source);

        let labels: Vec<(&str, NodeLabel)> = parsed
            .symbols
            .iter()
            .map(|s| (s.name.as_str(), s.label))
            .collect();
        assert!(labels.contains(&("Runner", NodeLabel::Interface)));
        assert!(labels.contains(&("Base", NodeLabel::Class)));
        assert!(labels.contains(&("Worker", NodeLabel::Class)));
        assert!(labels.contains(&("run", NodeLabel::Method)));
        assert!(labels.contains(&("step", NodeLabel::Method)));

        let run = parsed.symbols.iter().find(|s| s.name == "run").unwrap();
        assert_eq!(run.parent.as_deref(), Some("Worker"));

        assert!(parsed.heritage.contains(&HeritageFact {
            child: "Worker".into(),
            kind: HeritageKind::Extends,
            parent: "Base".into(),
        }));
        assert!(parsed.heritage.contains(&HeritageFact {
            child: "Worker".into(),
            kind: HeritageKind::Implements,
            parent: "Runner".into(),
        }));

        let call = parsed.calls.iter().find(|c| c.callee == "step").unwrap();
        assert_eq!(call.caller.as_deref(), Some("run"));
    }

    #[test]
    fn typescript_arrow_function_const() {
        let parsed = parse("util.ts", "export const handler = () => { log(); };\nconst K = 3;\n");
        let handler = parsed.symbols.iter().find(|s| s.name == "handler").unwrap();
        assert_eq!(handler.label, NodeLabel::Function);
        let konst = parsed.symbols.iter().find(|s| s.name == "K").unwrap();
        assert_eq!(konst.label, NodeLabel::Variable);
    }

    #[test]
    fn python_class_method_and_import() {
        let source = r#"
from pkg.util import helper

class Animal:
    def speak(self):
        helper()

def main():
    Animal()
"#;
        let parsed = parse("zoo.py", source);

        let speak = parsed.symbols.iter().find(|s| s.name == "speak").unwrap();
        assert_eq!(speak.label, NodeLabel::Method);
        assert_eq!(speak.parent.as_deref(), Some("Animal"));

        let main = parsed.symbols.iter().find(|s| s.name == "main").unwrap();
        assert_eq!(main.label, NodeLabel::Function);

        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].specifier, "pkg.util");
        assert!(parsed.imports[0].names.contains(&"helper".to_string()));

        let helper_call = parsed.calls.iter().find(|c| c.callee == "helper").unwrap();
        assert_eq!(helper_call.caller.as_deref(), Some("speak"));
    }

    #[test]
    fn python_superclass_heritage() {
        let parsed = parse("a.py", "class Dog(Animal):\n    pass\n");
        assert_eq!(
            parsed.heritage,
            vec![HeritageFact {
                child: "Dog".into(),
                kind: HeritageKind::Extends,
                parent: "Animal".into(),
            }]
        );
    }

    #[test]
    fn rust_items_and_trait_impl() {
        let source = r#"
use std::collections::HashMap;

pub struct Engine;

pub trait Run { fn go(&self); }

impl Run for Engine {
    fn go(&self) { helper(); }
}

fn helper() {}
"#;
        let parsed = parse("engine.rs", source);

        let engine = parsed.symbols.iter().find(|s| s.name == "Engine").unwrap();
        assert_eq!(engine.label, NodeLabel::Class);
        let run = parsed.symbols.iter().find(|s| s.name == "Run").unwrap();
        assert_eq!(run.label, NodeLabel::Interface);

        let go = parsed.symbols.iter().find(|s| s.name == "go").unwrap();
        assert_eq!(go.label, NodeLabel::Method);
        assert_eq!(go.parent.as_deref(), Some("Engine"));

        assert!(parsed.heritage.contains(&HeritageFact {
            child: "Engine".into(),
            kind: HeritageKind::Implements,
            parent: "Run".into(),
        }));

        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].specifier, "std::collections::HashMap");
        assert_eq!(parsed.imports[0].names, vec!["HashMap".to_string()]);

        let call = parsed.calls.iter().find(|c| c.callee == "helper").unwrap();
        assert_eq!(call.caller.as_deref(), Some("go"));
    }

    #[test]
    fn unsupported_language_returns_none() {
        let mut parser = SourceParser::new().unwrap();
        assert!(parser.parse_file("README.md", "# hello").is_none());
    }
}
