//! End-to-end pipeline runs over small multi-language projects.

use cartograph::model::{stable_node_id, NodeLabel, RelationType};
use cartograph::pipeline::structure::file_id;
use cartograph::pipeline::{run_full, SourceFile};
use cartograph::CancellationToken;

fn src(path: &str, content: &str) -> SourceFile {
    SourceFile {
        path: path.to_string(),
        content: content.to_string(),
    }
}

#[test]
fn typescript_project_builds_a_complete_graph() {
    let out = run_full(
        vec![
            src("src/a.ts", "export function greet() { return 1; }\n"),
            src(
                "src/b.ts",
                "import { greet } from './a';\nexport function main() { greet(); }\n",
            ),
        ],
        CancellationToken::new(),
        None,
    )
    .unwrap();
    let graph = &out.graph;

    // Structure: folder + two files
    assert!(graph.node(&file_id("src/a.ts")).is_some());
    assert!(graph.node(&file_id("src/b.ts")).is_some());

    // Imports: b -> a at full confidence
    let imports = graph.outgoing(&file_id("src/b.ts"), Some(RelationType::Imports));
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].target_id, file_id("src/a.ts"));
    assert_eq!(imports[0].confidence, 1.0);

    // Calls: main -> greet through the import, confidence 0.8
    let main_id = stable_node_id(NodeLabel::Function, "src/b.ts", "main", 2);
    let greet_id = stable_node_id(NodeLabel::Function, "src/a.ts", "greet", 1);
    let calls = graph.outgoing(&main_id, Some(RelationType::Calls));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target_id, greet_id);
    assert_eq!(calls[0].confidence, 0.8);

    // Derived structures regenerated at the end of the run
    assert!(graph.nodes().any(|n| n.label == NodeLabel::Community));
    assert!(graph.nodes().any(|n| n.label == NodeLabel::Process));
}

#[test]
fn class_heritage_produces_typed_edges() {
    let out = run_full(
        vec![src(
            "app.ts",
            concat!(
                "interface Runner { run(): void; }\n",
                "class Base {}\n",
                "class Worker extends Base implements Runner {\n",
                "  run() {}\n",
                "}\n",
            ),
        )],
        CancellationToken::new(),
        None,
    )
    .unwrap();
    let graph = &out.graph;

    let worker = stable_node_id(NodeLabel::Class, "app.ts", "Worker", 3);
    let base = stable_node_id(NodeLabel::Class, "app.ts", "Base", 2);
    let runner = stable_node_id(NodeLabel::Interface, "app.ts", "Runner", 1);

    let extends = graph.outgoing(&worker, Some(RelationType::Extends));
    assert_eq!(extends.len(), 1);
    assert_eq!(extends[0].target_id, base);
    assert_eq!(extends[0].confidence, 0.9);

    let implements = graph.outgoing(&worker, Some(RelationType::Implements));
    assert_eq!(implements.len(), 1);
    assert_eq!(implements[0].target_id, runner);
}

#[test]
fn python_and_rust_files_coexist() {
    let out = run_full(
        vec![
            src(
                "pkg/util.py",
                "def helper():\n    return 1\n",
            ),
            src(
                "main.py",
                "from pkg.util import helper\n\ndef run():\n    helper()\n",
            ),
            src("src/lib.rs", "pub mod engine;\n"),
            src(
                "src/engine.rs",
                "pub fn start() {}\npub fn boot() { start(); }\n",
            ),
        ],
        CancellationToken::new(),
        None,
    )
    .unwrap();
    let graph = &out.graph;

    // Python: run -> helper across the import
    let run_id = stable_node_id(NodeLabel::Function, "main.py", "run", 3);
    let helper_id = stable_node_id(NodeLabel::Function, "pkg/util.py", "helper", 1);
    let calls = graph.outgoing(&run_id, Some(RelationType::Calls));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target_id, helper_id);

    // Rust: boot -> start in the same file, confidence 0.9
    let boot_id = stable_node_id(NodeLabel::Function, "src/engine.rs", "boot", 2);
    let start_id = stable_node_id(NodeLabel::Function, "src/engine.rs", "start", 1);
    let rust_calls = graph.outgoing(&boot_id, Some(RelationType::Calls));
    assert_eq!(rust_calls.len(), 1);
    assert_eq!(rust_calls[0].target_id, start_id);
    assert_eq!(rust_calls[0].confidence, 0.9);
}

#[test]
fn edit_replaces_only_the_edited_files_facts() {
    let out = run_full(
        vec![
            src("a.ts", "export function foo() { return 1; }\n"),
            src(
                "b.ts",
                "import { foo } from './a';\nexport function bar() { foo(); }\n",
            ),
        ],
        CancellationToken::new(),
        None,
    )
    .unwrap();

    let foo_id = stable_node_id(NodeLabel::Function, "a.ts", "foo", 1);
    let bar_id = stable_node_id(NodeLabel::Function, "b.ts", "bar", 2);
    assert_eq!(
        out.graph.nodes().filter(|n| n.label == NodeLabel::File).count(),
        2
    );
    assert_eq!(
        out.graph
            .nodes()
            .filter(|n| n.label == NodeLabel::Function)
            .count(),
        2
    );
    let calls = out.graph.outgoing(&bar_id, Some(RelationType::Calls));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target_id, foo_id);

    // bar now calls a new local helper instead of foo and moves a line
    let mut changed = std::collections::BTreeMap::new();
    changed.insert(
        "b.ts".to_string(),
        "function qux() { return 2; }\n\nexport function bar() { qux(); }\n".to_string(),
    );
    let updated = cartograph::pipeline::incremental::run_incremental(
        &out.graph,
        &out.contents,
        &changed,
        &std::collections::BTreeSet::new(),
        CancellationToken::new(),
        None,
    )
    .unwrap();
    let graph = &updated.graph;

    // a.ts facts survive with identical ids
    assert!(graph.node(&file_id("a.ts")).is_some());
    assert!(graph.node(&foo_id).is_some());

    // bar was rebuilt at its new location and its old CALLS edge is gone
    assert!(graph.node(&bar_id).is_none());
    let new_bar = stable_node_id(NodeLabel::Function, "b.ts", "bar", 3);
    let qux_id = stable_node_id(NodeLabel::Function, "b.ts", "qux", 1);
    let new_calls = graph.outgoing(&new_bar, Some(RelationType::Calls));
    assert_eq!(new_calls.len(), 1);
    assert_eq!(new_calls[0].target_id, qux_id);

    // derived structures were regenerated over the new graph
    assert!(graph.nodes().any(|n| n.label == NodeLabel::Community));
}

#[test]
fn two_identical_runs_produce_identical_graphs() {
    let files = || {
        vec![
            src("a.ts", "export function one() { two(); }\n"),
            src("b.ts", "export function two() {}\n"),
        ]
    };
    let first = run_full(files(), CancellationToken::new(), None).unwrap();
    let second = run_full(files(), CancellationToken::new(), None).unwrap();

    assert_eq!(first.graph.to_parts(), second.graph.to_parts());
}

#[test]
fn unparseable_and_unsupported_files_are_skipped() {
    let out = run_full(
        vec![
            src("good.ts", "export function ok() {}\n"),
            src("data.bin", "\u{0}\u{1}\u{2}"),
        ],
        CancellationToken::new(),
        None,
    )
    .unwrap();

    let ok_id = stable_node_id(NodeLabel::Function, "good.ts", "ok", 1);
    assert!(out.graph.node(&ok_id).is_some());
    // The unsupported file still gets a File node from the Structure
    // phase, but no symbols
    assert!(out.graph.node(&file_id("data.bin")).is_some());
    assert_eq!(out.graph.nodes_for_file("data.bin").len(), 1);
}
