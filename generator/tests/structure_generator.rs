// Integration tests: naming behaviour of the structure generator through the
// public API.
//
// Uses a fixed LP64 size report so results do not depend on the host
// compiler.

use std::rc::Rc;

use phillip::descriptor::HostScalar;
use phillip::oracle::FixedSizeOracle;
use phillip::structure::{Definition, StructureGenerator, HASH_PREFIX};
use phillip::typemap::{Origin, ScalarTypeMap};
use phillip::Error;

const LP64_REPORT: &str = r#"[
    ["char", "signed", "integer", 1],
    ["float", "signed", "float", 4],
    ["double", "signed", "float", 8],
    ["int", "signed", "integer", 4],
    ["long double", "signed", "float", 16],
    ["short", "signed", "integer", 2],
    ["long long", "signed", "integer", 8],
    ["unsigned char", "unsigned", "integer", 1],
    ["unsigned int", "unsigned", "integer", 4],
    ["unsigned long long", "unsigned", "integer", 8],
    ["unsigned short", "unsigned", "integer", 2]
]"#;

fn type_map() -> Rc<ScalarTypeMap> {
    let oracle = FixedSizeOracle::from_json(LP64_REPORT).expect("report");
    Rc::new(ScalarTypeMap::new(&oracle).expect("type map"))
}

fn session() -> StructureGenerator {
    StructureGenerator::new(type_map())
}

// ── Cross-origin agreement ──────────────────────────────────────────────────

#[test]
fn tensor_and_foreign_forms_hash_alike() {
    let mut sg = session();
    let t = sg.tensor_scalar("float64").unwrap();
    let tensor = sg.tensor_struct([("x", t), ("y", t)]).unwrap();
    let c = sg.foreign_scalar("c_double").unwrap();
    let foreign = sg.foreign_struct("Vec2", [("x", c), ("y", c)]).unwrap();

    let a = sg.canonical_name(tensor).unwrap();
    let b = sg.canonical_name(foreign).unwrap();
    assert!(a.starts_with(HASH_PREFIX));
    assert_eq!(a, b);
}

#[test]
fn renaming_either_form_names_both() {
    for rename_tensor in [true, false] {
        let mut sg = session();
        let t = sg.tensor_scalar("int32").unwrap();
        let tensor = sg.tensor_struct([("count", t)]).unwrap();
        let c = sg.foreign_scalar("c_int").unwrap();
        let foreign = sg.foreign_struct("Counter", [("count", c)]).unwrap();

        sg.rename(if rename_tensor { tensor } else { foreign }, "Counter");
        assert_eq!(sg.canonical_name(tensor).unwrap(), "Counter");
        assert_eq!(sg.canonical_name(foreign).unwrap(), "Counter");
    }
}

#[test]
fn record_names_match_tensor_form() {
    let mut sg = session();
    let h = sg.host(HostScalar::Float);
    let record = sg.record("Sample", [("value", h)]).unwrap();
    let t = sg.tensor_scalar("float_").unwrap();
    let tensor = sg.tensor_struct([("value", t)]).unwrap();
    assert_eq!(
        sg.canonical_name(record).unwrap(),
        sg.canonical_name(tensor).unwrap()
    );
}

#[test]
fn names_are_reproducible_across_sessions() {
    let build = || {
        let mut sg = session();
        let t = sg.tensor_scalar("uint8").unwrap();
        let inner = sg.tensor_struct([("r", t), ("g", t), ("b", t)]).unwrap();
        let outer = sg.tensor_struct([("color", inner), ("alpha", t)]).unwrap();
        sg.canonical_name(outer).unwrap()
    };
    assert_eq!(build(), build());
}

// ── Renames ─────────────────────────────────────────────────────────────────

#[test]
fn rename_never_overwrites() {
    let mut sg = session();
    let t = sg.tensor_scalar("int16").unwrap();
    let s = sg.tensor_struct([("a", t)]).unwrap();
    sg.rename(s, "Once");
    assert_eq!(sg.canonical_name(s).unwrap(), "Once");

    sg.rename(s, "Twice");
    let err = sg.canonical_name(s).unwrap_err();
    assert!(matches!(err, Error::NamingConflict { .. }));
    assert_eq!(err.code().to_string(), "E0102");
    assert_eq!(sg.canonical_name(s).unwrap(), "Once");
}

#[test]
fn identical_rename_requests_are_merged() {
    let mut sg = session();
    let t = sg.tensor_scalar("int16").unwrap();
    let s = sg.tensor_struct([("a", t)]).unwrap();
    sg.rename(s, "Same");
    sg.rename(s, "Same");
    assert_eq!(sg.canonical_name(s).unwrap(), "Same");
}

#[test]
fn renaming_a_c_spelling_conflicts() {
    let mut sg = session();
    let t = sg.target("Vertex");
    sg.rename(t, "Other");
    // C spellings answer without flushing; any other query applies the rename.
    let u = sg.tensor_scalar("int32").unwrap();
    assert!(matches!(sg.canonical_name(u), Err(Error::NamingConflict { .. })));
}

// ── Pointers ────────────────────────────────────────────────────────────────

#[test]
fn pointer_name_is_pointee_name_plus_star() {
    let mut sg = session();
    let t = sg.tensor_scalar("float32").unwrap();
    let s = sg.tensor_struct([("v", t)]).unwrap();
    let p = sg.pointer(Origin::Tensor, s);
    let pp = sg.pointer(Origin::Tensor, p);

    let base = sg.canonical_name(s).unwrap();
    assert_eq!(sg.canonical_name(p).unwrap(), format!("{base} *"));
    assert_eq!(sg.canonical_name(pp).unwrap(), format!("{base} * *"));
    assert_eq!(sg.pointee(pp).unwrap(), Some(p));
}

#[test]
fn c_pointer_spelling_has_a_foreign_counterpart() {
    let mut sg = session();
    let p = sg.target("const int *");
    let foreign = sg.counterpart(p, Origin::Foreign).unwrap().unwrap();
    let c_int = sg.foreign_scalar("c_int32").unwrap();
    assert_eq!(sg.pointee(foreign).unwrap(), Some(c_int));

    let opaque = sg.target("Vertex");
    assert_eq!(sg.counterpart(opaque, Origin::Foreign).unwrap(), None);
}

#[test]
fn malformed_spelling_is_reported() {
    let mut sg = session();
    let bad = sg.target("int * const const");
    let err = sg.pointee(bad).unwrap_err();
    assert!(matches!(err, Error::MalformedPointerSpelling { .. }));
}

// ── Definitions ─────────────────────────────────────────────────────────────

#[test]
fn point_renders_two_int_fields() {
    let mut sg = session();
    let int = sg.target("int");
    let point = sg.tensor_struct([("x", int), ("y", int)]).unwrap();
    sg.rename(point, "Point");

    assert_eq!(sg.canonical_name(point).unwrap(), "Point");
    assert_eq!(
        sg.definition(point).unwrap(),
        Definition::Composite(vec![
            ("x".to_string(), "int".to_string()),
            ("y".to_string(), "int".to_string()),
        ])
    );
    assert_eq!(
        sg.render_structures(point).unwrap(),
        vec!["struct Point {\n    int x;\n    int y;\n};".to_string()]
    );

    let layout = sg.layout(point).unwrap();
    assert_eq!(layout.size, 8);
    let sizes: Vec<usize> = layout.fields.iter().map(|f| f.size).collect();
    assert_eq!(sizes, vec![4, 4]);
}

#[test]
fn scalar_definition_is_its_spelling() {
    let mut sg = session();
    let t = sg.tensor_scalar("uint16").unwrap();
    assert_eq!(
        sg.definition(t).unwrap(),
        Definition::Spelling("unsigned short".to_string())
    );
}

#[test]
fn shared_subtree_is_emitted_once() {
    let mut sg = session();
    let t = sg.tensor_scalar("int8").unwrap();
    let leaf = sg.tensor_struct([("v", t)]).unwrap();
    let left = sg.tensor_struct([("leaf", leaf)]).unwrap();
    let right = sg.tensor_struct([("leaf", leaf), ("w", t)]).unwrap();
    let root = sg.tensor_struct([("l", left), ("r", right)]).unwrap();

    let order = sg.reachable_composites(root).unwrap();
    assert_eq!(order.len(), 4);
    assert_eq!(order.iter().filter(|&&id| id == leaf).count(), 1);
    assert_eq!(order.last(), Some(&root));
    assert_eq!(sg.height(root).unwrap(), 3);
}

#[test]
fn linked_list_record_renders_with_a_name() {
    let mut sg = session();
    let node = sg.declare_record("Node");
    let next = sg.pointer(Origin::Target, node);
    let value = sg.target("int");
    sg.define_record(node, [("value", value), ("next", next)]).unwrap();
    sg.rename(node, "Node");

    assert_eq!(
        sg.render_structures(node).unwrap(),
        vec!["struct Node {\n    int value;\n    Node * next;\n};".to_string()]
    );
    assert_eq!(sg.counterpart(node, Origin::Foreign).unwrap(), None);
    assert_eq!(sg.layout(node).unwrap().size, 16);
}
