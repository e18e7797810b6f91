// Property-based tests for naming and ordering invariants.
//
// Three categories:
// 1. Forward-reference safety of `reachable_composites` over random nesting
// 2. Agreement of tensor and foreign forms of the same shape
// 3. Renames never overwrite an assigned name
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::HashMap;
use std::rc::Rc;

use phillip::descriptor::TypeId;
use phillip::oracle::NativeSizeOracle;
use phillip::structure::StructureGenerator;
use phillip::typemap::{Origin, ScalarTypeMap};
use proptest::prelude::*;

// ── Shape generator ─────────────────────────────────────────────────────────

/// A nested composite using only scalars present in every origin.
#[derive(Debug, Clone)]
enum Shape {
    Scalar(usize),
    Struct(Vec<Shape>),
}

/// (tensor name, foreign name) pairs with identical size and signage.
const SCALARS: &[(&str, &str)] = &[
    ("int8", "c_int8"),
    ("int16", "c_int16"),
    ("int32", "c_int32"),
    ("int64", "c_int64"),
    ("uint8", "c_uint8"),
    ("uint32", "c_uint32"),
    ("float32", "c_float"),
    ("float64", "c_double"),
];

fn arb_shape() -> impl Strategy<Value = Shape> {
    let leaf = (0..SCALARS.len()).prop_map(Shape::Scalar);
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(Shape::Struct)
    })
}

fn session() -> StructureGenerator {
    StructureGenerator::new(Rc::new(ScalarTypeMap::new(&NativeSizeOracle).expect("type map")))
}

fn build(sg: &mut StructureGenerator, shape: &Shape, origin: Origin) -> TypeId {
    match shape {
        Shape::Scalar(i) => match origin {
            Origin::Foreign => sg.foreign_scalar(SCALARS[*i].1).unwrap(),
            _ => sg.tensor_scalar(SCALARS[*i].0).unwrap(),
        },
        Shape::Struct(children) => {
            let fields: Vec<(String, TypeId)> = children
                .iter()
                .enumerate()
                .map(|(i, child)| (format!("f{i}"), build(sg, child, origin)))
                .collect();
            match origin {
                Origin::Foreign => sg.foreign_struct("Generated", fields).unwrap(),
                _ => sg.tensor_struct(fields).unwrap(),
            }
        }
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn composites_follow_their_fields(shape in arb_shape()) {
        let mut sg = session();
        let root = build(&mut sg, &shape, Origin::Tensor);
        let order = sg.reachable_composites(root).unwrap();

        let position: HashMap<TypeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        prop_assert_eq!(position.len(), order.len(), "duplicate in emission order");

        for (i, id) in order.iter().enumerate() {
            for field in sg.subfields(*id).unwrap().unwrap_or(&[]) {
                if let Some(&at) = position.get(&field.ty) {
                    prop_assert!(at < i, "field type emitted after its user");
                }
            }
        }
        if matches!(shape, Shape::Struct(_)) {
            prop_assert_eq!(order.last(), Some(&root));
        }
    }

    #[test]
    fn tensor_and_foreign_forms_agree(shape in arb_shape()) {
        let mut sg = session();
        let tensor = build(&mut sg, &shape, Origin::Tensor);
        let foreign = build(&mut sg, &shape, Origin::Foreign);
        prop_assert_eq!(
            sg.canonical_name(foreign).unwrap(),
            sg.canonical_name(tensor).unwrap()
        );
    }

    #[test]
    fn rename_after_naming_always_conflicts(shape in arb_shape(), name in "[A-Z][a-z]{3,8}") {
        let mut sg = session();
        let id = build(&mut sg, &shape, Origin::Tensor);
        let before = sg.canonical_name(id).unwrap();
        sg.rename(id, &name);
        prop_assert!(sg.canonical_name(id).is_err());
        prop_assert_eq!(sg.canonical_name(id).unwrap(), before);
    }
}
