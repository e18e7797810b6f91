// Snapshot tests: lock rendered header and module text.
//
// Only renamed structures appear in the snapshots, so the text does not
// depend on structural hashes. Snapshots are inline; run
// `cargo insta review` after intentional output changes.

use std::rc::Rc;

use phillip::byte_array::byte_array_module;
use phillip::module::{ModuleGenerator, Variable};
use phillip::oracle::NativeSizeOracle;
use phillip::typemap::ScalarTypeMap;

fn type_map() -> Rc<ScalarTypeMap> {
    Rc::new(ScalarTypeMap::new(&NativeSizeOracle).expect("type map"))
}

fn point_module() -> ModuleGenerator {
    let mut module = ModuleGenerator::new(type_map());
    let sg = module.structure_generator();
    let int = sg.tensor_scalar("int32").unwrap();
    let point = sg.tensor_struct([("x", int), ("y", int)]).unwrap();
    module.add_structure(point, Some("Point"));

    module.add_variable(Variable::new("origin_offset", int).initialized("0").constant());
    let norm = module.add_function(
        "norm1",
        Some(int),
        vec![Variable::new("p", point)],
        "
        return p.x + p.y + origin_offset;
        ",
    );
    module.expose(norm);
    module
}

#[test]
fn snapshot_point_module() {
    let text = point_module().render_module().unwrap();
    insta::assert_snapshot!(text, @r#"
    struct Point {
        int x;
        int y;
    };

    int const origin_offset = 0;

    int norm1(Point p) {
        return p.x + p.y + origin_offset;
    }

    extern "C" {
    int c_norm1(Point p) {
        return norm1(p);
    }
    }
    "#);
}

#[test]
fn snapshot_point_header() {
    let text = point_module().render_header().unwrap();
    insta::assert_snapshot!(text, @r#"
    struct Point {
        int x;
        int y;
    };

    extern "C" {
    int c_norm1(Point p);
    }
    "#);
}

#[test]
fn snapshot_byte_array_header() {
    let text = byte_array_module(type_map()).unwrap().render_header().unwrap();
    insta::assert_snapshot!(text, @r#"
    struct ByteArray {
        unsigned char * data;
        int size;
    };

    extern "C" {
    ByteArray byte_array_alloc(long long size);
    void byte_array_free(ByteArray byte_array);
    }
    "#);
}

#[test]
fn snapshot_byte_array_module() {
    let text = byte_array_module(type_map()).unwrap().render_module().unwrap();
    insta::assert_snapshot!(text, @r#"
    #include "byte_array.hpp"
    #include <stdlib.h>

    ByteArray byte_array_alloc_(long long size) {
        ByteArray out;

        out.data = (unsigned char *)malloc(size);
        out.size = size;

        return out;
    }

    void byte_array_free_(ByteArray byte_array) {
        free(byte_array.data);
    }

    extern "C" {
    ByteArray byte_array_alloc(long long size) {
        return byte_array_alloc_(size);
    }

    void byte_array_free(ByteArray byte_array) {
        byte_array_free_(byte_array);
    }
    }
    "#);
}
