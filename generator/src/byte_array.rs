// byte_array.rs - Byte buffers passed across the foreign-call boundary
//
// `ByteArray` owns a byte buffer and hands out `{pointer, length}` views of
// it laid out like the generated C struct. Views are computed on first use
// and cached; they are never recomputed, so writes through `as_mut_slice`
// show through them but the length they report is the one first seen.
//
// Lengths are C `int`s; buffers longer than `c_int::MAX` report
// `c_int::MAX`.

use std::ffi::c_int;
use std::ptr::NonNull;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::error::Result;
use crate::module::{ModuleGenerator, Variable};
use crate::typemap::ScalarTypeMap;

/// Call-ready `{data, length}` pair, layout-compatible with the generated
/// `ByteArray` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawByteArray {
    pub data: *mut u8,
    pub length: c_int,
}

pub struct ByteArray {
    data: Vec<u8>,
    base: *mut u8,
    buffer: OnceCell<NonNull<[u8]>>,
    pointer: OnceCell<*mut u8>,
    instance: OnceCell<RawByteArray>,
}

impl From<Vec<u8>> for ByteArray {
    fn from(mut data: Vec<u8>) -> Self {
        let base = data.as_mut_ptr();
        ByteArray {
            data,
            base,
            buffer: OnceCell::new(),
            pointer: OnceCell::new(),
            instance: OnceCell::new(),
        }
    }
}

impl From<&[u8]> for ByteArray {
    fn from(data: &[u8]) -> Self {
        ByteArray::from(data.to_vec())
    }
}

impl ByteArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the bytes. Cached views keep pointing at them.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Raw view aliasing the owned bytes.
    ///
    /// The view is computed on first access and every later call returns a
    /// reference to that same cached value, even after `as_mut_slice`.
    pub fn buffer(&self) -> &NonNull<[u8]> {
        self.buffer.get_or_init(|| {
            let base = NonNull::new(self.base).unwrap_or(NonNull::dangling());
            NonNull::slice_from_raw_parts(base, self.data.len())
        })
    }

    /// Address of the first byte, cached like `buffer`. Returned by
    /// reference so repeated calls hand out the same stored pointer.
    pub fn pointer(&self) -> &*mut u8 {
        self.pointer.get_or_init(|| self.buffer().as_ptr() as *mut u8)
    }

    /// Call-ready `{data, length}` pair, built once from `pointer`.
    pub fn instance(&self) -> &RawByteArray {
        self.instance.get_or_init(|| RawByteArray {
            data: *self.pointer(),
            length: c_int::try_from(self.data.len()).unwrap_or(c_int::MAX),
        })
    }
}

// ── Support module ──────────────────────────────────────────────────────────

/// Header the support module's declarations live in.
pub const BYTE_ARRAY_HEADER: &str = "byte_array.hpp";

/// Generator for the native side of `ByteArray`: the struct plus
/// `byte_array_alloc` and `byte_array_free`.
pub fn byte_array_module(type_map: Rc<ScalarTypeMap>) -> Result<ModuleGenerator> {
    let mut module = ModuleGenerator::with_header(type_map, BYTE_ARRAY_HEADER);
    module.add_header("<stdlib.h>", true);

    let sg = module.structure_generator();
    let data = sg.target("unsigned char *");
    let int = sg.target("int");
    let long_long = sg.target("long long");
    let byte_array = sg.record("ByteArray", [("data", data), ("size", int)])?;
    module.add_structure(byte_array, Some("ByteArray"));

    let alloc = module.add_function(
        "byte_array_alloc_",
        Some(byte_array),
        vec![Variable::new("size", long_long)],
        r#"
            ByteArray out;

            out.data = (unsigned char *)malloc(size);
            out.size = size;

            return out;
        "#,
    );
    let free = module.add_function(
        "byte_array_free_",
        None,
        vec![Variable::new("byte_array", byte_array)],
        "free(byte_array.data);",
    );

    let alloc = module.function(alloc).interface_named("byte_array_alloc");
    module.add_interface(alloc);
    let free = module.function(free).interface_named("byte_array_free");
    module.add_interface(free);

    Ok(module)
}
