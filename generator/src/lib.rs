// phillip - canonical C structs and FFI signatures from divergent type descriptors
//
// Library root. Leaves first: scalar map and oracle, descriptors, naming,
// layout, module assembly, then the build and load collaborators.

pub mod byte_array;
pub mod descriptor;
pub mod error;
pub mod layout;
pub mod library;
pub mod module;
pub mod oracle;
pub mod spelling;
pub mod structure;
pub mod toolchain;
pub mod typemap;

pub use error::{Error, Result};
