// library.rs - Loading and unloading built units
//
// Failure modes: a unit that cannot be opened or closed produces `Load`.
// Side effects: maps the unit into the process until `unload`.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A loaded unit whose exported symbols can be looked up by name.
pub trait CallableUnit {
    fn lookup(&self, name: &str) -> Option<*const c_void>;
    fn path(&self) -> &Path;
}

pub struct LoadedUnit {
    library: libloading::Library,
    path: PathBuf,
}

impl LoadedUnit {
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedUnit> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: units are built by this crate from generated sources that
        // run no initialisers beyond the C++ runtime's own.
        let library = unsafe { libloading::Library::new(&path) }.map_err(|source| Error::Load {
            path: path.clone(),
            source,
        })?;
        log::debug!("loaded {}", path.display());
        Ok(LoadedUnit { library, path })
    }

    /// Release the unit. Symbols looked up from it must not be used after.
    pub fn unload(self) -> Result<()> {
        let LoadedUnit { library, path } = self;
        release(library).map_err(|source| Error::Load {
            path: path.clone(),
            source,
        })?;
        log::debug!("unloaded {}", path.display());
        Ok(())
    }
}

#[cfg(not(windows))]
fn release(library: libloading::Library) -> std::result::Result<(), libloading::Error> {
    library.close()
}

// The loader keeps a module mapped while its reference count is non-zero, so
// free the handle until the loader stops accepting it.
#[cfg(windows)]
fn release(library: libloading::Library) -> std::result::Result<(), libloading::Error> {
    use libloading::os::windows::Library as WindowsLibrary;

    let raw = WindowsLibrary::from(library).into_raw();
    // SAFETY: `raw` came from a library this function owns; each iteration
    // hands one reference back to the loader.
    let first = unsafe { WindowsLibrary::from_raw(raw) }.close();
    while unsafe { WindowsLibrary::from_raw(raw) }.close().is_ok() {}
    first
}

impl CallableUnit for LoadedUnit {
    fn lookup(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as an address only; callers cast it to
        // a function type through `BoundFunction::cast`.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        Some(*symbol)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_unit_fails_to_load() {
        let err = LoadedUnit::load("/nonexistent/libphillip_missing.so").err().unwrap();
        assert!(matches!(err, Error::Load { .. }));
        assert_eq!(err.code(), crate::error::codes::E0204);
    }
}
