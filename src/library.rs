//! Loading the native wrapping module.

use crate::error::{Error, Result};
use crate::ffi::Symbols;
use crate::preload::dl_error;
use std::ffi::{c_void, CString};
use std::fmt;
use tracing::debug;

/// The native wrapping module and its resolved entry points.
///
/// A library loaded with [`open`](Self::open) owns its `dlopen` handle and
/// closes it on drop; the [`Symbols`] it hands out are only valid while it is
/// alive. [`crate::Runtime`] keeps the library for as long as it needs it.
pub struct NativeLibrary {
    symbols: Symbols,
    handle: *mut c_void,
    name: String,
}

impl NativeLibrary {
    /// Load the wrapping module at `path` and resolve all of its entry points.
    ///
    /// Any MPI library the module depends on should be preloaded first (see
    /// [`crate::preload()`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Initialization`] if the module cannot be loaded or an
    /// entry point is missing.
    pub fn open(path: &str) -> Result<Self> {
        let path_c = CString::new(path)
            .map_err(|_| Error::Initialization(format!("library path {path:?} contains a NUL byte")))?;

        let names = Symbols::NAMES
            .iter()
            .map(|name| CString::new(*name))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Initialization(format!("bad symbol name: {e}")))?;

        let handle = unsafe { libc::dlopen(path_c.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(Error::Initialization(format!(
                "dlopen {path} failed: {}",
                dl_error()
            )));
        }

        let mut resolved = [std::ptr::null_mut::<c_void>(); 9];
        for ((slot, name), name_c) in resolved.iter_mut().zip(Symbols::NAMES).zip(&names) {
            let sym = unsafe { libc::dlsym(handle, name_c.as_ptr()) };
            if sym.is_null() {
                let reason = dl_error();
                unsafe { libc::dlclose(handle) };
                return Err(Error::Initialization(format!(
                    "symbol {name} not found in {path}: {reason}"
                )));
            }
            *slot = sym;
        }

        // SAFETY: each pointer was resolved from the symbol of the same name,
        // whose C prototype matches the corresponding function pointer type.
        let symbols = unsafe {
            Symbols {
                initialize_mpi: std::mem::transmute(resolved[0]),
                finalize_mpi: std::mem::transmute(resolved[1]),
                get_world_size: std::mem::transmute(resolved[2]),
                get_world_rank: std::mem::transmute(resolved[3]),
                all_reduce_int: std::mem::transmute(resolved[4]),
                all_reduce_floatarray: std::mem::transmute(resolved[5]),
                external_call: std::mem::transmute(resolved[6]),
                external_reduce: std::mem::transmute(resolved[7]),
                external_reduce_with_callback: std::mem::transmute(resolved[8]),
            }
        };

        debug!(library = path, "wrapping module loaded");
        Ok(NativeLibrary {
            symbols,
            handle,
            name: path.to_string(),
        })
    }

    /// Wrap an already resolved symbol table.
    ///
    /// Nothing is unloaded on drop.
    pub fn from_symbols(symbols: Symbols) -> Self {
        NativeLibrary {
            symbols,
            handle: std::ptr::null_mut(),
            name: "<in-process>".to_string(),
        }
    }

    /// The statically linked `csrc/mpi_library.c`.
    #[cfg(feature = "bundled")]
    pub fn bundled() -> Self {
        let mut lib = Self::from_symbols(Symbols::linked());
        lib.name = "<bundled>".to_string();
        lib
    }

    /// Path the module was loaded from, or a placeholder for in-process tables.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn symbols(&self) -> &Symbols {
        &self.symbols
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("loaded", &!self.handle.is_null())
            .finish()
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { libc::dlclose(self.handle) };
        }
    }
}
