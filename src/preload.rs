//! Global-scope preloading of the underlying MPI shared library.
//!
//! The wrapping module links against `libmpi`, but when the wrapping module is
//! itself loaded with `dlopen` the loader may bind its MPI symbols to whatever
//! `libmpi` it finds first, which is not necessarily the version the module
//! was built against. Loading the right version first with
//! `RTLD_LAZY | RTLD_GLOBAL` makes its symbols visible to every module loaded
//! afterwards, so the wrapping module binds to it.
//!
//! Preloading must happen before the wrapping module is loaded.
//! [`crate::Runtime::open`] does this for you using [`crate::Config::preload`].
//!
//! | Distribution            | Open MPI soname  |
//! |-------------------------|------------------|
//! | Ubuntu 16.04            | `libmpi.so.12`   |
//! | Ubuntu 18.04            | `libmpi.so.20`   |
//! | Open MPI 3.x and later  | `libmpi.so.40`   |

use crate::error::{Error, Result};
use std::ffi::{CStr, CString};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Libraries this process has already made global.
static PRELOADED: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Load `library` into the global symbol scope.
///
/// Repeated calls with the same name are no-ops. The `dlopen` handle is never
/// closed, the symbols stay global for the lifetime of the process.
///
/// # Errors
///
/// Returns [`Error::Preload`] if the loader cannot find or map the library.
/// This is not fatal by itself; callers normally log it and carry on, and the
/// native init reports the hard failure if the symbols really are missing.
pub fn preload(library: &str) -> Result<()> {
    let mut loaded = PRELOADED.lock().unwrap_or_else(PoisonError::into_inner);
    if loaded.iter().any(|name| name == library) {
        debug!(library, "already preloaded");
        return Ok(());
    }

    let name = CString::new(library).map_err(|_| Error::Preload {
        library: library.to_string(),
        reason: "library name contains a NUL byte".into(),
    })?;

    let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_GLOBAL) };
    if handle.is_null() {
        let reason = dl_error();
        warn!(library, %reason, "preload failed");
        return Err(Error::Preload {
            library: library.to_string(),
            reason,
        });
    }

    loaded.push(library.to_string());
    debug!(library, "preloaded into global symbol scope");
    Ok(())
}

/// Preload the first loadable library out of `candidates`.
///
/// Stops at the first success so only one version ends up in the global
/// scope. Returns the name that was loaded, or `None` for an empty list.
///
/// # Errors
///
/// Returns [`Error::Preload`] naming every candidate if none could be loaded.
pub fn preload_first<I, S>(candidates: I) -> Result<Option<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tried = Vec::new();
    let mut reasons = Vec::new();
    for candidate in candidates {
        let candidate = candidate.as_ref();
        match preload(candidate) {
            Ok(()) => return Ok(Some(candidate.to_string())),
            Err(Error::Preload { reason, .. }) => {
                tried.push(candidate.to_string());
                reasons.push(reason);
            }
            Err(other) => return Err(other),
        }
    }
    if tried.is_empty() {
        return Ok(None);
    }
    Err(Error::Preload {
        library: tried.join(", "),
        reason: reasons.join("; "),
    })
}

/// Last error message of the dynamic loader.
pub(crate) fn dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}
