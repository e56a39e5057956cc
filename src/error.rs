//! Error types for mpibind

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A shared library could not be preloaded into the global symbol scope.
    ///
    /// Non-fatal on its own: the hard failure, if any, surfaces at init.
    #[error("Failed to preload {library}: {reason}")]
    Preload {
        /// Library name passed to the dynamic loader
        library: String,
        /// Message reported by the dynamic loader
        reason: String,
    },

    /// The wrapping module could not be loaded or native init failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// A runtime handle is already live in this process
    #[error("The native runtime has already been initialized")]
    AlreadyInitialized,

    /// Operation attempted on a handle that is not open
    #[error("The native runtime has not been initialized")]
    NotInitialized,

    /// Malformed arguments, rejected before crossing the native boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A native call returned a non-success status code
    #[error("Native call {call} failed (code {code})")]
    NativeCall {
        /// Name of the native entry point
        call: &'static str,
        /// Status code it returned
        code: i32,
    },

    /// A host callback faulted while invoked from native code
    #[error("Callback fault: {0}")]
    CallbackFault(String),
}

impl Error {
    /// Check a native return code, returning `Ok(())` for success (0).
    pub fn check(call: &'static str, code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Error::NativeCall { call, code })
        }
    }
}
