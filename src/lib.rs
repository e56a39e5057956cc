//! # mpibind
//!
//! Safe Rust bindings to a native MPI wrapping module.
//!
//! The wrapping module is a small C library that exports `initialize_mpi`,
//! `finalize_mpi`, rank/size queries, integer and float all-reduce, and three
//! entry points that call back into caller-supplied function pointers. This
//! crate provides:
//! - Preloading of the right `libmpi` soname into the global symbol scope
//! - A [`Runtime`] handle that initializes and finalizes MPI exactly once
//! - Length-checked all-reduce of scalars and `f32` slices
//! - Marshaling of Rust closures into C function pointers for one native call
//!
//! ## Quick Start
//!
//! ```no_run
//! use mpibind::{Config, Runtime};
//!
//! fn main() -> Result<(), mpibind::Error> {
//!     let config = Config::from_env();
//!     let mpi = Runtime::open(&config, std::env::args().skip(1))?;
//!
//!     let rank = mpi.world_rank()?;
//!     let size = mpi.world_size()?;
//!     println!("Hello from rank {rank} of {size}");
//!
//!     let sum = mpi.all_reduce_scalar(rank)?;
//!     println!("Rank {rank}: sum of all ranks = {sum}");
//!
//!     let product = mpi.call_external(|a, b| a * b, 6, 7)?;
//!     assert_eq!(product, 42);
//!
//!     Ok(())
//!     // MPI is finalized when `mpi` goes out of scope
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Description |
//! |-----------|-------------|
//! | `bundled` | Compile `csrc/mpi_library.c` and link it, enabling [`NativeLibrary::bundled`] |
//!
//! ## Threading
//!
//! The native runtime is initialized in its single-threaded mode. [`Runtime`]
//! is neither `Send` nor `Sync`, so every call is issued from the thread that
//! opened it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod argv;
mod callback;
mod collective;
mod config;
mod error;
pub mod ffi;
mod library;
mod preload;
#[cfg(test)]
mod testing;

pub use callback::NativeCombiner;
pub use config::{Config, DEFAULT_LIBRARY, DEFAULT_PRELOAD};
pub use error::{Error, Result};
pub use ffi::Symbols;
pub use library::NativeLibrary;
pub use preload::{preload, preload_first};

use argv::NativeArgv;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Version of the MPI library the bundled wrapping module was built against,
/// when the build script could determine it.
pub const BUNDLED_MPI_VERSION: Option<&str> = option_env!("MPIBIND_MPI_VERSION");

/// Global flag tracking whether a runtime handle is live in this process
static RUNTIME_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Set once native finalize has run; MPI cannot be initialized again after it
static RUNTIME_FINALIZED: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// Native runtime handle.
///
/// This type represents an initialized native runtime. There can only be one
/// instance per process: once [`close`](Self::close) has finalized it (or the
/// handle was dropped while still open), no new handle can be opened.
///
/// # Example
///
/// ```no_run
/// use mpibind::{Config, Runtime};
///
/// let mpi = Runtime::open(&Config::from_env(), std::env::args().skip(1))
///     .expect("Failed to initialize MPI");
/// println!("Running on {} processes", mpi.world_size().unwrap());
/// // MPI is finalized when `mpi` goes out of scope
/// ```
pub struct Runtime {
    library: NativeLibrary,
    /// The argv handed to init; MPI may keep pointers into it
    _argv: NativeArgv,
    state: State,
    /// Marker to make Runtime !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Runtime {
    /// Preload MPI, load the wrapping module and initialize the runtime.
    ///
    /// `args` are the user arguments of the process (without the program
    /// name); the native argv is `[config.launcher, <executable>, args...]`.
    ///
    /// A failed preload is logged and ignored: if the symbols really cannot
    /// be resolved, loading the wrapping module or native init fails instead.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInitialized`] if a handle is live, or the runtime was
    ///   already finalized in this process
    /// - [`Error::Initialization`] if the wrapping module cannot be loaded or
    ///   native init fails
    /// - [`Error::InvalidArgument`] if an argument contains a NUL byte
    pub fn open<I, S>(config: &Config, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if RUNTIME_ACTIVE.load(Ordering::SeqCst) || RUNTIME_FINALIZED.load(Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        match preload_first(&config.preload) {
            Ok(Some(library)) => debug!(%library, "MPI library preloaded"),
            Ok(None) => debug!("preloading disabled"),
            Err(e) => warn!(error = %e, "continuing without a preloaded MPI library"),
        }

        let library = NativeLibrary::open(&config.library)?;
        Self::open_with(library, &config.launcher, args)
    }

    /// Initialize the runtime from an already loaded wrapping module.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus the loading step.
    pub fn open_with<I, S>(library: NativeLibrary, launcher: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut argv = NativeArgv::new(launcher, &argv::program_path(), args)?;

        if RUNTIME_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        if RUNTIME_FINALIZED.load(Ordering::SeqCst) {
            RUNTIME_ACTIVE.store(false, Ordering::SeqCst);
            warn!("native runtime was already finalized in this process");
            return Err(Error::AlreadyInitialized);
        }

        debug!(argv = ?argv.to_strings(), "initialize_mpi");
        let ret = unsafe { (library.symbols().initialize_mpi)(argv.argc(), argv.as_mut_ptr()) };
        if ret != 0 {
            RUNTIME_ACTIVE.store(false, Ordering::SeqCst);
            return Err(Error::Initialization(format!(
                "initialize_mpi returned {ret}"
            )));
        }

        let runtime = Runtime {
            library,
            _argv: argv,
            state: State::Open,
            _marker: PhantomData,
        };
        let symbols = runtime.library.symbols();
        let (rank, size) = unsafe { ((symbols.get_world_rank)(), (symbols.get_world_size)()) };
        info!(library = runtime.library.name(), rank, size, "native runtime initialized");
        Ok(runtime)
    }

    /// Run `body` with a freshly opened runtime and close it afterwards.
    ///
    /// The runtime is finalized on every exit path of `body`, including an
    /// early `Err` return. An error from `body` takes precedence over an error
    /// from finalize.
    pub fn scope<I, S, T, F>(config: &Config, args: I, body: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&Runtime) -> Result<T>,
    {
        let runtime = Self::open(config, args)?;
        runtime.finish(body)
    }

    /// [`scope`](Self::scope) for an already loaded wrapping module.
    pub fn scope_with<I, S, T, F>(library: NativeLibrary, launcher: &str, args: I, body: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&Runtime) -> Result<T>,
    {
        let runtime = Self::open_with(library, launcher, args)?;
        runtime.finish(body)
    }

    fn finish<T, F>(mut self, body: F) -> Result<T>
    where
        F: FnOnce(&Runtime) -> Result<T>,
    {
        let outcome = body(&self);
        let closed = self.close();
        let value = outcome?;
        closed?;
        Ok(value)
    }

    /// Finalize the native runtime.
    ///
    /// Only the first call reaches native finalize; later calls are no-ops
    /// returning `Ok(())`. Every other operation fails with
    /// [`Error::NotInitialized`] once the handle is closed, and the process
    /// cannot open another runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NativeCall`] if native finalize reports failure. The
    /// handle is closed regardless.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            debug!("runtime already closed");
            return Ok(());
        }
        let symbols = self.library.symbols();
        let (rank, size) = unsafe { ((symbols.get_world_rank)(), (symbols.get_world_size)()) };
        self.state = State::Closed;
        let ret = unsafe { (symbols.finalize_mpi)() };
        RUNTIME_FINALIZED.store(true, Ordering::SeqCst);
        RUNTIME_ACTIVE.store(false, Ordering::SeqCst);
        info!(rank, size, status = ret, "native runtime finalized");
        Error::check("finalize_mpi", ret)
    }

    /// Whether this handle is open.
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Whether any runtime handle is live in this process.
    pub fn is_active() -> bool {
        RUNTIME_ACTIVE.load(Ordering::SeqCst)
    }

    /// Number of processes in the world communicator.
    pub fn world_size(&self) -> Result<i32> {
        let symbols = self.symbols()?;
        Ok(unsafe { (symbols.get_world_size)() })
    }

    /// Rank of the calling process in the world communicator.
    pub fn world_rank(&self) -> Result<i32> {
        let symbols = self.symbols()?;
        Ok(unsafe { (symbols.get_world_rank)() })
    }

    /// The loaded wrapping module.
    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    /// Entry points, available only while the handle is open.
    pub(crate) fn symbols(&self) -> Result<&Symbols> {
        match self.state {
            State::Open => Ok(self.library.symbols()),
            State::Closed => Err(Error::NotInitialized),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "finalize failed while dropping the runtime");
        }
    }
}
