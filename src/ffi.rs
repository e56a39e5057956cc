//! Raw FFI types for the native wrapping module.
//!
//! The wrapping module exports nine C entry points. They are described here as
//! function pointer types and gathered in a [`Symbols`] table, which is either
//! resolved at run time ([`crate::NativeLibrary::open`]), linked statically
//! (`bundled` feature) or filled with in-process stand-ins.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_float, c_int};

/// `int (*)(int a, int b)`
pub type TwoIntReduceFn = unsafe extern "C" fn(a: c_int, b: c_int) -> c_int;

/// `int (*)(int v[], int v_size)`
pub type ReduceIntArrayFn = unsafe extern "C" fn(v: *mut c_int, v_size: c_int) -> c_int;

/// `int (*)(int v[], int v_size, int (*)(int v[], int v_size))`
pub type ReduceIntArrayWithFuncFn =
    unsafe extern "C" fn(v: *mut c_int, v_size: c_int, combine: Option<ReduceIntArrayFn>) -> c_int;

/// `int initialize_mpi(int argc, char *argv[])`
pub type initialize_mpi_t = unsafe extern "C" fn(argc: c_int, argv: *mut *mut c_char) -> c_int;
/// `int finalize_mpi()`
pub type finalize_mpi_t = unsafe extern "C" fn() -> c_int;
/// `int get_world_size()` and `int get_world_rank()`
pub type world_query_t = unsafe extern "C" fn() -> c_int;
/// `int all_reduce_int(int i, int& j)`
pub type all_reduce_int_t = unsafe extern "C" fn(i: c_int, j: *mut c_int) -> c_int;
/// `int all_reduce_floatarray(float source[], float dest[], int length)`
pub type all_reduce_floatarray_t =
    unsafe extern "C" fn(source: *const c_float, dest: *mut c_float, length: c_int) -> c_int;
/// `int external_call(TwoIntReduceDelegate, int i, int j)`
pub type external_call_t =
    unsafe extern "C" fn(func: Option<TwoIntReduceFn>, i: c_int, j: c_int) -> c_int;
/// `int external_reduce(ReduceIntArrayDelegate, int i[], int i_size)`
pub type external_reduce_t =
    unsafe extern "C" fn(func: Option<ReduceIntArrayFn>, v: *mut c_int, v_size: c_int) -> c_int;
/// `int external_reduce_with_callback(ReduceIntArrayWithFuncDelegate, int i[], int i_size)`
pub type external_reduce_with_callback_t = unsafe extern "C" fn(
    func: Option<ReduceIntArrayWithFuncFn>,
    v: *mut c_int,
    v_size: c_int,
) -> c_int;

/// Resolved entry points of the wrapping module.
///
/// Every pointer must stay callable for as long as the table is in use. For a
/// table produced by [`crate::NativeLibrary`] that is guaranteed by the library
/// owning the `dlopen` handle.
#[derive(Debug, Clone, Copy)]
pub struct Symbols {
    /// `initialize_mpi`
    pub initialize_mpi: initialize_mpi_t,
    /// `finalize_mpi`
    pub finalize_mpi: finalize_mpi_t,
    /// `get_world_size`
    pub get_world_size: world_query_t,
    /// `get_world_rank`
    pub get_world_rank: world_query_t,
    /// `all_reduce_int`
    pub all_reduce_int: all_reduce_int_t,
    /// `all_reduce_floatarray`
    pub all_reduce_floatarray: all_reduce_floatarray_t,
    /// `external_call`
    pub external_call: external_call_t,
    /// `external_reduce`
    pub external_reduce: external_reduce_t,
    /// `external_reduce_with_callback`
    pub external_reduce_with_callback: external_reduce_with_callback_t,
}

#[cfg(feature = "bundled")]
mod linked {
    use super::{c_char, c_float, c_int, ReduceIntArrayFn, ReduceIntArrayWithFuncFn, TwoIntReduceFn};

    extern "C" {
        pub fn initialize_mpi(argc: c_int, argv: *mut *mut c_char) -> c_int;
        pub fn finalize_mpi() -> c_int;
        pub fn get_world_size() -> c_int;
        pub fn get_world_rank() -> c_int;
        pub fn all_reduce_int(i: c_int, j: *mut c_int) -> c_int;
        pub fn all_reduce_floatarray(source: *const c_float, dest: *mut c_float, length: c_int)
            -> c_int;
        pub fn external_call(func: Option<TwoIntReduceFn>, i: c_int, j: c_int) -> c_int;
        pub fn external_reduce(
            func: Option<ReduceIntArrayFn>,
            v: *mut c_int,
            v_size: c_int,
        ) -> c_int;
        pub fn external_reduce_with_callback(
            func: Option<ReduceIntArrayWithFuncFn>,
            v: *mut c_int,
            v_size: c_int,
        ) -> c_int;
    }
}

impl Symbols {
    /// Symbol names in the order they are resolved.
    pub const NAMES: [&'static str; 9] = [
        "initialize_mpi",
        "finalize_mpi",
        "get_world_size",
        "get_world_rank",
        "all_reduce_int",
        "all_reduce_floatarray",
        "external_call",
        "external_reduce",
        "external_reduce_with_callback",
    ];

    /// Entry points of the statically linked `csrc/mpi_library.c`.
    #[cfg(feature = "bundled")]
    pub fn linked() -> Self {
        Symbols {
            initialize_mpi: linked::initialize_mpi,
            finalize_mpi: linked::finalize_mpi,
            get_world_size: linked::get_world_size,
            get_world_rank: linked::get_world_rank,
            all_reduce_int: linked::all_reduce_int,
            all_reduce_floatarray: linked::all_reduce_floatarray,
            external_call: linked::external_call,
            external_reduce: linked::external_reduce,
            external_reduce_with_callback: linked::external_reduce_with_callback,
        }
    }
}
