//! Marshaling Rust closures into native function pointers.
//!
//! The native callback signatures carry no user-data pointer, so a closure
//! cannot be handed over directly. Instead each call shape has an
//! `extern "C"` trampoline and a thread-local slot. For the duration of one
//! native call a [`SlotGuard`] stores a pointer to the closure in the slot; the
//! trampoline reads it back and invokes the closure. The guard restores the
//! previous slot value on drop, so a closure may itself issue another callback
//! call on the same thread.
//!
//! Panics never unwind into native frames: the trampoline catches them,
//! returns [`SENTINEL`] to native code and records the fault, which the
//! adapter reports as [`Error::CallbackFault`] once the native call returns.
//! A trampoline reached while its slot is empty (a stale pointer used after
//! its call returned) also returns [`SENTINEL`] and is logged.

use crate::error::{Error, Result};
use crate::ffi::ReduceIntArrayFn;
use crate::Runtime;
use std::any::Any;
use std::cell::Cell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::LocalKey;
use tracing::{debug, error};

/// Value returned to native code when a callback could not produce one.
pub(crate) const SENTINEL: c_int = 0;

type TwoIntFn<'f> = dyn FnMut(i32, i32) -> i32 + 'f;
type ReduceFn<'f> = dyn FnMut(&[i32]) -> i32 + 'f;
type ReduceWithFn<'f> = dyn for<'c> FnMut(&[i32], &NativeCombiner<'c>) -> i32 + 'f;

thread_local! {
    static TWO_INT: Cell<*mut c_void> = const { Cell::new(std::ptr::null_mut()) };
    static REDUCE: Cell<*mut c_void> = const { Cell::new(std::ptr::null_mut()) };
    static REDUCE_WITH: Cell<*mut c_void> = const { Cell::new(std::ptr::null_mut()) };
    static STRAY_CALLS: Cell<usize> = const { Cell::new(0) };
}

/// A closure bound to one in-flight native call.
struct Binding<'f, F: ?Sized + 'f> {
    func: &'f mut F,
    fault: Option<String>,
}

impl<'f, F: ?Sized + 'f> Binding<'f, F> {
    fn new(func: &'f mut F) -> Self {
        Binding { func, fault: None }
    }

    /// Turn the native result into the call outcome.
    fn finish(self, result: c_int) -> Result<i32> {
        match self.fault {
            Some(fault) => Err(Error::CallbackFault(fault)),
            None => Ok(result),
        }
    }
}

/// Keeps a binding installed in its slot for the guard's lifetime.
struct SlotGuard {
    slot: &'static LocalKey<Cell<*mut c_void>>,
    previous: *mut c_void,
}

impl SlotGuard {
    fn install(slot: &'static LocalKey<Cell<*mut c_void>>, binding: *mut c_void) -> Self {
        let previous = slot.with(|s| s.replace(binding));
        SlotGuard { slot, previous }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        self.slot.with(|s| s.set(previous));
    }
}

/// Run `native` with `binding` reachable from the slot's trampoline.
fn with_binding<'f, F: ?Sized + 'f>(
    slot: &'static LocalKey<Cell<*mut c_void>>,
    binding: &mut Binding<'f, F>,
    native: impl FnOnce() -> c_int,
) -> c_int {
    let _guard = SlotGuard::install(slot, (binding as *mut Binding<'f, F>).cast());
    native()
}

/// The binding currently installed in `slot`, if any.
///
/// # Safety
///
/// A non-null slot value must point to a live `Binding<F>` installed by
/// [`with_binding`] with the same `F`.
unsafe fn installed<'s, F: ?Sized + 'static>(
    slot: &'static LocalKey<Cell<*mut c_void>>,
    name: &'static str,
) -> Option<&'s mut Binding<'static, F>> {
    let ptr = slot.with(Cell::get).cast::<Binding<'static, F>>();
    if ptr.is_null() {
        STRAY_CALLS.with(|n| n.set(n.get() + 1));
        error!(callback = name, "callback invoked outside of its native call");
        return None;
    }
    Some(&mut *ptr)
}

/// Run `call` on the closure installed in `slot`, containing any panic.
///
/// # Safety
///
/// Same as [`installed`].
unsafe fn dispatch<F: ?Sized + 'static>(
    slot: &'static LocalKey<Cell<*mut c_void>>,
    name: &'static str,
    call: impl FnOnce(&mut F) -> c_int,
) -> c_int {
    let Some(binding) = installed::<F>(slot, name) else {
        return SENTINEL;
    };
    if binding.fault.is_some() {
        return SENTINEL;
    }
    match catch_unwind(AssertUnwindSafe(|| call(&mut *binding.func))) {
        Ok(value) => value,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(callback = name, %message, "callback panicked");
            binding.fault = Some(format!("{name} callback panicked: {message}"));
            SENTINEL
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Borrow `v[..v_size]` as a slice; null or non-positive sizes give `&[]`.
unsafe fn int_slice<'a>(v: *mut c_int, v_size: c_int) -> &'a [i32] {
    if v.is_null() || v_size <= 0 {
        &[]
    } else {
        std::slice::from_raw_parts(v, v_size as usize)
    }
}

unsafe extern "C" fn two_int_trampoline(a: c_int, b: c_int) -> c_int {
    dispatch::<TwoIntFn<'static>>(&TWO_INT, "external_call", |f| f(a, b))
}

unsafe extern "C" fn reduce_trampoline(v: *mut c_int, v_size: c_int) -> c_int {
    let values = int_slice(v, v_size);
    dispatch::<ReduceFn<'static>>(&REDUCE, "external_reduce", |f| f(values))
}

unsafe extern "C" fn reduce_with_trampoline(
    v: *mut c_int,
    v_size: c_int,
    combine: Option<ReduceIntArrayFn>,
) -> c_int {
    let values = int_slice(v, v_size);
    let Some(combine) = combine else {
        if let Some(binding) =
            installed::<ReduceWithFn<'static>>(&REDUCE_WITH, "external_reduce_with_callback")
        {
            error!("native combiner pointer is null");
            binding.fault = Some("native combiner pointer is null".into());
        }
        return SENTINEL;
    };
    let combiner = NativeCombiner::new(combine);
    dispatch::<ReduceWithFn<'static>>(&REDUCE_WITH, "external_reduce_with_callback", |f| {
        f(values, &combiner)
    })
}

/// Native reduction function handed to a host reducer by
/// [`Runtime::reduce_array_with_native_callback`].
///
/// Only valid while the reducer runs: the reducer receives it by reference
/// and cannot keep it.
pub struct NativeCombiner<'call> {
    func: ReduceIntArrayFn,
    _call: PhantomData<&'call ()>,
}

impl<'call> NativeCombiner<'call> {
    fn new(func: ReduceIntArrayFn) -> Self {
        NativeCombiner {
            func,
            _call: PhantomData,
        }
    }

    /// Combine `values` with the native function.
    ///
    /// The values are copied because the native side takes a mutable array.
    pub fn combine(&self, values: &[i32]) -> Result<i32> {
        let len = c_int::try_from(values.len()).map_err(|_| {
            Error::InvalidArgument(format!("{} values exceed the native count", values.len()))
        })?;
        let mut scratch = values.to_vec();
        Ok(unsafe { (self.func)(scratch.as_mut_ptr(), len) })
    }

    /// The raw native pointer, for forwarding to other native code.
    ///
    /// It must not be called after the reducer returns.
    pub fn as_raw(&self) -> ReduceIntArrayFn {
        self.func
    }
}

impl std::fmt::Debug for NativeCombiner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NativeCombiner")
            .field(&(self.func as *const c_void))
            .finish()
    }
}

/// Copy `array` into a buffer the native side may write to.
fn native_array(array: &[i32]) -> Result<(Vec<c_int>, c_int)> {
    let len = c_int::try_from(array.len()).map_err(|_| {
        Error::InvalidArgument(format!("array of {} elements exceeds the native count", array.len()))
    })?;
    Ok((array.to_vec(), len))
}

impl Runtime {
    /// Have native code call `func(i, j)` and return its result.
    ///
    /// `func` runs on the calling thread, inside the native call.
    ///
    /// # Errors
    ///
    /// [`Error::CallbackFault`] if `func` panics; the panic does not cross
    /// the native frame.
    pub fn call_external<F>(&self, mut func: F, i: i32, j: i32) -> Result<i32>
    where
        F: FnMut(i32, i32) -> i32,
    {
        let symbols = self.symbols()?;
        let mut binding = Binding::new(&mut func as &mut TwoIntFn<'_>);
        debug!(i, j, "external_call");
        let result = with_binding(&TWO_INT, &mut binding, || unsafe {
            (symbols.external_call)(Some(two_int_trampoline), i, j)
        });
        binding.finish(result)
    }

    /// Have native code reduce `array` with `func`.
    ///
    /// Native code calls `func` with the whole array and returns its value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the array is longer than a native `int`
    /// - [`Error::CallbackFault`] if `func` panics
    pub fn reduce_array<F>(&self, mut func: F, array: &[i32]) -> Result<i32>
    where
        F: FnMut(&[i32]) -> i32,
    {
        let symbols = self.symbols()?;
        let (mut scratch, len) = native_array(array)?;
        let mut binding = Binding::new(&mut func as &mut ReduceFn<'_>);
        debug!(len, "external_reduce");
        let result = with_binding(&REDUCE, &mut binding, || unsafe {
            (symbols.external_reduce)(Some(reduce_trampoline), scratch.as_mut_ptr(), len)
        });
        binding.finish(result)
    }

    /// Have native code reduce `array` with `func`, which is given a native
    /// combiner it may call any number of times.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mpibind::{Config, Runtime};
    /// # let mpi = Runtime::open(&Config::from_env(), Vec::<String>::new()).unwrap();
    /// // Sum each half natively, then take the larger half
    /// let best = mpi
    ///     .reduce_array_with_native_callback(
    ///         |values, native| {
    ///             let (left, right) = values.split_at(values.len() / 2);
    ///             let l = native.combine(left).unwrap_or(0);
    ///             let r = native.combine(right).unwrap_or(0);
    ///             l.max(r)
    ///         },
    ///         &[1, 2, 3, 4],
    ///     )
    ///     .unwrap();
    /// assert_eq!(best, 7);
    /// ```
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the array is longer than a native `int`
    /// - [`Error::CallbackFault`] if `func` panics or native code passes a
    ///   null combiner
    pub fn reduce_array_with_native_callback<F>(&self, mut func: F, array: &[i32]) -> Result<i32>
    where
        F: for<'c> FnMut(&[i32], &NativeCombiner<'c>) -> i32,
    {
        let symbols = self.symbols()?;
        let (mut scratch, len) = native_array(array)?;
        let mut binding = Binding::new(&mut func as &mut ReduceWithFn<'_>);
        debug!(len, "external_reduce_with_callback");
        let result = with_binding(&REDUCE_WITH, &mut binding, || unsafe {
            (symbols.external_reduce_with_callback)(
                Some(reduce_with_trampoline),
                scratch.as_mut_ptr(),
                len,
            )
        });
        binding.finish(result)
    }
}
