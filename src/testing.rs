//! In-process stand-in for the native wrapping module.
//!
//! Every entry point records its calls in thread-local state, so tests running
//! on different threads do not see each other's counters. The runtime's
//! exclusivity and finalize flags are process-wide though, so tests that open
//! a runtime hold [`lock`] for their whole body.

use crate::error::Result;
use crate::ffi::{ReduceIntArrayFn, ReduceIntArrayWithFuncFn, Symbols, TwoIntReduceFn};
use crate::{NativeLibrary, Runtime};
use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub init_status: c_int,
    pub finalize_status: c_int,
    pub collective_status: c_int,
    pub world_size: c_int,
    pub world_rank: c_int,
    /// Scalar contributions of the simulated peer ranks
    pub peer_ints: Vec<c_int>,
    /// Array contributions of the simulated peer ranks
    pub peer_floats: Vec<Vec<c_float>>,

    pub argv: Vec<String>,
    pub init_calls: usize,
    pub finalize_calls: usize,
    pub size_calls: usize,
    pub rank_calls: usize,
    pub reduce_int_calls: usize,
    pub reduce_array_calls: usize,
    pub external_calls: usize,
    /// Invocations of the native combiner handed to host reducers
    pub combiner_calls: usize,
    /// Combiner invocations made while no `external_reduce_with_callback`
    /// call was in flight
    pub late_combiner_calls: usize,
    pub in_reduce_with_callback: bool,
}

thread_local! {
    static STATE: RefCell<MockState> = RefCell::new(MockState::default());
}

static LIFECYCLE: Mutex<()> = Mutex::new(());

/// Serialize tests that open a runtime.
pub(crate) fn lock() -> MutexGuard<'static, ()> {
    LIFECYCLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reset this thread's mock state to a one-rank world and forget any earlier
/// finalize, so the next test can open a runtime again.
pub(crate) fn reset() {
    crate::RUNTIME_FINALIZED.store(false, Ordering::SeqCst);
    STATE.with(|s| {
        *s.borrow_mut() = MockState {
            world_size: 1,
            ..MockState::default()
        }
    });
}

pub(crate) fn with_state<T>(f: impl FnOnce(&mut MockState) -> T) -> T {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

pub(crate) fn symbols() -> Symbols {
    Symbols {
        initialize_mpi,
        finalize_mpi,
        get_world_size,
        get_world_rank,
        all_reduce_int,
        all_reduce_floatarray,
        external_call,
        external_reduce,
        external_reduce_with_callback,
    }
}

pub(crate) fn open<I, S>(args: I) -> Result<Runtime>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Runtime::open_with(NativeLibrary::from_symbols(symbols()), "mock-launcher", args)
}

pub(crate) fn scope<T>(body: impl FnOnce(&Runtime) -> Result<T>) -> Result<T> {
    Runtime::scope_with(
        NativeLibrary::from_symbols(symbols()),
        "mock-launcher",
        Vec::<String>::new(),
        body,
    )
}

unsafe extern "C" fn initialize_mpi(argc: c_int, argv: *mut *mut c_char) -> c_int {
    let args = (0..argc as usize)
        .map(|i| {
            CStr::from_ptr(*argv.add(i))
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    with_state(|s| {
        s.init_calls += 1;
        s.argv = args;
        s.init_status
    })
}

unsafe extern "C" fn finalize_mpi() -> c_int {
    with_state(|s| {
        s.finalize_calls += 1;
        s.finalize_status
    })
}

unsafe extern "C" fn get_world_size() -> c_int {
    with_state(|s| {
        s.size_calls += 1;
        s.world_size
    })
}

unsafe extern "C" fn get_world_rank() -> c_int {
    with_state(|s| {
        s.rank_calls += 1;
        s.world_rank
    })
}

/// Sum over this rank and every simulated peer.
unsafe extern "C" fn all_reduce_int(i: c_int, j: *mut c_int) -> c_int {
    with_state(|s| {
        s.reduce_int_calls += 1;
        if s.collective_status == 0 {
            *j = i + s.peer_ints.iter().sum::<c_int>();
        }
        s.collective_status
    })
}

/// Element-wise sum over this rank and every simulated peer.
unsafe extern "C" fn all_reduce_floatarray(
    source: *const c_float,
    dest: *mut c_float,
    length: c_int,
) -> c_int {
    with_state(|s| {
        s.reduce_array_calls += 1;
        if s.collective_status != 0 {
            return s.collective_status;
        }
        let source = std::slice::from_raw_parts(source, length as usize);
        let dest = std::slice::from_raw_parts_mut(dest, length as usize);
        for (k, out) in dest.iter_mut().enumerate() {
            *out = source[k] + s.peer_floats.iter().map(|peer| peer[k]).sum::<c_float>();
        }
        0
    })
}

// The state borrow must end before calling into host code, which may call
// back into the mock.

unsafe extern "C" fn external_call(func: Option<TwoIntReduceFn>, i: c_int, j: c_int) -> c_int {
    with_state(|s| s.external_calls += 1);
    match func {
        Some(func) => func(i, j),
        None => -1,
    }
}

unsafe extern "C" fn external_reduce(
    func: Option<ReduceIntArrayFn>,
    v: *mut c_int,
    v_size: c_int,
) -> c_int {
    with_state(|s| s.external_calls += 1);
    match func {
        Some(func) => func(v, v_size),
        None => -1,
    }
}

unsafe extern "C" fn external_reduce_with_callback(
    func: Option<ReduceIntArrayWithFuncFn>,
    v: *mut c_int,
    v_size: c_int,
) -> c_int {
    with_state(|s| {
        s.external_calls += 1;
        s.in_reduce_with_callback = true;
    });
    let result = match func {
        Some(func) => func(v, v_size, Some(reduce_int_array)),
        None => -1,
    };
    with_state(|s| s.in_reduce_with_callback = false);
    result
}

/// Native combiner: sums the array.
pub(crate) unsafe extern "C" fn reduce_int_array(v: *mut c_int, v_size: c_int) -> c_int {
    with_state(|s| {
        s.combiner_calls += 1;
        if !s.in_reduce_with_callback {
            s.late_combiner_calls += 1;
        }
    });
    if v.is_null() || v_size <= 0 {
        return 0;
    }
    std::slice::from_raw_parts(v, v_size as usize).iter().sum()
}

/// Like [`external_reduce_with_callback`] but hands the reducer a null combiner.
pub(crate) unsafe extern "C" fn external_reduce_with_null_callback(
    func: Option<ReduceIntArrayWithFuncFn>,
    v: *mut c_int,
    v_size: c_int,
) -> c_int {
    with_state(|s| s.external_calls += 1);
    match func {
        Some(func) => func(v, v_size, None),
        None => -1,
    }
}
