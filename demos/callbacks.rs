//! Callback example - Rust closures called from native code.
//!
//! Run with: mpiexec -n 2 cargo run --example callbacks

use mpibind::{Config, Error, Result, Runtime};

fn main() -> Result<()> {
    let mpi = Runtime::open(&Config::from_env(), std::env::args().skip(1))?;
    let rank = mpi.world_rank()?;

    // Two-integer function
    let sum = mpi.call_external(|a, b| a + b, 3, 4)?;
    assert_eq!(sum, 7);

    // Closures may capture state
    let scale = rank + 1;
    let scaled = mpi.call_external(|a, b| (a + b) * scale, 1, 2)?;
    assert_eq!(scaled, 3 * scale);

    // Array reducer
    let data = [3, 1, 4, 1, 5, 9, 2, 6];
    let max = mpi.reduce_array(|v| v.iter().copied().max().unwrap_or(0), &data)?;
    assert_eq!(max, 9);

    // Reducer that delegates pairwise combination to the native combiner
    let mut native_calls = 0;
    let total = mpi.reduce_array_with_native_callback(
        |values, native| {
            let mut acc = values.first().copied().unwrap_or(0);
            for &v in values.iter().skip(1) {
                native_calls += 1;
                acc = native.combine(&[acc, v]).unwrap_or(acc);
            }
            acc
        },
        &data,
    )?;
    assert_eq!(total, data.iter().sum::<i32>());
    assert_eq!(native_calls, data.len() - 1);

    // A panicking callback is reported, not unwound through native code
    let err = mpi.call_external(|_, _| panic!("deliberate"), 0, 0).unwrap_err();
    assert!(matches!(err, Error::CallbackFault(_)));

    if rank == 0 {
        println!("✓ external_call: {sum}, {scaled}");
        println!("✓ external_reduce: {max}");
        println!("✓ external_reduce_with_callback: {total} ({native_calls} native calls)");
        println!("✓ callback fault contained: {err}");
    }

    Ok(())
}
