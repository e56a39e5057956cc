//! Integration test for runtime lifecycle functions.
//!
//! Exercises preload, Runtime::open, is_open, is_active, close and the
//! NotInitialized / AlreadyInitialized guards, including open after finalize.
//!
//! Run with: mpiexec -n 2 ./target/debug/examples/test_lifecycle

use mpibind::{preload_first, Config, Error, Runtime};

fn main() {
    let config = Config::from_env();

    // Preloading is idempotent and non-fatal
    let first = preload_first(&config.preload);
    let second = preload_first(&config.preload);
    assert_eq!(first, second, "preload should be idempotent");
    println!("PASS: preload = {:?}", first);

    let mut mpi = Runtime::open(&config, std::env::args().skip(1)).expect("open failed");
    assert!(mpi.is_open(), "is_open should be true after open");
    assert!(Runtime::is_active(), "is_active should be true after open");
    println!("PASS: open");

    // A second handle cannot be opened while the first is live
    let again = Runtime::open(&config, Vec::<String>::new());
    assert_eq!(again.err(), Some(Error::AlreadyInitialized));
    println!("PASS: second open rejected");

    let rank = mpi.world_rank().expect("world_rank failed");
    let size = mpi.world_size().expect("world_size failed");
    assert!(rank >= 0 && rank < size, "rank should be in [0, size)");
    println!("PASS: world rank={} size={}", rank, size);

    mpi.close().expect("close failed");
    assert!(!mpi.is_open());
    assert!(!Runtime::is_active());
    println!("PASS: close");

    // Second close is a no-op, queries are rejected
    mpi.close().expect("second close should be a no-op");
    assert_eq!(mpi.world_size(), Err(Error::NotInitialized));
    println!("PASS: closed handle rejects operations");

    // MPI cannot be initialized again once finalized
    let reopened = Runtime::open(&config, Vec::<String>::new());
    assert_eq!(reopened.err(), Some(Error::AlreadyInitialized));
    println!("PASS: open after finalize rejected");

    if rank == 0 {
        println!("\n========================================");
        println!("All lifecycle tests passed!");
        println!("========================================");
    }
}
