//! Hello World example - open the runtime and query the world.
//!
//! Run with: mpiexec -n 4 cargo run --example hello_world
//!
//! Set `MPIBIND_LIBRARY` to the path of `libMpiLibrary.so` if it is not on the
//! loader search path, and `RUST_LOG=mpibind=debug` to see the native calls.

use mpibind::{Config, Result, Runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Config::from_env();
    let mpi = Runtime::open(&config, std::env::args().skip(1))?;

    let rank = mpi.world_rank()?;
    let size = mpi.world_size()?;
    println!("Hello from rank {} of {} ({})", rank, size, mpi.library().name());

    // Doubles as a barrier before exiting
    let reported = mpi.all_reduce_scalar(1)?;
    if rank == 0 {
        assert_eq!(reported, size);
        println!("\nAll {reported} processes reported in. Test passed!");
    }

    // MPI is finalized when `mpi` is dropped
    Ok(())
}
