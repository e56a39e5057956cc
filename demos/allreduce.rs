//! All-reduce example - scalar and array sums across all processes.
//!
//! Run with: mpiexec -n 4 cargo run --example allreduce

use mpibind::{Config, Error, Result, Runtime};

fn main() -> Result<()> {
    Runtime::scope(&Config::from_env(), std::env::args().skip(1), |mpi| {
        let rank = mpi.world_rank()?;
        let size = mpi.world_size()?;

        println!("Rank {}/{}: Starting all-reduce tests", rank, size);

        // ============================================================
        // Test 1: Scalar all-reduce (sum of ranks)
        // ============================================================
        {
            let sum = mpi.all_reduce_scalar(rank)?;
            let expected: i32 = (0..size).sum();
            assert_eq!(sum, expected, "Scalar all-reduce failed on rank {}", rank);

            if rank == 0 {
                println!("✓ Scalar all-reduce test passed (sum = {})", sum);
            }
        }

        // ============================================================
        // Test 2: Array all-reduce
        // ============================================================
        {
            let send = vec![rank as f32 + 1.0; 4];
            let mut recv = vec![0.0; 4];

            mpi.all_reduce_array(&send, &mut recv)?;

            let expected: f32 = (1..=size).map(|x| x as f32).sum();
            assert_eq!(recv, vec![expected; 4], "Array all-reduce failed on rank {}", rank);

            if rank == 0 {
                println!("✓ Array all-reduce test passed");
            }
        }

        // ============================================================
        // Test 3: Mismatched lengths are rejected locally
        // ============================================================
        {
            // Every rank rejects before the native call, so no rank blocks
            let mut short = vec![0.0; 2];
            let err = mpi.all_reduce_array(&[1.0, 2.0, 3.0], &mut short).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));

            if rank == 0 {
                println!("✓ Length mismatch rejected: {}", err);
            }
        }

        // ============================================================
        // Test 4: Vec convenience
        // ============================================================
        {
            let summed = mpi.all_reduce_vec(&[rank as f32, 1.0])?;
            let expected: f32 = (0..size).map(|x| x as f32).sum();
            assert_eq!(summed, vec![expected, size as f32]);

            if rank == 0 {
                println!("✓ all_reduce_vec test passed");
                println!("\n========================================");
                println!("All all-reduce tests passed!");
                println!("========================================");
            }
        }

        Ok(())
    })
}
