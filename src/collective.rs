//! All-reduce collectives.
//!
//! Both operations are blocking and collective: they return on a process only
//! after every process in the world has issued the same call, in the same
//! order. A process that never makes the matching call hangs the others; there
//! is no timeout at this layer. The native module always combines by sum.

use crate::error::{Error, Result};
use crate::Runtime;
use std::os::raw::c_int;
use tracing::debug;

impl Runtime {
    /// All-reduce a single `i32`: returns the sum of `value` over all
    /// processes, on every process.
    ///
    /// # Errors
    ///
    /// [`Error::NativeCall`] with the native status if the collective fails.
    pub fn all_reduce_scalar(&self, value: i32) -> Result<i32> {
        let symbols = self.symbols()?;
        let mut combined: c_int = 0;
        debug!(value, "all_reduce_int");
        let ret = unsafe { (symbols.all_reduce_int)(value, &mut combined) };
        Error::check("all_reduce_int", ret)?;
        Ok(combined)
    }

    /// All-reduce `f32` values: `dest[k]` becomes the sum of `source[k]`
    /// over all processes.
    ///
    /// Shapes are checked before anything reaches the native side.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the slices are empty, differ in length,
    ///   or are longer than a native `int` can count
    /// - [`Error::NativeCall`] if the collective fails; `dest` is then in an
    ///   unspecified state and must not be trusted
    pub fn all_reduce_array(&self, source: &[f32], dest: &mut [f32]) -> Result<()> {
        let symbols = self.symbols()?;
        let length = checked_length(source.len(), dest.len())?;
        debug!(length, "all_reduce_floatarray");
        let ret =
            unsafe { (symbols.all_reduce_floatarray)(source.as_ptr(), dest.as_mut_ptr(), length) };
        Error::check("all_reduce_floatarray", ret)
    }

    /// All-reduce `f32` values into a new vector.
    ///
    /// Convenience method over [`all_reduce_array`](Self::all_reduce_array).
    pub fn all_reduce_vec(&self, source: &[f32]) -> Result<Vec<f32>> {
        let mut dest = vec![0.0; source.len()];
        self.all_reduce_array(source, &mut dest)?;
        Ok(dest)
    }
}

/// Validate an all-reduce buffer pair and return the native count.
fn checked_length(source: usize, dest: usize) -> Result<c_int> {
    if source == 0 || dest == 0 {
        return Err(Error::InvalidArgument("arrays must not be empty".into()));
    }
    if source != dest {
        return Err(Error::InvalidArgument(format!(
            "arrays not of equal length ({source} != {dest})"
        )));
    }
    c_int::try_from(source).map_err(|_| {
        Error::InvalidArgument(format!("{source} elements exceed the native count"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn scalar_sums_over_ranks() {
        let _lock = testing::lock();
        testing::reset();
        testing::with_state(|s| s.peer_ints = vec![1, 2, 3]);

        let mpi = testing::open(Vec::<String>::new()).unwrap();
        assert_eq!(mpi.all_reduce_scalar(0), Ok(6));
        assert_eq!(testing::with_state(|s| s.reduce_int_calls), 1);
    }

    #[test]
    fn scalar_failure_surfaces_status() {
        let _lock = testing::lock();
        testing::reset();
        testing::with_state(|s| s.collective_status = 13);

        let mpi = testing::open(Vec::<String>::new()).unwrap();
        assert_eq!(
            mpi.all_reduce_scalar(5),
            Err(Error::NativeCall {
                call: "all_reduce_int",
                code: 13
            })
        );
    }

    #[test]
    fn mismatched_or_empty_arrays_never_reach_native() {
        let _lock = testing::lock();
        testing::reset();
        let mpi = testing::open(Vec::<String>::new()).unwrap();

        let mut short = [0.0f32; 2];
        let mut empty: [f32; 0] = [];
        let cases: [(&[f32], &mut [f32]); 3] = [
            (&[1.0, 2.0, 3.0], &mut short),
            (&[], &mut [0.0; 1]),
            (&[1.0], &mut empty),
        ];
        for (source, dest) in cases {
            assert!(matches!(
                mpi.all_reduce_array(source, dest),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert_eq!(testing::with_state(|s| s.reduce_array_calls), 0);
    }

    #[test]
    fn array_failure_surfaces_status() {
        let _lock = testing::lock();
        testing::reset();
        testing::with_state(|s| s.collective_status = 2);

        let mpi = testing::open(Vec::<String>::new()).unwrap();
        let mut dest = [0.0f32; 3];
        assert_eq!(
            mpi.all_reduce_array(&[1.0, 2.0, 3.0], &mut dest),
            Err(Error::NativeCall {
                call: "all_reduce_floatarray",
                code: 2
            })
        );
    }

    #[test]
    fn vec_convenience() {
        let _lock = testing::lock();
        testing::reset();
        testing::with_state(|s| s.peer_floats = vec![vec![1.0, 1.0], vec![0.5, 0.5]]);

        let mpi = testing::open(Vec::<String>::new()).unwrap();
        assert_eq!(mpi.all_reduce_vec(&[1.0, 2.0]), Ok(vec![2.5, 3.5]));
        assert!(matches!(
            mpi.all_reduce_vec(&[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn checked_length_messages() {
        assert_eq!(checked_length(3, 3), Ok(3));
        assert_eq!(
            checked_length(3, 2),
            Err(Error::InvalidArgument("arrays not of equal length (3 != 2)".into()))
        );
        assert!(checked_length(usize::MAX, usize::MAX).is_err());
    }
}

/// Property tests for the all-reduce marshaling.
#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::testing;
    use proptest::collection::vec;
    use proptest::prelude::*;

    /// A local contribution plus the contributions of 0..5 peer ranks, all of
    /// the same length. Small integers keep the float sums exact.
    fn contributions() -> impl Strategy<Value = (Vec<i16>, Vec<Vec<i16>>)> {
        (1usize..32, 0usize..5).prop_flat_map(|(len, peers)| {
            (vec(-100i16..100, len), vec(vec(-100i16..100, len), peers))
        })
    }

    fn floats(values: &[i16]) -> Vec<f32> {
        values.iter().map(|&v| f32::from(v)).collect()
    }

    proptest! {
        /// Property: the destination holds the element-wise sum over all ranks.
        #[test]
        fn prop_array_matches_reference_sum((local, peers) in contributions()) {
            let _lock = testing::lock();
            testing::reset();
            let local = floats(&local);
            let peers: Vec<Vec<f32>> = peers.iter().map(|p| floats(p)).collect();
            let expected: Vec<f32> = (0..local.len())
                .map(|k| local[k] + peers.iter().map(|p| p[k]).sum::<f32>())
                .collect();
            testing::with_state(|s| s.peer_floats = peers);

            let mpi = testing::open(Vec::<String>::new()).unwrap();
            let mut dest = vec![f32::NAN; local.len()];
            prop_assert_eq!(mpi.all_reduce_array(&local, &mut dest), Ok(()));
            prop_assert_eq!(dest, expected);
            prop_assert_eq!(testing::with_state(|s| s.reduce_array_calls), 1);
        }

        /// Property: mismatched or empty arrays are rejected before any native call.
        #[test]
        fn prop_bad_shapes_never_reach_native(
            source_len in 0usize..16,
            dest_len in 0usize..16,
        ) {
            prop_assume!(source_len != dest_len || source_len == 0);
            let _lock = testing::lock();
            testing::reset();

            let mpi = testing::open(Vec::<String>::new()).unwrap();
            let source = vec![1.0f32; source_len];
            let mut dest = vec![0.0f32; dest_len];
            let outcome = mpi.all_reduce_array(&source, &mut dest);
            prop_assert!(matches!(outcome, Err(Error::InvalidArgument(_))));
            prop_assert_eq!(testing::with_state(|s| s.reduce_array_calls), 0);
            prop_assert!(dest.iter().all(|&v| v == 0.0));
        }
    }
}
