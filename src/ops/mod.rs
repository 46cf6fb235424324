pub mod atomic;
pub mod backward;
pub mod encode;
pub mod hash;
pub mod interp;
pub mod plan;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(test)]
mod __test__;

pub use self::atomic::{AtomicF32, GradientAccumulator};
pub use self::backward::{
    hash_encode_backward, hash_encode_backward_into, scatter_atomic, scatter_partitioned,
};
pub use self::encode::{hash_encode, hash_encode_into};
pub use self::hash::{dense_index, fast_hash, slot, HASH_PRIMES};
pub use self::interp::{corner_slots, CellSample, NUM_CORNERS};
pub use self::plan::{IndexingMode, LevelDescriptor, LevelPlan};
