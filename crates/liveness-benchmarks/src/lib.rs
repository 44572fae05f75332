#![warn(missing_docs)]
//! # liveness-benchmarks
//!
//! Shared workload constants for the smoke benchmarks in `tests/`.

/// Iterations of the session loop per smoke run.
pub const LOOP_ITERATIONS: usize = 20;

/// Recorder chunks assembled per iteration.
pub const CHUNKS_PER_ARTIFACT: usize = 16;

/// Size of each synthetic recorder chunk.
pub const CHUNK_BYTES: usize = 16 * 1_024;
