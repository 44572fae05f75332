#![warn(missing_docs)]
//! # liveness-contract-tests
//!
//! Locates the frozen JSON contracts under the workspace `contracts/`
//! directory. The validation itself lives in `tests/`.

use std::path::PathBuf;

/// Absolute path of `name` inside the workspace `contracts/` directory.
pub fn contract_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../contracts")
        .join(name)
}
