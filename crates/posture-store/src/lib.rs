//! Posture-Store: run record persistence
//!
//! Layer 0 of the posture assessment stack. Every finalized assessment run
//! is stored as one immutable, digest-verified record addressed by its run
//! identifier.
//!
//! ## Key Components
//!
//! - `RunStore`: publish / get / list / latest / previous
//! - `FsRunStore`: directory-per-run store with atomic publish
//! - `MemoryRunStore`: in-memory fake for tests

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryRunStore;
pub use fs_store::FsRunStore;
pub use storage_traits::{
    validate_run_id, ContentDigest, RunManifest, RunStore, StorageResult, StoredRun,
};
