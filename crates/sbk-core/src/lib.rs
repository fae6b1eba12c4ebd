//! sbk-core: shared types, config schema, engine paths, and the error
//! taxonomy used by every SecureBackup crate.

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use error::{ErrorKind, SbkError, SbkResult};
pub use paths::EnginePaths;
