//! sbk-engine: backup and restore pipelines
//!
//! ```text
//! backup:  sources ─ pack ─▶ temp/payload_<name>.*.tar.lz4 ─ encrypt ─▶ dest/<name>.sbk
//! restore: archive.sbk ─ decrypt ─▶ temp/<stem>.*.tar.lz4 ─ unpack ─▶ output dir
//! ```
//!
//! The staging file is removed on every exit path.

pub mod pipeline;
pub mod staging;

pub use pipeline::{Engine, RestoreReport};
pub use staging::{write_replacing, StagedFile};
