//! Command-line surface over [`ArchiveService`](crate::service::ArchiveService).

pub mod commands;

pub use commands::{Cli, Commands, SourcesCommand, run};
