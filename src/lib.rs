// Library interface for testing

pub mod capture;
pub mod config;
pub mod constants;
pub mod encode;
pub mod error;
pub mod ingest;
pub mod mkv;
pub mod recorder;
pub mod serve;
pub mod session;
pub mod storage;

pub use error::{ArchiveError, ArchiveResult, ValidationError};
