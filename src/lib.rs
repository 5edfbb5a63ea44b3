pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod joblist;
pub mod report;
pub mod resume;
pub mod tier;
pub mod translate;
pub mod util;

pub use error::{ConfigError, JobError, JobListError, ListingError, TranslationError};
