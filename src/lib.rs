//! `userdata-expand`: flatten cloud user-data into a single MIME document.
//!
//! A user-data payload may be a bare script, a MIME multipart document,
//! a list of `#include` URLs, or a `#cloud-config-archive` YAML list, all
//! nested arbitrarily. [`processor::Processor`] resolves all of it into one
//! `multipart/mixed` container whose parts are numbered and typed.

pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod model;
pub mod parser;
pub mod processor;
pub mod store;

pub use error::{Result, UserDataError};
pub use model::message::Message;
pub use processor::{ProcessOptions, Processor};
