//! On-disk storage used during expansion.

pub mod cache;
