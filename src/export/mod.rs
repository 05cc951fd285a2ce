//! Output of expanded user-data: MIME serialization and per-part files.

pub mod mime;
pub mod parts;
