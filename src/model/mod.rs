//! Message tree types: header bag, message nodes and the content types that drive expansion.

pub mod content_type;
pub mod headers;
pub mod message;
