//! Input decoding: user-data blobs into message trees, content sniffing, and archive lists.

pub mod archive;
pub mod mime;
pub mod sniff;
