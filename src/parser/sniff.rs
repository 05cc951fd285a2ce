//! Content-type sniffing from a payload's leading bytes.

use crate::model::content_type::{
    CLOUD_BOOTHOOK, CLOUD_CONFIG, CLOUD_CONFIG_ARCHIVE, INCLUDE_ONCE_URL, INCLUDE_URL,
    PART_HANDLER, SHELLSCRIPT, UPSTART_JOB,
};

/// Known prefixes, longest first so `#include-once` wins over `#include`.
const STARTS_WITH: [(&str, &str); 8] = [
    ("#cloud-config-archive", CLOUD_CONFIG_ARCHIVE),
    ("#cloud-boothook", CLOUD_BOOTHOOK),
    ("#include-once", INCLUDE_ONCE_URL),
    ("#cloud-config", CLOUD_CONFIG),
    ("#part-handler", PART_HANDLER),
    ("#upstart-job", UPSTART_JOB),
    ("#include", INCLUDE_URL),
    ("#!", SHELLSCRIPT),
];

/// Return the content type implied by the payload's prefix, or `default`.
pub fn type_from_starts_with<'a>(payload: &[u8], default: Option<&'a str>) -> Option<&'a str> {
    STARTS_WITH
        .iter()
        .find(|(prefix, _)| payload.starts_with(prefix.as_bytes()))
        .map(|&(_, ctype)| ctype)
        .or(default)
}
