//! Content types that drive expansion.

/// Declared types that carry no real information and are re-derived by sniffing.
pub const TYPE_NEEDED: [&str; 2] = [TEXT_PLAIN, NOT_MULTIPART];

/// Types whose payload is a list of URLs to include.
pub const INCLUDE_TYPES: [&str; 2] = [INCLUDE_URL, INCLUDE_ONCE_URL];

/// Types whose payload is a YAML list of parts.
pub const ARCHIVE_TYPES: [&str; 1] = [CLOUD_CONFIG_ARCHIVE];

pub const TEXT_PLAIN: &str = "text/plain";
pub const NOT_MULTIPART: &str = "text/x-not-multipart";
pub const INCLUDE_URL: &str = "text/x-include-url";
pub const INCLUDE_ONCE_URL: &str = "text/x-include-once-url";
pub const SHELLSCRIPT: &str = "text/x-shellscript";
pub const CLOUD_CONFIG: &str = "text/cloud-config";
pub const CLOUD_CONFIG_ARCHIVE: &str = "text/cloud-config-archive";
pub const UPSTART_JOB: &str = "text/upstart-job";
pub const PART_HANDLER: &str = "text/part-handler";
pub const CLOUD_BOOTHOOK: &str = "text/cloud-boothook";
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// Type used when a leaf declares nothing at all.
pub const UNDEF_TYPE: &str = TEXT_PLAIN;

/// Type used for archive entries that neither declare nor sniff a type.
pub const ARCHIVE_UNDEF_TYPE: &str = CLOUD_CONFIG;

/// Header on the output container counting attached parts.
pub const ATTACHMENT_FIELD: &str = "Number-Attachments";

/// Split `main/sub` on the first `/`.
pub fn split_type(ctype: &str) -> Option<(&str, &str)> {
    let (main, sub) = ctype.split_once('/')?;
    let (main, sub) = (main.trim(), sub.trim());
    if main.is_empty() || sub.is_empty() {
        return None;
    }
    Some((main, sub))
}

/// Reduce a raw `Content-Type` header value to a lowercase `main/sub`.
pub fn normalize(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_lowercase()
}
