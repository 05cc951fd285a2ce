//! Fetching include URLs.

pub mod http;

pub use http::HttpFetcher;

/// Body and status returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub content: Vec<u8>,
    pub status: u16,
}

impl FetchResponse {
    pub fn new(content: impl Into<Vec<u8>>, status: u16) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }
}

/// Something that can retrieve the content behind an include URL.
///
/// Transport failures are reported as `Err`; the expansion engine treats
/// them exactly like a non-success status.
pub trait UrlFetcher {
    fn fetch(&self, url: &str) -> crate::error::Result<FetchResponse>;

    /// Whether `status` counts as a successful fetch.
    fn is_success(&self, status: u16) -> bool {
        is_ok_status(status, false)
    }
}

/// 2xx is success; 3xx too when `redirects_ok` is set.
pub fn is_ok_status(status: u16, redirects_ok: bool) -> bool {
    if redirects_ok {
        (200..400).contains(&status)
    } else {
        (200..300).contains(&status)
    }
}
