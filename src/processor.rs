//! The expansion engine.
//!
//! [`Processor::process`] parses a user-data blob and flattens it into a
//! single `multipart/mixed` container. Every leaf is classified once:
//! include lists are fetched and expanded in place, archives are exploded
//! into one part per entry, and everything else is attached with its
//! content type corrected. Attaching always goes through [`attach_part`],
//! which numbers parts and keeps the `Number-Attachments` header equal to
//! the number of children.
//!
//! Bad fragments never abort expansion. An include that fails to fetch or
//! an archive that fails to decode simply contributes nothing, so a typo in
//! a URL makes that part disappear without an error. Each such case is
//! logged at `warn`. Only cache I/O failures (and the optional depth limit)
//! surface as errors.
//!
//! There is no cycle detection: a document that includes itself recurses
//! until the stack runs out, unless `max_depth` is configured.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, UserDataError};
use crate::fetch::{HttpFetcher, UrlFetcher};
use crate::model::content_type::{ARCHIVE_TYPES, INCLUDE_TYPES, TYPE_NEEDED, UNDEF_TYPE};
use crate::model::message::Message;
use crate::parser::archive::{self, ArchiveEntry, ArchiveHeaderMode};
use crate::parser::mime::parse_user_data;
use crate::parser::sniff::type_from_starts_with;
use crate::store::cache::IncludeCache;

const INCLUDE_ONCE_MARKER: &str = "#include-once";
const INCLUDE_MARKER: &str = "#include";

/// Expansion knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Maximum include nesting. `None` recurses without limit.
    pub max_depth: Option<usize>,
    /// Value selection for extra archive entry headers.
    pub archive_headers: ArchiveHeaderMode,
}

impl From<&Config> for ProcessOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_depth: config.processing.max_depth,
            archive_headers: config.processing.archive_headers,
        }
    }
}

/// What to do with a leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeafKind {
    /// Attach as-is under this content type.
    Plain(String),
    /// Payload is a list of URLs.
    Include,
    /// Payload is a YAML list of parts.
    Archive,
}

/// One usable line of an include list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IncludeLine<'a> {
    url: &'a str,
    once: bool,
}

impl<'a> IncludeLine<'a> {
    /// `None` for bare markers, comments and blank lines.
    fn parse(line: &'a str) -> Option<Self> {
        if line == INCLUDE_MARKER || line == INCLUDE_ONCE_MARKER {
            return None;
        }
        let (rest, once) = if let Some(rest) = line.strip_prefix(INCLUDE_ONCE_MARKER) {
            (rest.trim_start(), true)
        } else if let Some(rest) = line.strip_prefix(INCLUDE_MARKER) {
            (rest.trim_start(), false)
        } else {
            (line, false)
        };
        if rest.starts_with('#') {
            return None;
        }
        let url = rest.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self { url, once })
    }
}

/// Flattens user-data, fetching includes through `F`.
pub struct Processor<F: UrlFetcher> {
    fetcher: F,
    cache: IncludeCache,
    options: ProcessOptions,
}

impl Processor<HttpFetcher> {
    /// Processor with an HTTP fetcher and cache rooted per `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let cache = IncludeCache::new(crate::config::cache_dir(config));
        Ok(Self::new(fetcher, cache, ProcessOptions::from(config)))
    }
}

impl<F: UrlFetcher> Processor<F> {
    pub fn new(fetcher: F, cache: IncludeCache, options: ProcessOptions) -> Self {
        Self {
            fetcher,
            cache,
            options,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn cache(&self) -> &IncludeCache {
        &self.cache
    }

    /// Parse `blob` and expand it into a fresh container.
    pub fn process(&self, blob: &[u8]) -> Result<Message> {
        let base = parse_user_data(blob);
        let mut container = Message::multipart();
        self.expand(&base, &mut container, 0)?;
        info!(
            parts = container.children().len(),
            "Expanded user-data"
        );
        Ok(container)
    }

    /// Walk `node` pre-order and resolve every leaf into `container`.
    fn expand(&self, node: &Message, container: &mut Message, depth: usize) -> Result<()> {
        if let Some(limit) = self.options.max_depth {
            if depth > limit {
                return Err(UserDataError::DepthExceeded { limit });
            }
        }

        for part in node.walk() {
            // multipart/* are just containers
            if part.is_multipart() || part.main_type() == "multipart" {
                continue;
            }
            let payload = part.payload().unwrap_or_default();

            match classify(part.declared_type(), payload) {
                LeafKind::Include => self.resolve_include(payload, container, depth + 1)?,
                LeafKind::Archive => self.explode_archive(payload, container),
                LeafKind::Plain(ctype) => {
                    let mut leaf = part.clone();
                    if leaf.declared_type().as_deref() != Some(ctype.as_str()) {
                        leaf.set_content_type(&ctype);
                    }
                    attach_part(container, leaf);
                }
            }
        }
        Ok(())
    }

    /// Fetch each URL listed in `content` and expand what comes back.
    /// Lines may end in `\n`, `\r\n` or a bare `\r`.
    fn resolve_include(&self, content: &[u8], container: &mut Message, depth: usize) -> Result<()> {
        let text = String::from_utf8_lossy(content);
        for line in text.split(['\n', '\r']) {
            let Some(include) = IncludeLine::parse(line) else {
                continue;
            };
            let data = self.include_content(&include)?;
            if data.is_empty() {
                continue;
            }
            let msg = parse_user_data(&data);
            self.expand(&msg, container, depth)?;
        }
        Ok(())
    }

    /// Content for one include line: from cache for include-once hits,
    /// otherwise fetched. Failed fetches yield empty content.
    fn include_content(&self, include: &IncludeLine<'_>) -> Result<Vec<u8>> {
        let url = include.url;
        if include.once {
            if let Some(data) = self.cache.load(url)? {
                return Ok(data);
            }
        }

        let response = match self.fetcher.fetch(url) {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Include fetch failed, skipping");
                return Ok(Vec::new());
            }
        };
        if !self.fetcher.is_success(response.status) {
            warn!(url, status = response.status, "Include returned non-success status, skipping");
            return Ok(Vec::new());
        }
        if include.once {
            self.cache.store(url, &response.content)?;
        }
        Ok(response.content)
    }

    /// Attach one part per archive entry.
    fn explode_archive(&self, payload: &[u8], container: &mut Message) {
        for (idx, value) in archive::load_entries(payload).iter().enumerate() {
            let Some(entry) = ArchiveEntry::from_value(value) else {
                debug!(index = idx, "Skipping archive entry that is not a string or mapping");
                continue;
            };
            match entry.to_message(self.options.archive_headers) {
                Some(part) => attach_part(container, part),
                None => warn!(
                    index = idx,
                    ctype = %entry.content_type(),
                    "Archive entry type is not main/sub, skipping"
                ),
            }
        }
    }
}

/// Decide how a leaf is handled, sniffing generic types from the payload.
fn classify(declared: Option<String>, payload: &[u8]) -> LeafKind {
    let declared = declared.unwrap_or_else(|| UNDEF_TYPE.to_string());
    let ctype = if TYPE_NEEDED.contains(&declared.as_str()) {
        type_from_starts_with(payload, None)
            .map(str::to_string)
            .unwrap_or(declared)
    } else {
        declared
    };

    if INCLUDE_TYPES.contains(&ctype.as_str()) {
        LeafKind::Include
    } else if ARCHIVE_TYPES.contains(&ctype.as_str()) {
        LeafKind::Archive
    } else {
        LeafKind::Plain(ctype)
    }
}

/// Synthesized filename for the `n`th attached part.
pub fn part_filename(n: usize) -> String {
    format!("part-{n:03}")
}

/// Append `part` to `container`, naming it if needed and bumping the count.
pub fn attach_part(container: &mut Message, mut part: Message) {
    let cur = container.attachment_count();
    if part.filename().is_none() {
        part.set_attachment_filename(&part_filename(cur + 1));
    }
    container.push_child(part);
    container.set_attachment_count(cur + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::content_type::{ATTACHMENT_FIELD, NOT_MULTIPART};

    #[test]
    fn test_include_line_parse() {
        assert_eq!(IncludeLine::parse("#include"), None);
        assert_eq!(IncludeLine::parse("#include-once"), None);
        assert_eq!(
            IncludeLine::parse("#include http://a/b"),
            Some(IncludeLine { url: "http://a/b", once: false })
        );
        assert_eq!(
            IncludeLine::parse("#include-once   http://a/b  "),
            Some(IncludeLine { url: "http://a/b", once: true })
        );
        assert_eq!(
            IncludeLine::parse("http://plain/url"),
            Some(IncludeLine { url: "http://plain/url", once: false })
        );
        assert_eq!(IncludeLine::parse("# a comment"), None);
        assert_eq!(IncludeLine::parse("#include #commented"), None);
        assert_eq!(IncludeLine::parse("   "), None);
        assert_eq!(IncludeLine::parse("#include   "), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(None, b"#!/bin/sh"), LeafKind::Plain("text/x-shellscript".into()));
        assert_eq!(classify(Some("text/plain".into()), b"hello"), LeafKind::Plain("text/plain".into()));
        assert_eq!(
            classify(Some(NOT_MULTIPART.into()), b"hello"),
            LeafKind::Plain(NOT_MULTIPART.into())
        );
        assert_eq!(classify(Some("text/plain".into()), b"#include http://x"), LeafKind::Include);
        assert_eq!(
            classify(Some("text/plain".into()), b"#cloud-config-archive\n- a"),
            LeafKind::Archive
        );
        assert_eq!(classify(Some("text/x-include-once-url".into()), b"http://x"), LeafKind::Include);
        // Declared specific types are trusted, not sniffed.
        assert_eq!(
            classify(Some("text/cloud-config".into()), b"#!/bin/sh"),
            LeafKind::Plain("text/cloud-config".into())
        );
    }

    #[test]
    fn test_part_filename() {
        assert_eq!(part_filename(1), "part-001");
        assert_eq!(part_filename(42), "part-042");
        assert_eq!(part_filename(1234), "part-1234");
    }

    #[test]
    fn test_attach_part_counts_and_names() {
        let mut container = Message::multipart();
        attach_part(&mut container, Message::text("plain", "a"));
        let mut named = Message::text("plain", "b");
        named.set_attachment_filename("keep.txt");
        attach_part(&mut container, named);
        attach_part(&mut container, Message::text("plain", "c"));

        assert_eq!(container.headers.get(ATTACHMENT_FIELD), Some("3"));
        let names: Vec<String> = container
            .children()
            .iter()
            .map(|c| c.filename().unwrap())
            .collect();
        assert_eq!(names, vec!["part-001", "keep.txt", "part-003"]);
    }
}
