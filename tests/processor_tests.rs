//! Integration tests for user-data expansion: includes, archives, and part bookkeeping.

use std::cell::RefCell;
use std::collections::HashMap;

use userdata_expand::error::Result;
use userdata_expand::export::mime::to_bytes;
use userdata_expand::fetch::{FetchResponse, UrlFetcher};
use userdata_expand::model::content_type::ATTACHMENT_FIELD;
use userdata_expand::parser::archive::ArchiveHeaderMode;
use userdata_expand::parser::mime::parse_user_data;
use userdata_expand::store::cache::IncludeCache;
use userdata_expand::{Message, ProcessOptions, Processor, UserDataError};

/// In-memory fetcher that records every URL it is asked for.
#[derive(Default)]
struct FakeFetcher {
    responses: HashMap<String, (Vec<u8>, u16)>,
    calls: RefCell<Vec<String>>,
}

impl FakeFetcher {
    fn with(mut self, url: &str, body: &str, status: u16) -> Self {
        self.responses
            .insert(url.to_string(), (body.as_bytes().to_vec(), status));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl UrlFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.calls.borrow_mut().push(url.to_string());
        Ok(match self.responses.get(url) {
            Some((body, status)) => FetchResponse::new(body.clone(), *status),
            None => FetchResponse::new(Vec::new(), 404),
        })
    }
}

fn processor(fetcher: FakeFetcher, cache_root: &std::path::Path) -> Processor<FakeFetcher> {
    Processor::new(fetcher, IncludeCache::new(cache_root), ProcessOptions::default())
}

fn count_header(msg: &Message) -> usize {
    msg.headers
        .get(ATTACHMENT_FIELD)
        .expect("count header present")
        .parse()
        .expect("numeric count")
}

fn payload_str(msg: &Message) -> String {
    String::from_utf8_lossy(msg.payload().expect("leaf")).into_owned()
}

fn filenames(msg: &Message) -> Vec<String> {
    msg.children()
        .iter()
        .map(|c| c.filename().expect("every part is named"))
        .collect()
}

const THREE_PARTS: &str = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"BOUND\"\n\
\n\
--BOUND\n\
Content-Type: text/plain\n\
\n\
alpha\n\
--BOUND\n\
Content-Type: text/plain\n\
\n\
beta\n\
--BOUND\n\
Content-Type: text/plain\n\
\n\
gamma\n\
--BOUND--\n";

// ─── Flat documents ─────────────────────────────────────────────────

#[test]
fn test_flat_document_keeps_order_and_content() {
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(THREE_PARTS.as_bytes()).unwrap();

    assert_eq!(out.children().len(), 3);
    assert_eq!(count_header(&out), 3);
    let bodies: Vec<String> = out.children().iter().map(payload_str).collect();
    assert_eq!(bodies, vec!["alpha", "beta", "gamma"]);
    assert_eq!(filenames(&out), vec!["part-001", "part-002", "part-003"]);
    assert!(out.children().iter().all(|c| c.content_type() == "text/plain"));
}

#[test]
fn test_bare_script_is_sniffed() {
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(b"#!/bin/sh\necho hello\n").unwrap();

    assert_eq!(count_header(&out), 1);
    let part = &out.children()[0];
    assert_eq!(part.content_type(), "text/x-shellscript");
    assert_eq!(payload_str(part), "#!/bin/sh\necho hello\n");
}

#[test]
fn test_unrecognized_text_keeps_placeholder_type() {
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(b"just some words\n").unwrap();
    assert_eq!(count_header(&out), 1);
    assert_eq!(out.children()[0].content_type(), "text/x-not-multipart");
}

#[test]
fn test_user_filename_is_kept() {
    let doc = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"B\"\n\
\n\
--B\n\
Content-Type: text/cloud-config\n\
Content-Disposition: attachment; filename=\"mine.yaml\"\n\
\n\
packages: [git]\n\
--B\n\
Content-Type: text/plain\n\
\n\
#!/bin/bash\n\
--B--\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(filenames(&out), vec!["mine.yaml", "part-002"]);
    assert_eq!(out.children()[1].content_type(), "text/x-shellscript");
    assert_eq!(
        out.children()[1].headers.get("Content-Type"),
        Some("text/x-shellscript")
    );
}

#[test]
fn test_extended_filename_is_not_overwritten() {
    let doc = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"B\"\n\
\n\
--B\n\
Content-Type: text/x-shellscript\n\
Content-Disposition: attachment; filename*=utf-8''caf%C3%A9.sh\n\
\n\
#!/bin/sh\n\
--B--\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(filenames(&out), vec!["café.sh"]);
    assert_eq!(
        out.children()[0].headers.get("Content-Disposition"),
        Some("attachment; filename*=utf-8''caf%C3%A9.sh")
    );
}

// ─── Includes ───────────────────────────────────────────────────────

#[test]
fn test_text_plain_include_is_resolved_not_attached() {
    let doc = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"B\"\n\
\n\
--B\n\
Content-Type: text/plain\n\
\n\
#include http://example.com/script\n\
--B--\n";
    let fetcher = FakeFetcher::default().with("http://example.com/script", "#!/bin/sh\necho included\n", 200);
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(p.fetcher().calls(), vec!["http://example.com/script"]);
    assert_eq!(count_header(&out), 1);
    assert_eq!(out.children()[0].content_type(), "text/x-shellscript");
    assert_eq!(payload_str(&out.children()[0]), "#!/bin/sh\necho included\n");
}

#[test]
fn test_failed_fetch_skips_only_that_line() {
    let doc = "#include\nhttp://a/one\n# a comment\n\nhttp://a/missing\nhttp://a/two\n";
    let fetcher = FakeFetcher::default()
        .with("http://a/one", "#cloud-config\na: 1\n", 200)
        .with("http://a/two", "#!/bin/sh\n", 200);
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(
        p.fetcher().calls(),
        vec!["http://a/one", "http://a/missing", "http://a/two"]
    );
    assert_eq!(count_header(&out), 2);
    let types: Vec<String> = out.children().iter().map(Message::content_type).collect();
    assert_eq!(types, vec!["text/cloud-config", "text/x-shellscript"]);
    assert_eq!(filenames(&out), vec!["part-001", "part-002"]);
}

#[test]
fn test_server_error_is_swallowed() {
    let fetcher = FakeFetcher::default().with("http://a/broken", "#!/bin/sh\n", 500);
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(b"#include http://a/broken\n").unwrap();
    assert!(out.children().is_empty());
    assert!(!p.cache().contains("http://a/broken"));
}

#[test]
fn test_include_once_error_status_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let url = "http://a/flaky";
    let p = processor(FakeFetcher::default().with(url, "#!/bin/sh\n", 500), dir.path());

    let out = p.process(b"#include-once http://a/flaky\n").unwrap();
    assert!(out.children().is_empty());
    assert!(!p.cache().contains(url));

    p.process(b"#include-once http://a/flaky\n").unwrap();
    assert_eq!(p.fetcher().calls(), vec![url, url]);
}

#[test]
fn test_cache_write_failure_is_an_error() {
    // A regular file where the cache directory should be.
    let root = tempfile::NamedTempFile::new().unwrap();
    let fetcher = FakeFetcher::default().with("http://a/once", "#!/bin/sh\n", 200);
    let p = processor(fetcher, root.path());

    let err = p.process(b"#include-once http://a/once\n").unwrap_err();
    assert!(matches!(err, UserDataError::Io { .. }));
    assert_eq!(p.fetcher().calls(), vec!["http://a/once"]);
}

#[test]
fn test_include_list_with_bare_cr_line_endings() {
    let fetcher = FakeFetcher::default()
        .with("http://a/one", "#!/bin/sh\n", 200)
        .with("http://a/two", "#cloud-config\n", 200);
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(b"#include\rhttp://a/one\r\rhttp://a/two\r").unwrap();

    assert_eq!(p.fetcher().calls(), vec!["http://a/one", "http://a/two"]);
    assert_eq!(count_header(&out), 2);
}

#[test]
fn test_include_once_uses_cache_on_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let doc = b"#include-once http://example.com/once\n";

    let first = processor(
        FakeFetcher::default().with("http://example.com/once", "#cloud-config\nruncmd: [ls]\n", 200),
        dir.path(),
    );
    let out1 = first.process(doc).unwrap();
    assert_eq!(first.fetcher().calls().len(), 1);
    assert!(first.cache().contains("http://example.com/once"));

    // A fresh processor, whose fetcher knows nothing, sharing the cache root.
    let second = processor(FakeFetcher::default(), dir.path());
    let out2 = second.process(doc).unwrap();
    assert!(second.fetcher().calls().is_empty());

    assert_eq!(out1, out2);
    assert_eq!(payload_str(&out2.children()[0]), "#cloud-config\nruncmd: [ls]\n");
}

#[test]
fn test_plain_include_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let url = "http://example.com/always";
    let p = processor(FakeFetcher::default().with(url, "#!/bin/sh\n", 200), dir.path());
    p.process(b"#include http://example.com/always\n").unwrap();
    p.process(b"#include http://example.com/always\n").unwrap();
    assert_eq!(p.fetcher().calls().len(), 2);
    assert!(!p.cache().contains(url));
}

#[test]
fn test_nested_include_and_archive() {
    let fetcher = FakeFetcher::default()
        .with("http://a/level1", "#include http://a/level2\n", 200)
        .with(
            "http://a/level2",
            "#cloud-config-archive\n- '#!/bin/sh'\n- {content: 'x: 1', filename: deep.yaml}\n",
            200,
        );
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(b"#include http://a/level1\n").unwrap();

    assert_eq!(count_header(&out), 2);
    assert_eq!(filenames(&out), vec!["part-001", "deep.yaml"]);
    assert_eq!(out.children()[0].content_type(), "text/x-shellscript");
    assert_eq!(out.children()[1].content_type(), "text/cloud-config");
}

#[test]
fn test_depth_limit_stops_include_cycle() {
    let fetcher = FakeFetcher::default().with("http://a/self", "#include http://a/self\n", 200);
    let dir = tempfile::tempdir().unwrap();
    let options = ProcessOptions {
        max_depth: Some(3),
        ..ProcessOptions::default()
    };
    let p = Processor::new(fetcher, IncludeCache::new(dir.path()), options);
    let err = p.process(b"#include http://a/self\n").unwrap_err();
    assert!(matches!(err, UserDataError::DepthExceeded { limit: 3 }));
    assert_eq!(p.fetcher().calls().len(), 4);
}

// ─── Archives ───────────────────────────────────────────────────────

#[test]
fn test_archive_skips_non_mapping_entries() {
    let doc = "#cloud-config-archive\n- plain text\n- {content: a, filename: f.txt}\n- 42\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(out.children().len(), 2);
    assert_eq!(count_header(&out), 2);
    assert_eq!(filenames(&out), vec!["part-001", "f.txt"]);
    assert_eq!(payload_str(&out.children()[0]), "plain text");
    assert_eq!(payload_str(&out.children()[1]), "a");
}

#[test]
fn test_archive_declared_by_header() {
    let doc = "MIME-Version: 1.0\n\
Content-Type: text/cloud-config-archive\n\
\n\
- type: application/x-custom\n  content: raw\n- type: text/x-shellscript\n  content: echo hi\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    let types: Vec<String> = out.children().iter().map(Message::content_type).collect();
    assert_eq!(types, vec!["application/x-custom", "text/x-shellscript"]);
    assert_eq!(out.children()[0].payload(), Some(b"raw".as_ref()));
}

#[test]
fn test_undecodable_archive_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(b"#cloud-config-archive\nkey: [unterminated\n").unwrap();
    assert!(out.children().is_empty());
}

#[test]
fn test_archive_extra_headers_per_key_and_literal() {
    let doc = b"#cloud-config-archive\n- {content: x, X-Owner: ops, header: hv}\n";
    let dir = tempfile::tempdir().unwrap();

    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc).unwrap();
    let part = &out.children()[0];
    assert_eq!(part.headers.get("X-Owner"), Some("ops"));
    assert_eq!(part.headers.get("header"), Some("hv"));

    let literal = Processor::new(
        FakeFetcher::default(),
        IncludeCache::new(dir.path()),
        ProcessOptions {
            archive_headers: ArchiveHeaderMode::Literal,
            ..ProcessOptions::default()
        },
    );
    let out = literal.process(doc).unwrap();
    let part = &out.children()[0];
    assert_eq!(part.headers.get("X-Owner"), Some("hv"));
    assert_eq!(part.headers.get("header"), Some("hv"));
}

#[test]
fn test_archive_multiline_header_does_not_leak_into_output() {
    let doc = b"#cloud-config-archive\n- {content: a, X-Note: \"x\\n\\n--injected\\nContent-Type: text/x-shellscript\\n\\n#!/bin/sh evil\"}\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc).unwrap();
    assert!(!out.children()[0].headers.contains("X-Note"));

    let reparsed = parse_user_data(&to_bytes(&out));
    let children = reparsed.children();
    assert_eq!(children.len(), 1);
    assert_eq!(payload_str(&children[0]), "a");
    assert_eq!(filenames(&reparsed), vec!["part-001"]);
}

#[test]
fn test_archive_filename_with_semicolon_survives_serialization() {
    let doc = b"#cloud-config-archive\n- {content: a, filename: \"a;b.txt\"}\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(FakeFetcher::default(), dir.path());
    let out = p.process(doc).unwrap();
    assert_eq!(filenames(&out), vec!["a;b.txt"]);

    let reparsed = parse_user_data(&to_bytes(&out));
    assert_eq!(filenames(&reparsed), vec!["a;b.txt"]);
}

// ─── Bookkeeping ────────────────────────────────────────────────────

#[test]
fn test_count_matches_children_and_names_are_unique() {
    let fetcher = FakeFetcher::default().with("http://a/x", "#!/bin/sh\n", 200);
    let doc = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"OUTER\"\n\
\n\
--OUTER\n\
Content-Type: multipart/alternative; boundary=\"INNER\"\n\
\n\
--INNER\n\
Content-Type: text/plain\n\
\n\
one\n\
--INNER\n\
Content-Type: text/plain\n\
\n\
#include http://a/x\n\
--INNER--\n\
--OUTER\n\
Content-Type: text/plain\n\
\n\
#cloud-config-archive\n\
- two\n\
- three\n\
--OUTER--\n";
    let dir = tempfile::tempdir().unwrap();
    let p = processor(fetcher, dir.path());
    let out = p.process(doc.as_bytes()).unwrap();

    assert_eq!(count_header(&out), out.children().len());
    assert_eq!(out.children().len(), 4);
    let names = filenames(&out);
    let mut deduped = names.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), names.len());
    assert!(out.children().iter().all(|c| !c.is_multipart()));
}
