//! Message tree nodes.

use super::content_type::{self, ATTACHMENT_FIELD, MULTIPART_MIXED, UNDEF_TYPE};
use super::headers::{header_param, quote_param, Headers};

const CONTENT_TYPE: &str = "Content-Type";
const CONTENT_DISPOSITION: &str = "Content-Disposition";

/// A node in a message tree.
///
/// A node is either a multipart container holding child messages, or a
/// leaf holding a decoded byte payload. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub headers: Headers,
    pub body: Body,
}

/// Node contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Multipart(Vec<Message>),
    Leaf(Vec<u8>),
}

impl Message {
    /// An empty `multipart/mixed` container.
    pub fn multipart() -> Self {
        let mut headers = Headers::new();
        headers.append(CONTENT_TYPE, MULTIPART_MIXED);
        headers.append("MIME-Version", "1.0");
        Self {
            headers,
            body: Body::Multipart(Vec::new()),
        }
    }

    /// A leaf with the given `main/sub` type and raw payload.
    pub fn leaf(ctype: &str, payload: impl Into<Vec<u8>>) -> Self {
        let mut headers = Headers::new();
        headers.append(CONTENT_TYPE, ctype);
        headers.append("MIME-Version", "1.0");
        Self {
            headers,
            body: Body::Leaf(payload.into()),
        }
    }

    /// A `text/<subtype>` leaf with a charset parameter matching the content.
    pub fn text(subtype: &str, content: &str) -> Self {
        let charset = if content.is_ascii() { "us-ascii" } else { "utf-8" };
        let mut msg = Self::leaf(&format!("text/{subtype}"), content.as_bytes());
        msg.headers.upsert(
            CONTENT_TYPE,
            format!("text/{subtype}; charset=\"{charset}\""),
        );
        msg
    }

    /// Lowercase `main/sub` content type, or `None` when the header is absent or empty.
    pub fn declared_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .map(content_type::normalize)
            .filter(|t| !t.is_empty())
    }

    /// Content type, defaulting to `text/plain`.
    pub fn content_type(&self) -> String {
        self.declared_type()
            .unwrap_or_else(|| UNDEF_TYPE.to_string())
    }

    /// Main type (`text`, `multipart`, ...).
    pub fn main_type(&self) -> String {
        let ctype = self.content_type();
        match ctype.split_once('/') {
            Some((main, _)) => main.to_string(),
            None => ctype,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart(_))
    }

    /// Replace (or insert) the `Content-Type` header.
    pub fn set_content_type(&mut self, ctype: &str) -> Option<String> {
        self.headers.upsert(CONTENT_TYPE, ctype)
    }

    /// Leaf payload, or `None` for containers.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Leaf(data) => Some(data),
            Body::Multipart(_) => None,
        }
    }

    /// Child messages. Empty for leaves.
    pub fn children(&self) -> &[Message] {
        match &self.body {
            Body::Multipart(parts) => parts,
            Body::Leaf(_) => &[],
        }
    }

    /// Filename from the `Content-Disposition` header, falling back to the
    /// `name` parameter of `Content-Type`.
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| header_param(v, "filename"))
            .or_else(|| {
                self.headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| header_param(v, "name"))
            })
            .filter(|f| !f.is_empty())
    }

    /// Mark this part as an attachment with the given filename.
    pub fn set_attachment_filename(&mut self, filename: &str) {
        self.set_disposition("attachment", filename);
    }

    /// Record `filename` while keeping the current disposition type
    /// (`inline`, `attachment`, ...).
    pub fn keep_filename(&mut self, filename: &str) {
        let kind = self
            .headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or("attachment")
            .to_string();
        self.set_disposition(&kind, filename);
    }

    fn set_disposition(&mut self, kind: &str, filename: &str) {
        let param = if filename.is_ascii() {
            format!("filename={}", quote_param(filename))
        } else {
            format!("filename*=utf-8''{}", urlencoding::encode(filename))
        };
        self.headers
            .upsert(CONTENT_DISPOSITION, format!("{kind}; {param}"));
    }

    /// Number of attached parts recorded on a container.
    ///
    /// Creates the counter with value 0 on first access. A value that does
    /// not parse is reset to 0.
    pub fn attachment_count(&mut self) -> usize {
        match self.headers.get(ATTACHMENT_FIELD).map(str::trim) {
            Some(raw) => match raw.parse() {
                Ok(n) => n,
                Err(_) => {
                    self.headers.upsert(ATTACHMENT_FIELD, "0");
                    0
                }
            },
            None => {
                self.headers.upsert(ATTACHMENT_FIELD, "0");
                0
            }
        }
    }

    /// Store a new attachment count.
    pub fn set_attachment_count(&mut self, count: usize) {
        self.headers.upsert(ATTACHMENT_FIELD, count.to_string());
    }

    /// Append a child to a container. Leaves are converted in place.
    pub fn push_child(&mut self, part: Message) {
        if let Body::Multipart(parts) = &mut self.body {
            parts.push(part);
            return;
        }
        self.body = Body::Multipart(vec![part]);
    }

    /// Pre-order traversal of this node and all descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Pre-order iterator returned by [`Message::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a Message>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_preorder() {
        let mut root = Message::multipart();
        let mut inner = Message::multipart();
        inner.push_child(Message::text("plain", "b"));
        inner.push_child(Message::text("plain", "c"));
        root.push_child(Message::text("plain", "a"));
        root.push_child(inner);
        root.push_child(Message::text("plain", "d"));

        let payloads: Vec<&[u8]> = root.walk().filter_map(|m| m.payload()).collect();
        assert_eq!(payloads, vec![b"a".as_ref(), b"b", b"c", b"d"]);
        assert_eq!(root.walk().count(), 6);
    }

    #[test]
    fn test_content_type_defaults() {
        let mut leaf = Message::leaf("text/plain", b"x".to_vec());
        leaf.headers.remove("Content-Type");
        assert_eq!(leaf.declared_type(), None);
        assert_eq!(leaf.content_type(), "text/plain");
        assert_eq!(leaf.main_type(), "text");
    }

    #[test]
    fn test_text_charset() {
        let ascii = Message::text("x-shellscript", "echo hi");
        assert_eq!(
            ascii.headers.get("content-type"),
            Some("text/x-shellscript; charset=\"us-ascii\"")
        );
        assert_eq!(ascii.content_type(), "text/x-shellscript");
        let utf8 = Message::text("plain", "café");
        assert!(utf8.headers.get("content-type").unwrap().contains("utf-8"));
    }

    #[test]
    fn test_attachment_count_lifecycle() {
        let mut c = Message::multipart();
        assert!(!c.headers.contains(ATTACHMENT_FIELD));
        assert_eq!(c.attachment_count(), 0);
        assert_eq!(c.headers.get(ATTACHMENT_FIELD), Some("0"));
        c.set_attachment_count(3);
        assert_eq!(c.attachment_count(), 3);

        c.headers.upsert(ATTACHMENT_FIELD, "garbage");
        assert_eq!(c.attachment_count(), 0);
        assert_eq!(c.headers.get(ATTACHMENT_FIELD), Some("0"));
    }

    #[test]
    fn test_filename_roundtrip() {
        let mut m = Message::leaf("application/octet-stream", Vec::new());
        assert!(m.filename().is_none());
        m.set_attachment_filename("f.txt");
        assert_eq!(m.filename().as_deref(), Some("f.txt"));
        assert_eq!(m.headers.get_all("content-disposition").count(), 1);
    }

    #[test]
    fn test_filename_with_separator_and_non_ascii() {
        let mut m = Message::leaf("text/plain", Vec::new());
        m.set_attachment_filename("a;b.txt");
        assert_eq!(m.filename().as_deref(), Some("a;b.txt"));

        m.set_attachment_filename("café.sh");
        assert_eq!(
            m.headers.get("Content-Disposition"),
            Some("attachment; filename*=utf-8''caf%C3%A9.sh")
        );
        assert_eq!(m.filename().as_deref(), Some("café.sh"));
    }

    #[test]
    fn test_filename_falls_back_to_content_type_name() {
        let mut m = Message::leaf("text/plain", Vec::new());
        m.set_content_type("text/x-shellscript; name=\"boot.sh\"");
        assert_eq!(m.filename().as_deref(), Some("boot.sh"));
    }

    #[test]
    fn test_keep_filename_preserves_disposition_kind() {
        let mut m = Message::leaf("text/plain", Vec::new());
        m.headers.append("Content-Disposition", "inline");
        m.keep_filename("notes.txt");
        assert_eq!(
            m.headers.get("Content-Disposition"),
            Some("inline; filename=\"notes.txt\"")
        );
    }
}
