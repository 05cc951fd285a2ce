//! Turn a raw user-data blob into a [`Message`] tree.
//!
//! Blobs that announce `MIME-Version:` near the top are parsed with
//! `mail-parser`; anything else becomes a single `text/x-not-multipart` leaf
//! so that its type is later sniffed from the content.

use std::io::Read;

use flate2::read::GzDecoder;
use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::model::content_type::NOT_MULTIPART;
use crate::model::headers::{header_param, with_param, Headers};
use crate::model::message::{Body, Message};

/// How far into the blob to look for a `MIME-Version:` header.
const MIME_SNIFF_LEN: usize = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Parse a user-data blob into a message tree. Never fails: unparseable
/// input degrades to a single not-multipart leaf.
pub fn parse_user_data(raw: &[u8]) -> Message {
    let data = decompress(raw);
    let data = skip_bom(&data);

    if !looks_like_mime(data) {
        return Message::leaf(NOT_MULTIPART, data);
    }

    match MessageParser::default().parse(data) {
        Some(msg) => convert_part(&msg, 0),
        None => {
            tracing::warn!("MIME-Version present but message did not parse, treating as plain");
            Message::leaf(NOT_MULTIPART, data)
        }
    }
}

/// Gunzip the blob if it carries the gzip magic. Data that fails to inflate
/// is returned unchanged.
pub fn decompress(raw: &[u8]) -> Vec<u8> {
    if !raw.starts_with(&GZIP_MAGIC) {
        return raw.to_vec();
    }
    let mut out = Vec::new();
    match GzDecoder::new(raw).read_to_end(&mut out) {
        Ok(_) => {
            tracing::debug!(compressed = raw.len(), inflated = out.len(), "Decompressed user-data");
            out
        }
        Err(e) => {
            tracing::warn!(error = %e, "Gzip magic present but inflate failed, using raw bytes");
            raw.to_vec()
        }
    }
}

fn skip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

fn looks_like_mime(data: &[u8]) -> bool {
    let head = &data[..data.len().min(MIME_SNIFF_LEN)];
    String::from_utf8_lossy(head)
        .to_lowercase()
        .contains("mime-version:")
}

/// Convert part `id` of a parsed message (and its descendants).
fn convert_part(msg: &mail_parser::Message<'_>, id: usize) -> Message {
    let Some(part) = msg.parts.get(id) else {
        return Message::leaf(NOT_MULTIPART, Vec::new());
    };

    let mut headers = Headers::new();
    for header in &part.headers {
        let name = header.name();
        // Payloads are stored decoded; the serializer picks its own encoding.
        if name.eq_ignore_ascii_case("Content-Transfer-Encoding") {
            continue;
        }
        if let Some(value) = raw_header_value(msg, header) {
            headers.append(name, value);
        }
    }

    let body = match &part.body {
        PartType::Multipart(children) => {
            Body::Multipart(children.iter().map(|&c| convert_part(msg, c)).collect())
        }
        PartType::Message(nested) => Body::Multipart(vec![convert_part(nested, 0)]),
        PartType::Text(text) | PartType::Html(text) => Body::Leaf(text_payload(&mut headers, text)),
        _ => Body::Leaf(part.contents().to_vec()),
    };

    let mut converted = Message { headers, body };
    if converted.filename().is_none() {
        if let Some(name) = part.attachment_name().filter(|n| !n.is_empty()) {
            converted.keep_filename(name);
        }
    }
    converted
}

/// Payload bytes for a text part.
///
/// `mail-parser` hands text over as UTF-8. The bytes are encoded back into
/// the declared charset; when that cannot be done losslessly the part is
/// relabelled `charset="utf-8"` so header and payload agree.
fn text_payload(headers: &mut Headers, text: &str) -> Vec<u8> {
    let Some(ctype) = headers.get("Content-Type").map(str::to_string) else {
        return text.as_bytes().to_vec();
    };
    let Some(charset) = header_param(&ctype, "charset") else {
        return text.as_bytes().to_vec();
    };

    let label = charset.trim().to_ascii_lowercase();
    if matches!(label.as_str(), "us-ascii" | "ascii") {
        if text.is_ascii() {
            return text.as_bytes().to_vec();
        }
    } else if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
        if encoding == encoding_rs::UTF_8 {
            return text.as_bytes().to_vec();
        }
        // UTF-16 labels have UTF-8 as their output encoding.
        if encoding.output_encoding() == encoding {
            let (bytes, _, had_errors) = encoding.encode(text);
            if !had_errors {
                return bytes.into_owned();
            }
        }
    }

    tracing::warn!(charset = %charset, "Text part cannot be kept in its declared charset, relabelling as utf-8");
    headers.upsert("Content-Type", with_param(&ctype, "charset", "utf-8"));
    text.as_bytes().to_vec()
}

/// The header value as written in the source, unfolded.
fn raw_header_value(msg: &mail_parser::Message<'_>, header: &mail_parser::Header<'_>) -> Option<String> {
    let (start, end) = (header.offset_start as usize, header.offset_end as usize);
    match msg.raw_message.get(start..end) {
        Some(bytes) => Some(unfold(&String::from_utf8_lossy(bytes))),
        None => header.value().as_text().map(str::to_string),
    }
}

fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
