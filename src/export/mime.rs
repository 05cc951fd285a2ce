//! Serialize a [`Message`] tree back into a MIME document.
//!
//! Leaves are written as 7bit or 8bit when the payload is line-safe text,
//! base64 otherwise. Boundaries are deterministic and chosen so they never
//! occur inside the enclosed parts.

use base64::prelude::*;

use crate::model::content_type::MULTIPART_MIXED;
use crate::model::headers::{is_field_name, quote_param};
use crate::model::message::{Body, Message};

/// RFC 5322 line length limit, excluding the line terminator.
const MAX_LINE_LEN: usize = 998;

const BASE64_LINE_LEN: usize = 76;

/// Render `msg` (usually the expansion output) as MIME bytes.
pub fn to_bytes(msg: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    write_message(&mut out, msg, 0);
    out
}

fn write_message(out: &mut Vec<u8>, msg: &Message, depth: usize) {
    match &msg.body {
        Body::Multipart(children) => {
            let rendered: Vec<Vec<u8>> = children
                .iter()
                .map(|child| {
                    let mut buf = Vec::new();
                    write_message(&mut buf, child, depth + 1);
                    buf
                })
                .collect();
            let boundary = pick_boundary(depth, &rendered);

            let ctype = msg.declared_type().unwrap_or_else(|| MULTIPART_MIXED.to_string());
            write_header(out, "Content-Type", &format!("{ctype}; boundary={}", quote_param(&boundary)));
            for h in msg.headers.iter() {
                if h.name.eq_ignore_ascii_case("Content-Type") {
                    continue;
                }
                write_header(out, &h.name, &h.value);
            }
            out.push(b'\n');

            for part in &rendered {
                out.extend_from_slice(format!("--{boundary}\n").as_bytes());
                out.extend_from_slice(part);
                // Belongs to the delimiter, not the part.
                out.push(b'\n');
            }
            out.extend_from_slice(format!("--{boundary}--\n").as_bytes());
        }
        Body::Leaf(payload) => {
            let encoding = transfer_encoding(payload);
            for h in msg.headers.iter() {
                if h.name.eq_ignore_ascii_case("Content-Transfer-Encoding") {
                    continue;
                }
                write_header(out, &h.name, &h.value);
            }
            write_header(out, "Content-Transfer-Encoding", encoding.as_str());
            out.push(b'\n');
            match encoding {
                Encoding::SevenBit | Encoding::EightBit => out.extend_from_slice(payload),
                Encoding::Base64 => {
                    let encoded = BASE64_STANDARD.encode(payload);
                    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
                        out.extend_from_slice(chunk);
                        out.push(b'\n');
                    }
                }
            }
        }
    }
}

/// Write one header line. Line breaks inside `value` become folded
/// continuation lines and blank lines are dropped, so a value can never
/// close the header block early.
fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    if !is_field_name(name) {
        tracing::warn!(header = %name.escape_debug(), "Skipping header with an unwritable name");
        return;
    }
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b":");
    for (i, line) in value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        if i > 0 {
            out.push(b'\n');
        }
        out.push(b' ');
        out.extend_from_slice(line.as_bytes());
    }
    out.push(b'\n');
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    SevenBit,
    EightBit,
    Base64,
}

impl Encoding {
    fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
        }
    }
}

fn transfer_encoding(payload: &[u8]) -> Encoding {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Encoding::Base64;
    };
    let line_safe = text
        .split('\n')
        .all(|line| line.len() <= MAX_LINE_LEN && !line.trim_end_matches('\r').contains('\r'));
    if !line_safe || text.contains('\0') {
        Encoding::Base64
    } else if text.is_ascii() {
        Encoding::SevenBit
    } else {
        Encoding::EightBit
    }
}

/// A boundary that does not appear in any of the rendered parts.
fn pick_boundary(depth: usize, parts: &[Vec<u8>]) -> String {
    let mut n = 0usize;
    loop {
        let candidate = format!("===============userdata-expand-{depth}-{n}==");
        let needle = candidate.as_bytes();
        let clash = parts
            .iter()
            .any(|p| p.windows(needle.len()).any(|w| w == needle));
        if !clash {
            return candidate;
        }
        n += 1;
    }
}
