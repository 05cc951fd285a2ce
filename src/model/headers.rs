//! Ordered header bag with case-insensitive names.
//!
//! Names keep the spelling they were inserted with; lookups ignore case.
//! A name may appear more than once (`append`), and [`Headers::upsert`]
//! gives the replace-or-insert semantics used when a part's type is
//! corrected or a counter is re-stored.

/// A single `Name: value` pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered multimap of headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add a header at the end, even if the name is already present.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replace the first header called `name` in place, or append it.
    ///
    /// Returns the previous value, if any. Later duplicates are dropped so
    /// the bag holds exactly one `name` afterwards.
    pub fn upsert(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                let old = std::mem::replace(&mut self.entries[pos].value, value);
                let mut idx = 0;
                self.entries.retain(|h| {
                    let keep = idx <= pos || !h.name.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
                Some(old)
            }
            None => {
                self.append(name, value);
                None
            }
        }
    }

    /// Remove every header called `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `name` can be written as a header field name: printable ASCII,
/// no spaces, no colon.
pub fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Extract a parameter from a structured header value such as
/// `attachment; filename="part-001"`.
///
/// Parameter names are matched case-insensitively. Quoted values may
/// contain `;` and backslash escapes. RFC 2231 forms (`filename*=` and
/// `filename*0*=` continuations) are decoded and win over the plain form.
pub fn header_param(value: &str, param: &str) -> Option<String> {
    let params = parameters(value);
    let param = param.to_ascii_lowercase();
    let lookup = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    if let Some(extended) = lookup(&format!("{param}*")) {
        let (charset, text) = split_charset(extended);
        return Some(decode_charset(charset, &urlencoding::decode_binary(text.as_bytes())));
    }

    let mut bytes = Vec::new();
    let mut charset = None;
    let mut sections = 0;
    loop {
        let plain = format!("{param}*{sections}");
        if let Some(encoded) = lookup(&format!("{plain}*")) {
            let text = if sections == 0 {
                let (cs, text) = split_charset(encoded);
                charset = cs;
                text
            } else {
                encoded
            };
            bytes.extend_from_slice(&urlencoding::decode_binary(text.as_bytes()));
        } else if let Some(literal) = lookup(&plain) {
            bytes.extend_from_slice(literal.as_bytes());
        } else {
            break;
        }
        sections += 1;
    }
    if sections > 0 {
        return Some(decode_charset(charset, &bytes));
    }

    lookup(&param).map(str::to_string)
}

/// Return `value` with parameter `param` set to `new_value`, replacing an
/// existing occurrence or appending one.
pub fn with_param(value: &str, param: &str, new_value: &str) -> String {
    let mut replaced = false;
    let mut segments: Vec<String> = split_segments(value)
        .into_iter()
        .enumerate()
        .map(|(i, segment)| {
            let matches = i > 0
                && segment
                    .split_once('=')
                    .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case(param));
            if matches && !replaced {
                replaced = true;
                format!(" {param}={}", quote_param(new_value))
            } else {
                segment.to_string()
            }
        })
        .collect();
    if !replaced {
        segments.push(format!(" {param}={}", quote_param(new_value)));
    }
    segments.join(";")
}

/// Quote a parameter value for use inside a structured header.
pub fn quote_param(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Split on `;` outside quoted strings. The first segment is the main value.
fn split_segments(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

/// `(lowercase name, unquoted value)` for every parameter.
fn parameters(value: &str) -> Vec<(String, String)> {
    split_segments(value)
        .into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, val) = segment.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), unquote(val.trim())))
        })
        .collect()
}

fn unquote(val: &str) -> String {
    let Some(inner) = val.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return val.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.extend(chars.next());
        } else {
            out.push(c);
        }
    }
    out
}

/// Split an RFC 2231 `charset'language'text` value.
fn split_charset(value: &str) -> (Option<&str>, &str) {
    let mut pieces = value.splitn(3, '\'');
    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_), Some(text)) => (Some(charset).filter(|c| !c.is_empty()), text),
        _ => (None, value),
    }
}

fn decode_charset(charset: Option<&str>, bytes: &[u8]) -> String {
    let encoding = charset
        .and_then(|c| encoding_rs::Encoding::for_label(c.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (decoded, _) = encoding.decode_without_bom_handling(bytes);
    decoded.into_owned()
}
