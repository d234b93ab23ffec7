/// A received line after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Valid UTF-8 with surrounding whitespace removed.
    Text(String),
    /// Valid UTF-8 that was nothing but whitespace.
    Blank,
    /// Not valid UTF-8.
    Raw(Vec<u8>),
}

impl Decoded {
    /// Strict UTF-8 decode of a streamed line.
    pub fn from_line(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Self::Blank
                } else {
                    Self::Text(s.to_string())
                }
            }
            Err(_) => Self::Raw(bytes.to_vec()),
        }
    }

    /// What gets printed for this line, if anything.
    pub fn display(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Blank => None,
            Self::Raw(bytes) => Some(format!("Raw bytes: {}", byte_literal(bytes))),
        }
    }
}

/// Decodes as UTF-8, dropping every invalid sequence, then trims.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out.trim().to_string()
}

/// Renders bytes as a `b'...'` literal with non-printable bytes escaped.
///
/// Double quotes are used instead when the bytes contain `'` but no `"`.
pub fn byte_literal(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            _ if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote as char);
    out
}
