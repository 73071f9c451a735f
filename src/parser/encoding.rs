//! Content-Transfer-Encoding decoding: base64, quoted-printable, identity.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::warn;

use crate::error::{DecodeError, DecodeResult};

/// Base64 engine tolerant of missing or extra padding, as seen in real mail.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A part's declared transfer encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    Base64,
    QuotedPrintable,
    /// `7bit`, `8bit`, `binary`, absent, or anything unrecognized.
    Identity,
}

impl TransferEncoding {
    /// Classify a `Content-Transfer-Encoding` header value.
    ///
    /// Unknown tokens are logged and treated as identity.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Identity;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "" | "7bit" | "8bit" | "binary" => Self::Identity,
            other => {
                warn!(encoding = other, "Unknown transfer encoding, using identity");
                Self::Identity
            }
        }
    }

    /// Decode `raw` according to this encoding.
    pub fn decode(&self, raw: &[u8]) -> DecodeResult<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(raw),
            Self::QuotedPrintable => Ok(decode_quoted_printable(raw)),
            Self::Identity => Ok(raw.to_vec()),
        }
    }
}

/// Decode base64, ignoring ASCII whitespace (line breaks included).
pub fn decode_base64(raw: &[u8]) -> DecodeResult<Vec<u8>> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64
        .decode(&compact)
        .map_err(|e| DecodeError::InvalidEncoding {
            encoding: "base64".to_string(),
            reason: e.to_string(),
        })
}

/// Decode quoted-printable (RFC 2045 §6.7).
///
/// Soft line breaks (`=` before CRLF or LF) are removed, `=XX` becomes the
/// byte `0xXX`, and malformed escapes are kept literally.
pub fn decode_quoted_printable(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'=' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match &raw[i + 1..] {
            [b'\r', b'\n', ..] => i += 3,
            [b'\n', ..] => i += 2,
            [hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_value(*hi) << 4) | hex_value(*lo));
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Encode bytes as standard padded base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
