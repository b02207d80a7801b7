/// Payload encodings and decoding of operator input.
use std::{fmt, str::FromStr};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("unknown payload encoding {0:?}")]
    Unknown(String),
    #[error("custom base64 alphabet {0:?} must be exactly three characters, e.g. `base64(-_.)`")]
    InvalidAlphabet(String),
    #[error("invalid hex input: {0}")]
    Hex(String),
    #[error("invalid base64 input: {0}")]
    Base64(String),
    #[error("input {0:?} must start with `hex:`, `base64:` or `b64:`")]
    MissingPrefix(String),
}

/// How a probe's bytes are written into the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoding {
    Hex,
    HexUppercase,
    Base64,
    Base64UrlSafe,
    /// Standard base64 with `+`, `/` and `=` replaced by the given characters.
    Base64Custom([char; 3]),
    Utf8,
}

impl PayloadEncoding {
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Hex => hex::encode(bytes),
            Self::HexUppercase => hex::encode_upper(bytes),
            Self::Base64 => STANDARD.encode(bytes),
            Self::Base64UrlSafe => URL_SAFE.encode(bytes),
            Self::Base64Custom([plus, slash, pad]) => STANDARD
                .encode(bytes)
                .chars()
                .map(|c| match c {
                    '+' => *plus,
                    '/' => *slash,
                    '=' => *pad,
                    c => c,
                })
                .collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl FromStr for PayloadEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(alphabet) = s.strip_prefix("base64(") {
            let alphabet = alphabet
                .strip_suffix(')')
                .ok_or_else(|| EncodingError::Unknown(s.to_string()))?;
            let chars: Vec<char> = alphabet.chars().collect();
            return chars
                .try_into()
                .map(Self::Base64Custom)
                .map_err(|_| EncodingError::InvalidAlphabet(alphabet.to_string()));
        }
        match s {
            "hex" => Ok(Self::Hex),
            "hex-uppercase" => Ok(Self::HexUppercase),
            "base64" => Ok(Self::Base64),
            "base64-urlsafe" => Ok(Self::Base64UrlSafe),
            "utf8" => Ok(Self::Utf8),
            _ => Err(EncodingError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex => write!(f, "hex"),
            Self::HexUppercase => write!(f, "hex-uppercase"),
            Self::Base64 => write!(f, "base64"),
            Self::Base64UrlSafe => write!(f, "base64-urlsafe"),
            Self::Base64Custom([a, b, c]) => write!(f, "base64({a}{b}{c})"),
            Self::Utf8 => write!(f, "utf8"),
        }
    }
}

/// A [`PayloadEncoding`] plus optional URL-encoding of its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    encoding: PayloadEncoding,
    url_encode: bool,
}

impl PayloadEncoder {
    pub fn new(encoding: PayloadEncoding, url_encode: bool) -> Self {
        Self {
            encoding,
            url_encode,
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        let encoded = self.encoding.encode(bytes);
        if self.url_encode {
            urlencoding::encode(&encoded).into_owned()
        } else {
            encoded
        }
    }
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new(PayloadEncoding::Hex, true)
    }
}

/// Decode operator input given as `hex:...`, `base64:...`/`b64:...` or
/// `utf8:...`. Unprefixed text is taken as UTF-8 only if `allow_plain`.
pub fn decode_input(input: &str, allow_plain: bool) -> Result<Vec<u8>, EncodingError> {
    if let Some(hex) = input.strip_prefix("hex:") {
        return hex::decode(strip_whitespace(hex)).map_err(|e| EncodingError::Hex(e.to_string()));
    }
    if let Some(b64) = input
        .strip_prefix("base64:")
        .or_else(|| input.strip_prefix("b64:"))
    {
        return STANDARD
            .decode(strip_whitespace(b64))
            .map_err(|e| EncodingError::Base64(e.to_string()));
    }
    if let Some(text) = input.strip_prefix("utf8:") {
        return Ok(text.as_bytes().to_vec());
    }
    if allow_plain {
        return Ok(input.as_bytes().to_vec());
    }
    Err(EncodingError::MissingPrefix(input.to_string()))
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
