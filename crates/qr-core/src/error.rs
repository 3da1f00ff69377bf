use thiserror::Error;

/// Failures raised while encoding or decoding the positional record grammar.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid flag byte {value}, expected 0 or 1")]
    InvalidFlag { value: u8 },

    #[error("{what} length {len} exceeds limit {max}")]
    LengthTooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("string payload is not valid utf-8")]
    InvalidUtf8,

    #[error("day number {days} is not a valid calendar date")]
    InvalidDate { days: i32 },

    #[error("unsupported record version {found}, expected {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("duplicate {what} key '{key}'")]
    DuplicateKey { what: &'static str, key: String },

    #[error("{count} trailing byte(s) after record")]
    TrailingBytes { count: usize },
}

/// First difference found by a structural comparison of two records.
///
/// The path is dotted and indexed, e.g. `quotes[AAPL].regular[3].close`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record mismatch at {path}: {detail}")]
pub struct Mismatch {
    path: String,
    detail: String,
}

impl Mismatch {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            detail: detail.into(),
        }
    }

    pub fn field(name: &str, detail: impl Into<String>) -> Self {
        Self::new(detail).within(name)
    }

    /// Prefix the path with an enclosing field or index segment.
    #[must_use]
    pub fn within(mut self, segment: &str) -> Self {
        self.path = if self.path.is_empty() {
            segment.to_owned()
        } else if self.path.starts_with('[') {
            format!("{segment}{}", self.path)
        } else {
            format!("{segment}.{}", self.path)
        };
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Validation errors for identifiers that flow into storage keys and config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{what} must not be empty")]
    Empty { what: &'static str },

    #[error("{what} '{value}' contains reserved character '{reserved}'")]
    ReservedCharacter {
        what: &'static str,
        value: String,
        reserved: char,
    },

    #[error("unknown exchange '{value}'")]
    UnknownExchange { value: String },

    #[error("invalid date '{value}', expected YYYY-MM-DD or YYYYMMDD")]
    InvalidDate { value: String },
}

const RESERVED_KEY_CHARACTERS: [char; 4] = [':', '|', '/', '\\'];

/// Reject identifiers that would break key or path derivation.
pub fn validate_key_component(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { what });
    }
    if let Some(reserved) = value.chars().find(|ch| RESERVED_KEY_CHARACTERS.contains(ch)) {
        return Err(ValidationError::ReservedCharacter {
            what,
            value: value.to_owned(),
            reserved,
        });
    }
    Ok(())
}
