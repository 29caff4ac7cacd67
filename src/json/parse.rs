//! Purpose: Decode record bytes into text and JSON objects with categorized failures.
//! Exports: `decode_utf8`, `parse_record`, `to_text`, `ParseFailureCategory`.
//! Role: Parser boundary shared by eager and lazy handles.
//! Invariants: Failures are `ErrorKind::Malformed` and carry the record coordinates.
//! Notes: Callers add the file path when they know it.

use serde_json::Value;
use serde_json::error::Category;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParseFailureCategory {
    Utf8,
    Syntax,
    Truncated,
    NotObject,
    Unknown,
}

impl ParseFailureCategory {
    fn label(self) -> &'static str {
        match self {
            ParseFailureCategory::Utf8 => "utf8",
            ParseFailureCategory::Syntax => "syntax",
            ParseFailureCategory::Truncated => "truncated",
            ParseFailureCategory::NotObject => "not-object",
            ParseFailureCategory::Unknown => "unknown",
        }
    }
}

pub(crate) fn categorize_error(err: &serde_json::Error) -> ParseFailureCategory {
    match err.classify() {
        Category::Syntax => ParseFailureCategory::Syntax,
        Category::Eof => ParseFailureCategory::Truncated,
        Category::Data | Category::Io => ParseFailureCategory::Unknown,
    }
}

fn malformed(category: ParseFailureCategory, offset: u64, length: u32) -> Error {
    Error::new(ErrorKind::Malformed)
        .with_offset(offset)
        .with_length(length)
        .with_hint(format!("parse category: {}", category.label()))
}

pub(crate) fn decode_utf8(bytes: &[u8], offset: u64, length: u32) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(|err| {
        malformed(ParseFailureCategory::Utf8, offset, length)
            .with_message("record is not valid UTF-8")
            .with_source(err)
    })
}

pub(crate) fn parse_record(text: &str, offset: u64, length: u32) -> Result<Value, Error> {
    let value: Value = serde_json::from_str(text).map_err(|err| {
        malformed(categorize_error(&err), offset, length)
            .with_message("record is not valid JSON")
            .with_source(err)
    })?;
    if !value.is_object() {
        return Err(malformed(ParseFailureCategory::NotObject, offset, length)
            .with_message("record is not a JSON object"));
    }
    Ok(value)
}

pub(crate) fn to_text(value: &Value) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to serialize record")
            .with_source(err)
    })
}
