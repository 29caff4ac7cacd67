//! Purpose: Internal JSON decoding boundary for record bytes.
//! Exports: `parse` module with UTF-8 decode, record parse, and serialize helpers.
//! Role: Single seam so handles never call serde_json ad hoc.
//! Invariants: A record is exactly one JSON object; anything else is `Malformed`.

pub(crate) mod parse;
