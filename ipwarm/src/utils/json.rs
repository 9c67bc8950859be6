//! JSON helpers for columns that hold JSON text, with consistent warning logs.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Where a JSON value came from, for log fields.
#[derive(Debug, Clone, Copy)]
pub enum JsonContext<'a> {
    IpField { ip: &'a str, field: &'static str },
    Snapshot { field: &'static str },
    Cursor { path: &'a str },
}

fn warn_error(raw_len: Option<usize>, error: serde_json::Error, ctx: JsonContext<'_>, msg: &str) {
    match ctx {
        JsonContext::IpField { ip, field } => {
            warn!(ip = %ip, field, raw_len, error = %error, "{msg}");
        }
        JsonContext::Snapshot { field } => {
            warn!(field, raw_len, error = %error, "{msg}");
        }
        JsonContext::Cursor { path } => {
            warn!(path, raw_len, error = %error, "{msg}");
        }
    }
}

/// Parse `raw`, falling back to `T::default()` with a warning on malformed input.
/// An empty string is read as the default without a warning.
pub fn parse_or_default<T: DeserializeOwned + Default>(
    raw: &str,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> T {
    if raw.is_empty() {
        return T::default();
    }
    match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn_error(Some(raw.len()), error, ctx, msg);
            T::default()
        }
    }
}

pub fn to_string_or_fallback<T: Serialize + ?Sized>(
    value: &T,
    fallback: &'static str,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            warn_error(None, error, ctx, msg);
            fallback.to_string()
        }
    }
}
