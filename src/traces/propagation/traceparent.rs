use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::traces::propagation::error::HeaderError;

pub const TRACEPARENT_KEY: &str = "traceparent";

const SAMPLED_FLAG: u8 = 0x1;

lazy_static! {
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");
}

/// A structurally valid `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct W3CTraceparent {
    pub version: u8,
    /// 32 lower hex characters, never all zeros.
    pub trace_id: String,
    /// 16 lower hex characters, never all zeros.
    pub parent_id: String,
    pub flags: u8,
}

impl W3CTraceparent {
    /// Parses a header value. Anything short of a fully valid value is an error.
    pub fn parse(value: &str) -> Result<Self, HeaderError> {
        let captures = TRACEPARENT_REGEX
            .captures(value.trim())
            .ok_or_else(|| HeaderError::traceparent("invalid format"))?;

        let version = &captures[1];
        let trace_id = &captures[2];
        let parent_id = &captures[3];
        let flags = &captures[4];
        let tail = captures.get(5).map_or("", |m| m.as_str());

        let version = extract_version(version, tail)?;
        extract_id(trace_id, "`0` value for trace_id is invalid")?;
        extract_id(parent_id, "`0` value for parent_id is invalid")?;
        let flags = u8::from_str_radix(flags, 16)
            .map_err(|_| HeaderError::traceparent("failed to decode trace flags"))?;

        Ok(Self {
            version,
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            flags,
        })
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }

    /// Builds the version `00` header value we emit.
    #[must_use]
    pub fn header_value(trace_id: &str, parent_id: &str, sampled: bool) -> String {
        format!(
            "00-{trace_id}-{parent_id}-{}",
            if sampled { "01" } else { "00" }
        )
    }
}

fn extract_version(version: &str, tail: &str) -> Result<u8, HeaderError> {
    match version {
        "ff" => return Err(HeaderError::traceparent("`ff` is an invalid version")),
        "00" => {
            if !tail.is_empty() {
                return Err(HeaderError::traceparent(
                    "version `00` should contain only 4 values delimited by `-`",
                ));
            }
        }
        _ => {
            debug!("Unsupported traceparent version {version}, still attempting to parse");
        }
    }

    u8::from_str_radix(version, 16).map_err(|_| HeaderError::traceparent("failed to decode version"))
}

fn extract_id(id: &str, zero_message: &'static str) -> Result<(), HeaderError> {
    if INVALID_SEGMENT_REGEX.is_match(id) {
        return Err(HeaderError::traceparent(zero_message));
    }
    Ok(())
}
