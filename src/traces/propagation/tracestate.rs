use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::sampling::priority::format_priority;
use crate::traces::propagation::error::{HeaderError, IngestErrorType};
use crate::traces::propagation::payload::PayloadType;

pub const TRACESTATE_KEY: &str = "tracestate";

const NEW_RELIC_VENDOR: &str = "@nr";
const ENTRY_VERSION: u32 = 0;
const ENTRY_FIELD_COUNT: usize = 9;

lazy_static! {
    static ref INVALID_ASCII_CHARACTERS_REGEX: Regex =
        Regex::new(r"[^\x20-\x7E]+").expect("failed creating regex");
    static ref PRIORITY_REGEX: Regex =
        Regex::new(r"^\d*(\.\d{1,6})?$").expect("failed creating regex");
}

/// The `tracestate` member key owned by the account behind `trusted_account_key`.
#[must_use]
pub fn vendor_key(trusted_account_key: &str) -> String {
    format!("{trusted_account_key}{NEW_RELIC_VENDOR}")
}

/// Our own `tracestate` entry.
///
/// `version-parentType-accountId-appId-spanId-transactionId-sampled-priority-timestamp`
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelicEntry {
    pub version: u32,
    pub parent_type: PayloadType,
    pub account_id: String,
    pub app_id: String,
    pub span_id: Option<String>,
    pub transaction_id: Option<String>,
    pub sampled: Option<bool>,
    pub priority: Option<f32>,
    pub timestamp: i64,
}

impl NewRelicEntry {
    pub fn parse(value: &str) -> Result<Self, HeaderError> {
        if INVALID_ASCII_CHARACTERS_REGEX.is_match(value) || value.contains('=') {
            return Err(HeaderError::tracestate("invalid characters in entry"));
        }

        let fields: Vec<&str> = value.split('-').collect();
        let version = fields[0]
            .parse::<u32>()
            .map_err(|_| HeaderError::tracestate("invalid entry version"))?;
        if fields.len() < ENTRY_FIELD_COUNT
            || (version == ENTRY_VERSION && fields.len() != ENTRY_FIELD_COUNT)
        {
            return Err(HeaderError::tracestate("unexpected number of entry fields"));
        }

        let parent_type = fields[1]
            .parse::<u8>()
            .ok()
            .and_then(PayloadType::from_ordinal)
            .ok_or_else(|| HeaderError::tracestate("invalid parent type"))?;
        let account_id = required(fields[2], "missing account id")?;
        let app_id = required(fields[3], "missing app id")?;
        let timestamp = fields[8]
            .parse::<i64>()
            .map_err(|_| HeaderError::tracestate("invalid timestamp"))?;

        Ok(Self {
            version,
            parent_type,
            account_id,
            app_id,
            span_id: optional(fields[4]),
            transaction_id: optional(fields[5]),
            sampled: match fields[6] {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            },
            priority: parse_priority(fields[7]),
            timestamp,
        })
    }

    /// Renders the entry as a `tracestate` member under `trusted_account_key`.
    #[must_use]
    pub fn to_member(&self, trusted_account_key: &str) -> String {
        format!(
            "{}={}-{}-{}-{}-{}-{}-{}-{}-{}",
            vendor_key(trusted_account_key),
            self.version,
            self.parent_type.ordinal(),
            self.account_id,
            self.app_id,
            self.span_id.as_deref().unwrap_or_default(),
            self.transaction_id.as_deref().unwrap_or_default(),
            match self.sampled {
                Some(true) => "1",
                Some(false) => "0",
                None => "",
            },
            self.priority.map(format_priority).unwrap_or_default(),
            self.timestamp,
        )
    }
}

fn required(field: &str, message: &'static str) -> Result<String, HeaderError> {
    if field.is_empty() {
        Err(HeaderError::tracestate(message))
    } else {
        Ok(field.to_string())
    }
}

fn optional(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn parse_priority(field: &str) -> Option<f32> {
    if field.is_empty() || !PRIORITY_REGEX.is_match(field) {
        return None;
    }
    field.parse::<f32>().ok()
}

/// A parsed `tracestate`: our entry, if trusted and valid, plus every other
/// vendor's member in original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct W3CTracestate {
    pub new_relic: Option<NewRelicEntry>,
    pub vendor_entries: Vec<String>,
    pub errors: Vec<IngestErrorType>,
}

impl W3CTracestate {
    /// Parses every `tracestate` header instance received.
    ///
    /// Within one instance the first member under our key wins; across
    /// instances the last one wins. Members under our key never reach the
    /// vendor list.
    pub fn parse<S: AsRef<str>>(headers: &[S], trusted_account_key: &str) -> Self {
        let our_key = vendor_key(trusted_account_key);
        let mut ours: Option<&str> = None;
        let mut tracestate = Self::default();

        for header in headers {
            let mut first_in_header: Option<&str> = None;
            for member in header.as_ref().split(',').map(str::trim) {
                let Some((key, value)) = member.split_once('=') else {
                    continue;
                };
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                if key == our_key {
                    if first_in_header.is_none() {
                        first_in_header = Some(value.trim());
                    }
                    continue;
                }
                if INVALID_ASCII_CHARACTERS_REGEX.is_match(member) {
                    debug!("Dropping tracestate member with invalid characters");
                    tracestate.record(IngestErrorType::TracestateParseException);
                    continue;
                }
                tracestate.vendor_entries.push(member.to_string());
            }
            if first_in_header.is_some() {
                ours = first_in_header;
            }
        }

        match ours {
            None => tracestate.record(IngestErrorType::TracestateNoNrEntry),
            Some(value) => match NewRelicEntry::parse(value) {
                Ok(entry) => tracestate.new_relic = Some(entry),
                Err(e) => {
                    debug!("{e}");
                    tracestate.record(IngestErrorType::TracestateInvalidNrEntry);
                }
            },
        }

        tracestate
    }

    fn record(&mut self, error: IngestErrorType) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    /// Builds the outbound header: our entry first, then the vendor entries
    /// we received.
    #[must_use]
    pub fn header_value(
        entry: &NewRelicEntry,
        trusted_account_key: &str,
        vendor_entries: &[String],
    ) -> String {
        let mut members = Vec::with_capacity(vendor_entries.len() + 1);
        members.push(entry.to_member(trusted_account_key));
        members.extend(vendor_entries.iter().cloned());
        members.join(",")
    }
}
