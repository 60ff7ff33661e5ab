use std::sync::Arc;

use base64::{Engine, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::traces::propagation::carrier::Extractor;
use crate::traces::propagation::error::{EncodeError, IngestError, IngestErrorType};
use crate::traces::propagation::{Extracted, InboundContext, Propagator};

pub const NEWRELIC_KEY: &str = "newrelic";

pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 1;

/// The kind of agent that produced a trace payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadType {
    App,
    Browser,
    Mobile,
}

impl PayloadType {
    #[must_use]
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(PayloadType::App),
            1 => Some(PayloadType::Browser),
            2 => Some(PayloadType::Mobile),
            _ => None,
        }
    }

    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            PayloadType::App => 0,
            PayloadType::Browser => 1,
            PayloadType::Mobile => 2,
        }
    }
}

/// Inputs to [`TracePayload::try_build_outgoing`].
#[derive(Debug, Clone, Copy)]
pub struct OutgoingFields<'a> {
    pub payload_type: PayloadType,
    pub account_id: &'a str,
    pub app_id: &'a str,
    pub span_id: Option<&'a str>,
    pub trace_id: &'a str,
    pub trust_key: Option<&'a str>,
    pub priority: Option<f32>,
    pub sampled: Option<bool>,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: Option<&'a str>,
}

/// The proprietary `newrelic` trace payload.
///
/// Only built through [`TracePayload::try_build_outgoing`] or decoded from
/// the wire, so a value always carries an account, an app, a trace id and at
/// least one of span id and transaction id.
#[derive(Debug, Clone, PartialEq)]
pub struct TracePayload {
    version: (u16, u16),
    payload_type: PayloadType,
    account_id: String,
    app_id: String,
    span_id: Option<String>,
    trace_id: String,
    trust_key: Option<String>,
    priority: Option<f32>,
    sampled: Option<bool>,
    timestamp: DateTime<Utc>,
    transaction_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    v: [u16; 2],
    d: WireData,
}

#[derive(Serialize, Deserialize)]
struct WireData {
    ty: PayloadType,
    ac: String,
    ap: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    tr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pr: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sa: Option<bool>,
    ti: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tx: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl TracePayload {
    /// Builds an outbound payload, or `None` when the fields cannot identify
    /// a trace.
    #[must_use]
    pub fn try_build_outgoing(fields: OutgoingFields<'_>) -> Option<Self> {
        if fields.account_id.is_empty() || fields.app_id.is_empty() {
            debug!("Not building trace payload: missing account or app id");
            return None;
        }
        if fields.trace_id.is_empty() {
            debug!("Not building trace payload: missing trace id");
            return None;
        }
        let span_id = non_empty(fields.span_id);
        let transaction_id = non_empty(fields.transaction_id);
        if span_id.is_none() && transaction_id.is_none() {
            debug!("Not building trace payload: no span or transaction id");
            return None;
        }

        let trust_key = non_empty(fields.trust_key).filter(|key| key != fields.account_id);

        Some(Self {
            version: (MAJOR_VERSION, MINOR_VERSION),
            payload_type: fields.payload_type,
            account_id: fields.account_id.to_string(),
            app_id: fields.app_id.to_string(),
            span_id,
            trace_id: fields.trace_id.to_string(),
            trust_key,
            priority: fields.priority,
            sampled: fields.sampled,
            timestamp: fields.timestamp,
            transaction_id,
        })
    }

    /// Decodes a header value. Accepts base64 or raw JSON text.
    pub fn decode_incoming(text: &str) -> Result<Self, IngestError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IngestError::NullPayload);
        }
        if text.starts_with('{') {
            return Self::from_json(text);
        }
        let bytes = general_purpose::STANDARD.decode(text)?;
        Self::from_json(&String::from_utf8(bytes)?)
    }

    /// Parses the JSON encoding. The major version is checked before any
    /// other field.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let mut value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| IngestError::Parse("payload is not an object".to_string()))?;

        let version = object
            .get("v")
            .cloned()
            .ok_or_else(|| IngestError::Parse("missing version".to_string()))?;
        let [major, minor]: [u16; 2] = serde_json::from_value(version)?;
        if major > MAJOR_VERSION {
            return Err(IngestError::MajorVersion(major));
        }

        let data = object
            .remove("d")
            .ok_or_else(|| IngestError::Parse("missing data".to_string()))?;
        let data: WireData = serde_json::from_value(data)?;

        if data.ac.is_empty() || data.ap.is_empty() || data.tr.is_empty() {
            return Err(IngestError::Parse(
                "missing account, app or trace id".to_string(),
            ));
        }
        let timestamp = (data.ti > 0)
            .then(|| DateTime::from_timestamp_millis(data.ti))
            .flatten()
            .ok_or_else(|| IngestError::Parse("missing timestamp".to_string()))?;

        Ok(Self {
            version: (major, minor),
            payload_type: data.ty,
            account_id: data.ac,
            app_id: data.ap,
            span_id: data.id.filter(|id| !id.is_empty()),
            trace_id: data.tr,
            trust_key: data.tk.filter(|key| !key.is_empty()),
            priority: data.pr,
            sampled: data.sa,
            timestamp,
            transaction_id: data.tx.filter(|id| !id.is_empty()),
        })
    }

    pub fn to_json(&self) -> Result<String, EncodeError> {
        let wire = WirePayload {
            v: [self.version.0, self.version.1],
            d: WireData {
                ty: self.payload_type,
                ac: self.account_id.clone(),
                ap: self.app_id.clone(),
                id: self.span_id.clone(),
                tr: self.trace_id.clone(),
                tk: self.trust_key.clone(),
                pr: self.priority,
                sa: self.sampled,
                ti: self.timestamp.timestamp_millis(),
                tx: self.transaction_id.clone(),
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }

    #[must_use]
    pub fn version(&self) -> (u16, u16) {
        self.version
    }

    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn trust_key(&self) -> Option<&str> {
        self.trust_key.as_deref()
    }

    /// The key trust is checked against: the trust key, else the account id.
    #[must_use]
    pub fn effective_trust_key(&self) -> &str {
        self.trust_key.as_deref().unwrap_or(&self.account_id)
    }

    #[must_use]
    pub fn priority(&self) -> Option<f32> {
        self.priority
    }

    #[must_use]
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Whether the payload names a span or a transaction to continue from.
    #[must_use]
    pub fn is_traceable(&self) -> bool {
        self.span_id.is_some() || self.transaction_id.is_some()
    }
}

/// Serializes payloads for the `newrelic` header and back.
pub trait HeaderEncoder: Send + Sync {
    fn encode(&self, payload: &TracePayload) -> Result<String, EncodeError>;

    fn decode(&self, text: &str) -> Result<TracePayload, IngestError>;
}

/// Base64 of the JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64JsonEncoder;

impl HeaderEncoder for Base64JsonEncoder {
    fn encode(&self, payload: &TracePayload) -> Result<String, EncodeError> {
        Ok(general_purpose::STANDARD.encode(payload.to_json()?))
    }

    fn decode(&self, text: &str) -> Result<TracePayload, IngestError> {
        TracePayload::decode_incoming(text)
    }
}

/// Reads and validates the `newrelic` header.
///
/// `Ok(None)` means the header was not sent. A decoded payload is only
/// returned when it names a span or transaction and comes from the trusted
/// account.
pub fn decode_newrelic_header(
    carrier: &dyn Extractor,
    encoder: &dyn HeaderEncoder,
    trusted_account_key: &str,
) -> Result<Option<TracePayload>, IngestErrorType> {
    let Some(text) = carrier.get(NEWRELIC_KEY) else {
        return Ok(None);
    };

    let payload = encoder.decode(text).map_err(|e| {
        debug!("{e}");
        e.kind()
    })?;

    if !payload.is_traceable() {
        debug!("Ignoring trace payload without span or transaction id");
        return Err(IngestErrorType::NotTraceable);
    }
    if payload.effective_trust_key() != trusted_account_key {
        debug!(
            "Ignoring trace payload from untrusted account {}",
            payload.effective_trust_key()
        );
        return Err(IngestErrorType::UntrustedAccount);
    }

    Ok(Some(payload))
}

/// Reads the proprietary `newrelic` header.
pub struct NewRelicPropagator {
    encoder: Arc<dyn HeaderEncoder>,
}

impl NewRelicPropagator {
    #[must_use]
    pub fn new(encoder: Arc<dyn HeaderEncoder>) -> Self {
        Self { encoder }
    }
}

impl Propagator for NewRelicPropagator {
    fn extract(&self, carrier: &dyn Extractor, trusted_account_key: &str) -> Extracted {
        match decode_newrelic_header(carrier, self.encoder.as_ref(), trusted_account_key) {
            Ok(payload) => Extracted {
                context: payload.map(InboundContext::NewRelic),
                errors: Vec::new(),
            },
            Err(error) => Extracted {
                context: None,
                errors: vec![error],
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    fn timestamp() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_518_469_636_025).unwrap()
    }

    fn fields() -> OutgoingFields<'static> {
        OutgoingFields {
            payload_type: PayloadType::App,
            account_id: "12345",
            app_id: "1111",
            span_id: Some("27ddd2d8890283b4"),
            trace_id: "0af7651916cd43dd8448eb211c80319c",
            trust_key: Some("67890"),
            priority: Some(1.456_789),
            sampled: Some(true),
            timestamp: timestamp(),
            transaction_id: Some("5569065a5b1313bd"),
        }
    }

    fn decode_err(text: &str) -> IngestErrorType {
        TracePayload::decode_incoming(text).unwrap_err().kind()
    }

    #[test]
    fn builds_outgoing_payload() {
        let payload = TracePayload::try_build_outgoing(fields()).unwrap();
        assert_eq!(payload.version(), (0, 1));
        assert_eq!(payload.trust_key(), Some("67890"));
        assert_eq!(payload.effective_trust_key(), "67890");
    }

    #[test]
    fn trust_key_equal_to_account_is_omitted() {
        let payload = TracePayload::try_build_outgoing(OutgoingFields {
            trust_key: Some("12345"),
            ..fields()
        })
        .unwrap();
        assert_eq!(payload.trust_key(), None);
        assert_eq!(payload.effective_trust_key(), "12345");
        assert!(!payload.to_json().unwrap().contains("\"tk\""));
    }

    #[test]
    fn rejects_unidentifiable_payloads() {
        assert!(
            TracePayload::try_build_outgoing(OutgoingFields {
                account_id: "",
                ..fields()
            })
            .is_none()
        );
        assert!(
            TracePayload::try_build_outgoing(OutgoingFields {
                app_id: "",
                ..fields()
            })
            .is_none()
        );
        assert!(
            TracePayload::try_build_outgoing(OutgoingFields {
                trace_id: "",
                ..fields()
            })
            .is_none()
        );
        assert!(
            TracePayload::try_build_outgoing(OutgoingFields {
                span_id: None,
                transaction_id: Some(""),
                ..fields()
            })
            .is_none()
        );
    }

    #[test]
    fn either_span_or_transaction_id_is_enough() {
        let span_only = TracePayload::try_build_outgoing(OutgoingFields {
            transaction_id: None,
            ..fields()
        })
        .unwrap();
        assert!(span_only.is_traceable());

        let transaction_only = TracePayload::try_build_outgoing(OutgoingFields {
            span_id: None,
            ..fields()
        })
        .unwrap();
        assert!(transaction_only.is_traceable());
    }

    #[test]
    fn base64_round_trip_keeps_every_field() {
        let payload = TracePayload::try_build_outgoing(fields()).unwrap();
        let encoded = Base64JsonEncoder.encode(&payload).unwrap();
        assert_eq!(Base64JsonEncoder.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn json_uses_short_field_names() {
        let payload = TracePayload::try_build_outgoing(OutgoingFields {
            priority: None,
            sampled: None,
            ..fields()
        })
        .unwrap();
        let json: Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["v"], serde_json::json!([0, 1]));
        assert_eq!(json["d"]["ty"], "App");
        assert_eq!(json["d"]["ac"], "12345");
        assert_eq!(json["d"]["ap"], "1111");
        assert_eq!(json["d"]["id"], "27ddd2d8890283b4");
        assert_eq!(json["d"]["tr"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(json["d"]["tk"], "67890");
        assert_eq!(json["d"]["ti"], 1_518_469_636_025_i64);
        assert_eq!(json["d"]["tx"], "5569065a5b1313bd");
        assert!(json["d"].get("pr").is_none());
        assert!(json["d"].get("sa").is_none());
    }

    #[test]
    fn decodes_raw_json() {
        let payload = TracePayload::decode_incoming(
            r#"{"v":[0,1],"d":{"ty":"Mobile","ac":"9123","ap":"51424","id":"5f474d64b9cc9b2a","tr":"3221bf09aa0bcf0d","pr":0.1234,"sa":false,"ti":1482959525577,"tx":"27856f70d3d314b7"}}"#,
        )
        .unwrap();
        assert_eq!(payload.payload_type(), PayloadType::Mobile);
        assert_eq!(payload.account_id(), "9123");
        assert_eq!(payload.trust_key(), None);
        assert_eq!(payload.sampled(), Some(false));
        assert_eq!(payload.timestamp().timestamp_millis(), 1_482_959_525_577);
    }

    #[test]
    fn optional_fields_may_be_missing() {
        let payload = TracePayload::decode_incoming(
            r#"{"v":[0,1],"d":{"ty":"App","ac":"9123","ap":"51424","tr":"3221bf09aa0bcf0d","ti":1482959525577}}"#,
        )
        .unwrap();
        assert!(!payload.is_traceable());
        assert_eq!(payload.priority(), None);
    }

    #[test]
    fn unknown_minor_version_is_accepted() {
        let payload = TracePayload::decode_incoming(
            r#"{"v":[0,999],"d":{"ty":"App","ac":"9123","ap":"51424","tx":"27856f70d3d314b7","tr":"3221bf09aa0bcf0d","ti":1482959525577}}"#,
        )
        .unwrap();
        assert_eq!(payload.version(), (0, 999));
    }

    #[test]
    fn major_version_is_checked_first() {
        assert_eq!(
            decode_err(r#"{"v":[1,0],"d":{}}"#),
            IngestErrorType::MajorVersionUnsupported
        );
        assert_eq!(
            decode_err(r#"{"v":[2,1]}"#),
            IngestErrorType::MajorVersionUnsupported
        );
    }

    #[test]
    fn empty_payload_is_null() {
        assert_eq!(decode_err(""), IngestErrorType::NullPayload);
        assert_eq!(decode_err("   "), IngestErrorType::NullPayload);
    }

    #[test]
    fn malformed_payloads_are_parse_errors() {
        for text in [
            "not base64!",
            "[1,2,3]",
            r#"{"d":{"ty":"App","ac":"1","ap":"2","tr":"3","ti":1}}"#,
            r#"{"v":[0,1]}"#,
            r#"{"v":[0,1],"d":{"ac":"1","ap":"2","tr":"3","ti":1}}"#,
            r#"{"v":[0,1],"d":{"ty":"App","ap":"2","tr":"3","ti":1}}"#,
            r#"{"v":[0,1],"d":{"ty":"App","ac":"1","tr":"3","ti":1}}"#,
            r#"{"v":[0,1],"d":{"ty":"App","ac":"1","ap":"2","ti":1}}"#,
            r#"{"v":[0,1],"d":{"ty":"App","ac":"1","ap":"2","tr":"3"}}"#,
            r#"{"v":[0,1],"d":{"ty":"App","ac":"1","ap":"2","tr":"3","ti":0}}"#,
            r#"{"v":[0,1],"d":{"ty":"Server","ac":"1","ap":"2","tr":"3","ti":1}}"#,
            r#"{"v":"0.1","d":{"ty":"App","ac":"1","ap":"2","tr":"3","ti":1}}"#,
        ] {
            assert_eq!(decode_err(text), IngestErrorType::ParseException, "{text}");
        }
        let not_json = general_purpose::STANDARD.encode("definitely not json");
        assert_eq!(decode_err(&not_json), IngestErrorType::ParseException);
    }

    fn carrier_with(payload: &TracePayload) -> Vec<(String, String)> {
        vec![(
            "NewRelic".to_string(),
            Base64JsonEncoder.encode(payload).unwrap(),
        )]
    }

    #[test]
    fn header_from_trusted_account_is_accepted() {
        let payload = TracePayload::try_build_outgoing(OutgoingFields {
            trust_key: None,
            account_id: "K",
            ..fields()
        })
        .unwrap();
        let decoded =
            decode_newrelic_header(&carrier_with(&payload), &Base64JsonEncoder, "K").unwrap();
        assert_eq!(decoded, Some(payload));
    }

    #[test]
    fn header_from_untrusted_account_is_rejected() {
        let payload = TracePayload::try_build_outgoing(OutgoingFields {
            trust_key: Some("OTHER"),
            account_id: "K",
            ..fields()
        })
        .unwrap();
        assert_eq!(
            decode_newrelic_header(&carrier_with(&payload), &Base64JsonEncoder, "K"),
            Err(IngestErrorType::UntrustedAccount)
        );
    }

    #[test]
    fn untraceable_header_is_rejected() {
        let carrier = vec![(
            NEWRELIC_KEY.to_string(),
            r#"{"v":[0,1],"d":{"ty":"App","ac":"K","ap":"2","tr":"3","ti":1}}"#.to_string(),
        )];
        assert_eq!(
            decode_newrelic_header(&carrier, &Base64JsonEncoder, "K"),
            Err(IngestErrorType::NotTraceable)
        );
    }

    #[test]
    fn missing_header_is_not_an_error() {
        let carrier: Vec<(String, String)> = Vec::new();
        assert_eq!(
            decode_newrelic_header(&carrier, &Base64JsonEncoder, "K"),
            Ok(None)
        );
    }

    #[test]
    fn propagator_reports_decode_errors() {
        let carrier = vec![(NEWRELIC_KEY.to_string(), String::new())];
        let extracted =
            NewRelicPropagator::new(Arc::new(Base64JsonEncoder)).extract(&carrier, "K");
        assert!(extracted.context.is_none());
        assert_eq!(extracted.errors, vec![IngestErrorType::NullPayload]);
    }
}
