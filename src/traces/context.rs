use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::traces::propagation::error::IngestErrorType;
use crate::traces::propagation::payload::{PayloadType, TracePayload};
use crate::traces::propagation::traceparent::W3CTraceparent;
use crate::traces::propagation::tracestate::W3CTracestate;

/// How the inbound request reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportType {
    #[default]
    Unknown,
    Http,
    Https,
    Kafka,
    Jms,
    IronMq,
    Amqp,
    Queue,
    Other,
}

impl TransportType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Unknown => "Unknown",
            TransportType::Http => "HTTP",
            TransportType::Https => "HTTPS",
            TransportType::Kafka => "Kafka",
            TransportType::Jms => "JMS",
            TransportType::IronMq => "IronMQ",
            TransportType::Amqp => "AMQP",
            TransportType::Queue => "Queue",
            TransportType::Other => "Other",
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(TransportType::Unknown),
            "http" => Ok(TransportType::Http),
            "https" => Ok(TransportType::Https),
            "kafka" => Ok(TransportType::Kafka),
            "jms" => Ok(TransportType::Jms),
            "ironmq" => Ok(TransportType::IronMq),
            "amqp" => Ok(TransportType::Amqp),
            "queue" => Ok(TransportType::Queue),
            "other" => Ok(TransportType::Other),
            _ => Err(format!("Invalid transport type: '{s}'")),
        }
    }
}

/// The trace context accepted for one inbound request.
///
/// Built once by the resolver and read-only afterwards. Every field is empty
/// when nothing was accepted, in which case the request starts a new trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TracingState {
    parent_type: Option<PayloadType>,
    account_id: Option<String>,
    app_id: Option<String>,
    guid: Option<String>,
    trace_id: Option<String>,
    parent_id: Option<String>,
    transaction_id: Option<String>,
    sampled: Option<bool>,
    priority: Option<f32>,
    timestamp: Option<DateTime<Utc>>,
    transport_type: TransportType,
    transport_duration: Duration,
    vendor_state_entries: Vec<String>,
    ingest_errors: Vec<IngestErrorType>,
    new_relic_payload_accepted: bool,
    trace_context_accepted: bool,
}

fn transport_duration(
    timestamp: Option<DateTime<Utc>>,
    transaction_start: DateTime<Utc>,
) -> Duration {
    timestamp
        .and_then(|timestamp| (transaction_start - timestamp).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

impl TracingState {
    /// Nothing accepted; only the errors seen along the way.
    #[must_use]
    pub fn unaccepted(transport_type: TransportType, ingest_errors: Vec<IngestErrorType>) -> Self {
        Self {
            transport_type,
            ingest_errors,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_payload(
        payload: &TracePayload,
        transport_type: TransportType,
        transaction_start: DateTime<Utc>,
        ingest_errors: Vec<IngestErrorType>,
    ) -> Self {
        let timestamp = Some(payload.timestamp());
        Self {
            parent_type: Some(payload.payload_type()),
            account_id: Some(payload.account_id().to_string()),
            app_id: Some(payload.app_id().to_string()),
            guid: payload.span_id().map(str::to_string),
            trace_id: Some(payload.trace_id().to_string()),
            parent_id: None,
            transaction_id: payload.transaction_id().map(str::to_string),
            sampled: payload.sampled(),
            priority: payload.priority(),
            timestamp,
            transport_type,
            transport_duration: transport_duration(timestamp, transaction_start),
            vendor_state_entries: Vec::new(),
            ingest_errors,
            new_relic_payload_accepted: true,
            trace_context_accepted: false,
        }
    }

    /// Trace and parent ids come from `traceparent`, everything else from our
    /// `tracestate` entry when one was accepted.
    #[must_use]
    pub fn from_trace_context(
        traceparent: &W3CTraceparent,
        tracestate: W3CTracestate,
        transport_type: TransportType,
        transaction_start: DateTime<Utc>,
        ingest_errors: Vec<IngestErrorType>,
    ) -> Self {
        let mut state = Self {
            trace_id: Some(traceparent.trace_id.clone()),
            parent_id: Some(traceparent.parent_id.clone()),
            transport_type,
            vendor_state_entries: tracestate.vendor_entries,
            ingest_errors,
            trace_context_accepted: true,
            ..Self::default()
        };

        if let Some(entry) = tracestate.new_relic {
            let timestamp = DateTime::from_timestamp_millis(entry.timestamp);
            state.parent_type = Some(entry.parent_type);
            state.account_id = Some(entry.account_id);
            state.app_id = Some(entry.app_id);
            state.guid = entry.span_id;
            state.transaction_id = entry.transaction_id;
            state.sampled = entry.sampled;
            state.priority = entry.priority;
            state.timestamp = timestamp;
            state.transport_duration = transport_duration(timestamp, transaction_start);
        }

        state
    }

    #[must_use]
    pub fn parent_type(&self) -> Option<PayloadType> {
        self.parent_type
    }

    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// The parent span id.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// The W3C parent id, set only when `traceparent` was accepted.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    #[must_use]
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    #[must_use]
    pub fn priority(&self) -> Option<f32> {
        self.priority
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    #[must_use]
    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    #[must_use]
    pub fn transport_duration(&self) -> Duration {
        self.transport_duration
    }

    #[must_use]
    pub fn vendor_state_entries(&self) -> &[String] {
        &self.vendor_state_entries
    }

    #[must_use]
    pub fn ingest_errors(&self) -> &[IngestErrorType] {
        &self.ingest_errors
    }

    #[must_use]
    pub fn new_relic_payload_accepted(&self) -> bool {
        self.new_relic_payload_accepted
    }

    #[must_use]
    pub fn trace_context_accepted(&self) -> bool {
        self.trace_context_accepted
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.new_relic_payload_accepted || self.trace_context_accepted
    }
}
