use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::traces::context::{TracingState, TransportType};
use carrier::Extractor;
use error::IngestErrorType;
use payload::{HeaderEncoder, NewRelicPropagator, TracePayload};
use trace_context::TraceContextPropagator;
use traceparent::W3CTraceparent;
use tracestate::W3CTracestate;

pub mod carrier;
pub mod error;
pub mod payload;
pub mod trace_context;
pub mod traceparent;
pub mod tracestate;

/// A trace context one propagator accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContext {
    TraceContext {
        traceparent: W3CTraceparent,
        tracestate: W3CTracestate,
    },
    NewRelic(TracePayload),
}

/// What one propagator found in a carrier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub context: Option<InboundContext>,
    pub errors: Vec<IngestErrorType>,
}

pub trait Propagator: Send + Sync {
    fn extract(&self, carrier: &dyn Extractor, trusted_account_key: &str) -> Extracted;
}

/// Combines every inbound header format into a single [`TracingState`].
///
/// Propagators run in order and the first accepted context wins, so a valid
/// `traceparent` takes precedence over the `newrelic` header. Errors from
/// every propagator that ran are kept.
pub struct TraceContextResolver {
    propagators: Vec<Box<dyn Propagator + 'static>>,
}

impl TraceContextResolver {
    #[must_use]
    pub fn new(encoder: Arc<dyn HeaderEncoder>) -> Self {
        Self {
            propagators: vec![
                Box::new(TraceContextPropagator),
                Box::new(NewRelicPropagator::new(encoder)),
            ],
        }
    }

    #[must_use]
    pub fn with_propagators(propagators: Vec<Box<dyn Propagator + 'static>>) -> Self {
        Self { propagators }
    }

    pub fn resolve(
        &self,
        carrier: &dyn Extractor,
        trusted_account_key: &str,
        transport_type: TransportType,
        transaction_start: DateTime<Utc>,
    ) -> TracingState {
        let mut errors: Vec<IngestErrorType> = Vec::new();

        for propagator in &self.propagators {
            let extracted = propagator.extract(carrier, trusted_account_key);
            for error in extracted.errors {
                if !errors.contains(&error) {
                    errors.push(error);
                }
            }

            match extracted.context {
                Some(InboundContext::TraceContext {
                    traceparent,
                    tracestate,
                }) => {
                    return TracingState::from_trace_context(
                        &traceparent,
                        tracestate,
                        transport_type,
                        transaction_start,
                        errors,
                    );
                }
                Some(InboundContext::NewRelic(payload)) => {
                    return TracingState::from_payload(
                        &payload,
                        transport_type,
                        transaction_start,
                        errors,
                    );
                }
                None => {}
            }
        }

        TracingState::unaccepted(transport_type, errors)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod test {
    use super::*;
    use crate::traces::propagation::payload::{
        Base64JsonEncoder, NEWRELIC_KEY, OutgoingFields, PayloadType,
    };
    use chrono::TimeDelta;
    use std::time::Duration;

    const TRUST_KEY: &str = "33";
    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-ad6b7169203331bb-01";
    const TRACESTATE: &str = "33@nr=0-0-12345-1111-5569065a5b1313bd-27ddd2d8890283b4-1-0.65-1482959525577,dd=YzRiMTIxODk1NmVmZTE4ZQ";

    fn resolver() -> TraceContextResolver {
        TraceContextResolver::new(Arc::new(Base64JsonEncoder))
    }

    fn newrelic_header(trust_key: &str) -> String {
        let payload = TracePayload::try_build_outgoing(OutgoingFields {
            payload_type: PayloadType::Mobile,
            account_id: "12345",
            app_id: "1111",
            span_id: Some("5569065a5b1313bd"),
            trace_id: "3221bf09aa0bcf0d",
            trust_key: Some(trust_key),
            priority: Some(0.65),
            sampled: Some(true),
            timestamp: DateTime::from_timestamp_millis(1_482_959_525_577).unwrap(),
            transaction_id: Some("27ddd2d8890283b4"),
        })
        .unwrap();
        Base64JsonEncoder.encode(&payload).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_482_959_525_577).unwrap() + TimeDelta::milliseconds(40)
    }

    #[test]
    fn accepts_newrelic_payload() {
        let header = newrelic_header(TRUST_KEY);
        let state = resolver().resolve(
            &headers(&[(NEWRELIC_KEY, header.as_str())]),
            TRUST_KEY,
            TransportType::Http,
            start(),
        );

        assert!(state.new_relic_payload_accepted());
        assert!(!state.trace_context_accepted());
        assert_eq!(state.parent_type(), Some(PayloadType::Mobile));
        assert_eq!(state.account_id(), Some("12345"));
        assert_eq!(state.app_id(), Some("1111"));
        assert_eq!(state.guid(), Some("5569065a5b1313bd"));
        assert_eq!(state.trace_id(), Some("3221bf09aa0bcf0d"));
        assert_eq!(state.transaction_id(), Some("27ddd2d8890283b4"));
        assert_eq!(state.priority(), Some(0.65));
        assert_eq!(state.sampled(), Some(true));
        assert_eq!(state.transport_type(), TransportType::Http);
        assert_eq!(state.transport_duration(), Duration::from_millis(40));
        assert!(state.ingest_errors().is_empty());
    }

    #[test]
    fn accepts_trace_context() {
        let state = resolver().resolve(
            &headers(&[("traceparent", TRACEPARENT), ("tracestate", TRACESTATE)]),
            TRUST_KEY,
            TransportType::Amqp,
            start(),
        );

        assert!(state.trace_context_accepted());
        assert_eq!(state.parent_type(), Some(PayloadType::App));
        assert_eq!(state.account_id(), Some("12345"));
        assert_eq!(state.guid(), Some("5569065a5b1313bd"));
        assert_eq!(state.trace_id(), Some("0af7651916cd43dd8448eb211c80319c"));
        assert_eq!(state.parent_id(), Some("ad6b7169203331bb"));
        assert_eq!(state.priority(), Some(0.65));
        assert_eq!(state.transport_duration(), Duration::from_millis(40));
        assert_eq!(
            state.vendor_state_entries(),
            &["dd=YzRiMTIxODk1NmVmZTE4ZQ".to_string()]
        );
    }

    #[test]
    fn trace_context_wins_over_newrelic_header() {
        let header = newrelic_header(TRUST_KEY);
        let state = resolver().resolve(
            &headers(&[
                (NEWRELIC_KEY, header.as_str()),
                ("traceparent", TRACEPARENT),
                ("tracestate", TRACESTATE),
            ]),
            TRUST_KEY,
            TransportType::Http,
            start(),
        );

        assert!(state.trace_context_accepted());
        assert!(!state.new_relic_payload_accepted());
        assert_eq!(state.trace_id(), Some("0af7651916cd43dd8448eb211c80319c"));
    }

    #[test]
    fn invalid_traceparent_falls_back_to_newrelic_header() {
        let header = newrelic_header(TRUST_KEY);
        let state = resolver().resolve(
            &headers(&[
                (NEWRELIC_KEY, header.as_str()),
                ("traceparent", "abc"),
                ("tracestate", TRACESTATE),
            ]),
            TRUST_KEY,
            TransportType::Http,
            start(),
        );

        assert!(state.new_relic_payload_accepted());
        assert_eq!(state.trace_id(), Some("3221bf09aa0bcf0d"));
        assert_eq!(
            state.ingest_errors(),
            &[IngestErrorType::TraceParentParseException]
        );
    }

    #[test]
    fn errors_from_both_formats_are_kept() {
        let header = newrelic_header("OTHER");
        let state = resolver().resolve(
            &headers(&[(NEWRELIC_KEY, header.as_str()), ("traceparent", "abc")]),
            TRUST_KEY,
            TransportType::Http,
            start(),
        );

        assert!(!state.is_accepted());
        assert_eq!(
            state.ingest_errors(),
            &[
                IngestErrorType::TraceParentParseException,
                IngestErrorType::UntrustedAccount
            ]
        );
        assert_eq!(state.trace_id(), None);
        assert_eq!(state.transport_duration(), Duration::ZERO);
    }

    #[test]
    fn empty_newrelic_header_is_null_payload() {
        let state = resolver().resolve(
            &headers(&[(NEWRELIC_KEY, "")]),
            TRUST_KEY,
            TransportType::Amqp,
            start(),
        );
        assert!(!state.is_accepted());
        assert_eq!(state.ingest_errors(), &[IngestErrorType::NullPayload]);
        assert_eq!(state.parent_type(), None);
    }

    #[test]
    fn no_headers_no_errors() {
        let state = resolver().resolve(
            &headers(&[("content-type", "text/plain")]),
            TRUST_KEY,
            TransportType::Unknown,
            start(),
        );
        assert_eq!(state, TracingState::unaccepted(TransportType::Unknown, Vec::new()));
    }
}
