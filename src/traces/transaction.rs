use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::sampling::priority::{self, TracePriority};
use crate::sampling::{AdaptiveSampler, RandomSource};
use crate::traces::context::TracingState;
use crate::traces::ids::generate_guid;

/// What trace context handling reads from the transaction that owns a
/// request.
pub trait TransactionMetadata {
    fn guid(&self) -> &str;

    /// The trace id received from upstream, if any.
    fn trace_id(&self) -> Option<&str>;

    fn priority(&self) -> &TracePriority;

    /// The sampling decision, computed at most once per transaction.
    fn sampled(&self, sampler: &AdaptiveSampler) -> Option<bool>;

    /// Id of the span currently executing, the parent of outbound calls.
    fn current_span_id(&self) -> Option<&str>;

    /// Foreign `tracestate` members received upstream.
    fn vendor_state_entries(&self) -> &[String];
}

#[derive(Debug)]
pub struct Transaction {
    guid: String,
    start_time: DateTime<Utc>,
    priority: TracePriority,
    sampled: OnceLock<bool>,
    current_span_id: Option<String>,
    tracing_state: Option<TracingState>,
}

impl Transaction {
    #[must_use]
    pub fn new(priority: f32) -> Self {
        Self {
            guid: generate_guid(),
            start_time: Utc::now(),
            priority: TracePriority::new(priority),
            sampled: OnceLock::new(),
            current_span_id: Some(generate_guid()),
            tracing_state: None,
        }
    }

    /// A transaction with a freshly drawn priority.
    #[must_use]
    pub fn start(random: &RandomSource) -> Self {
        Self::new(priority::create(random))
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn tracing_state(&self) -> Option<&TracingState> {
        self.tracing_state.as_ref()
    }

    pub fn set_current_span_id(&mut self, span_id: Option<String>) {
        self.current_span_id = span_id;
    }

    /// Attaches the inbound trace context. An upstream decision is adopted
    /// only when it carries both the sampled flag and the priority.
    pub fn accept_tracing_state(&mut self, state: TracingState) {
        if state.is_accepted() {
            if let (Some(sampled), Some(priority)) = (state.sampled(), state.priority()) {
                self.priority.set(priority);
                self.sampled = OnceLock::from(sampled);
            }
        }
        self.tracing_state = Some(state);
    }
}

impl TransactionMetadata for Transaction {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn trace_id(&self) -> Option<&str> {
        self.tracing_state
            .as_ref()
            .filter(|state| state.is_accepted())
            .and_then(TracingState::trace_id)
    }

    fn priority(&self) -> &TracePriority {
        &self.priority
    }

    fn sampled(&self, sampler: &AdaptiveSampler) -> Option<bool> {
        Some(
            *self
                .sampled
                .get_or_init(|| sampler.compute_sampled(&self.priority)),
        )
    }

    fn current_span_id(&self) -> Option<&str> {
        self.current_span_id.as_deref()
    }

    fn vendor_state_entries(&self) -> &[String] {
        self.tracing_state
            .as_ref()
            .map(TracingState::vendor_state_entries)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::traces::context::TransportType;
    use crate::traces::propagation::TraceContextResolver;
    use crate::traces::propagation::payload::Base64JsonEncoder;
    use std::sync::Arc;

    fn inbound(headers: &[(&str, &str)]) -> TracingState {
        let carrier: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TraceContextResolver::new(Arc::new(Base64JsonEncoder)).resolve(
            &carrier,
            "33",
            TransportType::Http,
            Utc::now(),
        )
    }

    #[test]
    fn sampling_decision_is_computed_once() {
        let sampler = AdaptiveSampler::new(1, Some(1)).unwrap();
        let transaction = Transaction::new(0.5);

        assert_eq!(transaction.sampled(&sampler), Some(true));
        assert_eq!(transaction.sampled(&sampler), Some(true));
        assert_eq!(sampler.seen_this_interval(), 1);
        assert_eq!(transaction.priority().get(), 1.5);
    }

    #[test]
    fn upstream_decision_is_adopted() {
        let sampler = AdaptiveSampler::new(1, Some(1)).unwrap();
        let mut transaction = Transaction::new(0.5);
        transaction.accept_tracing_state(inbound(&[
            (
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00",
            ),
            (
                "tracestate",
                "33@nr=0-0-33-5043-27ddd2d8890283b4-5569065a5b1313bd-0-0.25-1518469636025,dd=1",
            ),
        ]));

        assert_eq!(transaction.sampled(&sampler), Some(false));
        assert_eq!(sampler.seen_this_interval(), 0);
        assert_eq!(transaction.priority().get(), 0.25);
        assert_eq!(
            transaction.trace_id(),
            Some("0af7651916cd43dd8448eb211c80319c")
        );
        assert_eq!(transaction.vendor_state_entries(), &["dd=1".to_string()]);
    }

    #[test]
    fn rejected_context_leaves_transaction_as_root() {
        let mut transaction = Transaction::new(0.5);
        transaction.accept_tracing_state(inbound(&[("newrelic", "")]));

        assert_eq!(transaction.trace_id(), None);
        assert!(transaction.vendor_state_entries().is_empty());
        assert!(transaction.tracing_state().is_some());
    }

    #[test]
    fn new_transaction_has_ids() {
        let transaction = Transaction::start(&RandomSource::new(Some(4)));
        assert_eq!(transaction.guid().len(), 16);
        assert_eq!(transaction.current_span_id().map(str::len), Some(16));
        assert!(transaction.priority().get() < 1.0);
    }
}
