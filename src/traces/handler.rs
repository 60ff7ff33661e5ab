use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::config::Config;
use crate::sampling::AdaptiveSampler;
use crate::telemetry::supportability::{SupportabilityMetric, SupportabilityReporter};
use crate::traces::context::{TracingState, TransportType};
use crate::traces::ids::{format_w3c_trace_id, generate_guid};
use crate::traces::propagation::TraceContextResolver;
use crate::traces::propagation::carrier::{Extractor, Injector};
use crate::traces::propagation::payload::{
    Base64JsonEncoder, HeaderEncoder, NEWRELIC_KEY, OutgoingFields, PayloadType, TracePayload,
    decode_newrelic_header,
};
use crate::traces::propagation::traceparent::{TRACEPARENT_KEY, W3CTraceparent};
use crate::traces::propagation::tracestate::{NewRelicEntry, TRACESTATE_KEY, W3CTracestate};
use crate::traces::transaction::TransactionMetadata;

/// Creates outbound trace headers and accepts inbound ones for the agent.
///
/// Never fails towards the caller: a payload that cannot be built, encoded or
/// accepted is logged, counted and treated as absent.
pub struct TraceContextHandler {
    config: ArcSwap<Config>,
    sampler: Arc<AdaptiveSampler>,
    encoder: Arc<dyn HeaderEncoder>,
    resolver: TraceContextResolver,
    reporter: Arc<dyn SupportabilityReporter>,
}

impl TraceContextHandler {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        sampler: Arc<AdaptiveSampler>,
        reporter: Arc<dyn SupportabilityReporter>,
    ) -> Self {
        Self::with_encoder(config, sampler, Arc::new(Base64JsonEncoder), reporter)
    }

    #[must_use]
    pub fn with_encoder(
        config: Arc<Config>,
        sampler: Arc<AdaptiveSampler>,
        encoder: Arc<dyn HeaderEncoder>,
        reporter: Arc<dyn SupportabilityReporter>,
    ) -> Self {
        sampler.on_configuration_updated(&config);
        Self {
            config: ArcSwap::new(config),
            sampler,
            resolver: TraceContextResolver::new(Arc::clone(&encoder)),
            encoder,
            reporter,
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    #[must_use]
    pub fn sampler(&self) -> &AdaptiveSampler {
        &self.sampler
    }

    /// Swaps in a new config snapshot and retargets the sampler.
    pub fn update_config(&self, config: Arc<Config>) {
        self.sampler.on_configuration_updated(&config);
        self.config.store(config);
    }

    fn report_success(&self, config: &Config, metric: SupportabilityMetric) {
        if config.payload_success_metrics_enabled {
            self.reporter.increment(metric);
        }
    }

    /// Builds the `newrelic` payload for an outbound call made by
    /// `transaction`.
    pub fn try_get_outbound_payload(
        &self,
        transaction: &dyn TransactionMetadata,
    ) -> Option<TracePayload> {
        let config = self.config.load();
        let sampled = self.outbound_sampled(&config, transaction)?;
        Self::build_payload(&config, transaction, sampled, Utc::now())
    }

    /// The sampling decision outbound headers carry, `None` when nothing
    /// should be sent.
    fn outbound_sampled(
        &self,
        config: &Config,
        transaction: &dyn TransactionMetadata,
    ) -> Option<bool> {
        if !config.distributed_tracing_enabled {
            return None;
        }
        if !config.span_events_enabled && !config.transaction_events_enabled {
            debug!("Span and transaction events are disabled, no trace headers created");
            return None;
        }
        let sampled = transaction.sampled(&self.sampler);
        if sampled.is_none() {
            error!("Transaction has no sampling decision, no trace headers created");
        }
        sampled
    }

    fn build_payload(
        config: &Config,
        transaction: &dyn TransactionMetadata,
        sampled: bool,
        timestamp: DateTime<Utc>,
    ) -> Option<TracePayload> {
        let span_id = if config.span_events_enabled && sampled {
            transaction.current_span_id()
        } else {
            None
        };
        let transaction_id = config
            .transaction_events_enabled
            .then_some(transaction.guid());

        TracePayload::try_build_outgoing(OutgoingFields {
            payload_type: PayloadType::App,
            account_id: &config.account_id,
            app_id: &config.primary_application_id,
            span_id,
            trace_id: transaction.trace_id().unwrap_or(transaction.guid()),
            trust_key: Some(config.trusted_account_key()),
            priority: Some(transaction.priority().get()),
            sampled: Some(sampled),
            timestamp,
            transaction_id,
        })
    }

    /// The `traceparent` and `tracestate` pair. Unlike the payload it is
    /// sent for unsampled transactions too.
    fn build_trace_context(
        config: &Config,
        transaction: &dyn TransactionMetadata,
        sampled: bool,
        timestamp: DateTime<Utc>,
    ) -> [(String, String); 2] {
        let span_id = if config.span_events_enabled {
            transaction.current_span_id()
        } else {
            None
        };
        let parent_id = span_id.map_or_else(generate_guid, str::to_string);
        let trace_id = transaction.trace_id().unwrap_or(transaction.guid());

        let entry = NewRelicEntry {
            version: 0,
            parent_type: PayloadType::App,
            account_id: config.account_id.clone(),
            app_id: config.primary_application_id.clone(),
            span_id: span_id.map(str::to_string),
            transaction_id: config
                .transaction_events_enabled
                .then(|| transaction.guid().to_string()),
            sampled: Some(sampled),
            priority: Some(transaction.priority().get()),
            timestamp: timestamp.timestamp_millis(),
        };

        [
            (
                TRACEPARENT_KEY.to_string(),
                W3CTraceparent::header_value(&format_w3c_trace_id(trace_id), &parent_id, sampled),
            ),
            (
                TRACESTATE_KEY.to_string(),
                W3CTracestate::header_value(
                    &entry,
                    config.trusted_account_key(),
                    transaction.vendor_state_entries(),
                ),
            ),
        ]
    }

    /// Every header an outbound call should carry, empty when none can be
    /// produced.
    pub fn try_get_outbound_headers(
        &self,
        transaction: &dyn TransactionMetadata,
    ) -> Vec<(String, String)> {
        let config = self.config.load();
        let Some(sampled) = self.outbound_sampled(&config, transaction) else {
            return Vec::new();
        };
        let timestamp = Utc::now();
        let mut headers = Vec::with_capacity(3);

        if !config.exclude_newrelic_header {
            if let Some(payload) = Self::build_payload(&config, transaction, sampled, timestamp) {
                match self.encoder.encode(&payload) {
                    Ok(value) => {
                        headers.push((NEWRELIC_KEY.to_string(), value));
                        self.report_success(&config, SupportabilityMetric::CreatePayloadSuccess);
                    }
                    Err(e) => {
                        error!("Failed to encode trace payload: {e}");
                        self.reporter
                            .increment(SupportabilityMetric::CreatePayloadException);
                    }
                }
            }
        }

        if config.account_id.is_empty() || config.primary_application_id.is_empty() {
            debug!("Account or application id not configured, no trace context created");
            self.reporter
                .increment(SupportabilityMetric::TraceContextCreateException);
            return headers;
        }

        headers.extend(Self::build_trace_context(
            &config,
            transaction,
            sampled,
            timestamp,
        ));
        self.report_success(&config, SupportabilityMetric::TraceContextCreateSuccess);

        headers
    }

    /// Writes the outbound headers into `carrier`.
    pub fn insert_outbound_headers(
        &self,
        transaction: &dyn TransactionMetadata,
        carrier: &mut dyn Injector,
    ) {
        for (key, value) in self.try_get_outbound_headers(transaction) {
            carrier.set(&key, value);
        }
    }

    /// Decodes and validates the inbound `newrelic` header.
    pub fn try_decode_inbound(&self, carrier: &dyn Extractor) -> Option<TracePayload> {
        let config = self.config.load();
        if !config.distributed_tracing_enabled {
            return None;
        }

        match decode_newrelic_header(carrier, self.encoder.as_ref(), config.trusted_account_key())
        {
            Ok(Some(payload)) => {
                self.report_success(&config, SupportabilityMetric::AcceptPayloadSuccess);
                Some(payload)
            }
            Ok(None) => None,
            Err(error) => {
                self.reporter
                    .increment(SupportabilityMetric::for_ingest_error(error));
                None
            }
        }
    }

    /// Resolves every inbound trace header into the state the transaction
    /// continues from.
    pub fn accept_inbound_headers(
        &self,
        carrier: &dyn Extractor,
        transport_type: TransportType,
        transaction_start: DateTime<Utc>,
    ) -> TracingState {
        let config = self.config.load();
        if !config.distributed_tracing_enabled {
            return TracingState::unaccepted(transport_type, Vec::new());
        }

        let state = self.resolver.resolve(
            carrier,
            config.trusted_account_key(),
            transport_type,
            transaction_start,
        );

        for error in state.ingest_errors() {
            self.reporter
                .increment(SupportabilityMetric::for_ingest_error(*error));
        }
        if state.trace_context_accepted() {
            self.report_success(&config, SupportabilityMetric::TraceContextAcceptSuccess);
        }
        if state.new_relic_payload_accepted() {
            self.report_success(&config, SupportabilityMetric::AcceptPayloadSuccess);
        }

        state
    }
}
