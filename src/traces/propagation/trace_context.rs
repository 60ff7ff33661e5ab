use tracing::debug;

use crate::traces::propagation::carrier::Extractor;
use crate::traces::propagation::error::IngestErrorType;
use crate::traces::propagation::traceparent::{TRACEPARENT_KEY, W3CTraceparent};
use crate::traces::propagation::tracestate::{TRACESTATE_KEY, W3CTracestate};
use crate::traces::propagation::{Extracted, InboundContext, Propagator};

/// The `traceparent`/`tracestate` pair read from one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct W3CTraceContext {
    pub traceparent: Option<W3CTraceparent>,
    pub tracestate: Option<W3CTracestate>,
    pub errors: Vec<IngestErrorType>,
}

impl W3CTraceContext {
    /// Reads the pair through `get_header`, which returns every value of a
    /// header.
    ///
    /// A missing or repeated `traceparent` is treated as absent. `tracestate`
    /// is only read once `traceparent` parsed.
    pub fn parse<F>(get_header: F, trusted_account_key: &str) -> Self
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut context = Self::default();

        let values = get_header(TRACEPARENT_KEY);
        let [value] = values.as_slice() else {
            if values.len() > 1 {
                debug!("Ignoring {} traceparent headers", values.len());
            }
            return context;
        };

        match W3CTraceparent::parse(value) {
            Ok(traceparent) => context.traceparent = Some(traceparent),
            Err(e) => {
                debug!("{e}");
                context.errors.push(IngestErrorType::TraceParentParseException);
                return context;
            }
        }

        let tracestate = W3CTracestate::parse(&get_header(TRACESTATE_KEY), trusted_account_key);
        context.errors.extend(tracestate.errors.iter().copied());
        context.tracestate = Some(tracestate);
        context
    }

    /// [`W3CTraceContext::parse`] over a header carrier.
    pub fn extract(carrier: &dyn Extractor, trusted_account_key: &str) -> Self {
        Self::parse(
            |key| {
                carrier
                    .get_all(key)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            },
            trusted_account_key,
        )
    }
}

/// Reads W3C trace context headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextPropagator;

impl Propagator for TraceContextPropagator {
    fn extract(&self, carrier: &dyn Extractor, trusted_account_key: &str) -> Extracted {
        let W3CTraceContext {
            traceparent,
            tracestate,
            errors,
        } = W3CTraceContext::extract(carrier, trusted_account_key);

        Extracted {
            context: traceparent.map(|traceparent| InboundContext::TraceContext {
                traceparent,
                tracestate: tracestate.unwrap_or_default(),
            }),
            errors,
        }
    }
}
