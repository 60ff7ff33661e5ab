use std::sync::atomic::{AtomicU64, Ordering};

use crate::traces::propagation::error::IngestErrorType;

const METRIC_COUNT: usize = 15;

/// Agent health counters emitted by trace context handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportabilityMetric {
    CreatePayloadSuccess,
    CreatePayloadException,
    AcceptPayloadSuccess,
    AcceptPayloadException,
    AcceptPayloadParseException,
    AcceptPayloadIgnoredNull,
    AcceptPayloadIgnoredMajorVersion,
    AcceptPayloadIgnoredUntrustedAccount,
    TraceContextCreateSuccess,
    TraceContextCreateException,
    TraceContextAcceptSuccess,
    TraceParentParseException,
    TraceStateParseException,
    TraceStateInvalidNrEntry,
    TraceStateNoNrEntry,
}

impl SupportabilityMetric {
    pub const ALL: [SupportabilityMetric; METRIC_COUNT] = [
        SupportabilityMetric::CreatePayloadSuccess,
        SupportabilityMetric::CreatePayloadException,
        SupportabilityMetric::AcceptPayloadSuccess,
        SupportabilityMetric::AcceptPayloadException,
        SupportabilityMetric::AcceptPayloadParseException,
        SupportabilityMetric::AcceptPayloadIgnoredNull,
        SupportabilityMetric::AcceptPayloadIgnoredMajorVersion,
        SupportabilityMetric::AcceptPayloadIgnoredUntrustedAccount,
        SupportabilityMetric::TraceContextCreateSuccess,
        SupportabilityMetric::TraceContextCreateException,
        SupportabilityMetric::TraceContextAcceptSuccess,
        SupportabilityMetric::TraceParentParseException,
        SupportabilityMetric::TraceStateParseException,
        SupportabilityMetric::TraceStateInvalidNrEntry,
        SupportabilityMetric::TraceStateNoNrEntry,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SupportabilityMetric::CreatePayloadSuccess => {
                "Supportability/DistributedTrace/CreatePayload/Success"
            }
            SupportabilityMetric::CreatePayloadException => {
                "Supportability/DistributedTrace/CreatePayload/Exception"
            }
            SupportabilityMetric::AcceptPayloadSuccess => {
                "Supportability/DistributedTrace/AcceptPayload/Success"
            }
            SupportabilityMetric::AcceptPayloadException => {
                "Supportability/DistributedTrace/AcceptPayload/Exception"
            }
            SupportabilityMetric::AcceptPayloadParseException => {
                "Supportability/DistributedTrace/AcceptPayload/ParseException"
            }
            SupportabilityMetric::AcceptPayloadIgnoredNull => {
                "Supportability/DistributedTrace/AcceptPayload/Ignored/Null"
            }
            SupportabilityMetric::AcceptPayloadIgnoredMajorVersion => {
                "Supportability/DistributedTrace/AcceptPayload/Ignored/MajorVersion"
            }
            SupportabilityMetric::AcceptPayloadIgnoredUntrustedAccount => {
                "Supportability/DistributedTrace/AcceptPayload/Ignored/UntrustedAccount"
            }
            SupportabilityMetric::TraceContextCreateSuccess => {
                "Supportability/TraceContext/Create/Success"
            }
            SupportabilityMetric::TraceContextCreateException => {
                "Supportability/TraceContext/Create/Exception"
            }
            SupportabilityMetric::TraceContextAcceptSuccess => {
                "Supportability/TraceContext/Accept/Success"
            }
            SupportabilityMetric::TraceParentParseException => {
                "Supportability/TraceContext/TraceParent/Parse/Exception"
            }
            SupportabilityMetric::TraceStateParseException => {
                "Supportability/TraceContext/TraceState/Parse/Exception"
            }
            SupportabilityMetric::TraceStateInvalidNrEntry => {
                "Supportability/TraceContext/TraceState/InvalidNrEntry"
            }
            SupportabilityMetric::TraceStateNoNrEntry => {
                "Supportability/TraceContext/TraceState/NoNrEntry"
            }
        }
    }

    /// The counter an ingest failure is reported under.
    #[must_use]
    pub fn for_ingest_error(error: IngestErrorType) -> Self {
        match error {
            IngestErrorType::NullPayload => SupportabilityMetric::AcceptPayloadIgnoredNull,
            IngestErrorType::ParseException | IngestErrorType::NotTraceable => {
                SupportabilityMetric::AcceptPayloadParseException
            }
            IngestErrorType::MajorVersionUnsupported => {
                SupportabilityMetric::AcceptPayloadIgnoredMajorVersion
            }
            IngestErrorType::UntrustedAccount => {
                SupportabilityMetric::AcceptPayloadIgnoredUntrustedAccount
            }
            IngestErrorType::TraceParentParseException => {
                SupportabilityMetric::TraceParentParseException
            }
            IngestErrorType::TracestateParseException => {
                SupportabilityMetric::TraceStateParseException
            }
            IngestErrorType::TracestateInvalidNrEntry => {
                SupportabilityMetric::TraceStateInvalidNrEntry
            }
            IngestErrorType::TracestateNoNrEntry => SupportabilityMetric::TraceStateNoNrEntry,
            IngestErrorType::Other => SupportabilityMetric::AcceptPayloadException,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Fire-and-forget sink for supportability counters.
pub trait SupportabilityReporter: Send + Sync {
    fn increment(&self, metric: SupportabilityMetric);
}

/// In-process counters, one atomic per metric.
#[derive(Debug, Default)]
pub struct SupportabilityCounters {
    counts: [AtomicU64; METRIC_COUNT],
}

impl SupportabilityCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, metric: SupportabilityMetric) -> u64 {
        self.counts[metric.index()].load(Ordering::Relaxed)
    }

    /// Every counter that is not zero, by metric name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        SupportabilityMetric::ALL
            .iter()
            .map(|metric| (metric.name(), self.get(*metric)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

impl SupportabilityReporter for SupportabilityCounters {
    fn increment(&self, metric: SupportabilityMetric) {
        self.counts[metric.index()].fetch_add(1, Ordering::Relaxed);
    }
}
