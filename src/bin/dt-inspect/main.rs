#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

//! Resolves trace headers read from stdin, one `name: value` per line, and
//! prints the accepted state, the headers an outbound call would carry and
//! the supportability counters as JSON.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use apm_distributed_tracing::{
    config::{self, Config},
    logger,
    sampling::AdaptiveSampler,
    telemetry::supportability::SupportabilityCounters,
    traces::{
        context::TransportType, handler::TraceContextHandler, transaction::Transaction,
    },
};
use chrono::Utc;
use tracing::{debug, error};

fn load_config() -> Result<Config, config::ConfigError> {
    let config_directory =
        env::var("NEW_RELIC_CONFIG_DIR").map_or_else(|_| PathBuf::from("."), PathBuf::from);
    config::get_config(&config_directory)
}

fn read_headers(input: impl BufRead) -> io::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            None => debug!("Skipping line without a header name: {line}"),
        }
    }
    Ok(headers)
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger::init(config.log_level) {
        eprintln!("{e}");
    }

    let transport_type = match env::args().nth(1).map(|arg| arg.parse::<TransportType>()) {
        Some(Ok(transport_type)) => transport_type,
        Some(Err(e)) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
        None => TransportType::Unknown,
    };

    let headers = match read_headers(io::stdin().lock()) {
        Ok(headers) => headers,
        Err(e) => {
            error!("Failed to read headers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let counters = Arc::new(SupportabilityCounters::new());
    let sampler = Arc::new(AdaptiveSampler::default());
    let handler = TraceContextHandler::new(config, Arc::clone(&sampler), counters.clone());

    let mut transaction = Transaction::start(sampler.random());
    let state = handler.accept_inbound_headers(&headers, transport_type, Utc::now());
    transaction.accept_tracing_state(state.clone());
    let outbound: BTreeMap<String, String> = handler
        .try_get_outbound_headers(&transaction)
        .into_iter()
        .collect();
    let supportability: BTreeMap<&str, u64> = counters.snapshot().into_iter().collect();

    let report = serde_json::json!({
        "tracing_state": state,
        "outbound_headers": outbound,
        "supportability": supportability,
    });
    let mut stdout = io::stdout().lock();
    match serde_json::to_writer_pretty(&mut stdout, &report)
        .map_err(io::Error::from)
        .and_then(|()| writeln!(stdout))
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to write report: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_name_value_lines() {
        let input = "traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01\n\n\
                     garbage\ntracestate:aa=1\n";
        let headers = read_headers(input.as_bytes()).unwrap();
        assert_eq!(
            headers,
            vec![
                (
                    "traceparent".to_string(),
                    "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string()
                ),
                ("tracestate".to_string(), "aa=1".to_string()),
            ]
        );
    }
}
