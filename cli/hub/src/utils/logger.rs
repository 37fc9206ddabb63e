use std::sync::OnceLock;

use tracing::{debug, error};
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::{EnvFilter, Registry};

use crate::commands::Verbosity;

static LOGGER_HANDLE: OnceLock<Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the stderr logger, or update its filter if it is installed.
///
/// `RUST_LOG` takes precedence over `verbosity`.
pub(crate) fn init_logger(verbosity: Option<Verbosity>) {
    let log_filter = log_filter(verbosity.unwrap_or_default());

    let filter_handle = LOGGER_HANDLE.get_or_init(|| {
        let (filter, reload_handle) =
            tracing_subscriber::reload::Layer::new(EnvFilter::new(log_filter));
        let log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter);
        if let Err(err) = tracing_subscriber::registry().with(log_layer).try_init() {
            eprintln!("Initializing logger failed: {err}");
        }
        reload_handle
    });

    update_filters(filter_handle, log_filter);
}

fn log_filter(verbosity: Verbosity) -> &'static str {
    match verbosity {
        // Show only errors
        Verbosity::Quiet => "off,hub=error,hub_catalog=error",
        // Only show warnings
        Verbosity::Verbose(0) => "off,hub=warn,hub_catalog=warn",
        // Show our own info logs
        Verbosity::Verbose(1) => "off,hub=info,hub_catalog=info",
        // Also show requests, cache hits and joined fetches
        Verbosity::Verbose(2) => "off,hub=debug,hub_catalog=debug",
        Verbosity::Verbose(3) => "off,hub=trace,hub_catalog=trace",
        // Also show debug from the HTTP stack
        Verbosity::Verbose(4) => "debug,hub=trace,hub_catalog=trace",
        Verbosity::Verbose(_) => "trace",
    }
}

fn update_filters(filter_handle: &Handle<EnvFilter, Registry>, log_filter: &str) {
    let result = filter_handle.modify(|layer| {
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_filter)) {
            Ok(new_filter) => *layer = new_filter,
            Err(err) => {
                error!("Updating logger filter failed: {}", err);
            },
        };
    });
    if let Err(err) = result {
        error!("Updating logger filter failed: {}", err);
    }
    debug!(log_filter, "updated logger filter");
}
