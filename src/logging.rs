use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "bais_gateway_lib=info,bais_gateway=info,tower_http=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt().with_target(false).with_env_filter(filter).init();
}
