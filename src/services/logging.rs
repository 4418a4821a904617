use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Registry,
};

const DEFAULT_DIRECTIVES: &str = "ollama_kit=debug";

/// `RUST_LOG` when set, otherwise warnings plus this crate's debug output.
fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(tracing::Level::WARN.into())
            .parse_lossy(DEFAULT_DIRECTIVES)
    })
}

/// Installs a human-readable subscriber that also reports span durations.
pub fn init_default_tracing() -> Result<(), TryInitError> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    Registry::default().with(default_filter()).with(fmt_layer).try_init()
}

/// Installs a subscriber writing one JSON object per event, for log shippers.
pub fn init_json_tracing() -> Result<(), TryInitError> {
    let fmt_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_current_span(true);

    Registry::default().with(default_filter()).with(fmt_layer).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_reported() {
        // whichever runs first wins; the other must fail instead of panicking
        let first = init_default_tracing();
        let second = init_json_tracing();
        assert!(first.is_err() || second.is_err());
        assert!(init_default_tracing().is_err());
    }
}
