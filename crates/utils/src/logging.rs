use tracing_subscriber::{EnvFilter, prelude::*};

/// Crates whose log level follows `RUST_LOG`; everything else stays at `warn`.
const WORKSPACE_CRATES: &[&str] = &["realtime", "utils", "push_listener"];

/// Builds the filter directive string, e.g. `warn,realtime=info,utils=info,...`.
pub fn filter_directives(level: &str) -> String {
    let mut directives = String::from("warn");
    for krate in WORKSPACE_CRATES {
        directives.push(',');
        directives.push_str(krate);
        directives.push('=');
        directives.push_str(level);
    }
    directives
}

/// Install the global tracing subscriber. Call once from a binary's `main`.
pub fn init_tracing() -> Result<(), tracing_subscriber::filter::ParseError> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let directives = filter_directives(&log_level);
    let fmt_filter = EnvFilter::try_new(&directives)?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(fmt_filter))
        .init();
    tracing::debug!(filter = %directives, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_scope_level_to_workspace_crates() {
        assert_eq!(
            filter_directives("debug"),
            "warn,realtime=debug,utils=debug,push_listener=debug"
        );
    }

    #[test]
    fn directives_parse_as_env_filter() {
        assert!(EnvFilter::try_new(filter_directives("trace")).is_ok());
    }
}
