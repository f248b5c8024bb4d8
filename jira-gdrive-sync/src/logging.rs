use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info";
const VERBOSE_FILTER: &str = "info,jira_gdrive_sync=debug,gdrive_core=debug,jira_core=debug";

/// `RUST_LOG` wins unless `verbose` is set.
pub fn filter_for(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the process-wide subscriber. Repeated calls are ignored.
pub fn init_logging(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbose, rust_log.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
