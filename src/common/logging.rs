//! Logging and tracing configuration
//!
//! Diagnostic logs go to stderr so that test results printed on stdout
//! stay machine-readable (e.g. with `--output json`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Verbosity requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_flags(debug: bool, trace: bool) -> Self {
        if trace {
            Verbosity::Trace
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Normal => "wafprobe=info,warn",
            Verbosity::Debug => "wafprobe=debug,info",
            Verbosity::Trace => "wafprobe=trace,info",
        }
    }
}

/// Initialize tracing for the CLI (stderr logging)
///
/// `RUST_LOG` wins when set; otherwise the filter follows `verbosity`.
pub fn init_cli(verbosity: Verbosity) {
    let filter = match verbosity {
        Verbosity::Normal => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter())),
        _ => EnvFilter::new(verbosity.default_filter()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
