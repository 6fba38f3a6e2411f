//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the default filter is `info`, or
//! `debug` for this crate when `--verbose` is passed.

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(verbose: bool) {
    let default = if verbose { "info,chess_vision=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // a second init is a no-op
    let _ = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::Uptime::default())
        .with_writer(std::io::stderr)
        .finish()
        .try_init();
}
