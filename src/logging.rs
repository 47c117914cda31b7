use std::sync::Once;

use env_logger::{Builder, Env};
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Crate-specific filter variable, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "EASYSERVO_LOG";

/// Parse a user-supplied level name, ignoring case and unknown names.
pub fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Pick the filter source: explicit level, then `EASYSERVO_LOG` filters, then
/// `RUST_LOG` with an `info` default.
fn builder(level: Option<LevelFilter>, easyservo_log: Option<&str>) -> Builder {
    match (level, easyservo_log) {
        (Some(level), _) => {
            let mut builder = Builder::new();
            builder.filter_level(level);
            builder
        }
        (None, Some(filters)) => {
            let mut builder = Builder::new();
            builder.parse_filters(filters);
            builder
        }
        (None, None) => Builder::from_env(Env::default().default_filter_or("info")),
    }
}

/// Initialize stderr logging.
///
/// An explicit `level` wins over the environment, and `EASYSERVO_LOG` wins
/// over `RUST_LOG`. Only the first call installs the logger; later calls are
/// no-ops.
pub fn init_logging(level: Option<LevelFilter>) {
    RUST_LOG_ONCE.call_once(|| {
        let easyservo_log = std::env::var(LOG_ENV).ok();
        builder(level, easyservo_log.as_deref())
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .init();
    });
}
