//! stderr logger for the sidecar: `HH:MM:SS  LEVEL  target  message`, local clock.

use std::io::Write;

use log::LevelFilter;
use time::OffsetDateTime;
use time::macros::format_description;

const TARGET_PREFIX: &str = "tiny_mp3::";

fn clock(now: OffsetDateTime) -> String {
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "??:??:??".into())
}

/// Local time; UTC when the local offset cannot be determined.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub(crate) fn short_target(target: &str) -> &str {
    target.strip_prefix(TARGET_PREFIX).unwrap_or(target)
}

fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs the logger once; later calls are ignored. `RUST_LOG` overrides the level.
pub fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level())
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{}  {style}{:5}{style:#}  {}  {}",
                clock(now()),
                record.level(),
                short_target(record.target()),
                record.args()
            )
        });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}
