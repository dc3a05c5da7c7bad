//! Logger initialization — grounded in the teacher's `env_logger::init()`
//! one-liner (`src/bin/shell.rs`), extended to honor `-v`/`-f` from the CLI
//! instead of only `RUST_LOG`.

use crate::config::Config;

/// Build and install the process-wide logger. `-v` raises the default
/// filter to `debug`; `-f {0..3}` layers a per-module override onto the
/// modem-facing modules only, matching the source's separate "app verbose"
/// vs "modem verbosity" knobs. `RUST_LOG`, if set, still wins per
/// `env_logger`'s normal precedence — this only supplies the default.
pub fn init(cfg: &Config) {
    let default_level = if cfg.verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    );
    if cfg.modem_verbosity > 0 {
        let modem_level = match cfg.modem_verbosity {
            1 => "warn",
            2 => "info",
            _ => "debug",
        };
        builder.filter_module("hermes::modem", log_level_filter(modem_level));
    }
    let _ = builder.try_init();
}

fn log_level_filter(s: &str) -> log::LevelFilter {
    s.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_filter_parses_known_levels() {
        assert_eq!(log_level_filter("debug"), log::LevelFilter::Debug);
        assert_eq!(log_level_filter("warn"), log::LevelFilter::Warn);
        assert_eq!(log_level_filter("bogus"), log::LevelFilter::Info);
    }
}
