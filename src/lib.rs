#![allow(dead_code)]
#![allow(unused_imports)]

pub mod auth;
pub mod config;
pub mod inter;
pub mod school;
pub mod session;
pub mod store;
pub mod user;
pub mod valid;

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => { return LevelFilter::Warn; },
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// The current UTC instant as an RFC 3339 string, the form every stamp
/// in the data DB takes.
pub fn now_stamp() -> String {
    use time::format_description::well_known::Rfc3339;

    // Rfc3339 can render any OffsetDateTime, so this can't actually fail.
    time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn ensure_logging() {
        use simplelog::{TermLogger, TerminalMode, ColorChoice};
        let log_cfg = simplelog::ConfigBuilder::new()
            .add_filter_allow_str("portal")
            .build();
        let res = TermLogger::init(
            log_level_from_env(),
            log_cfg,
            TerminalMode::Stdout,
            ColorChoice::Auto
        );
        if res.is_ok() {
            log::info!("Logging started.");
        }
    }

    #[test]
    fn stamps_look_like_rfc_3339() {
        let stamp = now_stamp();
        // 2024-06-01T12:34:56.789Z, give or take the fractional part.
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], "T");
        assert!(stamp.ends_with('Z') || stamp.ends_with("+00:00"));
    }
}
