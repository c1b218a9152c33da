/// log4rs setup
///
use anyhow::Result;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

pub const LOG_PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l})} {T} {t} - {m}{n}";

/// console logging at `level`.  fails if a logger is already installed.
pub fn init(level: LevelFilter) -> Result<()> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?;

    log4rs::init_config(config)?;

    Ok(())
}

/// load a log4rs yaml config
pub fn init_file<P: AsRef<Path>>(path: P) -> Result<()> {
    log4rs::init_file(path, Default::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_reported() {
        // the first call may lose the race with another test's logger
        let _ = init(LevelFilter::Info);
        assert!(init(LevelFilter::Debug).is_err());
    }

    #[test]
    fn missing_config_file() {
        assert!(init_file("/no/such/log4rs.yaml").is_err());
    }
}
