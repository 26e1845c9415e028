//! Programmatic logging setup. A thin front end over `log` + `log4rs`, scoped to a single
//! rolling application log (no separate audit/metrics loggers — this engine has no multi-tenant
//! audit surface to justify them).

use std::path::{Path, PathBuf};

/// Initializes logging from the default `log4rs.yaml` in the working directory, if present.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let _ = log4rs::init_file("log4rs.yaml", log4rs::config::Deserializers::default());
    Ok(())
}

/// Initializes a rolling file logger under `{base}/{db_name}_logs/{db_name}.log`, rotating at
/// 10 MiB with 7 kept generations.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the logger fails to initialize.
pub fn init_for_db_in(base_dir: &Path, db_name: &str, level: &str) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::{
        CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
    };
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;
    use std::fs;

    let mut dir = PathBuf::from(base_dir);
    dir.push(format!("{db_name}_logs"));
    fs::create_dir_all(&dir)?;

    let log_path = dir.join(format!("{db_name}.log"));
    let roller =
        FixedWindowRoller::builder().build(&format!("{}", dir.join(format!("{db_name}.{{}}.log")).display()), 7)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}")))
        .build(log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(appender)))
        .build(Root::builder().appender("app").build(level_filter(level)))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Configures logging from environment variables, if set:
/// - `MDENGINE_LOG_DIR` — base directory for rolling logs (default: current directory)
/// - `MDENGINE_LOG_LEVEL` — error|warn|info|debug|trace (default: info)
/// - `MDENGINE_DB_NAME` — log file stem (default: "mdengine")
pub fn configure_from_env() {
    let dir = std::env::var("MDENGINE_LOG_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let level = std::env::var("MDENGINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    let db_name = std::env::var("MDENGINE_DB_NAME").unwrap_or_else(|_| "mdengine".to_owned());
    let _ = init_for_db_in(&dir, &db_name, &level);
}

fn level_filter(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}
