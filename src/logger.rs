use chrono::Local;
use log::LevelFilter;
use std::io::Write;

/// Map a `-v` count to a level: 0 errors only, up to 3+ for debug.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install a stderr logger. `RUST_LOG` overrides `verbosity`; calling this
/// more than once keeps the first logger.
pub fn init(verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_for(verbosity))
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - [{}] [{}:{}] | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("panorama_stitcher"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}
