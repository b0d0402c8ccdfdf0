use log::LevelFilter;

/// Inits logging for host. Per-module filters can be added through
/// `RUST_LOG`; calling this again only updates the maximum level.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter(None, level)
        .parse_default_env()
        .is_test(cfg!(test))
        .try_init()
        .ok();
    log::set_max_level(level)
}
