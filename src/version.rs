/// Reported by `--version` and at startup. Release builds stamp it through `POLLER_VERSION`.
pub const VERSION: &str = match option_env!("POLLER_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
