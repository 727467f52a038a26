use the_log_crate::SetLoggerError;

/// Attempt to init a env_logger for the collector.
/// Does nothing if the "builtin_env_logger" feature is disabled.
///
/// The logger is not installed automatically.  A runtime that has its own logger should leave
/// this alone; everything the collector logs goes through the `log` facade.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}
