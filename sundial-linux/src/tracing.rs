//! Logging setup: the protocol library logs through the `log` facade, the
//! daemon renders everything with `tracing-subscriber`.

/// Install the global subscriber and the `log` bridge.
///
/// The subscriber itself passes everything through; filtering happens on the
/// `log` side so that a signal handler can raise the level at runtime with
/// [`log::set_max_level`].
pub fn setup_logger(level: log::LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::level_filters::LevelFilter::TRACE)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    log::set_max_level(level);
    Ok(())
}
