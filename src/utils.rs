// Third Party
use tracing::{subscriber::SetGlobalDefaultError, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;

/// Build the JSON subscriber used for all output: one JSON object per line, event fields
/// flattened to the top level.
pub fn json_subscriber<W>(level: Level, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_max_level(level)
        .with_writer(writer)
        .finish()
}

/// Install the process-wide subscriber writing to stdout. Call once, before anything logs.
pub fn init_tracing(level: Level) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(json_subscriber(level, std::io::stdout))
}


#[cfg(test)]
mod tests {
    // Third Party
    use serial_test::serial;
    use tracing::{debug, info, Level};

    // Local
    use super::capture::LogCapture;

    #[test]
    #[serial]
    fn test_one_json_object_per_line() {
        let capture = LogCapture::default();
        {
            let _guard = capture.install(Level::INFO);
            info!(reason = "Scheduled", "first");
            info!("second");
        }
        let lines = capture.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[0]["reason"], "Scheduled");
        assert_eq!(lines[1]["message"], "second");
    }

    #[test]
    #[serial]
    fn test_level_gates_debug() {
        let capture = LogCapture::default();
        {
            let _guard = capture.install(Level::INFO);
            debug!("hidden");
        }
        assert!(capture.lines().is_empty());

        let capture = LogCapture::default();
        {
            let _guard = capture.install(Level::DEBUG);
            debug!("shown");
        }
        assert_eq!(capture.lines().len(), 1);
    }
}
