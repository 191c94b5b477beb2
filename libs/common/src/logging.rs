//! Console logging for services
//!
//! Output format: `timestamp [LEVEL] message`, with the level colored when
//! ANSI is enabled. `RUST_LOG` overrides the configured level.

use std::error::Error;

use tracing::Level;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    EnvFilter,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809123Z [INFO] Modbus server listening`
pub struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Build the level filter: `RUST_LOG` when set and valid, otherwise `level`
///
/// `level` is a plain level ("debug") or a full directive
/// ("info,modbus_core=debug").
pub fn build_filter(level: &str) -> Result<EnvFilter, Box<dyn Error + Send + Sync>> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e).into())
}

/// Install the global console subscriber
///
/// Fails if a global subscriber is already set or `level` does not parse.
pub fn init_logging(level: &str, ansi: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = build_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .event_format(BracketedLevelFormat)
        .try_init()
}

/// HTTP request logging middleware
///
/// Modifying methods are logged at INFO, everything else at DEBUG, under the
/// `api_access` target.
///
/// ```ignore
/// use axum::{middleware, Router};
/// use common::logging::http_request_logger;
///
/// let app = Router::new()
///     // ... routes ...
///     .layer(middleware::from_fn(http_request_logger))
///     .with_state(state);
/// ```
#[cfg(feature = "axum")]
pub async fn http_request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use std::time::Instant;
    use tracing::{debug, info};

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    if matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
        info!(
            target: "api_access",
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    } else {
        debug!(
            target: "api_access",
            method = %method,
            path = %uri.path(),
            query = %uri.query().unwrap_or("-"),
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    }

    response
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl CaptureWriter {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture<F: FnOnce()>(ansi: bool, f: F) -> String {
        let writer = CaptureWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer.clone())
            .with_ansi(ansi)
            .with_max_level(Level::DEBUG)
            .event_format(BracketedLevelFormat)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        writer.contents()
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_bracketed_plain_output() {
        let out = capture(false, || tracing::warn!("FC={:02X} rejected", 0x99));
        let line = out.lines().next().unwrap();
        let (timestamp, rest) = line.split_once(' ').unwrap();
        assert!(timestamp.ends_with('Z'));
        assert_eq!(rest, "[WARN] FC=99 rejected");
    }

    #[test]
    fn test_bracketed_ansi_output() {
        let out = capture(true, || tracing::info!("listening"));
        assert!(out.contains("\x1b[32m[INFO]\x1b[0m"));
    }

    #[test]
    fn test_trace_filtered_by_max_level() {
        let out = capture(false, || tracing::trace!("hidden"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("info,modbus_core=trace").is_ok());
    }

    #[cfg(feature = "axum")]
    #[tokio::test]
    async fn test_http_request_logger_passes_response_through() {
        use axum::{body::Body, http::Request, middleware, routing::get, Router};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn(http_request_logger));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
