//! Request-scoped correlation ids for log lines.
//!
//! Every inbound request gets a short random id. The handler future runs inside
//! [`RequestId::scope`], which stores the id in a Tokio task-local, so the id
//! follows that request across `.await` points no matter which worker thread
//! polls it or how many other requests are interleaved.

use std::fmt;
use std::future::Future;
use std::sync::OnceLock;

use tracing::{warn, Event, Instrument, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::LogConfig;

pub const REQUEST_ID_LEN: usize = 4;
pub const NO_REQUEST_ID: &str = "NoID";

tokio::task_local! {
    static REQUEST_ID: RequestId;
}

static INSTALLED: OnceLock<String> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(REQUEST_ID_LEN);
        RequestId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Runs `fut` with this id as the current request id.
    pub async fn scope<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        let span = tracing::info_span!("request", id = %self.0);
        REQUEST_ID.scope(self.clone(), fut.instrument(span)).await
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The id of the request currently being handled, if any.
pub fn current_request_id() -> Option<RequestId> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// `<timestamp> [<LEVEL>] <id>: <message> <fields>`
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationFormat {
    with_timestamp: bool,
}

impl CorrelationFormat {
    pub fn new() -> Self {
        CorrelationFormat {
            with_timestamp: true,
        }
    }

    pub fn without_timestamp(self) -> Self {
        CorrelationFormat {
            with_timestamp: false,
        }
    }
}

impl<S, N> FormatEvent<S, N> for CorrelationFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if self.with_timestamp {
            write!(
                writer,
                "{} ",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f")
            )?;
        }
        let id = current_request_id();
        write!(
            writer,
            "[{}] {}: ",
            event.metadata().level(),
            id.as_ref().map(RequestId::as_str).unwrap_or(NO_REQUEST_ID)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber for `name`.
///
/// Only the first call installs anything. Later calls leave the existing
/// subscriber in place and return `false`.
pub fn init(name: &str, config: &LogConfig) -> bool {
    if let Some(existing) = INSTALLED.get() {
        warn!(
            "Logger '{}' already exists (installed as '{}'), skipping creating new logger",
            name, existing
        );
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().event_format(CorrelationFormat::new()))
            .try_init()
    };

    match installed {
        Ok(()) => {
            let _ = INSTALLED.set(name.to_string());
            tracing::debug!("created logger {}", name);
            true
        }
        Err(_) => {
            warn!("Logger '{}' already exists, skipping creating new logger", name);
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{capturing_subscriber, Capture};
    use super::*;
    use tracing::info;

    #[test]
    fn generated_ids_are_short() {
        let id = RequestId::generate();
        assert_eq!(id.as_str().len(), REQUEST_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn id_is_only_visible_inside_scope() {
        assert!(current_request_id().is_none());
        let id = RequestId::generate();
        let seen = id.scope(async { current_request_id() }).await;
        assert_eq!(seen, Some(id));
        assert!(current_request_id().is_none());
    }

    #[test]
    fn lines_outside_a_request_use_placeholder() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capturing_subscriber(capture.clone()), || {
            info!("startup");
        });
        assert_eq!(capture.lines(), vec!["[INFO] NoID: startup".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_requests_keep_their_own_ids() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(capturing_subscriber(capture.clone()));

        let first = RequestId("aaaa".to_string());
        let second = RequestId("bbbb".to_string());

        let handle = |id: RequestId, label: &'static str| async move {
            id.scope(async move {
                for step in 0..3 {
                    info!("{} step {}", label, step);
                    tokio::task::yield_now().await;
                }
            })
            .await
        };

        tokio::join!(handle(first, "first"), handle(second, "second"));

        let lines = capture.lines();
        assert_eq!(lines.len(), 6);
        // the two handlers interleave on the same task
        assert!(lines[0].contains("first") && lines[1].contains("second"));
        for line in &lines {
            if line.contains("first") {
                assert!(line.starts_with("[INFO] aaaa:"), "{}", line);
            } else {
                assert!(line.starts_with("[INFO] bbbb:"), "{}", line);
            }
        }
    }

    #[test]
    fn second_init_is_a_no_op() {
        let config = LogConfig {
            level: "info".to_string(),
            json: false,
        };
        let _ = init("first", &config);
        assert!(!init("second", &config));
    }
}
