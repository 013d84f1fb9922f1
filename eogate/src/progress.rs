//! Progress reporting for long-running operations.
//!
//! The library never prints. Deferred waits and byte transfers report through
//! a [`ProgressSink`] supplied by the caller; the CLI renders them as
//! spinners and progress bars.

use std::fmt;
use std::time::Duration;

use crate::deferred::OperationKind;

/// Bytes received so far for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub product: String,
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Percentage complete, when the total size is known.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.downloaded as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A deferred operation is not ready; the engine sleeps before polling again.
    Waiting {
        kind: OperationKind,
        provider: String,
        subject: String,
        attempt: u32,
        elapsed: Duration,
        retry_in: Duration,
        status: String,
    },
    /// A transfer started, resumed or advanced.
    Transfer(TransferProgress),
    /// A product was written to its final location.
    Completed { product: String, path: String },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting {
                kind,
                provider,
                subject,
                attempt,
                retry_in,
                status,
                ..
            } => write!(
                f,
                "[{}] {} {} not ready ({}), attempt {}: waiting {}s until next retry",
                provider,
                kind,
                subject,
                status,
                attempt,
                retry_in.as_secs()
            ),
            Self::Transfer(p) => match p.percent() {
                Some(pct) => write!(f, "{}: {} bytes ({:.1}%)", p.product, p.downloaded, pct),
                None => write!(f, "{}: {} bytes", p.product, p.downloaded),
            },
            Self::Completed { product, path } => write!(f, "{} saved to {}", product, path),
        }
    }
}

/// Receiver of progress events. Must be cheap; it is called inline.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_waiting_message_mentions_next_retry() {
        let event = ProgressEvent::Waiting {
            kind: OperationKind::DownloadOrder,
            provider: "cop_dataspace".to_string(),
            subject: "S1A_1".to_string(),
            attempt: 2,
            elapsed: Duration::from_secs(60),
            retry_in: Duration::from_secs(30),
            status: "order still pending".to_string(),
        };
        let text = event.to_string();
        assert!(text.contains("waiting 30s until next retry"));
        assert!(text.contains("S1A_1"));
    }

    #[test]
    fn test_closure_sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |e: &ProgressEvent| seen.lock().push(e.clone())
        };
        sink.on_event(&ProgressEvent::Transfer(TransferProgress {
            product: "p".to_string(),
            downloaded: 50,
            total: Some(200),
        }));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_percent() {
        let p = TransferProgress {
            product: "p".to_string(),
            downloaded: 50,
            total: Some(200),
        };
        assert_eq!(p.percent(), Some(25.0));
        let p = TransferProgress { total: None, ..p };
        assert_eq!(p.percent(), None);
    }
}
