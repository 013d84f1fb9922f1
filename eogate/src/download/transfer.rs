//! Streaming a payload to disk with resume.
//!
//! Bytes go to `<file>.part`, which is renamed once the stream ends. After an
//! interruption the next attempt asks for `Range: bytes=<offset>-`. A `206`
//! answer is appended to the partial file; a `200` means the server ignored
//! the range and the file is rewritten from zero. Servers that answered
//! without `accept-ranges: bytes` are not asked for ranges again.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{status_error, transport_error, HttpRequest};
use crate::plugins::{DownloadContext, TransferSource};
use crate::progress::{ProgressEvent, ProgressSink, TransferProgress};

const PART_SUFFIX: &str = ".part";

/// Path of the in-progress file for `destination`.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Streams `source` into `destination`, retrying interruptions.
///
/// Returns the number of bytes in the final file.
pub(crate) async fn transfer(
    ctx: &DownloadContext,
    source: &TransferSource,
    destination: &Path,
    product: &str,
    retry: &RetryPolicy,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> GatewayResult<u64> {
    let part = part_path(destination);
    let mut ranges_supported = None;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled {
                operation: format!("transfer of {}", product),
            }),
            outcome = attempt_once(ctx, source, &part, product, &mut ranges_supported, progress) => outcome,
        };
        match outcome {
            Ok(size) => {
                tokio::fs::rename(&part, destination)
                    .await
                    .map_err(|e| GatewayError::io(destination, e))?;
                info!(provider = %ctx.provider, product = %product, bytes = size, "Transfer complete");
                return Ok(size);
            }
            Err(e) if e.is_transient() => {
                let Some(delay) = retry.delay_for_attempt(attempt) else {
                    return Err(e);
                };
                warn!(
                    provider = %ctx.provider,
                    product = %product,
                    attempt,
                    error = %e,
                    "Transfer interrupted, retrying in {}ms",
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(GatewayError::Cancelled {
                            operation: format!("transfer of {}", product),
                        })
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

async fn attempt_once(
    ctx: &DownloadContext,
    source: &TransferSource,
    part: &Path,
    product: &str,
    ranges_supported: &mut Option<bool>,
    progress: &dyn ProgressSink,
) -> GatewayResult<u64> {
    let offset = match tokio::fs::metadata(part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    let mut request = ctx.credentials.apply(HttpRequest::get(source.url.clone()));
    let ask_range = offset > 0 && *ranges_supported != Some(false);
    if ask_range {
        request = request.with_header("Range", format!("bytes={}-", offset));
    }

    let stream = ctx
        .http
        .open(request)
        .await
        .map_err(|e| transport_error(&ctx.provider, Phase::Transfer, e))?;
    if !(200..300).contains(&stream.status) {
        if stream.status == 416 {
            // The partial file is not a prefix of the remote one any more.
            let _ = tokio::fs::remove_file(part).await;
            return Err(GatewayError::transient(
                &ctx.provider,
                Phase::Transfer,
                "requested range not satisfiable, restarting",
            ));
        }
        return Err(status_error(&ctx.provider, Phase::Transfer, stream.status, &source.url));
    }
    let accepts = stream
        .header("accept-ranges")
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    *ranges_supported = Some(accepts || stream.status == 206);

    let resumed = ask_range && stream.status == 206;
    let mut written = if resumed { offset } else { 0 };
    let total = source
        .size
        .or_else(|| stream.content_length().map(|len| len + written));
    if resumed {
        debug!(provider = %ctx.provider, product = %product, offset, "Resuming transfer");
    } else if offset > 0 {
        debug!(provider = %ctx.provider, product = %product, "Server ignored range, restarting");
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(resumed)
        .truncate(!resumed)
        .open(part)
        .await
        .map_err(|e| GatewayError::io(part, e))?;
    let mut body = stream.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| transport_error(&ctx.provider, Phase::Transfer, e))?;
        file.write_all(&chunk).await.map_err(|e| GatewayError::io(part, e))?;
        written += chunk.len() as u64;
        progress.on_event(&ProgressEvent::Transfer(TransferProgress {
            product: product.to_string(),
            downloaded: written,
            total,
        }));
    }
    file.flush().await.map_err(|e| GatewayError::io(part, e))?;

    if let Some(expected) = total {
        if written < expected {
            return Err(GatewayError::transient(
                &ctx.provider,
                Phase::Transfer,
                format!("stream ended after {} of {} bytes", written, expected),
            ));
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{MockHttpClient, MockReply};
    use crate::http::Method;
    use crate::progress::NoProgress;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    const URL: &str = "https://dl.example/p.zip";

    fn source(size: Option<u64>) -> TransferSource {
        TransferSource {
            url: URL.to_string(),
            checksum: None,
            file_name: "p.zip".to_string(),
            size,
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::fixed(3, Duration::from_millis(1))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl ProgressSink for Recorder {
        fn on_event(&self, event: &ProgressEvent) {
            if let ProgressEvent::Transfer(p) = event {
                self.0.lock().push(p.downloaded);
            }
        }
    }

    #[tokio::test]
    async fn test_plain_transfer_renames_part() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, URL, MockReply::bytes(200, "0123456789"));
        let ctx = DownloadContext::new("p", mock);
        let dest = dir.path().join("p.zip");
        let recorder = Recorder::default();

        let size = transfer(&ctx, &source(None), &dest, "p", &quick_retry(), &recorder, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert!(!part_path(&dest).exists());
        assert_eq!(*recorder.0.lock(), vec![4, 8, 10]);
    }

    #[tokio::test]
    async fn test_interrupted_transfer_resumes_with_range() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        let body = "0123456789";
        mock.on(
            Method::Get,
            URL,
            MockReply::bytes(200, body).with_header("accept-ranges", "bytes").truncated_after(6),
        );
        mock.always(Method::Get, URL, MockReply::bytes(200, body).with_header("accept-ranges", "bytes"));
        let ctx = DownloadContext::new("p", mock.clone());
        let dest = dir.path().join("p.zip");

        let size = transfer(&ctx, &source(Some(10)), &dest, "p", &quick_retry(), &NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), body.as_bytes());
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].header("range"), None);
        assert_eq!(calls[1].header("range"), Some("bytes=6-"));
    }

    #[tokio::test]
    async fn test_without_range_support_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        let body = "abcdefghij";
        mock.on(Method::Get, URL, MockReply::bytes(200, body).truncated_after(5));
        mock.always(Method::Get, URL, MockReply::bytes(200, body));
        let ctx = DownloadContext::new("p", mock.clone());
        let dest = dir.path().join("p.zip");

        transfer(&ctx, &source(Some(10)), &dest, "p", &quick_retry(), &NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), body.as_bytes());
        assert_eq!(mock.calls()[1].header("range"), None);
    }

    #[tokio::test]
    async fn test_existing_part_ignored_range_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("p.zip");
        std::fs::write(part_path(&dest), b"stale").unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, URL, MockReply::bytes(200, "fresh-content"));
        let ctx = DownloadContext::new("p", mock.clone());

        transfer(&ctx, &source(None), &dest, "p", &quick_retry(), &NoProgress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh-content");
        assert_eq!(mock.calls()[0].header("range"), Some("bytes=5-"));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, URL, MockReply::bytes(503, "busy"));
        let ctx = DownloadContext::new("p", mock.clone());
        let dest = dir.path().join("p.zip");

        let result = transfer(&ctx, &source(None), &dest, "p", &quick_retry(), &NoProgress, &CancellationToken::new()).await;
        assert!(matches!(result, Err(GatewayError::Provider { transient: true, .. })));
        assert_eq!(mock.calls().len(), 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, URL, MockReply::bytes(404, "gone"));
        let ctx = DownloadContext::new("p", mock.clone());
        let dest = dir.path().join("p.zip");

        let result = transfer(&ctx, &source(None), &dest, "p", &quick_retry(), &NoProgress, &CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(mock.calls().len(), 1);
    }
}
