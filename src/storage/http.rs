//! HTTP plumbing shared by the remote backends.

use futures_util::TryStreamExt;
use reqwest::{Body, Client, Response, StatusCode};
use std::time::Duration;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::config::TransportConfig;
use crate::error::{AppError, Result};
use crate::storage::ByteStream;

/// Build the client a backend keeps for its whole life.
pub fn build_client(transport: &TransportConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(transport.timeout_seconds))
        .connect_timeout(Duration::from_secs(transport.connect_timeout_seconds))
        .build()?;
    Ok(client)
}

/// Upgrade protocol-relative URLs (`//host/path`) to https.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

/// Map a failed status to the error taxonomy; `None` for success.
///
/// 404 and 410 mean the object is gone and are never retried. 408, 429 and
/// 5xx are transport trouble and may be retried. Any other 4xx is a
/// permanent rejection.
pub fn classify_status(status: StatusCode, what: &str) -> Option<AppError> {
    if status.is_success() {
        return None;
    }
    let error = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => AppError::RemoteGone(what.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            AppError::Transport(format!("{}: {}", what, status))
        }
        s if s.is_server_error() => AppError::Transport(format!("{}: {}", what, status)),
        s if s.is_redirection() => AppError::Transport(format!("{}: unexpected {}", what, status)),
        _ => AppError::RemoteRejected(format!("{}: {}", what, status)),
    };
    Some(error)
}

/// Turn a non-success response into an error.
pub fn check_status(resp: Response, what: &str) -> Result<Response> {
    match classify_status(resp.status(), what) {
        Some(error) => Err(error),
        None => Ok(resp),
    }
}

/// Expose a response body as a byte stream without buffering it.
pub fn response_stream(resp: Response) -> ByteStream {
    let body = Box::pin(
        resp.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );
    Box::pin(StreamReader::new(body))
}

/// Turn a byte stream into a request body without buffering it.
pub fn stream_body(stream: ByteStream) -> Body {
    Body::wrap_stream(ReaderStream::new(stream))
}

/// GET a URL and stream its body.
pub async fn download_remote_to_stream(client: &Client, url: &str) -> Result<ByteStream> {
    let url = normalize_url(url);
    let resp = client.get(&url).send().await?;
    let resp = check_status(resp, &url)?;
    Ok(response_stream(resp))
}
