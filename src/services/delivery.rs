//! How a file's bytes reach a client.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use std::fmt;
use tokio_util::io::ReaderStream;

use crate::storage::ByteStream;

/// Either a redirect to a backend's public URL or the bytes themselves
pub enum Delivery {
    Redirect(String),
    Stream {
        stream: ByteStream,
        mimetype: Option<String>,
        filename: Option<String>,
        size: Option<u64>,
    },
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
            Delivery::Stream {
                mimetype,
                filename,
                size,
                ..
            } => f
                .debug_struct("Stream")
                .field("mimetype", mimetype)
                .field("filename", filename)
                .field("size", size)
                .finish(),
        }
    }
}

fn content_disposition(filename: &str) -> String {
    let fallback_name = filename.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(filename);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_name, encoded_name
    )
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        match self {
            Delivery::Redirect(url) => Redirect::temporary(&url).into_response(),
            Delivery::Stream {
                stream,
                mimetype,
                filename,
                size,
            } => {
                let content_type =
                    mimetype.unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());

                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type);
                if let Some(size) = size {
                    builder = builder.header(header::CONTENT_LENGTH, size);
                }
                if let Some(name) = filename.as_deref().filter(|n| !n.is_empty()) {
                    builder = builder.header(header::CONTENT_DISPOSITION, content_disposition(name));
                }

                builder
                    .body(Body::from_stream(ReaderStream::new(stream)))
                    .unwrap_or_else(|e| {
                        tracing::error!("Failed to build response: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    })
            }
        }
    }
}
