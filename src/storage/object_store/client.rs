//! Object store HTTP client

use chrono::Utc;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST,
};
use reqwest::{Client, Method, Response, StatusCode, Url};

use super::signer::Signer;
use crate::error::{AppError, Result};
use crate::storage::http::{check_status, classify_status, response_stream, stream_body};
use crate::storage::ByteStream;

/// Validity of the signature on each API request.
const REQUEST_SIGNATURE_SECONDS: u32 = 7200;

const COPY_SOURCE: HeaderName = HeaderName::from_static("x-cos-copy-source");

/// Signed client for one bucket
#[derive(Debug, Clone)]
pub struct ObjectStoreClient {
    secret_id: String,
    secret_key: String,
    endpoint: Url,
    http: Client,
}

impl ObjectStoreClient {
    pub fn new(
        endpoint: &str,
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        http: Client,
    ) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| AppError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(AppError::InvalidUrl(endpoint.to_string()));
        }
        Ok(Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            endpoint,
            http,
        })
    }

    /// `host[:port]` as sent in the Host header.
    pub fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// `/`-prefixed, percent-encoded path of an object key.
    pub fn path_from_key(&self, key: &str) -> String {
        let encoded = urlencoding::encode(key.trim_start_matches('/')).replace("%2F", "/");
        let base = self.endpoint.path().trim_end_matches('/');
        format!("{}/{}", base, encoded)
    }

    pub fn url_from_path(&self, path: &str) -> String {
        format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            path
        )
    }

    fn common_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.host())?);
        let now = Utc::now().format("%a, %d %b %Y %T GMT").to_string();
        headers.insert(DATE, header_value(&now)?);
        Ok(headers)
    }

    /// Sign `headers` for `method path` and add the Authorization header.
    fn authorize(&self, method: &Method, path: &str, mut headers: HeaderMap) -> Result<HeaderMap> {
        let signature = Signer::new(method.as_str(), path, Some(&headers), None).signature(
            &self.secret_id,
            &self.secret_key,
            REQUEST_SIGNATURE_SECONDS,
        )?;
        headers.insert(AUTHORIZATION, header_value(&signature)?);
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        extra: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<Response> {
        let path = self.path_from_key(key);
        let mut headers = self.common_headers()?;
        headers.extend(extra);
        let headers = self.authorize(&method, &path, headers)?;

        let mut req = self
            .http
            .request(method, self.url_from_path(&path))
            .headers(headers);
        if let Some(body) = body {
            req = req.body(body);
        }
        req.send().await.map_err(transport_error)
    }

    /// Size of the object, `None` when the store answers 404/410.
    pub async fn head_object(&self, key: &str) -> Result<Option<u64>> {
        let resp = self.send(Method::HEAD, key, HeaderMap::new(), None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status => match classify_status(status, key) {
                Some(error) => Err(error),
                None => Ok(Some(content_length(&resp).unwrap_or(0))),
            },
        }
    }

    pub async fn get_object(&self, key: &str) -> Result<ByteStream> {
        let resp = self.send(Method::GET, key, HeaderMap::new(), None).await?;
        let resp = check_status(resp, key)?;
        Ok(response_stream(resp))
    }

    pub async fn put_object(
        &self,
        key: &str,
        data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        let resp = self
            .send(Method::PUT, key, headers, Some(stream_body(data)))
            .await?;
        check_status(resp, key)?;
        Ok(())
    }

    /// Server-side copy of `from` to `to`.
    pub async fn copy_object(&self, from: &str, to: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        let source = format!("{}{}", self.host(), self.path_from_key(from));
        headers.insert(COPY_SOURCE, header_value(&source)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
        let resp = self.send(Method::PUT, to, headers, None).await?;
        check_status(resp, from)?;
        Ok(())
    }

    /// Delete an object; deleting something absent succeeds.
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let resp = self.send(Method::DELETE, key, HeaderMap::new(), None).await?;
        match check_status(resp, key) {
            Ok(_) | Err(AppError::RemoteGone(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Presigned GET URL valid for `expire_seconds`.
    ///
    /// Reference: https://cloud.tencent.com/document/product/436/35153
    pub fn presigned_url(&self, key: &str, expire_seconds: u32) -> Result<String> {
        let path = self.path_from_key(key);
        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&self.host())?);
        let signature = Signer::new("get", &path, Some(&headers), None).signature(
            &self.secret_id,
            &self.secret_key,
            expire_seconds,
        )?;
        Ok(format!("{}?{}", self.url_from_path(&path), signature))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::InvalidKey(format!("{}: {}", value, e)))
}

fn content_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_builder() {
        AppError::InvalidUrl(e.to_string())
    } else {
        AppError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> ObjectStoreClient {
        ObjectStoreClient::new(endpoint, "id", "key", Client::new()).unwrap()
    }

    #[test]
    fn test_host_keeps_port() {
        let c = client("https://files-1250000000.cos.ap-guangzhou.myqcloud.com");
        assert_eq!(c.host(), "files-1250000000.cos.ap-guangzhou.myqcloud.com");
        assert_eq!(client("http://127.0.0.1:9000").host(), "127.0.0.1:9000");
    }

    #[test]
    fn test_path_from_key() {
        let c = client("http://127.0.0.1:9000");
        assert_eq!(c.path_from_key("42/report.pdf"), "/42/report.pdf");
        assert_eq!(c.path_from_key("/42/my report.pdf"), "/42/my%20report.pdf");
        assert_eq!(
            c.url_from_path(&c.path_from_key("42/a.txt")),
            "http://127.0.0.1:9000/42/a.txt"
        );
    }

    #[test]
    fn test_presigned_url() {
        let c = client("https://bucket.cos.ap-guangzhou.myqcloud.com");
        let url = c.presigned_url("42/report.pdf", 600).unwrap();
        assert!(url.starts_with(
            "https://bucket.cos.ap-guangzhou.myqcloud.com/42/report.pdf?q-sign-algorithm=sha1"
        ));
        assert!(url.contains("q-header-list=host"));
    }

    #[test]
    fn test_rejects_endpoint_without_host() {
        assert!(ObjectStoreClient::new("not a url", "id", "key", Client::new()).is_err());
    }
}
