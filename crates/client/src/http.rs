//! HTTP bindings for the upload service.
//!
//! Async client using `reqwest`. The bearer token is attached per request
//! from the caller's [`Credential`], never stored on the client.

use std::path::Path;

use bytes::Bytes;
use chunkup_protocol::constants::{
    CHUNK_FIELD, DEFAULT_BASE_URL, DOWNLOAD_PATH, INIT_UPLOAD_PATH, LOGIN_PATH, STATUS_PATH,
    UPLOAD_CHUNK_PATH,
};
use chunkup_protocol::{
    ChunkAck, ErrorBody, FileMetadata, InitUploadResponse, LoginResponse, content_range,
};
use futures_util::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{BoxFuture, ChunkUpload, ProgressFn, UploadApi};
use crate::error::ClientError;
use crate::session::Credential;

/// Granularity of upload progress reports.
const PROGRESS_SLICE: usize = 64 * 1024;

/// Characters escaped when a file id is used as a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Upload service client.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Creates a client for the service at `config.base_url`.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chunkup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn file_url(&self, path: &str, file_id: &str) -> String {
        let encoded = utf8_percent_encode(file_id, PATH_SEGMENT);
        format!("{}{}/{}", self.base_url, path, encoded)
    }

    /// `POST /login` with a form-encoded body.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, ClientError> {
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let body: LoginResponse = read_json(check_status(resp).await?).await?;

        if body.access_token.is_empty() {
            return Err(ClientError::InvalidCredential);
        }
        info!(username, "logged in");
        Ok(Credential::new(body.access_token, username))
    }

    /// `POST /init_upload?file_id=…&total_size=…`.
    pub async fn init_upload(
        &self,
        credential: &Credential,
        file_id: &str,
        total_bytes: u64,
    ) -> Result<FileMetadata, ClientError> {
        let total = total_bytes.to_string();
        let resp = self
            .http
            .post(self.url(INIT_UPLOAD_PATH))
            .query(&[("file_id", file_id), ("total_size", total.as_str())])
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await?;
        let body: InitUploadResponse = read_json(check_status(resp).await?).await?;
        debug!(file_id, total_bytes, "upload registered");
        Ok(body.metadata)
    }

    /// `POST /upload_chunk?file_id=…` with a `Content-Range` header and a
    /// multipart body.
    pub async fn send_chunk(
        &self,
        credential: &Credential,
        chunk: ChunkUpload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<ChunkAck, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let len = chunk.data.len() as u64;
        let part = Part::stream_with_length(progress_body(chunk.data, progress), len)
            .file_name(chunk.file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part(CHUNK_FIELD, part);

        let request = self
            .http
            .post(self.url(UPLOAD_CHUNK_PATH))
            .query(&[("file_id", chunk.file_id.as_str())])
            .header(AUTHORIZATION, credential.bearer())
            .header(
                CONTENT_RANGE,
                content_range(chunk.range.start, chunk.range.end, chunk.total_bytes),
            )
            .multipart(form);

        // Dropping the request future aborts the transfer.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(file_id = %chunk.file_id, range = %chunk.range, "chunk cancelled");
                Err(ClientError::Cancelled)
            }
            result = async {
                let resp = request.send().await?;
                read_json::<ChunkAck>(check_status(resp).await?).await
            } => result,
        }
    }

    /// `GET /status/{file_id}`; a 404 means the id is unknown.
    pub async fn status(
        &self,
        credential: &Credential,
        file_id: &str,
    ) -> Result<Option<FileMetadata>, ClientError> {
        let resp = self
            .http
            .get(self.file_url(STATUS_PATH, file_id))
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await?;

        match check_status(resp).await {
            Ok(resp) => Ok(Some(read_json(resp).await?)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `GET /download/{file_id}` streamed into `dest`.
    ///
    /// If `dest` already holds a prefix of the file, only the rest is
    /// requested and appended.
    pub async fn download(&self, file_id: &str, dest: &Path) -> Result<u64, ClientError> {
        let existing = match tokio::fs::metadata(dest).await {
            Ok(m) if m.is_file() => m.len(),
            _ => 0,
        };

        let mut request = self.http.get(self.file_url(DOWNLOAD_PATH, file_id));
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        let resp = request.send().await?;

        if existing > 0 && resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(file_id, existing, "download already complete");
            return Ok(existing);
        }
        let resp = check_status(resp).await?;

        let append = existing > 0 && resp.status() == StatusCode::PARTIAL_CONTENT;
        let mut file = if append {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(dest)
                .await?
        } else {
            tokio::fs::File::create(dest).await?
        };

        let mut written = if append { existing } else { 0 };
        let mut stream = resp.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            file.write_all(&piece).await?;
            written += piece.len() as u64;
        }
        file.flush().await?;

        info!(file_id, bytes = written, resumed = append, "download finished");
        Ok(written)
    }
}

impl UploadApi for HttpClient {
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Credential, ClientError>> {
        Box::pin(self.login(username, password))
    }

    fn begin_transfer<'a>(
        &'a self,
        credential: &'a Credential,
        file_id: &'a str,
        total_bytes: u64,
    ) -> BoxFuture<'a, Result<FileMetadata, ClientError>> {
        Box::pin(self.init_upload(credential, file_id, total_bytes))
    }

    fn upload_chunk<'a>(
        &'a self,
        credential: &'a Credential,
        chunk: ChunkUpload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ChunkAck, ClientError>> {
        Box::pin(self.send_chunk(credential, chunk, progress, cancel))
    }

    fn query_status<'a>(
        &'a self,
        credential: &'a Credential,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FileMetadata>, ClientError>> {
        Box::pin(self.status(credential, file_id))
    }

    fn fetch_file<'a>(
        &'a self,
        file_id: &'a str,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, ClientError>> {
        Box::pin(self.download(file_id, dest))
    }
}

/// Wraps chunk bytes in a streaming body that reports cumulative progress
/// as each slice is handed to the connection.
fn progress_body(data: Bytes, progress: ProgressFn) -> Body {
    let total = data.len();
    let slices: Vec<Bytes> = (0..total)
        .step_by(PROGRESS_SLICE)
        .map(|start| data.slice(start..(start + PROGRESS_SLICE).min(total)))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(slices.into_iter().map(move |slice| {
        sent += slice.len() as u64;
        progress(sent);
        Ok::<Bytes, std::io::Error>(slice)
    }));
    Body::wrap_stream(stream)
}

/// Maps non-2xx responses to [`ClientError`], keeping the server's message.
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let reason = status.canonical_reason().unwrap_or("request failed");
    let body = resp.bytes().await.unwrap_or_default();
    let message = ErrorBody::parse(&body).describe(reason);

    Err(match status {
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        _ => ClientError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

async fn read_json<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, ClientError> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chunkup_protocol::FileStatus;
    use chunkup_transfer::ChunkRange;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one HTTP/1.1 request (headers plus a sized or chunked body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 8192];

        let header_end = loop {
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                return String::from_utf8_lossy(&buf).into_owned();
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        let chunked = head.contains("transfer-encoding: chunked");

        loop {
            let done = match content_length {
                Some(len) => buf.len() >= header_end + len,
                None if chunked => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if done {
                break;
            }
            let n = stream.read(&mut tmp).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
        }

        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Starts a mock HTTP server that answers one request and returns the
    /// raw request text through the join handle.
    async fn mock_server(status: u16, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;

            let resp = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes()).await;
            let _ = stream.shutdown().await;
            request
        });

        (url, handle)
    }

    /// Starts a mock HTTP server that reads the request and never answers.
    async fn hanging_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = read_request(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        });

        (format!("http://127.0.0.1:{port}"), handle)
    }

    fn client(url: String) -> HttpClient {
        HttpClient::new(&ClientConfig { base_url: url }).unwrap()
    }

    fn credential() -> Credential {
        Credential::new("tok-123", "admin")
    }

    fn chunk(data: Vec<u8>, start: u64, total: u64) -> ChunkUpload {
        let end = start + data.len() as u64;
        ChunkUpload {
            file_id: "file-1".into(),
            file_name: "video.mp4".into(),
            range: ChunkRange::new(start, end),
            total_bytes: total,
            data: Bytes::from(data),
        }
    }

    fn no_progress() -> ProgressFn {
        Arc::new(|_| {})
    }

    const METADATA_JSON: &str = r#"{"file_id":"file-1","status":"partial","received_bytes":1048576,
        "total_bytes":2500000,"next_expected_byte":1048576,"checksum":0,
        "last_updated":"2024-05-01T10:00:00Z"}"#;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = client("http://example.com/".into());
        assert_eq!(c.base_url(), "http://example.com");
        assert_eq!(c.file_url(STATUS_PATH, "a b"), "http://example.com/status/a%20b");
    }

    #[tokio::test]
    async fn login_returns_credential() {
        let (url, handle) =
            mock_server(200, r#"{"access_token":"jwt-abc","token_type":"bearer"}"#).await;

        let cred = client(url).login("admin", "secret").await.unwrap();
        assert_eq!(cred.token, "jwt-abc");
        assert_eq!(cred.username, "admin");

        let request = handle.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /login"));
        assert!(lower.contains("content-type: application/x-www-form-urlencoded"));
        assert!(request.contains("username=admin&password=secret"));
    }

    #[tokio::test]
    async fn login_rejected() {
        let (url, handle) =
            mock_server(401, r#"{"error":"Invalid username or password"}"#).await;

        let err = client(url).login("admin", "wrong").await.unwrap_err();
        match err {
            ClientError::Unauthorized(msg) => assert_eq!(msg, "Invalid username or password"),
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn login_empty_token_rejected() {
        let (url, handle) = mock_server(200, r#"{"access_token":""}"#).await;
        let err = client(url).login("admin", "admin").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredential));
        handle.abort();
    }

    #[tokio::test]
    async fn init_upload_sends_query_and_bearer() {
        let body = format!(
            r#"{{"message":"Upload initialized successfully","file_id":"file-1","metadata":{}}}"#,
            METADATA_JSON.replace("\"partial\"", "\"pending\"")
        );
        let (url, handle) = mock_server(200, &body).await;

        let meta = client(url)
            .init_upload(&credential(), "file-1", 2_500_000)
            .await
            .unwrap();
        assert_eq!(meta.status, FileStatus::Pending);
        assert_eq!(meta.total_bytes, 2_500_000);

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /init_upload?file_id=file-1&total_size=2500000 "));
        assert!(request.to_lowercase().contains("authorization: bearer tok-123"));
    }

    #[tokio::test]
    async fn send_chunk_streams_body_with_range() {
        let (url, handle) = mock_server(
            200,
            r#"{"message":"chunk uploaded successfully","next_expected_byte":1200000,
                "received_bytes":1200000,"total_bytes":2500000}"#,
        )
        .await;

        let data: Vec<u8> = vec![b'x'; 200_000];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |n| seen_cb.lock().unwrap().push(n));

        let ack = client(url)
            .send_chunk(
                &credential(),
                chunk(data, 1_000_000, 2_500_000),
                progress,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(ack.next_expected_byte, 1_200_000);
        assert!(!ack.is_duplicate());

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 1, "200 KB should be reported in several slices");
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 200_000);

        let request = handle.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /upload_chunk?file_id=file-1 "));
        assert!(lower.contains("content-range: bytes 1000000-1199999/2500000"));
        assert!(lower.contains("authorization: bearer tok-123"));
        assert!(request.contains(r#"name="chunk"; filename="video.mp4""#));
    }

    #[tokio::test]
    async fn send_chunk_precancelled_makes_no_request() {
        let token = CancellationToken::new();
        token.cancel();

        // Nothing listens on the discard port; a request would fail differently.
        let err = client("http://127.0.0.1:9".into())
            .send_chunk(&credential(), chunk(vec![1; 10], 0, 10), no_progress(), token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn send_chunk_cancelled_mid_flight() {
        let (url, handle) = hanging_server().await;
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = client(url)
            .send_chunk(&credential(), chunk(vec![1; 10], 0, 10), no_progress(), token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        handle.abort();
    }

    #[tokio::test]
    async fn send_chunk_server_error() {
        let (url, handle) = mock_server(500, r#"{"error":"failed to write chunk"}"#).await;

        let err = client(url)
            .send_chunk(&credential(), chunk(vec![1; 10], 0, 10), no_progress(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "failed to write chunk");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn send_chunk_expired_token() {
        let (url, handle) = mock_server(401, r#"{"error":"Invalid token"}"#).await;

        let err = client(url)
            .send_chunk(&credential(), chunk(vec![1; 10], 0, 10), no_progress(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        handle.abort();
    }

    #[tokio::test]
    async fn status_returns_metadata() {
        let (url, handle) = mock_server(200, METADATA_JSON).await;

        let meta = client(url)
            .status(&credential(), "file-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.next_expected_byte, 1_048_576);
        assert_eq!(meta.status, FileStatus::Partial);

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /status/file-1 "));
    }

    #[tokio::test]
    async fn status_unknown_id_is_none() {
        let (url, handle) = mock_server(404, r#"{"error":"File not found or not started"}"#).await;
        let meta = client(url).status(&credential(), "nope").await.unwrap();
        assert!(meta.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn download_writes_file() {
        let (url, handle) = mock_server(200, "hello world").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let n = client(url).download("file-1", &dest).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /download/file-1 "));
        assert!(!request.to_lowercase().contains("range:"));
    }

    #[tokio::test]
    async fn download_resumes_partial_file() {
        let (url, handle) = mock_server(206, "world").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        std::fs::write(&dest, b"hello ").unwrap();

        let n = client(url).download("file-1", &dest).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");

        let request = handle.await.unwrap();
        assert!(request.to_lowercase().contains("range: bytes=6-"));
    }

    #[tokio::test]
    async fn download_restarts_when_range_ignored() {
        let (url, handle) = mock_server(200, "fresh").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        std::fs::write(&dest, b"stale-bytes").unwrap();

        let n = client(url).download("file-1", &dest).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
        handle.abort();
    }

    #[tokio::test]
    async fn download_missing_file() {
        let (url, handle) = mock_server(404, r#"{"error":"File not found"}"#).await;
        let dir = tempfile::tempdir().unwrap();

        let err = client(url)
            .download("gone", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
        handle.abort();
    }
}
