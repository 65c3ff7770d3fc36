use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use futures_util::TryStreamExt;

/// Status, headers and full body of a response that went through a tap.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Records a handler's response as the handler produces it.
///
/// The handler's body is drained through the tap as soon as the handler
/// returns, every chunk appended to the tap's buffer. The caller gets back the
/// handler's response parts untouched, carrying exactly the recorded bytes.
/// Capture therefore never depends on whether the transport reads the body
/// (HEAD requests, 204/304 responses and fixed `Content-Length` bodies are all
/// written without reading it to the end).
#[derive(Debug)]
pub struct ResponseTap {
    status: StatusCode,
    headers: HeaderMap,
    buf: BytesMut,
}

impl ResponseTap {
    fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            buf: BytesMut::new(),
        }
    }

    /// Drain `res` through a tap. Returns the response to forward and what was
    /// recorded. A body that fails mid-stream yields its error and nothing is
    /// recorded.
    pub async fn capture(res: Response) -> Result<(Response, CapturedResponse), axum::Error> {
        let (parts, body) = res.into_parts();
        let mut tap = ResponseTap::new(parts.status, parts.headers.clone());
        let mut chunks = body.into_data_stream();
        while let Some(chunk) = chunks.try_next().await? {
            tap.write(&chunk);
        }
        let captured = tap.finish();
        let forwarded = Response::from_parts(parts, Body::from(captured.body.clone()));
        Ok((forwarded, captured))
    }

    fn write(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn finish(self) -> CapturedResponse {
        CapturedResponse {
            status: self.status,
            headers: self.headers,
            body: self.buf.freeze(),
        }
    }
}
