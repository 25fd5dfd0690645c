//! Just enough HTTP/1.1 for a JSON API: one request per connection, bodies
//! sized by `Content-Length`, no chunked encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, Result};

pub const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Builds a request from a request target such as `/api/ideas?userId=1`.
    pub fn new(method: &str, target: &str, body: impl Into<Vec<u8>>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Vec::new()),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            body: body.into(),
        }
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Optional integer query parameter; present but malformed is an error.
    pub fn query_id(&self, name: &str) -> Result<Option<i64>> {
        match self.query_param(name) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| AppError::Validation(format!("{name} must be an integer"))),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        Ok(Self {
            status,
            body: serde_json::to_vec(value)?,
        })
    }

    pub fn ok<T: Serialize>(value: &T) -> Result<Self> {
        Self::json(200, value)
    }

    pub fn created<T: Serialize>(value: &T) -> Result<Self> {
        Self::json(201, value)
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    pub fn error(status: u16, code: &str, message: &str) -> Self {
        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    #[cfg(test)]
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

#[derive(Debug)]
pub enum Incoming {
    Request(HttpRequest),
    BodyTooLarge,
    Malformed,
    /// The peer closed the connection without sending anything.
    Closed,
}

pub async fn read_request<R>(stream: &mut R) -> std::io::Result<Incoming>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut data = Vec::<u8>::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Ok(Incoming::Malformed);
        }
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(if data.is_empty() {
                Incoming::Closed
            } else {
                Incoming::Malformed
            });
        }
        data.extend_from_slice(&buf[..read]);
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let mut parts = lines.next().unwrap_or("").split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(Incoming::Malformed);
    };

    let mut content_length: usize = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            match value.trim().parse::<usize>() {
                Ok(length) => content_length = length,
                Err(_) => return Ok(Incoming::Malformed),
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Ok(Incoming::BodyTooLarge);
    }

    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(Incoming::Malformed);
        }
        body.extend_from_slice(&buf[..read]);
    }
    body.truncate(content_length);

    Ok(Incoming::Request(HttpRequest::new(method, target, body)))
}

pub async fn write_response<W>(stream: &mut W, response: &HttpResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut headers = String::new();
    headers.push_str(&format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    ));
    if !response.body.is_empty() {
        headers.push_str("Content-Type: application/json; charset=utf-8\r\n");
    }
    headers.push_str("Cache-Control: no-store\r\n");
    headers.push_str("Connection: close\r\n");
    headers.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));

    stream.write_all(headers.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &str) -> Incoming {
        let mut reader = raw.as_bytes();
        read_request(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_request_with_body_and_query() {
        let raw = "POST /api/ideas?userId=3&q=solar+kettle%21 HTTP/1.1\r\n\
                   Host: localhost\r\n\
                   Content-Length: 13\r\n\r\n\
                   {\"title\":\"X\"}";
        let Incoming::Request(request) = parse(raw).await else {
            panic!("expected a request");
        };
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/ideas");
        assert_eq!(request.query_param("userId"), Some("3"));
        assert_eq!(request.query_param("q"), Some("solar kettle!"));
        assert_eq!(request.query_id("userId").unwrap(), Some(3));
        assert_eq!(request.body, b"{\"title\":\"X\"}");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_reading() {
        let raw = format!(
            "POST /api/ideas HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        assert!(matches!(parse(&raw).await, Incoming::BodyTooLarge));
    }

    #[tokio::test]
    async fn test_empty_and_truncated_input() {
        assert!(matches!(parse("").await, Incoming::Closed));
        assert!(matches!(parse("GET /api").await, Incoming::Malformed));
        assert!(matches!(
            parse("POST /api/login HTTP/1.1\r\nContent-Length: 10\r\n\r\n{}").await,
            Incoming::Malformed
        ));
    }

    #[test]
    fn test_query_id_rejects_garbage() {
        let request = HttpRequest::new("get", "/api/ideas?userId=abc", Vec::new());
        assert_eq!(request.method, "GET");
        assert!(matches!(
            request.query_id("userId"),
            Err(AppError::Validation(_))
        ));
        assert_eq!(request.query_id("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_response_sets_length_and_close() {
        let response = HttpResponse::error(404, "NOT_FOUND", "Idea 1 not found");
        let mut out = Vec::new();
        write_response(&mut out, &response).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", response.body.len())));
        assert!(text.ends_with("\"message\":\"Idea 1 not found\"}}"));
    }
}
