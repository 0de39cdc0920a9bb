//! HTTP response parsing
//!
//! Reads one response off a buffered stream: status line, headers, then
//! the body framed by `Transfer-Encoding: chunked`, `Content-Length` or
//! the connection closing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::Headers;
use crate::common::{Error, Result};

/// Sanity limit for a single response body
const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

/// A parsed response, read-only once received
#[derive(Debug, Clone)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    /// Status line, headers and body as one string
    ///
    /// This is what `response_contains` assertions are matched against.
    pub fn full_text(&self) -> String {
        let mut text = format!("{} {} {}\r\n", self.version, self.status, self.reason);
        for (name, value) in self.headers.iter() {
            text.push_str(name);
            text.push_str(": ");
            text.push_str(value);
            text.push_str("\r\n");
        }
        text.push_str("\r\n");
        text.push_str(&String::from_utf8_lossy(&self.body));
        text
    }

    /// Whether the server allows another request on this connection
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers.get("Connection").map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(v) if v.contains("close") => false,
            Some(v) if v.contains("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }

    /// Read one complete response
    ///
    /// Interim `1xx` responses are skipped. `head_request` suppresses the
    /// body, since the headers of a HEAD response describe a body that is
    /// never sent.
    pub async fn read_from<R: AsyncBufRead + Unpin>(
        reader: &mut R,
        head_request: bool,
    ) -> Result<Response> {
        loop {
            let (version, status, reason) = read_status_line(reader).await?;
            let headers = read_headers(reader).await?;

            if (100..200).contains(&status) && status != 101 {
                tracing::trace!(status, "Skipping interim response");
                continue;
            }

            let body = if head_request || status == 204 || status == 304 || status == 101 {
                Vec::new()
            } else if is_chunked(&headers) {
                read_chunked_body(reader).await?
            } else if let Some(len) = content_length(&headers)? {
                read_sized_body(reader, len).await?
            } else {
                read_until_close(reader).await?
            };

            return Ok(Response {
                version,
                status,
                reason,
                headers,
                body,
            });
        }
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await.map_err(Error::Send)?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

async fn read_status_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(String, u16, String)> {
    let line = read_line(reader)
        .await?
        .ok_or_else(|| Error::MalformedResponse("connection closed before status line".to_string()))?;

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::MalformedResponse(format!("invalid status line: {}", line)));
    }
    let status = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .ok_or_else(|| Error::MalformedResponse(format!("invalid status code in: {}", line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    Ok((version.to_string(), status, reason))
}

async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Headers> {
    let mut headers = Headers::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| Error::MalformedResponse("connection closed inside headers".to_string()))?;
        if line.is_empty() {
            return Ok(headers);
        }
        match line.split_once(':') {
            Some((name, value)) => headers.add(name.trim(), value.trim()),
            None => {
                return Err(Error::MalformedResponse(format!("invalid header line: {}", line)));
            }
        }
    }
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

fn content_length(headers: &Headers) -> Result<Option<usize>> {
    let Some(value) = headers.get("Content-Length") else {
        return Ok(None);
    };
    let len = value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::MalformedResponse(format!("invalid Content-Length: {}", value)))?;
    if len > MAX_BODY_SIZE {
        return Err(Error::MalformedResponse(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }
    Ok(Some(len))
}

async fn read_sized_body<R: AsyncBufRead + Unpin>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(Error::Send)?;
    Ok(body)
}

async fn read_chunked_body<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| Error::MalformedResponse("connection closed inside chunked body".to_string()))?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| Error::MalformedResponse(format!("invalid chunk size: {}", line)))?;

        if size == 0 {
            // Trailers end with an empty line
            while let Some(trailer) = read_line(reader).await? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let start = body.len();
        let end = start
            .checked_add(size)
            .filter(|n| *n <= MAX_BODY_SIZE)
            .ok_or_else(|| Error::MalformedResponse(format!("chunk too large: {}", line)))?;
        body.resize(end, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(Error::Send)?;
        // CRLF after chunk data
        read_line(reader).await?;
    }
}

async fn read_until_close<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader
        .take(MAX_BODY_SIZE as u64)
        .read_to_end(&mut body)
        .await
        .map_err(Error::Send)?;
    Ok(body)
}
