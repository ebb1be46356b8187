//! Content-Length framing for JSON messages over byte streams.
//!
//! Stream sockets have no message boundaries, so each JSON message is
//! prefixed with an HTTP-style header block (the same layout LSP uses):
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are matched case-insensitively and both CRLF and LF line
//! endings are accepted.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted body (16MB). Compiled projects and memory dumps stay far below this.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read one framed message body.
///
/// Returns `Ok(None)` on a clean EOF before any header byte, so callers can
/// tell an orderly close from a truncated frame.
///
/// # Errors
///
/// Returns an error if:
/// - The stream ends inside the header block or body
/// - No Content-Length header is found
/// - Content-Length exceeds [`MAX_MESSAGE_SIZE`]
/// - The body is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;

        if bytes_read == 0 {
            if saw_header {
                return Err(anyhow!("Connection closed inside header block"));
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    String::from_utf8(body)
        .map(Some)
        .context("Message body is not valid UTF-8")
}

/// Write one framed message body and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write message header")?;
    writer
        .write_all(body.as_bytes())
        .await
        .context("Failed to write message body")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

/// Frame and write a JSON value.
pub async fn write_json<W>(writer: &mut W, value: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_string(value).context("Failed to encode message")?;
    write_message(writer, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_read_over_socket_pair() {
        let (a, b) = UnixStream::pair().expect("Failed to create socket pair");
        let (_a_read, mut a_write) = a.into_split();
        let (b_read, _b_write) = b.into_split();

        let message = r#"{"id":1,"type":"call","method":"run","args":[]}"#;
        write_message(&mut a_write, message).await.expect("Write failed");

        let mut reader = BufReader::new(b_read);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received.as_deref(), Some(message));
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let mut wire = Vec::new();
        write_json(&mut wire, &serde_json::json!({"id": 1})).await.unwrap();
        write_json(&mut wire, &serde_json::json!({"id": 2})).await.unwrap();

        let mut reader = BufReader::new(wire.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some(r#"{"id":2}"#));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lf_and_lowercase_header() {
        let body = r#"{"ok":true}"#;
        let raw = format!("content-length: {}\n\n{}", body.len(), body);
        let mut reader = BufReader::new(raw.as_bytes());

        let received = read_message(&mut reader).await.unwrap();
        assert_eq!(received.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let mut reader = BufReader::new(&b"Content-Type: json\r\n\r\n"[..]);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(
            err.to_string().contains("Missing Content-Length"),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_rejects_oversized_message() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        let mut reader = BufReader::new(raw.as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_truncated_header_is_error() {
        let mut reader = BufReader::new(&b"Content-Length: 4\r\n"[..]);
        assert!(read_message(&mut reader).await.is_err());
    }
}
