//! Content-Length framing for the target channel.
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <json body>
//! ```
//!
//! Header names are matched case-insensitively, both CRLF and LF line endings
//! are accepted, and unknown headers are ignored.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body (100MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Read one framed message.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
///
/// # Errors
///
/// Fails on EOF in the middle of a frame, a missing or invalid
/// `Content-Length`, a body over [`MAX_MESSAGE_SIZE`], or a non-UTF-8 body.
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
                return Err(anyhow!("Connection closed in the middle of a frame"));
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

/// Write one framed message and flush.
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn read_raw(raw: &[u8]) -> Result<Option<String>> {
        let mut reader = BufReader::new(raw);
        timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
    }

    #[tokio::test]
    async fn test_write_read_over_socket() {
        let (a, b) = UnixStream::pair().expect("Failed to create socket pair");
        let (_a_read, mut a_write) = a.into_split();
        let (b_read, _b_write) = b.into_split();

        let message = r#"{"id":"7f3a","command":"get-node","args":{"id":"1:2"}}"#;
        write_message(&mut a_write, message).await.expect("Write failed");
        write_message(&mut a_write, "{}").await.expect("Write failed");

        let mut reader = BufReader::new(b_read);
        let first = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(first.as_deref(), Some(message));

        let second = read_message(&mut reader).await.expect("Read failed");
        assert_eq!(second.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        assert_eq!(read_raw(b"").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_headers_is_an_error() {
        let err = read_raw(b"Content-Length: 4\r\n").await.unwrap_err();
        assert!(err.to_string().contains("middle of a frame"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let err = read_raw(b"Content-Type: application/json\r\n\r\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing Content-Length"), "{}", err);
    }

    #[tokio::test]
    async fn test_lf_endings_and_lowercase_header() {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\n\n{}", body.len(), body);
        assert_eq!(read_raw(raw.as_bytes()).await.unwrap().as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_rejects_oversized_message() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        let err = read_raw(raw.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"), "{}", err);
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let err = read_raw(b"Content-Length: 10\r\n\r\n{}").await.unwrap_err();
        assert!(err.to_string().contains("message body"), "{}", err);
    }
}
