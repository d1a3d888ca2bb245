//! Line framing for the manager protocol
//!
//! Messages are sequences of `Key: Value\r\n` lines closed by an empty line.
//! Responses to commands (`Response: Follows`) may carry raw output lines
//! without a colon; those are collected under an `Output` key.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::AmiMessage;

/// Longest line accepted before the stream is considered corrupt
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Key under which colon-less output lines are stored
pub const OUTPUT_KEY: &str = "Output";

/// Accumulates lines until a full message is available
#[derive(Debug, Default)]
pub struct MessageAssembler {
    fields: Vec<(String, String)>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without its line terminator)
    ///
    /// Returns a message when the line closes one.
    pub fn push_line(&mut self, line: &str) -> Option<AmiMessage> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            if self.fields.is_empty() {
                return None;
            }
            let fields = std::mem::take(&mut self.fields);
            return Some(AmiMessage::from_fields(fields));
        }

        match line.split_once(':') {
            Some((key, value)) if !key.is_empty() && !key.contains(' ') => {
                self.fields
                    .push((key.to_string(), value.trim_start().to_string()));
            }
            _ => self.push_output(line),
        }
        None
    }

    /// Whether a partially received message is pending
    pub fn is_partial(&self) -> bool {
        !self.fields.is_empty()
    }

    fn push_output(&mut self, line: &str) {
        if let Some((_, output)) = self
            .fields
            .iter_mut()
            .find(|(k, _)| k.as_str() == OUTPUT_KEY)
        {
            output.push('\n');
            output.push_str(line);
        } else {
            self.fields.push((OUTPUT_KEY.to_string(), line.to_string()));
        }
    }
}

/// Read one line, enforcing [`MAX_LINE_LENGTH`]
///
/// At most `MAX_LINE_LENGTH + 1` bytes are pulled from the reader per line.
/// Bytes that are not valid UTF-8 are replaced, never rejected. Returns
/// `Ok(None)` on a clean end of stream.
pub async fn read_line<R>(reader: &mut R, buf: &mut String) -> Result<Option<()>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut raw = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut raw)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if raw.len() > MAX_LINE_LENGTH {
        return Err(Error::Protocol(format!(
            "line exceeds the {} byte limit",
            MAX_LINE_LENGTH
        )));
    }
    buf.push_str(&String::from_utf8_lossy(&raw));
    Ok(Some(()))
}

/// Read lines until a complete message has been assembled
///
/// Returns `Ok(None)` when the stream ends between messages. Ending in the
/// middle of a message is reported as [`Error::Closed`].
pub async fn read_message<R>(
    reader: &mut R,
    assembler: &mut MessageAssembler,
) -> Result<Option<AmiMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        match read_line(reader, &mut line).await? {
            Some(()) => {
                if let Some(message) = assembler.push_line(&line) {
                    trace!("Received manager message: {}", message);
                    return Ok(Some(message));
                }
            }
            None if assembler.is_partial() => return Err(Error::Closed),
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    #[test]
    fn test_assembles_message_on_blank_line() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push_line("Event: Newchannel\r\n").is_none());
        assert!(assembler.push_line("Uniqueid: 1700000000.1\r\n").is_none());
        assert!(assembler.push_line("Linkedid: 1700000000.1\r\n").is_none());
        let message = assembler.push_line("\r\n").expect("message complete");

        assert!(message.is_event());
        assert_eq!(message.field("Uniqueid"), "1700000000.1");
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_values_keep_inner_colons() {
        let mut assembler = MessageAssembler::new();
        assembler.push_line("Event: Hangup");
        assembler.push_line("Channel: SIP/8001-00000001");
        assembler.push_line("Cause-txt: Normal Clearing: ok");
        let message = assembler.push_line("").unwrap();
        assert_eq!(message.field("Cause-txt"), "Normal Clearing: ok");
    }

    #[test]
    fn test_colonless_lines_become_output() {
        let mut assembler = MessageAssembler::new();
        assembler.push_line("Response: Follows");
        assembler.push_line("Privilege: Command");
        assembler.push_line("first line of output");
        assembler.push_line("--END COMMAND--");
        let message = assembler.push_line("").unwrap();
        assert_eq!(
            message.field(OUTPUT_KEY),
            "first line of output\n--END COMMAND--"
        );
    }

    #[test]
    fn test_stray_blank_lines_are_skipped() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push_line("\r\n").is_none());
        assert!(assembler.push_line("").is_none());
    }

    #[tokio::test]
    async fn test_read_message_from_stream() {
        let data: &[u8] = b"Response: Success\r\nActionID: a-1-1\r\nMessage: ok\r\n\r\nEvent: FullyBooted\r\n\r\n";
        let mut reader = BufReader::new(data);
        let mut assembler = MessageAssembler::new();

        let first = read_message(&mut reader, &mut assembler).await.unwrap().unwrap();
        assert!(first.correlates_to("a-1-1"));
        let second = read_message(&mut reader, &mut assembler).await.unwrap().unwrap();
        assert!(second.is_event_named("FullyBooted"));
        assert!(read_message(&mut reader, &mut assembler).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_message_is_closed_error() {
        let data: &[u8] = b"Event: Hangup\r\nLinkedid: 1.1\r\n";
        let mut reader = BufReader::new(data);
        let mut assembler = MessageAssembler::new();

        let result = read_message(&mut reader, &mut assembler).await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_line_is_protocol_error() {
        let mut data = b"Event: ".to_vec();
        data.extend(std::iter::repeat(b'x').take(MAX_LINE_LENGTH + 1));
        data.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&data[..]);
        let mut assembler = MessageAssembler::new();

        let result = read_message(&mut reader, &mut assembler).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unterminated_line_is_rejected_without_draining_peer() {
        let total: u64 = 32 * 1024 * 1024;
        let capacity = 4096;
        let mut reader = BufReader::with_capacity(capacity, tokio::io::repeat(b'x').take(total));
        let mut assembler = MessageAssembler::new();

        let result = read_message(&mut reader, &mut assembler).await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        // the limit plus at most one buffer fill
        let consumed = total - reader.get_ref().limit();
        assert!(
            consumed <= (MAX_LINE_LENGTH + 1 + capacity) as u64,
            "read {} bytes",
            consumed
        );
    }

    #[tokio::test]
    async fn test_non_utf8_bytes_are_replaced() {
        let data: &[u8] = b"Event: NewCallerid\r\nCallerIDName: Jos\xE9\r\nLinkedid: 1.1\r\n\r\n";
        let mut reader = BufReader::new(data);
        let mut assembler = MessageAssembler::new();

        let message = read_message(&mut reader, &mut assembler).await.unwrap().unwrap();
        assert!(message.is_event_named("NewCallerid"));
        assert_eq!(message.field("CallerIDName"), "Jos\u{FFFD}");
        assert_eq!(message.field("Linkedid"), "1.1");
    }
}
