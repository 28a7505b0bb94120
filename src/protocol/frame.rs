//! Frame types and their wire encoding
//!
//! One frame is one semantically complete protocol message. On the wire a
//! frame is a 4-byte big-endian length prefix followed by a body of that
//! length; the body's first byte is the tag, the rest is per-kind fields.
//! Strings are UTF-8; interior strings carry their own u16 big-endian
//! length, a trailing string runs to the end of the body. A file's payload
//! is not itself a frame: it is the raw byte run announced by the preceding
//! `FileHeader`.

use crate::error::{ProtocolError, Result};

/// Tag byte for [`Frame::Join`]
pub const TAG_JOIN: u8 = 0x01;
/// Tag byte for [`Frame::Text`]
pub const TAG_TEXT: u8 = 0x02;
/// Tag byte for [`Frame::FileHeader`]
pub const TAG_FILE_HEADER: u8 = 0x03;
/// Tag byte for [`Frame::OnlineUsersRequest`]
pub const TAG_ONLINE_USERS_REQUEST: u8 = 0x04;
/// Tag byte for [`Frame::OnlineUsersResponse`]
pub const TAG_ONLINE_USERS_RESPONSE: u8 = 0x05;
/// Tag byte for [`Frame::Quit`]
pub const TAG_QUIT: u8 = 0x06;

/// One protocol message
///
/// Because every string travels with an explicit length, usernames and
/// filenames may contain any UTF-8, including characters that older
/// delimiter-based chat protocols had to reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame on a new connection; announces the display name
    Join {
        /// Display name for this connection
        username: String,
    },
    /// A chat message, relayed to every other peer
    Text {
        /// Display name of the sending peer
        sender: String,
        /// The message text
        text: String,
    },
    /// Announces a file transfer; exactly `len` raw payload bytes follow
    FileHeader {
        /// Name the file was sent under
        filename: String,
        /// Exact payload length in bytes
        len: u64,
    },
    /// Asks the server for the current roster
    OnlineUsersRequest,
    /// The roster, sent to the requester only
    OnlineUsersResponse {
        /// Currently registered display names
        usernames: Vec<String>,
    },
    /// Announces an orderly disconnect
    Quit,
}

impl Frame {
    /// Short name of this frame's kind, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::Text { .. } => "text",
            Frame::FileHeader { .. } => "file header",
            Frame::OnlineUsersRequest => "online users request",
            Frame::OnlineUsersResponse { .. } => "online users response",
            Frame::Quit => "quit",
        }
    }

    /// Encode the frame body (tag plus fields, without the length prefix)
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(16);
        match self {
            Frame::Join { username } => {
                body.push(TAG_JOIN);
                body.extend_from_slice(username.as_bytes());
            },
            Frame::Text { sender, text } => {
                body.push(TAG_TEXT);
                put_str(&mut body, sender, "sender")?;
                body.extend_from_slice(text.as_bytes());
            },
            Frame::FileHeader { filename, len } => {
                body.push(TAG_FILE_HEADER);
                put_str(&mut body, filename, "filename")?;
                body.extend_from_slice(&len.to_be_bytes());
            },
            Frame::OnlineUsersRequest => {
                body.push(TAG_ONLINE_USERS_REQUEST);
            },
            Frame::OnlineUsersResponse { usernames } => {
                body.push(TAG_ONLINE_USERS_RESPONSE);
                let count = u16::try_from(usernames.len()).map_err(|_| {
                    ProtocolError::FieldTooLong {
                        field: "usernames".to_string(),
                        len: usernames.len(),
                    }
                })?;
                body.extend_from_slice(&count.to_be_bytes());
                for name in usernames {
                    put_str(&mut body, name, "username")?;
                }
            },
            Frame::Quit => {
                body.push(TAG_QUIT);
            },
        }
        Ok(body)
    }

    /// Encode the full wire form: 4-byte big-endian length prefix plus body
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = self.encode_body()?;
        let mut bytes = Vec::with_capacity(4 + body.len());
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse a frame body (tag plus fields, the length prefix already
    /// stripped)
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` for an empty body, an unknown tag, a
    /// truncated field, trailing bytes after a fixed-size body, or invalid
    /// UTF-8 in a string field.
    pub fn parse(body: &[u8]) -> Result<Frame> {
        let (&tag, mut rest) = body.split_first().ok_or_else(|| {
            ProtocolError::MalformedFrame {
                reason: "empty frame body".to_string(),
            }
        })?;

        let frame = match tag {
            TAG_JOIN => Frame::Join {
                username: take_trailing_str(&mut rest, "username")?,
            },
            TAG_TEXT => {
                let sender = take_str(&mut rest, "sender")?;
                let text = take_trailing_str(&mut rest, "text")?;
                Frame::Text { sender, text }
            },
            TAG_FILE_HEADER => {
                let filename = take_str(&mut rest, "filename")?;
                let len = take_u64(&mut rest, "payload length")?;
                expect_end(rest, "file header")?;
                Frame::FileHeader { filename, len }
            },
            TAG_ONLINE_USERS_REQUEST => {
                expect_end(rest, "online users request")?;
                Frame::OnlineUsersRequest
            },
            TAG_ONLINE_USERS_RESPONSE => {
                let count = take_u16(&mut rest, "username count")?;
                let mut usernames = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    usernames.push(take_str(&mut rest, "username")?);
                }
                expect_end(rest, "online users response")?;
                Frame::OnlineUsersResponse { usernames }
            },
            TAG_QUIT => {
                expect_end(rest, "quit")?;
                Frame::Quit
            },
            tag => return Err(ProtocolError::UnknownTag { tag }.into()),
        };

        Ok(frame)
    }
}

/// Append a u16-length-prefixed string to a frame body
fn put_str(body: &mut Vec<u8>, value: &str, field: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field: field.to_string(),
        len: value.len(),
    })?;
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Take `len` bytes off the front of the buffer
fn take_bytes<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(ProtocolError::MalformedFrame {
            reason: format!("truncated {}", what),
        }
        .into());
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_u16(buf: &mut &[u8], what: &str) -> Result<u16> {
    let bytes = take_bytes(buf, 2, what)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn take_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    let bytes = take_bytes(buf, 8, what)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

/// Take a u16-length-prefixed UTF-8 string off the front of the buffer
fn take_str(buf: &mut &[u8], what: &str) -> Result<String> {
    let len = take_u16(buf, what)? as usize;
    let bytes = take_bytes(buf, len, what)?;
    decode_utf8(bytes, what)
}

/// Take the rest of the buffer as a UTF-8 string
fn take_trailing_str(buf: &mut &[u8], what: &str) -> Result<String> {
    let bytes = std::mem::take(buf);
    decode_utf8(bytes, what)
}

fn decode_utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        ProtocolError::MalformedFrame {
            reason: format!("{} is not valid UTF-8", what),
        }
        .into()
    })
}

fn expect_end(buf: &[u8], what: &str) -> Result<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::MalformedFrame {
            reason: format!("{} bytes trailing a {} body", buf.len(), what),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let bytes = frame.encode().unwrap();
        // Verify the prefix matches the body length
        let body_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, bytes.len() - 4);
        Frame::parse(&bytes[4..]).unwrap()
    }

    #[test]
    fn test_join_round_trip() {
        let frame = Frame::Join {
            username: "alice".to_string(),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_text_round_trip() {
        let frame = Frame::Text {
            sender: "alice".to_string(),
            text: "hello everyone".to_string(),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_text_sender_may_contain_colon() {
        // Delimiter characters are ordinary content under length-prefixed
        // framing
        let frame = Frame::Text {
            sender: "alice:the:great".to_string(),
            text: "FILE:fake.txt:99".to_string(),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_file_header_round_trip() {
        let frame = Frame::FileHeader {
            filename: "report.txt".to_string(),
            len: 5,
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_control_frames_round_trip() {
        assert_eq!(round_trip(Frame::OnlineUsersRequest), Frame::OnlineUsersRequest);
        assert_eq!(round_trip(Frame::Quit), Frame::Quit);
    }

    #[test]
    fn test_online_users_response_round_trip() {
        let frame = Frame::OnlineUsersResponse {
            usernames: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
        };
        assert_eq!(round_trip(frame.clone()), frame);

        let empty = Frame::OnlineUsersResponse { usernames: vec![] };
        assert_eq!(round_trip(empty.clone()), empty);
    }

    #[test]
    fn test_empty_body_rejected() {
        let err = Frame::parse(&[]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = Frame::parse(&[0x7f]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::UnknownTag { tag: 0x7f })
        ));
    }

    #[test]
    fn test_truncated_file_header_rejected() {
        let frame = Frame::FileHeader {
            filename: "report.txt".to_string(),
            len: 1024,
        };
        let body = frame.encode_body().unwrap();
        let err = Frame::parse(&body[..body.len() - 3]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut body = Frame::Quit.encode_body().unwrap();
        body.push(0);
        let err = Frame::parse(&body).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let body = vec![TAG_JOIN, 0xff, 0xfe];
        let err = Frame::parse(&body).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_oversized_field_rejected_on_encode() {
        let frame = Frame::Text {
            sender: "x".repeat(u16::MAX as usize + 1),
            text: "hi".to_string(),
        };
        let err = frame.encode().unwrap_err();
        assert!(matches!(
            err,
            crate::error::RelayError::Protocol(ProtocolError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn test_unicode_round_trip() {
        let frame = Frame::Text {
            sender: "Алиса".to_string(),
            text: "привет 👋".to_string(),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }
}
