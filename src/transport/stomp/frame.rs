//! STOMP frame encoding and incremental decoding

use super::StompError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Upper bound on a buffered, still incomplete frame
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, StompError> {
        Ok(match line {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(StompError::Protocol(format!("unknown command '{other}'"))),
        })
    }

    /// CONNECT and CONNECTED headers are sent without escaping
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header with this name; repeated headers after the
    /// first are ignored
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let escape = self.command.escapes_headers();
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            if escape {
                dst.put_slice(escape_header(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape_header(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        // A body containing NUL needs an explicit length to be framed.
        if self.body.contains(&0) && self.get("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    /// Decode one frame from the front of `buf`, consuming it.
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        let eols = buf
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        buf.advance(eols);
        if buf.is_empty() {
            return Ok(None);
        }

        let (head_end, body_start) = match find_header_end(buf) {
            Some(found) => found,
            None => return check_incomplete(buf),
        };

        let head = std::str::from_utf8(&buf[..head_end])
            .map_err(|_| StompError::Protocol("frame headers are not UTF-8".to_string()))?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = Command::parse(lines.next().unwrap_or_default())?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::Protocol(format!("malformed header line '{line}'")))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::Protocol(format!("invalid content-length '{v}'")))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                if len > MAX_FRAME_LEN {
                    return Err(StompError::Protocol(format!(
                        "content-length {len} exceeds {MAX_FRAME_LEN} bytes"
                    )));
                }
                let end = body_start + len;
                if buf.len() <= end {
                    return check_incomplete(buf);
                }
                if buf[end] != 0 {
                    return Err(StompError::Protocol(
                        "frame body not terminated by NUL".to_string(),
                    ));
                }
                end
            }
            None => match buf[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return check_incomplete(buf),
            },
        };

        let frame = buf.split_to(body_end + 1).freeze();
        Ok(Some(Frame {
            command,
            headers,
            body: frame.slice(body_start..body_end),
        }))
    }
}

fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, i + 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, i + 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn check_incomplete(buf: &BytesMut) -> Result<Option<Frame>, StompError> {
    if buf.len() > MAX_FRAME_LEN {
        Err(StompError::Protocol(format!(
            "frame exceeds {MAX_FRAME_LEN} bytes"
        )))
    } else {
        Ok(None)
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(StompError::Protocol(format!(
                    "invalid header escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn test_encode_send_frame() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/topic/CI")
            .header("CI_NAME", "my-job")
            .body("hello");
        assert_eq!(
            &encoded(&frame)[..],
            b"SEND\ndestination:/topic/CI\nCI_NAME:my-job\n\nhello\0"
        );
    }

    #[test]
    fn test_header_values_are_escaped() {
        let frame = Frame::new(Command::Send).header("selector", "a:b\nc\\d");
        let buf = encoded(&frame);
        assert_eq!(&buf[..], b"SEND\nselector:a\\cb\\nc\\\\d\n\n\0");

        let mut buf = buf;
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.get("selector"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_connect_headers_not_escaped() {
        let frame = Frame::new(Command::Connect).header("client-id", "amq_http://ci:8080/_10.0.0.1_job");
        assert_eq!(
            &encoded(&frame)[..],
            b"CONNECT\nclient-id:amq_http://ci:8080/_10.0.0.1_job\n\n\0"
        );
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:/topic/CI\n\nhal"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"f\0");
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(&frame.body[..], b"half");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_with_content_length_allows_nul() {
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:3\n\na\0b\0"[..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"a\0b");
    }

    #[test]
    fn test_decode_skips_heartbeats_and_handles_crlf() {
        let mut buf = BytesMut::from(&b"\n\r\nRECEIPT\r\nreceipt-id:7\r\n\r\n\0\nERROR\nmessage:x\n\n\0"[..]);
        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.command, Command::Receipt);
        assert_eq!(first.get("receipt-id"), Some("7"));
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.command, Command::Error);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let mut buf = BytesMut::from(&b"MESSAGE\nfoo:1\nfoo:2\n\n\0"[..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let mut buf = BytesMut::from(&b"HELLO\n\n\0"[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(StompError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_content_length() {
        let mut buf =
            BytesMut::from(&b"MESSAGE\ncontent-length:18446744073709551615\n\nabc\0"[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(StompError::Protocol(_))
        ));

        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:16777217\n\nabc\0"[..]);
        assert!(Frame::decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_escape() {
        let mut buf = BytesMut::from(&b"MESSAGE\nfoo:a\\tb\n\n\0"[..]);
        assert!(Frame::decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_adds_length_for_binary_body() {
        let frame = Frame::new(Command::Send).body(vec![1u8, 0, 2]);
        let mut buf = encoded(&frame);
        assert!(buf.windows(17).any(|w| w == b"content-length:3\n"));
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded.body[..], &[1u8, 0, 2]);
    }
}
