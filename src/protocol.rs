//! Wire format for the message protocol.
//!
//! Request (client to server), no trailing newline:
//!
//! ```text
//! user=<user>[\nimg=<image reference>]\n<message>
//! ```
//!
//! Response (handler to client), a status line followed by zero or more
//! file blocks whose bodies are raw bytes:
//!
//! ```text
//! status=<integer>\n
//! (file=<name>\nlen=<byte count>\n<byte count raw bytes>)*
//! ```

use crate::error::{Error, Result};
use bytes::BytesMut;
use std::fmt;
use std::str;

/// File names must be strictly shorter than this many bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Response header keys, in the order the parser expects them.
pub const STATUS_KEY: &str = "status";
pub const FILE_KEY: &str = "file";
pub const LEN_KEY: &str = "len";

const USER_PREFIX: &[u8] = b"user=";
const IMG_PREFIX: &[u8] = b"img=";

/// A message request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    user: String,
    message: String,
    image_reference: Option<String>,
}

impl Request {
    /// Build a request, rejecting empty users and messages.
    ///
    /// An empty image reference is treated as absent. The user ends at the
    /// first newline on the wire, so it may not contain one. Without an
    /// image the message may not start with `img=`, since the wire format
    /// could not tell the two apart.
    pub fn new(
        user: impl Into<String>,
        message: impl Into<String>,
        image_reference: Option<String>,
    ) -> Result<Self> {
        let user = user.into();
        let message = message.into();

        if user.is_empty() {
            return Err(Error::InvalidRequest("user must not be empty".to_string()));
        }
        if user.contains('\n') {
            return Err(Error::InvalidRequest(
                "user must not contain a newline".to_string(),
            ));
        }
        if message.is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".to_string()));
        }

        let image_reference = image_reference.filter(|img| !img.is_empty());
        if image_reference.as_deref().is_some_and(|img| img.contains('\n')) {
            return Err(Error::InvalidRequest(
                "image reference must not contain a newline".to_string(),
            ));
        }

        if image_reference.is_none() && message.as_bytes().starts_with(IMG_PREFIX) {
            return Err(Error::InvalidRequest(
                "message without image reference must not start with img=".to_string(),
            ));
        }

        Ok(Self {
            user,
            message,
            image_reference,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn image_reference(&self) -> Option<&str> {
        self.image_reference.as_deref()
    }

    /// Serialize into the wire request.
    pub fn encode(&self) -> BytesMut {
        let img_len = self
            .image_reference
            .as_ref()
            .map_or(0, |img| IMG_PREFIX.len() + img.len() + 1);
        let mut buf = BytesMut::with_capacity(
            USER_PREFIX.len() + self.user.len() + img_len + 1 + self.message.len(),
        );

        buf.extend_from_slice(USER_PREFIX);
        buf.extend_from_slice(self.user.as_bytes());
        if let Some(img) = &self.image_reference {
            buf.extend_from_slice(b"\n");
            buf.extend_from_slice(IMG_PREFIX);
            buf.extend_from_slice(img.as_bytes());
        }
        buf.extend_from_slice(b"\n");
        buf.extend_from_slice(self.message.as_bytes());
        buf
    }

    /// Parse a complete wire request.
    ///
    /// Everything after the header lines is the message, newlines included.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let input = str::from_utf8(input)
            .map_err(|_| Error::InvalidRequest("request is not valid UTF-8".to_string()))?;

        let (user_line, rest) = input
            .split_once('\n')
            .ok_or_else(|| Error::InvalidRequest("missing message".to_string()))?;
        let user = user_line.strip_prefix("user=").ok_or_else(|| {
            Error::InvalidRequest(format!("expected user line, got {user_line:?}"))
        })?;

        let (image_reference, message) = match rest.strip_prefix("img=") {
            Some(img_rest) => {
                let (img, message) = img_rest
                    .split_once('\n')
                    .ok_or_else(|| Error::InvalidRequest("missing message".to_string()))?;
                (Some(img.to_string()), message)
            }
            None => (None, rest),
        };

        Self::new(user, message, image_reference)
    }
}

/// A validated file name from a `file=` header.
///
/// Shorter than [`MAX_FILE_NAME_LEN`] bytes and usable as a single path
/// component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: &str) -> Result<Self> {
        if name.len() >= MAX_FILE_NAME_LEN {
            return Err(Error::NameTooLong {
                len: name.len(),
                limit: MAX_FILE_NAME_LEN,
            });
        }
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(Error::MalformedLine {
                expected: "file=<name>",
                line: format!("file={name}"),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a header line into key and value at the first `=`.
///
/// A single trailing `\n` is dropped. Returns `None` when there is no
/// `=` or the value is empty.
pub fn split_header(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let eq = line.iter().position(|&b| b == b'=')?;
    let (key, value) = (&line[..eq], &line[eq + 1..]);
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Return the value of `line` if its key is `key`.
fn expect_value<'a>(
    line: &'a [u8],
    key: &'static str,
    expected: &'static str,
) -> Result<&'a str> {
    let malformed = || Error::MalformedLine {
        expected,
        line: String::from_utf8_lossy(line).into_owned(),
    };

    let (k, v) = split_header(line).ok_or_else(malformed)?;
    if k != key.as_bytes() {
        return Err(malformed());
    }
    str::from_utf8(v).map_err(|_| malformed())
}

/// Parse a `status=<integer>` line.
pub fn parse_status(line: &[u8]) -> Result<i64> {
    let value = expect_value(line, STATUS_KEY, "status=<integer>")?;
    value.parse().map_err(|_| Error::MalformedLine {
        expected: "status=<integer>",
        line: String::from_utf8_lossy(line).into_owned(),
    })
}

/// Parse a `file=<name>` line.
pub fn parse_file(line: &[u8]) -> Result<FileName> {
    FileName::new(expect_value(line, FILE_KEY, "file=<name>")?)
}

/// Parse a `len=<byte count>` line.
pub fn parse_len(line: &[u8]) -> Result<u64> {
    let value = expect_value(line, LEN_KEY, "len=<byte count>")?;
    value.parse().map_err(|_| Error::MalformedLine {
        expected: "len=<byte count>",
        line: String::from_utf8_lossy(line).into_owned(),
    })
}

/// Response generator for the handler side.
#[derive(Debug)]
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    /// Start a response with its status line.
    pub fn new(status: i64) -> Self {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("{STATUS_KEY}={status}\n").as_bytes());
        Self { buf }
    }

    /// Append a file block.
    pub fn file(&mut self, name: &str, data: &[u8]) -> Result<&mut Self> {
        let name = FileName::new(name)?;
        let header = format!("{FILE_KEY}={name}\n{LEN_KEY}={}\n", data.len());
        self.buf.extend_from_slice(header.as_bytes());
        self.buf.extend_from_slice(data);
        Ok(self)
    }

    pub fn finish(self) -> BytesMut {
        self.buf
    }
}
