// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Replies never nest this deep, anything beyond it is rejected rather than recursed into.
const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("ERR Protocol error: invalid frame data type: {0:?}")]
    InvalidDataType(char),
    /// The bytes received do not follow the protocol grammar.
    #[error("ERR Protocol error: {0}")]
    Malformed(String),
    #[error("ERR Protocol error: frame size exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?.to_vec();
                Ok(Frame::Simple(String::from_utf8(line)?))
            }
            DataType::SimpleError => {
                let line = get_line(src)?.to_vec();
                Ok(Frame::Error(String::from_utf8(line)?))
            }
            DataType::Integer => Ok(Frame::Integer(get_integer(src)?)),
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = get_integer(src)?;
                if length == -1 {
                    return Ok(Frame::Null);
                }
                let length = usize::try_from(length)
                    .map_err(|_| Error::Malformed(format!("invalid bulk length {length}")))?;

                // The payload is read by its declared length so that CRLF sequences inside
                // binary values are never mistaken for the terminator.
                let data = get_exact(src, length)?;
                let data = Bytes::copy_from_slice(data);

                let terminator = get_exact(src, CRLF.len())?;
                if terminator != CRLF {
                    return Err(Error::Malformed(
                        "bulk string length does not match its payload".to_string(),
                    ));
                }

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(Error::Malformed(format!(
                        "arrays nested deeper than {MAX_NESTING_DEPTH} levels"
                    )));
                }

                let length = get_integer(src)?;
                if length == -1 {
                    return Ok(Frame::Null);
                }
                let length = usize::try_from(length)
                    .map_err(|_| Error::Malformed(format!("invalid multibulk length {length}")))?;

                // The capacity is bounded so a bogus header can't make us allocate a huge vector
                // before a single element arrived.
                let mut frames = Vec::with_capacity(length.min(1024));
                for _ in 0..length {
                    frames.push(Self::parse_nested(src, depth + 1)?);
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    /// Parses a client request: an array whose elements are all bulk strings, where `$-1`
    /// elements are kept as [`Frame::Null`] slots.
    ///
    /// Element types are checked before they are parsed, so a request never recurses.
    pub fn parse_request(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let data_type = DataType::try_from(peek_byte(src)?)?;
        if !matches!(data_type, DataType::Array) {
            // Anything but an array is a scalar here.
            let frame = Self::parse(src)?;
            return Err(Error::Malformed(format!(
                "expected array, got {}",
                frame.kind()
            )));
        }
        src.advance(1);

        let length = get_integer(src)?;
        if length == -1 {
            return Err(Error::Malformed("expected array, got null".to_string()));
        }
        let length = usize::try_from(length)
            .map_err(|_| Error::Malformed(format!("invalid multibulk length {length}")))?;

        let mut parts = Vec::with_capacity(length.min(1024));
        for _ in 0..length {
            let data_type = DataType::try_from(peek_byte(src)?)?;
            if !matches!(data_type, DataType::BulkString) {
                return Err(Error::Malformed(format!(
                    "expected bulk string, got {}",
                    data_type.name()
                )));
            }
            parts.push(Self::parse(src)?);
        }

        Ok(Frame::Array(parts))
    }

    /// Appends the wire representation of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.reserve(1 + 20 + CRLF.len() + bytes.len() + CRLF.len());
                dst.put_u8(u8::from(DataType::BulkString));
                dst.extend_from_slice(bytes.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(bytes);
                dst.extend_from_slice(CRLF);
            }
            // RESP2 has no dedicated null type, a null bulk string is used instead.
            Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.write_to(&mut bytes);
        bytes.to_vec()
    }

    fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk string",
            Frame::Null => "null",
            Frame::Array(_) => "array",
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Returns the bytes up to the next CRLF and moves the cursor past the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_integer(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::Malformed(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < len {
        return Err(Error::Incomplete);
    }
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    src.advance(len);
    Ok(&buf[start..start + len])
}

fn peek_byte(src: &Cursor<&[u8]>) -> Result<u8, Error> {
    src.chunk().first().copied().ok_or(Error::Incomplete)
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(char::from(byte))),
        }
    }
}

impl DataType {
    fn name(&self) -> &'static str {
        match self {
            Self::SimpleString => "simple string",
            Self::SimpleError => "error",
            Self::Integer => "integer",
            Self::BulkString => "bulk string",
            Self::Array => "array",
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        Error::Malformed("invalid UTF-8 in simple string".to_string())
    }
}
