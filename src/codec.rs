use bytes::{Buf, BytesMut};
use std::env;
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Frame};

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Frames a byte stream into RESP frames.
///
/// On the server side the codec only accepts requests (arrays of bulk strings). Clients, such as
/// the benchmark tool, use [`FrameCodec::client`] to accept any reply type.
pub struct FrameCodec {
    requests_only: bool,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn server() -> FrameCodec {
        FrameCodec {
            requests_only: true,
            max_frame_size: FrameCodec::max_frame_size(),
        }
    }

    pub fn client() -> FrameCodec {
        FrameCodec {
            requests_only: false,
            max_frame_size: FrameCodec::max_frame_size(),
        }
    }

    fn max_frame_size() -> usize {
        env::var("MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = frame::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Check if the frame size exceeds a certain limit to prevent DoS attacks
        if src.len() > self.max_frame_size {
            return Err(frame::Error::TooLarge {
                limit: self.max_frame_size,
            });
        }

        let mut cursor = Cursor::new(&src[..]);
        let parsed = if self.requests_only {
            Frame::parse_request(&mut cursor)
        } else {
            Frame::parse(&mut cursor)
        };

        let frame = match parsed {
            Ok(frame) => frame,
            Err(frame::Error::Incomplete) => return Ok(None), // Not enough data to parse a frame.
            Err(err) => return Err(err),
        };

        let position = cursor.position() as usize;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = frame::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
