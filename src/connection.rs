use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::{self, Frame};

/// A TCP stream framed into RESP frames.
///
/// Frames are read one at a time and every write is flushed before returning, so a peer that
/// stops reading replies stops having its requests read as well.
pub struct Connection {
    pub id: Uuid,
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    /// The server side of a connection, which only accepts requests.
    pub fn new(stream: TcpStream) -> Connection {
        Connection::with_codec(stream, FrameCodec::server())
    }

    /// The client side of a connection, which accepts any reply.
    pub fn client(stream: TcpStream) -> Connection {
        Connection::with_codec(stream, FrameCodec::client())
    }

    fn with_codec(stream: TcpStream, codec: FrameCodec) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            framed: Framed::new(stream, codec),
        }
    }

    /// Returns the next frame, or `None` once the peer has closed the connection cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        self.framed.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), frame::Error> {
        self.framed.send(frame).await
    }
}
