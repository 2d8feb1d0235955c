use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::{CodecError, FrameCodec};
use crate::frame::Frame;

/// A framed, bidirectional RESP connection over any byte stream.
///
/// Dropping the connection closes the underlying stream.
pub struct Connection<S = TcpStream> {
    pub id: Uuid,
    // Data is read from the stream into the codec's read buffer. When a frame is parsed, the
    // corresponding data is removed from the buffer.
    framed: Framed<S, FrameCodec>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Connection<S> {
        Self::with_codec(stream, FrameCodec::default())
    }

    pub fn with_codec(stream: S, codec: FrameCodec) -> Connection<S> {
        Connection {
            id: Uuid::new_v4(),
            // Allocate the buffer with 4kb of capacity.
            framed: Framed::with_capacity(stream, codec, 4096),
        }
    }

    /// Waits for the next complete frame. `None` means the peer closed the stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        self.framed.next().await.transpose()
    }

    /// Writes a frame and flushes it to the stream.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.framed.send(frame).await
    }

    /// Flushes pending writes and shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        SinkExt::<Frame>::close(&mut self.framed).await
    }
}
