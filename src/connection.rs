use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

use crate::codec::MessageCodec;
use crate::frame::{self, OpReply, RawMessage};
use crate::Result;

pub struct Connection {
    stream: TcpStream,
    // Data is read from the socket into the read buffer. When a frame is
    // parsed, the corresponding data is removed from the buffer.
    buffer: BytesMut,
    codec: MessageCodec,
    pub client_addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, client_addr: SocketAddr) -> Connection {
        Connection {
            stream,
            buffer: BytesMut::with_capacity(4096),
            codec: MessageCodec,
            client_addr,
        }
    }

    /// Reads the next whole frame. Returns `None` on a clean end of stream;
    /// an end of stream in the middle of a frame is a truncated message.
    pub async fn read_message(&mut self) -> Result<Option<RawMessage>> {
        loop {
            if let Some(raw) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(raw));
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(frame::Error::Truncated.into());
            }
        }
    }

    pub async fn write_reply(&mut self, reply: &OpReply) -> Result<()> {
        let bytes = reply.encode()?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }
}
