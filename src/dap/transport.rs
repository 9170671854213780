//! Framed DAP transport over a duplex byte stream.
//!
//! The read and write halves are independent so one task can block on the
//! socket while another writes requests. The concrete stream is a loopback
//! TCP socket in production; tests substitute `tokio::io::duplex` pipes.

use super::codec::{encode_frame, FrameDecoder};
use super::transport_trait::{DapReader, DapWriter};
use super::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{trace, warn};

const READ_CHUNK: usize = 8 * 1024;

pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

pub struct FrameWriter<W> {
    writer: W,
}

/// Split a connected TCP stream into framed halves.
pub fn from_tcp(stream: TcpStream) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next well-formed message. Malformed frames are reported
    /// and skipped (the decoder has already advanced past them); only a
    /// dead stream surfaces an error.
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            match self.decoder.next_message() {
                Ok(Some(msg)) => {
                    trace!("DAP received: {:?}", msg);
                    return Ok(msg);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("skipping malformed DAP frame: {}", e);
                    continue;
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::disconnected("adapter closed the socket"));
            }
            self.decoder.push(&chunk[..n]);
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        trace!("DAP sending: {:?}", msg);
        let frame = encode_frame(msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> DapReader for FrameReader<R> {
    async fn read_message(&mut self) -> Result<Message> {
        FrameReader::read_message(self).await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DapWriter for FrameWriter<W> {
    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        FrameWriter::write_message(self, msg).await
    }
}
