//! Length-prefixed framing over a byte stream.
//!
//! A frame is `[header][payload]`. The header is the bincode encoding of the
//! payload length as a `u32`, so it is always [`HEADER_SIZE`] bytes. The
//! payload is one bincode-encoded [`Message`].
//!
//! A [`Transport`] runs at most one logical operation at a time: a plain
//! read, a plain write, or a whole [`Transport::request`] chain. Starting a
//! second one while the first is still in flight fails with
//! [`NetError::ConcurrentOperation`] instead of interleaving frames.

use crate::error::NetError;
use crate::protocol::{Message, Request, Response};
use bincode::{deserialize, serialize};
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

pub const HEADER_SIZE: usize = 4;

/// Frames larger than this are rejected before allocating.
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Encodes a message into a complete frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, NetError> {
    let payload = serialize(message)?;
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| NetError::Protocol(format!("message too large: {} bytes", payload.len())))?;

    let mut frame = serialize(&length)?;
    debug_assert_eq!(frame.len(), HEADER_SIZE);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<usize, NetError> {
    let length: u32 = deserialize(header)?;
    if length > MAX_MESSAGE_SIZE {
        return Err(NetError::Protocol(format!(
            "frame header claims {} bytes",
            length
        )));
    }
    Ok(length as usize)
}

/// Clears the in-flight flag when the operation ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Transport<S = TcpStream> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    busy: AtomicBool,
}

impl Transport<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::new(stream))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            busy: AtomicBool::new(false),
        }
    }

    fn begin(&self) -> Result<InFlight<'_>, NetError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NetError::ConcurrentOperation)?;
        Ok(InFlight(&self.busy))
    }

    /// True while a read, write or request chain is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    async fn write_frame(&self, message: &Message) -> Result<(), NetError> {
        let frame = encode_frame(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!("wrote {} ({} bytes)", message.kind(), frame.len());
        Ok(())
    }

    async fn read_frame(&self) -> Result<Message, NetError> {
        let mut reader = self.reader.lock().await;
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let length = decode_header(&header)?;

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await?;
        let message: Message = deserialize(&payload)?;
        trace!("read {} ({} bytes)", message.kind(), length);
        Ok(message)
    }

    pub async fn write_message(&self, message: &Message) -> Result<(), NetError> {
        let _op = self.begin()?;
        self.write_frame(message).await
    }

    /// Writes several messages as one logical operation.
    pub async fn write_all_messages(&self, messages: &[Message]) -> Result<(), NetError> {
        let _op = self.begin()?;
        for message in messages {
            self.write_frame(message).await?;
        }
        Ok(())
    }

    pub async fn read_message(&self) -> Result<Message, NetError> {
        let _op = self.begin()?;
        self.read_frame().await
    }

    /// Like [`Transport::read_message`], but gives up with
    /// [`NetError::Timeout`] when nothing arrives within `limit`. The
    /// transport should be dropped after a timeout.
    pub async fn read_message_timeout(&self, limit: Duration) -> Result<Message, NetError> {
        let _op = self.begin()?;
        match tokio::time::timeout(limit, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout),
        }
    }

    pub async fn read_request(&self) -> Result<Request, NetError> {
        match self.read_message().await? {
            Message::Request(request) => Ok(request),
            other => Err(NetError::unexpected("Request", &other)),
        }
    }

    pub async fn read_response(&self) -> Result<Response, NetError> {
        match self.read_message().await? {
            Message::Response(response) => Ok(response),
            other => Err(NetError::unexpected("Response", &other)),
        }
    }

    /// Sends a request and follows the response chain.
    ///
    /// Every `Part` response is handed to `on_response` and another response
    /// is read. The first non-partial response is handed to `on_response`
    /// too, ends the chain and is returned.
    pub async fn request<F>(&self, request: &Request, mut on_response: F) -> Result<Response, NetError>
    where
        F: FnMut(&Response),
    {
        let _op = self.begin()?;
        self.write_frame(&Message::Request(request.clone())).await?;
        loop {
            let response = match self.read_frame().await? {
                Message::Response(response) => response,
                other => return Err(NetError::unexpected("Response", &other)),
            };
            on_response(&response);
            if !response.is_partial() {
                return Ok(response);
            }
        }
    }
}
