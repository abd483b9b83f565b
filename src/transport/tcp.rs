use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::PendingSlot;
use crate::error::{ProbeError, Result};

/// Inspects everything received so far.
///
/// `Ok(Some(frame))` completes the request with `frame`, `Ok(None)` waits for
/// more data and `Err` fails the request.
pub type FrameValidator = dyn Fn(&[u8]) -> Result<Option<Vec<u8>>> + Send + Sync;

const READ_CHUNK: usize = 4096;

/// TCP client with one outstanding request at a time.
///
/// The connection is closed as soon as a request settles (frame delivered,
/// validator failure or timeout), so one transport serves one exchange.
#[derive(Debug)]
pub struct TcpTransport {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
    pending: PendingSlot,
}

impl TcpTransport {
    /// Connect to `host:port`, giving up after `timeout_dur`.
    pub async fn connect(host: &str, port: u16, timeout_dur: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);

        let stream = timeout(timeout_dur, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ProbeError::TcpTimeout(addr.clone()))?
            .map_err(ProbeError::UnreachableHost)?;
        // Latency matters more than throughput for a single status exchange.
        let _ = stream.set_nodelay(true);

        debug!("connected to {}", addr);
        Ok(Self {
            addr,
            stream: Mutex::new(Some(stream)),
            pending: PendingSlot::default(),
        })
    }

    /// Write `payload` and wait for a reply.
    ///
    /// Without a validator the request completes on the first chunk read,
    /// whether or not the reply is complete.
    pub async fn send(
        &self,
        payload: &[u8],
        validator: Option<&FrameValidator>,
        timeout_dur: Duration,
    ) -> Result<Vec<u8>> {
        let _pending = self.pending.acquire()?;

        let mut slot = self.stream.lock().await;
        let stream = slot.as_mut().ok_or(ProbeError::ConnectionClosed)?;

        let result = match timeout(timeout_dur, exchange(stream, payload, validator)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::TcpTimeout(self.addr.clone())),
        };

        if let Some(mut stream) = slot.take() {
            let _ = stream.shutdown().await;
        }
        debug!("closed connection to {}", self.addr);

        result
    }

    /// Drop the connection. Later sends fail with [ProbeError::ConnectionClosed].
    pub fn close(&mut self) {
        self.stream.get_mut().take();
    }
}

async fn exchange(
    stream: &mut TcpStream,
    payload: &[u8],
    validator: Option<&FrameValidator>,
) -> Result<Vec<u8>> {
    stream.write_all(payload).await.map_err(ProbeError::WriteFailed)?;
    stream.flush().await.map_err(ProbeError::WriteFailed)?;

    let mut accumulated: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(ProbeError::ReceiveError)?;
        if n == 0 {
            return Err(ProbeError::ConnectionClosed);
        }
        trace!("received {} bytes ({} total)", n, accumulated.len() + n);
        accumulated.extend_from_slice(&chunk[..n]);

        let validate = match validator {
            Some(validate) => validate,
            None => return Ok(accumulated),
        };
        if let Some(frame) = validate(&accumulated)? {
            return Ok(frame);
        }
    }
}
