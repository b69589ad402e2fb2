//! Verdict Socket Server
//!
//! Local framed protocol for verdict queries: one request per connection.
//! Request: 4-byte big-endian payload length, then that many packet bytes.
//! Response: one JSON `Verdict` document, then the connection closes.
//!
//! Connections are handled concurrently; the automaton is read lock-free.

use crate::engine::DpiEngine;
use crate::{DpiError, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Framed verdict server
pub struct VerdictServer {
    engine: Arc<DpiEngine>,
    max_frame: usize,
}

impl VerdictServer {
    pub fn new(engine: Arc<DpiEngine>, max_frame: usize) -> Self {
        Self { engine, max_frame }
    }

    /// Bind the listen address and serve forever
    pub async fn bind_and_serve(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr, "verdict server listening");
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "verdict connection accepted");

            let engine = Arc::clone(&self.engine);
            let max_frame = self.max_frame;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(engine, max_frame, stream).await {
                    tracing::warn!(%peer, error = %e, "verdict connection failed");
                }
            });
        }
    }
}

async fn handle_connection(
    engine: Arc<DpiEngine>,
    max_frame: usize,
    mut stream: TcpStream,
) -> Result<()> {
    let packet = match read_frame(&mut stream, max_frame).await {
        Ok(packet) => packet,
        Err(e) => {
            // Best-effort error document before closing.
            let body = serde_json::json!({ "error": e.to_string() });
            let _ = stream.write_all(body.to_string().as_bytes()).await;
            let _ = stream.shutdown().await;
            return Err(e);
        }
    };

    let verdict = engine.verdict_for_packet(&packet);
    let body = serde_json::to_vec(&verdict)
        .map_err(|e| DpiError::Protocol(format!("verdict encode: {}", e)))?;

    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream, max_frame: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| DpiError::Protocol(format!("short length prefix: {}", e)))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame {
        return Err(DpiError::Protocol(format!(
            "frame of {} bytes exceeds limit {}",
            len, max_frame
        )));
    }

    let mut packet = vec![0u8; len];
    stream
        .read_exact(&mut packet)
        .await
        .map_err(|e| DpiError::Protocol(format!("truncated frame: {}", e)))?;
    Ok(packet)
}
