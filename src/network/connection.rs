//! Per-connection handler task.
//!
//! Each accepted socket runs one of these. The read side parses and
//! dispatches commands strictly sequentially; the write side is a dedicated
//! task draining a bounded channel, which serializes all writes (fan-out
//! from other connections lands on the same channel).

use crate::handlers::{ClientState, Context, Line, Registry};
use crate::state::{Hub, OUTGOING_BUFFER};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A client connection handler.
pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    registry: Arc<Registry>,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr, hub: Arc<Hub>, registry: Arc<Registry>) -> Self {
        Self {
            stream,
            addr,
            hub,
            registry,
        }
    }

    /// Run the connection to completion: greeting, command loop, teardown.
    #[instrument(skip(self), fields(addr = %self.addr), name = "connection")]
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Client connected");

        let (read_half, write_half) = self.stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(OUTGOING_BUFFER);

        // --- Writer task: sole owner of the socket's write half. ---
        let write_timeout = Duration::from_secs(self.hub.config.server.write_timeout_secs.max(1));
        let write_handle = tokio::spawn(async move {
            let mut writer = BufWriter::new(write_half);
            let mut rx = outgoing_rx;
            while let Some(line) = rx.recv().await {
                let write = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\r\n").await?;
                    writer.flush().await
                };
                match tokio::time::timeout(write_timeout, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "Write error");
                        break;
                    }
                    Err(_) => {
                        debug!("Write timeout");
                        break;
                    }
                }
            }
        });

        // --- Greeting: welcome NOTICE, then the server public key. ---
        let server_name = self.hub.server_name().to_string();
        let _ = outgoing_tx
            .send(format!(":{server_name} NOTICE * :Welcome to {server_name}"))
            .await;
        match self.hub.crypto.public_key_pem() {
            Ok(pem) => {
                let _ = outgoing_tx.send(format!("PUBKEY :{pem}")).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to export public key");
                drop(outgoing_tx);
                let _ = write_handle.await;
                return Ok(());
            }
        }

        // --- Command loop. ---
        let mut client = ClientState::default();
        let addr_ip = self.addr.ip().to_string();
        let read_timeout = Duration::from_secs(self.hub.config.server.read_timeout_secs.max(1));
        let mut reader = BufReader::new(read_half).lines();

        loop {
            // The kick/ban path cancels the handle's token; before login a
            // fresh token stands in and never fires.
            let disconnect = client
                .handle
                .as_ref()
                .map(|h| h.disconnect.clone())
                .unwrap_or_else(CancellationToken::new);

            let line = tokio::select! {
                _ = self.hub.shutdown.cancelled() => {
                    let _ = outgoing_tx.send("ERROR :Server shutting down".to_string()).await;
                    break;
                }
                _ = disconnect.cancelled() => {
                    debug!("Connection closed by engine");
                    break;
                }
                read = tokio::time::timeout(read_timeout, reader.next_line()) => match read {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => {
                        debug!("Client disconnected");
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, "Read error");
                        break;
                    }
                    Err(_) => {
                        info!("Read deadline exceeded, closing connection");
                        break;
                    }
                },
            };

            let Some(parsed) = Line::parse(&line) else {
                continue; // empty lines are skipped
            };

            // Activity on the session resets its idle expiry.
            if let Some(session_id) = &client.session_id {
                let _ = self.hub.sessions.touch_session(session_id).await;
            }

            let mut ctx = Context {
                hub: &self.hub,
                sender: &outgoing_tx,
                addr: &addr_ip,
                client: &mut client,
            };

            if let Err(e) = self.registry.dispatch(&mut ctx, &parsed).await {
                debug!(command = %parsed.command, code = e.error_code(), error = %e, "Handler error");
                let _ = outgoing_tx.send(format!("ERROR :{e}")).await;
                if e.should_disconnect() {
                    break;
                }
            }

            if client.quitting {
                break;
            }
        }

        // --- Teardown: deregister, destroy the session, drain the writer. ---
        if let Some(session_id) = &client.session_id {
            self.hub.connections.remove(session_id);
            // The sweeper or an explicit logout may have beaten us here.
            if let Err(e) = self.hub.sessions.destroy_session(session_id).await {
                debug!(error = %e, "Session already destroyed");
            }
        }

        if let Some(account) = &client.account {
            info!(username = %account.username, "Client session ended");
        }

        drop(outgoing_tx);
        let _ = write_handle.await;
        info!("Connection closed");
        Ok(())
    }
}
