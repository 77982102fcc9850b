use crate::crypto::{Cipher, Direction};
use crate::network::stream::{PacketReader, PacketWriter};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// TCP listener handing out cipher-wrapped connections
///
/// Transient accept errors are retried with exponential backoff starting at
/// 1s and doubling up to 64s; anything else is fatal for the listener.
pub struct PacketListener {
    listener: TcpListener,
    cipher: Arc<Box<dyn Cipher>>,
}

impl PacketListener {
    pub async fn bind(addr: &str, cipher: Arc<Box<dyn Cipher>>) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("listening on {}", addr);
        Ok(Self { listener, cipher })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(
        &self,
    ) -> crate::Result<(
        PacketReader<OwnedReadHalf>,
        PacketWriter<OwnedWriteHalf>,
        SocketAddr,
    )> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    let (read_half, write_half) = socket.into_split();
                    return Ok((
                        PacketReader::new(read_half, self.cipher.clone(), Direction::ClientToServer),
                        PacketWriter::new(write_half, self.cipher.clone(), Direction::ServerToClient),
                        peer,
                    ));
                }
                Err(err) => match err.kind() {
                    ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionReset
                    | ErrorKind::WouldBlock => {
                        if backoff > 64 {
                            tracing::error!("accept retry exhausted: {}", err);
                            return Err(err.into());
                        }
                        tracing::warn!("accept failed, retrying in {}s: {}", backoff, err);
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff *= 2;
                    }
                    _ => {
                        tracing::error!("fatal accept error: {}", err);
                        return Err(err.into());
                    }
                },
            }
        }
    }
}
