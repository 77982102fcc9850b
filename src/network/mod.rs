//! Encrypted packet transport over TCP
//!
//! `stream` carries sealed datagrams back to back under a cipher, framed by
//! nothing but the IP total-length field; `listener` accepts and wraps
//! incoming connections; `connect` dials out and does the same for the
//! client.

pub mod listener;
pub mod stream;

use crate::crypto::{Cipher, Direction};
use crate::network::stream::{PacketReader, PacketWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials the server and returns cipher-wrapped stream halves
pub async fn connect(
    addr: &str,
    cipher: Arc<Box<dyn Cipher>>,
) -> crate::Result<(PacketReader<OwnedReadHalf>, PacketWriter<OwnedWriteHalf>)> {
    let stream = match timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err("connection timeout".into()),
    };

    let (read_half, write_half) = stream.into_split();
    Ok((
        PacketReader::new(read_half, cipher.clone(), Direction::ServerToClient),
        PacketWriter::new(write_half, cipher, Direction::ClientToServer),
    ))
}
