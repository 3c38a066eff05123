//! Length-prefixed JSON framing for packets on byte streams.

use crate::{CommError, CommResult, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum packet size (16 MB).
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Reads a length-prefixed JSON packet.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub async fn read_packet<T: AsyncRead + Unpin>(io: &mut T) -> CommResult<Option<Packet>> {
    // Read 4-byte length prefix
    let mut len_bytes = [0u8; 4];
    match io.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_PACKET_SIZE {
        return Err(CommError::PacketTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    Ok(Some(serde_json::from_slice(&buf)?))
}

/// Writes a length-prefixed JSON packet.
pub async fn write_packet<T: AsyncWrite + Unpin>(io: &mut T, packet: &Packet) -> CommResult<()> {
    let data = serde_json::to_vec(packet)?;

    if data.len() > MAX_PACKET_SIZE {
        return Err(CommError::PacketTooLarge(data.len()));
    }

    let len_bytes = (data.len() as u32).to_be_bytes();
    io.write_all(&len_bytes).await?;
    io.write_all(&data).await?;
    io.flush().await?;

    Ok(())
}
