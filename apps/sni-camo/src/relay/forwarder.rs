//! Full-duplex byte pump between client and destination.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const COPY_BUF_LEN: usize = 16 * 1024;

/// Bytes moved by one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_to_dest: u64,
    pub bytes_from_dest: u64,
}

/// Copy in both directions until either side reaches EOF or fails.
///
/// Both streams are consumed and dropped on return, so the end of one
/// direction closes the other instead of leaving it half open. Byte counts
/// are reported even when a direction ended in an error.
pub async fn relay_bidirectional<C, D>(client: C, dest: D) -> (RelayStats, io::Result<()>)
where
    C: AsyncRead + AsyncWrite,
    D: AsyncRead + AsyncWrite,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut dest_rd, mut dest_wr) = tokio::io::split(dest);
    let mut stats = RelayStats::default();

    let result = {
        let upstream = pump(&mut client_rd, &mut dest_wr, &mut stats.bytes_to_dest);
        let downstream = pump(&mut dest_rd, &mut client_wr, &mut stats.bytes_from_dest);
        tokio::select! {
            res = upstream => {
                debug!("client side finished first");
                res
            }
            res = downstream => {
                debug!("destination side finished first");
                res
            }
        }
    };

    (stats, result)
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_LEN];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // best effort; the peer may already be gone
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *counter += n as u64;
    }
}
