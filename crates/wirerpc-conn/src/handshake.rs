use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use wirerpc_frame::{write_preamble, FrameReader};

use crate::error::{Result, RpcError};

/// Send this side's preamble and verify the peer's, within `timeout`.
///
/// Both sides write before reading, so the exchange cannot deadlock on a
/// stream with any buffering at all.
pub(crate) async fn exchange_preamble<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let exchange = async {
        write_preamble(writer).await?;
        reader.read_preamble().await?;
        Ok::<_, RpcError>(())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(timeout)),
    }
}
