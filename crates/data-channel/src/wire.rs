//! Offer header sent by the sender before the file bytes.
//!
//! # Wire format
//!
//! ```text
//! OFFER (sender -> receiver):
//!   [2 bytes BE: name_len]
//!   [name_len bytes: file name UTF-8, no directory part]
//!   [8 bytes BE: file_size]
//!   [file_size bytes: raw file data]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;

/// What the sender offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferHeader {
    /// Bare file name suggested to the receiver.
    pub name: String,
    /// Total file size in bytes.
    pub size: u64,
}

/// Writes an offer header to the stream.
pub async fn write_offer<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &OfferHeader,
) -> Result<(), ChannelError> {
    purple_xfer::validate_remote_filename(&header.name)?;

    let name_bytes = header.name.as_bytes();
    let name_len = name_bytes.len();
    if name_len > u16::MAX as usize {
        return Err(ChannelError::Protocol(format!(
            "name too long: {name_len} bytes (max {})",
            u16::MAX
        )));
    }

    writer.write_u16(name_len as u16).await?;
    writer.write_all(name_bytes).await?;
    writer.write_u64(header.size).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and validates an offer header.
pub async fn read_offer<R: AsyncRead + Unpin>(reader: &mut R) -> Result<OfferHeader, ChannelError> {
    let name_len = reader.read_u16().await?;
    if name_len == 0 {
        return Err(ChannelError::Protocol("empty file name".into()));
    }

    let mut name_buf = vec![0u8; name_len as usize];
    reader.read_exact(&mut name_buf).await?;
    let name = String::from_utf8(name_buf)
        .map_err(|e| ChannelError::Protocol(format!("invalid UTF-8 name: {e}")))?;
    purple_xfer::validate_remote_filename(&name)?;

    let size = reader.read_u64().await?;

    Ok(OfferHeader { name, size })
}
