//! Low-level read helpers shared by every frame kind: a clean zero-byte
//! read is EOF, anything else short is a protocol error, and bodies are
//! read in a loop tolerating however many chunks the transport hands back.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::CodecError;

/// Read exactly `buf.len()` bytes. Returns `Ok(false)` only for a clean,
/// zero-byte EOF at the very start of the read (a legitimate end of stream
/// between frames); any other shortfall is a protocol error.
pub async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            tracing::warn!(
                target: "fairway::codec",
                expected = buf.len(),
                got = filled,
                "short read on frame header"
            );
            return Err(CodecError::ShortRead {
                expected: buf.len(),
                got: filled,
            });
        }
        filled += n;
    }
    Ok(true)
}

/// Read exactly `len` declared body bytes, across however many chunks the
/// transport delivers them in.
pub async fn read_body<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(CodecError::LengthMismatch {
                expected: len,
                got: filled,
            });
        }
        filled += n;
    }
    Ok(buf)
}
