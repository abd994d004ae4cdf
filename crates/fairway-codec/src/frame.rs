//! [`FrameCodec`] ties the pure header parsers in [`crate::headers`] to an
//! actual `AsyncRead`/`AsyncWrite` transport, transparently applying
//! compression when negotiated.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::compressor::Compressor;
use crate::error::CodecError;
use crate::headers::{self, NegotiationFrame, PayloadLength, RequestFrame, ResponseFrame, StreamFrame};
use crate::io::{read_body, read_exact_or_eof};

/// Reads and writes frames for one connection, carrying whatever the
/// negotiation phase settled on: whether requests are timeout-prefixed, and
/// which compressor (if any) wraps every non-negotiation frame.
#[derive(Clone)]
pub struct FrameCodec {
    timeout_enabled: bool,
    compressor: Option<Arc<dyn Compressor>>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            timeout_enabled: false,
            compressor: None,
        }
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, enabled: bool) -> Self {
        self.timeout_enabled = enabled;
        self
    }

    pub fn with_compressor(mut self, compressor: Option<Arc<dyn Compressor>>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn timeout_enabled(&self) -> bool {
        self.timeout_enabled
    }

    // ----------------------------------------------------------- negotiation

    /// Negotiation frames are never compressed — compression is itself one
    /// of the things negotiation negotiates.
    pub async fn read_negotiation<R>(&self, reader: &mut R) -> Result<Option<NegotiationFrame>, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let Some(bytes) =
            read_logical_frame(reader, headers::NEGOTIATION_HEADER_LEN, headers::negotiation_payload_len)
                .await?
        else {
            return Ok(None);
        };
        Ok(Some(headers::parse_negotiation(&bytes)?))
    }

    pub async fn write_negotiation<W>(&self, writer: &mut W, frame: &NegotiationFrame) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = headers::encode_negotiation(frame);
        writer.write_all(&bytes).await?;
        Ok(())
    }

    // --------------------------------------------------------------- request

    pub async fn read_request<R>(&self, reader: &mut R) -> Result<Option<RequestFrame>, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let bytes = match &self.compressor {
            Some(c) => read_compressed_frame(reader, c.as_ref()).await?,
            None => {
                let header_len = headers::request_header_len(self.timeout_enabled);
                read_logical_frame(reader, header_len, headers::request_payload_len).await?
            }
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        Ok(Some(headers::parse_request(&bytes, self.timeout_enabled)?))
    }

    pub async fn write_request<W>(&self, writer: &mut W, frame: &RequestFrame) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let raw = headers::encode_request(frame, self.timeout_enabled);
        self.write_raw(writer, &raw).await
    }

    // -------------------------------------------------------------- response

    pub async fn read_response<R>(&self, reader: &mut R) -> Result<Option<ResponseFrame>, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let bytes = match &self.compressor {
            Some(c) => read_compressed_frame(reader, c.as_ref()).await?,
            None => read_logical_frame(reader, headers::RESPONSE_HEADER_LEN, headers::response_payload_len).await?,
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        Ok(Some(headers::parse_response(&bytes)?))
    }

    pub async fn write_response<W>(&self, writer: &mut W, frame: &ResponseFrame) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let raw = headers::encode_response(frame);
        self.write_raw(writer, &raw).await
    }

    // ---------------------------------------------------------------- stream

    pub async fn read_stream<R>(&self, reader: &mut R) -> Result<Option<StreamFrame>, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let bytes = match &self.compressor {
            Some(c) => read_compressed_frame(reader, c.as_ref()).await?,
            None => read_logical_frame(reader, headers::STREAM_HEADER_LEN, headers::stream_payload_len).await?,
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        Ok(Some(headers::parse_stream(&bytes)?))
    }

    pub async fn write_stream<W>(&self, writer: &mut W, frame: &StreamFrame) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        let raw = headers::encode_stream(frame);
        self.write_raw(writer, &raw).await
    }

    async fn write_raw<W>(&self, writer: &mut W, raw: &[u8]) -> Result<(), CodecError>
    where
        W: AsyncWrite + Unpin,
    {
        match &self.compressor {
            Some(c) => {
                let compressed = c.compress(raw);
                writer
                    .write_all(&(compressed.len() as u32).to_le_bytes())
                    .await?;
                writer.write_all(&compressed).await?;
            }
            None => writer.write_all(raw).await?,
        }
        Ok(())
    }
}

/// Read one logical (uncompressed) frame: a fixed-size header, then
/// whatever body length the header implies. Returns `None` on a clean EOF
/// at the frame boundary.
async fn read_logical_frame<R>(
    reader: &mut R,
    header_len: usize,
    payload_len_of: impl Fn(&[u8]) -> Result<PayloadLength, CodecError>,
) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = vec![0u8; header_len];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }
    match payload_len_of(&header)? {
        PayloadLength::EndOfStream => Ok(Some(header)),
        PayloadLength::Bytes(len) => {
            let body = read_body(reader, len).await?;
            let mut full = header;
            full.extend_from_slice(&body);
            Ok(Some(full))
        }
    }
}

/// Read one compressed envelope (4-byte length-prefixed compressed blob)
/// and return the decompressed logical-frame bytes.
async fn read_compressed_frame<R>(
    reader: &mut R,
    compressor: &dyn Compressor,
) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf).await? {
        return Ok(None);
    }
    let compressed_len = u32::from_le_bytes(len_buf) as usize;
    let compressed = read_body(reader, compressed_len).await?;
    Ok(Some(compressor.decompress(&compressed)?))
}
