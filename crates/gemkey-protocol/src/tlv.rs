//! TLV Record Framing
//!
//! Every protocol message is one self-delimiting record.
//!
//! ## Record Format
//!
//! ```text
//! +------+--------+-----------------+
//! | Tag  | Length | Value           |
//! | 1B   | 1B     | Length bytes    |
//! +------+--------+-----------------+
//! ```
//!
//! A stream that ends before the tag byte is a clean end of stream. A stream
//! that ends anywhere after it is an incomplete record.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{MessageTag, MAX_VALUE_LEN, TLV_HEADER_SIZE};
use crate::errors::{ProtocolError, ProtocolResult};

/// A single decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
    /// Raw tag byte
    pub tag: u8,
    /// Value bytes (at most 255)
    pub value: Vec<u8>,
}

impl TlvRecord {
    /// Create a record, checking the value fits the length byte
    pub fn new(tag: u8, value: Vec<u8>) -> ProtocolResult<Self> {
        if value.len() > MAX_VALUE_LEN {
            return Err(ProtocolError::Encoding {
                len: value.len(),
                max: MAX_VALUE_LEN,
            });
        }
        Ok(Self { tag, value })
    }

    /// Create a record for a known protocol message
    pub fn message(tag: MessageTag, value: Vec<u8>) -> ProtocolResult<Self> {
        Self::new(tag.to_u8(), value)
    }

    /// The tag as a protocol message, if it is one
    pub fn message_tag(&self) -> Option<MessageTag> {
        MessageTag::from_u8(self.tag)
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> ProtocolResult<BytesMut> {
        encode(self.tag, &self.value)
    }

    /// Size on the wire
    pub fn wire_len(&self) -> usize {
        TLV_HEADER_SIZE + self.value.len()
    }
}

/// Encode `tag || len || value`
pub fn encode(tag: u8, value: &[u8]) -> ProtocolResult<BytesMut> {
    let len = u8::try_from(value.len()).map_err(|_| ProtocolError::Encoding {
        len: value.len(),
        max: MAX_VALUE_LEN,
    })?;

    let mut buf = BytesMut::with_capacity(TLV_HEADER_SIZE + value.len());
    buf.put_u8(tag);
    buf.put_u8(len);
    buf.put_slice(value);
    Ok(buf)
}

/// Decode one record from the front of `data`
///
/// Returns the record and the number of bytes consumed.
pub fn decode(data: &[u8]) -> ProtocolResult<(TlvRecord, usize)> {
    let (&tag, rest) = data.split_first().ok_or(ProtocolError::EndOfStream)?;
    let (&len, rest) = rest
        .split_first()
        .ok_or(ProtocolError::IncompleteRecord { needed: 1, got: 0 })?;

    let len = len as usize;
    if rest.len() < len {
        return Err(ProtocolError::IncompleteRecord {
            needed: len,
            got: rest.len(),
        });
    }

    let record = TlvRecord {
        tag,
        value: rest[..len].to_vec(),
    };
    Ok((record, TLV_HEADER_SIZE + len))
}

/// Read one record from an async stream
pub async fn read_record<R>(reader: &mut R) -> ProtocolResult<TlvRecord>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if read_full(reader, &mut tag).await? == 0 {
        return Err(ProtocolError::EndOfStream);
    }

    let mut len = [0u8; 1];
    if read_full(reader, &mut len).await? == 0 {
        return Err(ProtocolError::IncompleteRecord { needed: 1, got: 0 });
    }

    let mut value = vec![0u8; len[0] as usize];
    let got = read_full(reader, &mut value).await?;
    if got < value.len() {
        return Err(ProtocolError::IncompleteRecord {
            needed: value.len(),
            got,
        });
    }

    Ok(TlvRecord { tag: tag[0], value })
}

/// Write one record and flush
pub async fn write_record<W>(writer: &mut W, record: &TlvRecord) -> ProtocolResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let bytes = record.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(bytes.len())
}

/// Fill `buf` until it is full or the stream ends; returns bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
