//! Envelope codec for TCP streams.
//!
//! Wire format: 24-byte header (magic, command, length, checksum) + payload.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::{Header, WireMessage};
use crate::{ProtocolError, Result, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Codec for framing [`WireMessage`] values over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least the header
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Magic and command are checked before waiting on the payload
        let header = Header::parse(&src[..HEADER_SIZE])?;
        let length = header.length as usize;

        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // Check if we have the full message
        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);

        WireMessage::from_header(header, payload.to_vec()).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::TruncatedStream),
        }
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<()> {
        if item.payload().len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: item.payload().len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(item.encoded_len());
        item.encode_into(dst)
    }
}

/// Buffered message reader/writer over any async byte stream.
///
/// Frames that arrive back to back in one read are kept in the buffer for
/// the next call.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    buf: BytesMut,
    codec: WireCodec,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            codec: WireCodec,
        }
    }

    /// Read the next complete message. EOF before a full frame is
    /// `TruncatedStream`.
    pub async fn read_message(&mut self) -> Result<WireMessage> {
        self.next_message()
            .await?
            .ok_or(ProtocolError::TruncatedStream)
    }

    /// Like [`read_message`](Self::read_message), but a peer closing the
    /// stream on a frame boundary yields `None`.
    pub async fn next_message(&mut self) -> Result<Option<WireMessage>> {
        loop {
            if let Some(msg) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(msg));
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return self.codec.decode_eof(&mut self.buf);
            }
        }
    }

    pub async fn write_message(&mut self, msg: WireMessage) -> Result<()> {
        let mut out = BytesMut::new();
        self.codec.encode(msg, &mut out)?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Command;
    use bytes::BufMut;

    fn verack() -> WireMessage {
        WireMessage::new(Command::Verack, Vec::new()).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = WireCodec;
        let msg = WireMessage::new(Command::Inv, vec![1, 2, 3, 4]).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_message() {
        let mut codec = WireCodec;
        let msg = WireMessage::new(Command::Addr, vec![0xAB; 100]).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();

        // Header only
        let mut partial = buf.split_to(HEADER_SIZE + 10);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Less than a header
        let mut tiny = BytesMut::from(&[0xE9, 0xBE][..]);
        assert!(codec.decode(&mut tiny).unwrap().is_none());
    }

    #[test]
    fn test_multiple_messages() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();

        for i in 0..5u8 {
            let msg = WireMessage::new(Command::Inv, vec![i; i as usize]).unwrap();
            codec.encode(msg, &mut buf).unwrap();
        }

        for i in 0..5u8 {
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.payload(), &vec![i; i as usize][..]);
        }

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();

        // Header claiming a huge payload
        buf.put_u32(crate::PROTOCOL_MAGIC);
        buf.put_slice(b"msg\0\0\0\0\0\0\0\0\0");
        buf.put_u32((MAX_PAYLOAD_SIZE + 1) as u32);
        buf.put_u32(0);
        buf.extend_from_slice(&[0u8; 100]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected_before_payload() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec.encode(verack(), &mut buf).unwrap();
        buf[3] = 0x00;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_decode_eof_with_leftover() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec.encode(verack(), &mut buf).unwrap();
        buf.extend_from_slice(&[0xE9, 0xBE, 0xB4]);

        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream)
        ));
    }

    #[tokio::test]
    async fn test_framed_stream_back_to_back() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        tx.write_message(WireMessage::new(Command::Addr, vec![1]).unwrap())
            .await
            .unwrap();
        tx.write_message(WireMessage::new(Command::Inv, vec![2]).unwrap())
            .await
            .unwrap();

        assert_eq!(rx.read_message().await.unwrap().command(), &Command::Addr);
        assert_eq!(rx.read_message().await.unwrap().command(), &Command::Inv);
    }

    #[tokio::test]
    async fn test_framed_stream_eof_mid_frame() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut rx = FramedStream::new(b);

        let bytes = WireMessage::new(Command::Msg, vec![0u8; 50])
            .unwrap()
            .encode()
            .unwrap();
        a.write_all(&bytes[..30]).await.unwrap();
        drop(a);

        assert!(matches!(
            rx.read_message().await,
            Err(ProtocolError::TruncatedStream)
        ));
    }

    #[tokio::test]
    async fn test_next_message_clean_eof() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        tx.write_message(verack()).await.unwrap();
        drop(tx);

        assert!(rx.next_message().await.unwrap().is_some());
        assert!(rx.next_message().await.unwrap().is_none());
    }
}
