use std::any::Any;

use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;

/// Largest text an SDES item can carry (8-bit length field).
pub const SDES_MAX_OCTET_COUNT: usize = (1 << 8) - 1;

/// SDES item types (RFC 3550 §6.5).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SdesType {
    #[default]
    SdesEnd = 0,
    SdesCname = 1,
    SdesName = 2,
    SdesEmail = 3,
    SdesPhone = 4,
    SdesLocation = 5,
    SdesTool = 6,
    SdesNote = 7,
    SdesPrivate = 8,
}

impl From<u8> for SdesType {
    fn from(b: u8) -> Self {
        match b {
            1 => SdesType::SdesCname,
            2 => SdesType::SdesName,
            3 => SdesType::SdesEmail,
            4 => SdesType::SdesPhone,
            5 => SdesType::SdesLocation,
            6 => SdesType::SdesTool,
            7 => SdesType::SdesNote,
            8 => SdesType::SdesPrivate,
            _ => SdesType::SdesEnd,
        }
    }
}

/// One item inside an SDES chunk: a type octet, a length octet and UTF-8
/// text. Items are not individually padded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: Bytes,
}

impl MarshalSize for SourceDescriptionItem {
    fn marshal_size(&self) -> usize {
        2 + self.text.len()
    }
}

/// A per-SSRC chunk: the source identifier followed by a zero-terminated
/// item list, padded with zero octets to the next 32-bit boundary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    fn raw_len(&self) -> usize {
        // SSRC + items + the terminating zero octet
        4 + self
            .items
            .iter()
            .map(|item| item.marshal_size())
            .sum::<usize>()
            + 1
    }
}

impl MarshalSize for SourceDescriptionChunk {
    fn marshal_size(&self) -> usize {
        (self.raw_len() + 3) & !3
    }
}

impl Marshal for SourceDescriptionChunk {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::BufferTooShort);
        }

        buf[0..4].copy_from_slice(&self.source.to_be_bytes());
        let mut off = 4;
        for item in &self.items {
            if item.sdes_type == SdesType::SdesEnd {
                return Err(Error::SdesMissingType);
            }
            if item.text.len() > SDES_MAX_OCTET_COUNT {
                return Err(Error::SdesTextTooLong);
            }
            buf[off] = item.sdes_type as u8;
            buf[off + 1] = item.text.len() as u8;
            buf[off + 2..off + 2 + item.text.len()].copy_from_slice(&item.text);
            off += item.marshal_size();
        }
        // item list terminator plus zero padding to the word boundary
        for b in buf.iter_mut().take(size).skip(off) {
            *b = 0;
        }

        Ok(size)
    }
}

impl Unmarshal for SourceDescriptionChunk {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < 4 {
            return Err(Error::Truncated);
        }
        let source = buf.get_u32();

        let mut items = vec![];
        let mut consumed = 4usize;
        loop {
            if !buf.has_remaining() {
                return Err(Error::Truncated);
            }
            let t = buf.get_u8();
            consumed += 1;
            if t == SdesType::SdesEnd as u8 {
                break;
            }
            if SdesType::from(t) == SdesType::SdesEnd {
                return Err(Error::UnsupportedType(t));
            }
            if !buf.has_remaining() {
                return Err(Error::Truncated);
            }
            let len = buf.get_u8() as usize;
            consumed += 1;
            if buf.remaining() < len {
                return Err(Error::Truncated);
            }
            items.push(SourceDescriptionItem {
                sdes_type: SdesType::from(t),
                text: buf.copy_to_bytes(len),
            });
            consumed += len;
        }

        let pad = (4 - consumed % 4) % 4;
        if buf.remaining() < pad {
            return Err(Error::Truncated);
        }
        buf.advance(pad);

        Ok(SourceDescriptionChunk { source, items })
    }
}

/// An RTCP Source Description packet (RFC 3550 §6.5).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl SourceDescription {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + self
                .chunks
                .iter()
                .map(|chunk| chunk.marshal_size())
                .sum::<usize>()
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > COUNT_MAX {
            return Err(Error::TooManyChunks);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut off = self.header().marshal_to(buf)?;
        for chunk in &self.chunks {
            off += chunk.marshal_to(&mut buf[off..])?;
        }

        Ok(off)
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::WrongType);
        }

        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len {
            return Err(Error::Truncated);
        }
        let mut body = buf.copy_to_bytes(body_len);

        let mut chunks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            chunks.push(SourceDescriptionChunk::unmarshal(&mut body)?);
        }
        if body.has_remaining() {
            return Err(Error::WrongMarshalSize);
        }

        Ok(SourceDescription { chunks })
    }
}

impl Packet for SourceDescription {
    fn header(&self) -> Header {
        SourceDescription::header(self)
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.source).collect()
    }

    fn raw_size(&self) -> usize {
        self.marshal_size()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other.as_any().downcast_ref::<SourceDescription>() == Some(self)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdes_round_trip() {
        let sdes = SourceDescription {
            chunks: vec![
                SourceDescriptionChunk {
                    source: 0x902F_9E2E,
                    items: vec![
                        SourceDescriptionItem {
                            sdes_type: SdesType::SdesCname,
                            text: Bytes::from_static(b"user@example.com"),
                        },
                        SourceDescriptionItem {
                            sdes_type: SdesType::SdesName,
                            text: Bytes::from_static(b"John Doe"),
                        },
                    ],
                },
                SourceDescriptionChunk {
                    source: 0xBC5E_9A40,
                    items: vec![SourceDescriptionItem {
                        sdes_type: SdesType::SdesCname,
                        text: Bytes::from_static(b"peer@example.com"),
                    }],
                },
            ],
        };

        let raw = sdes.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        let parsed = SourceDescription::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, sdes);
        assert_eq!(parsed.marshal().unwrap(), raw);
    }

    #[test]
    fn test_sdes_chunk_padding_boundaries() {
        // text lengths chosen so raw chunk lengths land on every residue mod 4
        for text_len in 0..8usize {
            let chunk = SourceDescriptionChunk {
                source: 1,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::from(vec![b'x'; text_len]),
                }],
            };
            let raw = chunk.marshal().unwrap();
            assert_eq!(raw.len() % 4, 0, "text_len {text_len}");
            let parsed = SourceDescriptionChunk::unmarshal(&mut raw.clone()).unwrap();
            assert_eq!(parsed, chunk, "text_len {text_len}");
        }
    }

    #[test]
    fn test_sdes_empty_chunk_list_item() {
        // a chunk with no items is just SSRC + terminator + padding
        let chunk = SourceDescriptionChunk {
            source: 42,
            items: vec![],
        };
        let raw = chunk.marshal().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(
            SourceDescriptionChunk::unmarshal(&mut raw.clone()).unwrap(),
            chunk
        );
    }

    #[test]
    fn test_sdes_text_too_long() {
        let chunk = SourceDescriptionChunk {
            source: 1,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from(vec![b'x'; 256]),
            }],
        };
        assert_eq!(chunk.marshal(), Err(Error::SdesTextTooLong));
    }

    #[test]
    fn test_sdes_end_item_refused_on_marshal() {
        let chunk = SourceDescriptionChunk {
            source: 1,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesEnd,
                text: Bytes::new(),
            }],
        };
        assert_eq!(chunk.marshal(), Err(Error::SdesMissingType));
    }

    #[test]
    fn test_sdes_missing_terminator_truncated() {
        // SSRC then an item whose declared length runs past the buffer
        let raw = [0u8, 0, 0, 1, 1, 10, b'a', b'b'];
        assert_eq!(
            SourceDescriptionChunk::unmarshal(&mut &raw[..]),
            Err(Error::Truncated)
        );
    }
}
