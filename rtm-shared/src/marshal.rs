use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Exact number of octets a value occupies on the wire.
pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

/// Serialize a value into a caller-provided buffer.
///
/// `marshal_to` writes exactly [`MarshalSize::marshal_size`] octets at the
/// start of `buf` and returns the count; the output is byte-exact so a
/// subsequent unmarshal yields an equal value.
pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize>;

    fn marshal(&self) -> Result<Bytes> {
        let l = self.marshal_size();
        let mut buf = BytesMut::with_capacity(l);
        buf.resize(l, 0);
        let n = self.marshal_to(&mut buf)?;
        if n != l {
            return Err(Error::WrongMarshalSize);
        }
        Ok(buf.freeze())
    }
}

/// Parse a value from the front of `buf`, consuming exactly the octets that
/// belong to it.
pub trait Unmarshal: MarshalSize {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf;
}
