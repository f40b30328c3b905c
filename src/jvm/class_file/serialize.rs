use crate::jvm::Error;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::Result;

/// Big endian encoding of the pieces of a class file
///
/// Sequences are prefixed with their length as a `u16`, which is what almost every table in a
/// class file does. The few exceptions (bytecode, attribute bodies) write their own prefix.
pub trait Serialize: Sized {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

macro_rules! serialize_primitive {
    ($($ty:ty => $write:ident $(::<$order:ty>)?,)*) => {
        $(
            impl Serialize for $ty {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    writer.$write$(::<$order>)?(*self)
                }
            }
        )*
    };
}

serialize_primitive! {
    u8 => write_u8,
    i8 => write_i8,
    u16 => write_u16::<BigEndian>,
    i16 => write_i16::<BigEndian>,
    u32 => write_u32::<BigEndian>,
    i32 => write_i32::<BigEndian>,
    i64 => write_i64::<BigEndian>,
    f32 => write_f32::<BigEndian>,
    f64 => write_f64::<BigEndian>,
}

impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u16::try_from(self.len()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("table with {} entries", self.len()),
            )
        })?;
        len.serialize(writer)?;
        self.iter().try_for_each(|elem| elem.serialize(writer))
    }
}

/// Encode into a fresh buffer
///
/// Writing to memory cannot fail, so any error is a limit of the format being exceeded.
pub fn serialize_to_vec<S: Serialize>(value: &S) -> std::result::Result<Vec<u8>, Error> {
    let mut bytes = vec![];
    value
        .serialize(&mut bytes)
        .map_err(|err| Error::MalformedInput(format!("cannot encode: {}", err)))?;
    Ok(bytes)
}

/// Random access, bounds checked, big endian view of class file bytes
///
/// Reading is done by absolute position since the class file format is full of length-prefixed
/// sections that are easier to skip over than to consume (and bytecode offsets are needed to
/// resolve jump targets anyway).
#[derive(Copy, Clone)]
pub struct ClassBuffer<'a> {
    data: &'a [u8],
}

impl<'a> ClassBuffer<'a> {
    pub fn new(data: &'a [u8]) -> ClassBuffer<'a> {
        ClassBuffer { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_bytes(&self, index: usize, len: usize) -> std::result::Result<&'a [u8], Error> {
        index
            .checked_add(len)
            .and_then(|end| self.data.get(index..end))
            .ok_or_else(|| {
                Error::MalformedInput(format!(
                    "unexpected end of class file reading {} bytes at {}",
                    len, index
                ))
            })
    }

    pub fn read_u8(&self, index: usize) -> std::result::Result<u8, Error> {
        Ok(self.read_bytes(index, 1)?[0])
    }

    pub fn read_i8(&self, index: usize) -> std::result::Result<i8, Error> {
        Ok(self.read_u8(index)? as i8)
    }

    pub fn read_u16(&self, index: usize) -> std::result::Result<u16, Error> {
        Ok(BigEndian::read_u16(self.read_bytes(index, 2)?))
    }

    pub fn read_i16(&self, index: usize) -> std::result::Result<i16, Error> {
        Ok(BigEndian::read_i16(self.read_bytes(index, 2)?))
    }

    pub fn read_u32(&self, index: usize) -> std::result::Result<u32, Error> {
        Ok(BigEndian::read_u32(self.read_bytes(index, 4)?))
    }

    pub fn read_i32(&self, index: usize) -> std::result::Result<i32, Error> {
        Ok(BigEndian::read_i32(self.read_bytes(index, 4)?))
    }

    pub fn read_i64(&self, index: usize) -> std::result::Result<i64, Error> {
        Ok(BigEndian::read_i64(self.read_bytes(index, 8)?))
    }

    pub fn read_f32(&self, index: usize) -> std::result::Result<f32, Error> {
        Ok(BigEndian::read_f32(self.read_bytes(index, 4)?))
    }

    pub fn read_f64(&self, index: usize) -> std::result::Result<f64, Error> {
        Ok(BigEndian::read_f64(self.read_bytes(index, 8)?))
    }
}
