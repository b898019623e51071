use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

/// Reader for class-file structures. Everything in the format is big endian,
/// so the trait bakes that in rather than parameterising over byte order.
pub trait ClassRead: Sized {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self>;

    fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> io::Result<Self> {
        let mut buffer = Cursor::new(bytes.as_ref());
        Self::read(&mut buffer)
    }
}

impl ClassRead for u8 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_u8()
    }
}

impl ClassRead for u16 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_u16::<BigEndian>()
    }
}

impl ClassRead for u32 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_u32::<BigEndian>()
    }
}

impl ClassRead for i32 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_i32::<BigEndian>()
    }
}

impl ClassRead for i64 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_i64::<BigEndian>()
    }
}

impl ClassRead for f32 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_f32::<BigEndian>()
    }
}

impl ClassRead for f64 {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        buffer.read_f64::<BigEndian>()
    }
}

/// Repeated structures are almost always a u16 count followed by the entries.
/// The constant pool is the one exception and handles itself.
impl<T: ClassRead> ClassRead for Vec<T> {
    fn read<B: Read>(buffer: &mut B) -> io::Result<Self> {
        let count = buffer.read_u16::<BigEndian>()?;
        let mut vec = Vec::with_capacity(count as usize);

        for _ in 0..count {
            vec.push(T::read(buffer)?);
        }

        Ok(vec)
    }
}

/// Derives a field-by-field `ClassRead` for plain record structures.
macro_rules! class_struct {
    ($($(#[$($meta:tt)+])* $vis:vis struct $name:ident {
        $($field_vis:vis $field:ident: $type:ty),* $(,)?
    })+) => {$(
        $(#[$($meta)+])*
        $vis struct $name {
            $($field_vis $field: $type),*
        }

        impl $crate::read::ClassRead for $name {
            fn read<T: std::io::Read>(buffer: &mut T) -> std::io::Result<Self> {
                Ok($name { $($field: <$type as $crate::read::ClassRead>::read(buffer)?),* })
            }
        }
    )+};
}
