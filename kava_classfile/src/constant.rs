use std::io::{self, Error, ErrorKind, Read};
use std::ops::Index;

use byteorder::{BigEndian, ReadBytesExt};
use cesu8::from_java_cesu8;
use num_traits::FromPrimitive;

use crate::read::ClassRead;

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELD_REF: u8 = 9;
pub const CONSTANT_METHOD_REF: u8 = 10;
pub const CONSTANT_INTERFACE_METHOD_REF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum ReferenceKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: ReferenceKind, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },

    // 8 byte constants take up 2 slots for indexing, so the entry after a
    // long or double is unusable.
    Placeholder,
}

impl Constant {
    fn read_tagged<T: Read>(buffer: &mut T) -> io::Result<Self> {
        Ok(match buffer.read_u8()? {
            CONSTANT_UTF8 => Constant::Utf8(read_modified_utf8(buffer)?),
            CONSTANT_INTEGER => Constant::Int(i32::read(buffer)?),
            CONSTANT_FLOAT => Constant::Float(f32::read(buffer)?),
            CONSTANT_LONG => Constant::Long(i64::read(buffer)?),
            CONSTANT_DOUBLE => Constant::Double(f64::read(buffer)?),
            CONSTANT_CLASS => Constant::Class {
                name_index: u16::read(buffer)?,
            },
            CONSTANT_STRING => Constant::String {
                string_index: u16::read(buffer)?,
            },
            CONSTANT_FIELD_REF => Constant::FieldRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            CONSTANT_METHOD_REF => Constant::MethodRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            CONSTANT_INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            CONSTANT_NAME_AND_TYPE => Constant::NameAndType {
                name_index: u16::read(buffer)?,
                descriptor_index: u16::read(buffer)?,
            },
            CONSTANT_METHOD_HANDLE => {
                let kind = buffer.read_u8()?;
                Constant::MethodHandle {
                    reference_kind: ReferenceKind::from_u8(kind).ok_or_else(|| {
                        Error::new(
                            ErrorKind::InvalidData,
                            format!("method handle kind out of range: {}", kind),
                        )
                    })?,
                    reference_index: u16::read(buffer)?,
                }
            }
            CONSTANT_METHOD_TYPE => Constant::MethodType {
                descriptor_index: u16::read(buffer)?,
            },
            CONSTANT_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            x => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported constant tag: {}", x),
                ))
            }
        })
    }
}

/// Length-prefixed modified UTF-8. Embedded NULs are encoded as the two byte
/// sequence `C0 80`, so a plain zero byte in the payload is malformed.
fn read_modified_utf8<T: Read>(buffer: &mut T) -> io::Result<String> {
    let len = buffer.read_u16::<BigEndian>()?;
    let mut bytes = vec![0u8; len as usize];
    buffer.read_exact(&mut bytes)?;

    if bytes.contains(&0) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "embedded NUL in modified UTF-8 constant",
        ));
    }

    match from_java_cesu8(&bytes) {
        Ok(text) => Ok(text.into_owned()),
        Err(e) => Err(Error::new(ErrorKind::InvalidData, e)),
    }
}

/// The 1-indexed constant pool. Indexing with 0 or with the placeholder slot
/// after a long/double is a bytecode bug, not an input error, so it panics.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pool: Vec<Constant>,
}

impl ConstantPool {
    pub fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        let count = buffer.read_u16::<BigEndian>()?;
        let mut pool = Vec::with_capacity(count as usize);

        let mut index = 1;
        while index < count {
            let constant = Constant::read_tagged(buffer)?;
            trace!("\t{}/{}: {:?}", index, count, &constant);

            match &constant {
                Constant::Long(..) | Constant::Double(..) => {
                    pool.push(constant);
                    pool.push(Constant::Placeholder);
                    index += 2;
                }
                _ => {
                    pool.push(constant);
                    index += 1;
                }
            }
        }

        Ok(ConstantPool { pool })
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        usize::from(index)
            .checked_sub(1)
            .and_then(|index| self.pool.get(index))
    }

    pub fn text(&self, index: u16) -> &str {
        match &self[index] {
            Constant::Utf8(text) => text.as_str(),
            x => panic!("expected Utf8 constant, but found {:?}", x),
        }
    }

    pub fn class_name(&self, index: u16) -> &str {
        match &self[index] {
            Constant::Class { name_index } => self.text(*name_index),
            x => panic!("expected Class constant, but found {:?}", x),
        }
    }

    pub fn name_and_type(&self, index: u16) -> (&str, &str) {
        match &self[index] {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => (self.text(*name_index), self.text(*descriptor_index)),
            x => panic!("expected NameAndType constant, but found {:?}", x),
        }
    }

    /// Resolves a field/method/interface-method ref into
    /// `(class name, member name, descriptor)`.
    pub fn member_ref(&self, index: u16) -> (&str, &str, &str) {
        let (class_index, name_and_type_index) = match &self[index] {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            x => panic!("expected a member ref constant, but found {:?}", x),
        };

        let (name, descriptor) = self.name_and_type(name_and_type_index);
        (self.class_name(class_index), name, descriptor)
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(pool: Vec<Constant>) -> Self {
        ConstantPool { pool }
    }
}

impl Index<u16> for ConstantPool {
    type Output = Constant;

    fn index(&self, index: u16) -> &Self::Output {
        self.get(index)
            .expect("index is a valid position in constant pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pool_bytes(entries: &[&[u8]]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut count = 1u16;
        for entry in entries {
            count += match entry[0] {
                CONSTANT_LONG | CONSTANT_DOUBLE => 2,
                _ => 1,
            };
            data.extend_from_slice(entry);
        }

        let mut out = count.to_be_bytes().to_vec();
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn utf8_and_class_entries() {
        let bytes = pool_bytes(&[
            &[CONSTANT_UTF8, 0, 4, b'M', b'a', b'i', b'n'],
            &[CONSTANT_CLASS, 0, 1],
        ]);

        let pool = ConstantPool::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(pool.text(1), "Main");
        assert_eq!(pool.class_name(2), "Main");
    }

    #[test]
    fn long_consumes_two_slots() {
        let bytes = pool_bytes(&[
            &[CONSTANT_LONG, 0, 0, 0, 1, 0, 0, 0, 0],
            &[CONSTANT_INTEGER, 0, 0, 0, 7],
        ]);

        let pool = ConstantPool::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(pool[1], Constant::Long(1 << 32));
        assert_eq!(pool[2], Constant::Placeholder);
        assert_eq!(pool[3], Constant::Int(7));
    }

    #[test]
    fn embedded_nul_is_rejected() {
        let bytes = pool_bytes(&[&[CONSTANT_UTF8, 0, 2, b'a', 0]]);
        assert!(ConstantPool::read(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = pool_bytes(&[&[2, 0, 0]]);
        assert!(ConstantPool::read(&mut Cursor::new(bytes)).is_err());
    }
}
