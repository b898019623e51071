use std::io::{self, Cursor, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::constant::{Constant, ConstantPool};
use crate::read::ClassRead;

class_struct! {
    /// One row of a `Code` attribute's exception table. `end_pc` is
    /// exclusive; `catch_type` 0 means catch-all.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct ExceptionHandler {
        pub start_pc: u16,
        pub end_pc: u16,
        pub handler_pc: u16,
        pub catch_type: u16,
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    fn read<T: Read>(buffer: &mut T, pool: &ConstantPool) -> io::Result<Self> {
        let max_stack = buffer.read_u16::<BigEndian>()?;
        let max_locals = buffer.read_u16::<BigEndian>()?;

        let code_length = buffer.read_u32::<BigEndian>()?;
        let mut code = vec![0u8; code_length as usize];
        buffer.read_exact(&mut code)?;

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table: <Vec<ExceptionHandler>>::read(buffer)?,
            attributes: Attribute::read_table(buffer, pool)?,
        })
    }
}

/// Attributes the engine consumes are parsed in full; everything else is
/// recorded by name and skipped over.
#[derive(Debug, Clone)]
pub enum Attribute {
    ConstantValue { constant_index: u16 },
    Code(CodeAttribute),
    Signature { signature_index: u16 },
    Skipped(String),
}

impl Attribute {
    pub fn read_table<T: Read>(buffer: &mut T, pool: &ConstantPool) -> io::Result<Vec<Self>> {
        let count = buffer.read_u16::<BigEndian>()?;
        let mut attributes = Vec::with_capacity(count as usize);

        for _ in 0..count {
            attributes.push(Self::read_single(buffer, pool)?);
        }

        Ok(attributes)
    }

    fn read_single<T: Read>(buffer: &mut T, pool: &ConstantPool) -> io::Result<Self> {
        let name_index = buffer.read_u16::<BigEndian>()?;
        let length = buffer.read_u32::<BigEndian>()?;

        let name = match pool.get(name_index) {
            Some(Constant::Utf8(text)) => text.as_str(),
            x => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("attribute name index {} is {:?}", name_index, x),
                ))
            }
        };

        let mut body = vec![0u8; length as usize];
        buffer.read_exact(&mut body)?;
        let mut body = Cursor::new(body);

        Ok(match name {
            "ConstantValue" => Attribute::ConstantValue {
                constant_index: body.read_u16::<BigEndian>()?,
            },
            "Code" => Attribute::Code(CodeAttribute::read(&mut body, pool)?),
            "Signature" => Attribute::Signature {
                signature_index: body.read_u16::<BigEndian>()?,
            },
            _ => Attribute::Skipped(name.to_string()),
        })
    }
}
