use std::io::{self, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::attribute::{Attribute, CodeAttribute};
use crate::constant::ConstantPool;
use crate::read::ClassRead;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

bitflags! {
    pub struct AccessFlags: u16 {
        const PUBLIC       = 0x0001;
        const PRIVATE      = 0x0002;
        const PROTECTED    = 0x0004;
        const STATIC       = 0x0008;
        const FINAL        = 0x0010;
        /// `super` on classes, `synchronized` on methods.
        const SUPER        = 0x0020;
        const BRIDGE       = 0x0040;
        const VOLATILE     = 0x0040;
        const VARARGS      = 0x0080;
        const TRANSIENT    = 0x0080;
        const NATIVE       = 0x0100;
        const INTERFACE    = 0x0200;
        const ABSTRACT     = 0x0400;
        const STRICT       = 0x0800;
        const SYNTHETIC    = 0x1000;
        const ANNOTATION   = 0x2000;
        const ENUM         = 0x4000;
    }
}

impl AccessFlags {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        Ok(AccessFlags::from_bits_truncate(
            buffer.read_u16::<BigEndian>()?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl FieldInfo {
    /// Constant-pool index recorded by a `ConstantValue` attribute, if any.
    pub fn constant_value(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::ConstantValue { constant_index } => Some(*constant_index),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<Attribute>,
}

impl MethodInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        if self
            .access
            .intersects(AccessFlags::NATIVE | AccessFlags::ABSTRACT)
        {
            return None;
        }

        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }
}

/// A fully parsed class file, still in terms of constant-pool indices.
#[derive(Debug, Clone)]
pub struct RawClass {
    pub access: AccessFlags,
    pub constants: ConstantPool,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<Attribute>,
}

impl RawClass {
    pub fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        let magic = buffer.read_u32::<BigEndian>()?;
        if magic != CLASS_MAGIC {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid class magic: {:X}", magic),
            ));
        }

        // Minor and major version are not used for anything.
        let _version = buffer.read_u32::<BigEndian>()?;

        let constants = ConstantPool::read(buffer)?;
        let access = AccessFlags::read(buffer)?;
        let this_class = buffer.read_u16::<BigEndian>()?;
        let super_class = buffer.read_u16::<BigEndian>()?;

        let interface_count = buffer.read_u16::<BigEndian>()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(buffer.read_u16::<BigEndian>()?);
        }

        let fields = Self::read_fields(buffer, &constants)?;
        let methods = Self::read_methods(buffer, &constants)?;
        let attributes = Attribute::read_table(buffer, &constants)?;

        debug!(
            "parsed class {} ({} fields, {} methods)",
            constants.class_name(this_class),
            fields.len(),
            methods.len()
        );

        Ok(RawClass {
            access,
            constants,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn read_fields<T: Read>(buffer: &mut T, pool: &ConstantPool) -> io::Result<Vec<FieldInfo>> {
        let count = buffer.read_u16::<BigEndian>()?;
        let mut fields = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let access = AccessFlags::read(buffer)?;
            let name = pool.text(buffer.read_u16::<BigEndian>()?).to_string();
            let descriptor = pool.text(buffer.read_u16::<BigEndian>()?).to_string();
            fields.push(FieldInfo {
                access,
                name,
                descriptor,
                attributes: Attribute::read_table(buffer, pool)?,
            });
        }

        Ok(fields)
    }

    fn read_methods<T: Read>(buffer: &mut T, pool: &ConstantPool) -> io::Result<Vec<MethodInfo>> {
        let count = buffer.read_u16::<BigEndian>()?;
        let mut methods = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let access = AccessFlags::read(buffer)?;
            let name = pool.text(buffer.read_u16::<BigEndian>()?).to_string();
            let descriptor = pool.text(buffer.read_u16::<BigEndian>()?).to_string();
            methods.push(MethodInfo {
                access,
                name,
                descriptor,
                attributes: Attribute::read_table(buffer, pool)?,
            });
        }

        Ok(methods)
    }

    /// Internal (slash-form) name of this class.
    pub fn name(&self) -> &str {
        self.constants.class_name(self.this_class)
    }

    /// Internal name of the superclass; `None` only for the root class.
    pub fn super_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            None
        } else {
            Some(self.constants.class_name(self.super_class))
        }
    }

    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .map(move |index| self.constants.class_name(*index))
    }
}

impl ClassRead for RawClass {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        RawClass::read(buffer)
    }
}
