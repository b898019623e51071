//! A minimal class-file assembler. Exists to synthesize class images for
//! tests and tooling; it emits only the subset of the format the parser
//! consumes.

use crate::attribute::ExceptionHandler;
use crate::class::AccessFlags;
use crate::constant::{
    Constant, CONSTANT_CLASS, CONSTANT_DOUBLE, CONSTANT_FIELD_REF, CONSTANT_FLOAT,
    CONSTANT_INTEGER, CONSTANT_INTERFACE_METHOD_REF, CONSTANT_LONG, CONSTANT_METHOD_REF,
    CONSTANT_NAME_AND_TYPE, CONSTANT_STRING, CONSTANT_UTF8,
};

#[derive(Debug, Clone)]
struct MethodEntry {
    access: AccessFlags,
    name_index: u16,
    descriptor_index: u16,
    code: Option<CodeEntry>,
}

#[derive(Debug, Clone)]
struct CodeEntry {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone)]
struct FieldEntry {
    access: AccessFlags,
    name_index: u16,
    descriptor_index: u16,
    constant_value: Option<u16>,
}

#[derive(Debug)]
pub struct ClassBuilder {
    constants: Vec<Constant>,
    access: AccessFlags,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldEntry>,
    methods: Vec<MethodEntry>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = ClassBuilder {
            constants: Vec::new(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };

        builder.this_class = builder.class_const(name);
        builder.super_class = match super_name {
            Some(name) => builder.class_const(name),
            None => 0,
        };
        builder
    }

    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        let index = self.class_const(name);
        self.interfaces.push(index);
        self
    }

    fn push_constant(&mut self, constant: Constant) -> u16 {
        if !matches!(constant, Constant::Long(_) | Constant::Double(_)) {
            if let Some(found) = self.constants.iter().position(|c| *c == constant) {
                return found as u16 + 1;
            }
        }

        self.constants.push(constant.clone());
        let index = self.constants.len() as u16;
        if matches!(constant, Constant::Long(_) | Constant::Double(_)) {
            self.constants.push(Constant::Placeholder);
        }
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.push_constant(Constant::Utf8(text.to_string()))
    }

    pub fn class_const(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push_constant(Constant::Class { name_index })
    }

    pub fn string_const(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.push_constant(Constant::String { string_index })
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        self.push_constant(Constant::Int(value))
    }

    pub fn float_const(&mut self, value: f32) -> u16 {
        self.push_constant(Constant::Float(value))
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        self.push_constant(Constant::Long(value))
    }

    pub fn double_const(&mut self, value: f64) -> u16 {
        self.push_constant(Constant::Double(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push_constant(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push_constant(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push_constant(Constant::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push_constant(Constant::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn field(mut self, access: AccessFlags, name: &str, descriptor: &str) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldEntry {
            access,
            name_index,
            descriptor_index,
            constant_value: None,
        });
        self
    }

    /// A static field initialised from a `ConstantValue` attribute pointing
    /// at `constant_index`.
    pub fn constant_field(
        mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        constant_index: u16,
    ) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldEntry {
            access,
            name_index,
            descriptor_index,
            constant_value: Some(constant_index),
        });
        self
    }

    pub fn method(
        self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
    ) -> Self {
        self.method_with_handlers(access, name, descriptor, max_stack, max_locals, code, &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn method_with_handlers(
        mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
        handlers: &[ExceptionHandler],
    ) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(MethodEntry {
            access,
            name_index,
            descriptor_index,
            code: Some(CodeEntry {
                max_stack,
                max_locals,
                code: code.to_vec(),
                handlers: handlers.to_vec(),
            }),
        });
        self
    }

    /// A method with no `Code` attribute (native or abstract).
    pub fn bodyless_method(mut self, access: AccessFlags, name: &str, descriptor: &str) -> Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(MethodEntry {
            access,
            name_index,
            descriptor_index,
            code: None,
        });
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let code_attr_name = if self.methods.iter().any(|m| m.code.is_some()) {
            self.utf8("Code")
        } else {
            0
        };
        let constant_value_name = if self.fields.iter().any(|f| f.constant_value.is_some()) {
            self.utf8("ConstantValue")
        } else {
            0
        };

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 52]); // version 52.0

        out.extend_from_slice(&(self.constants.len() as u16 + 1).to_be_bytes());
        for constant in &self.constants {
            write_constant(&mut out, constant);
        }

        out.extend_from_slice(&self.access.bits().to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());

        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }

        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            out.extend_from_slice(&field.access.bits().to_be_bytes());
            out.extend_from_slice(&field.name_index.to_be_bytes());
            out.extend_from_slice(&field.descriptor_index.to_be_bytes());
            match field.constant_value {
                Some(constant_index) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    out.extend_from_slice(&constant_value_name.to_be_bytes());
                    out.extend_from_slice(&2u32.to_be_bytes());
                    out.extend_from_slice(&constant_index.to_be_bytes());
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend_from_slice(&method.access.bits().to_be_bytes());
            out.extend_from_slice(&method.name_index.to_be_bytes());
            out.extend_from_slice(&method.descriptor_index.to_be_bytes());
            match &method.code {
                Some(code) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    out.extend_from_slice(&code_attr_name.to_be_bytes());

                    let length = 2 + 2 + 4 + code.code.len() + 2 + 8 * code.handlers.len() + 2;
                    out.extend_from_slice(&(length as u32).to_be_bytes());
                    out.extend_from_slice(&code.max_stack.to_be_bytes());
                    out.extend_from_slice(&code.max_locals.to_be_bytes());
                    out.extend_from_slice(&(code.code.len() as u32).to_be_bytes());
                    out.extend_from_slice(&code.code);
                    out.extend_from_slice(&(code.handlers.len() as u16).to_be_bytes());
                    for handler in &code.handlers {
                        out.extend_from_slice(&handler.start_pc.to_be_bytes());
                        out.extend_from_slice(&handler.end_pc.to_be_bytes());
                        out.extend_from_slice(&handler.handler_pc.to_be_bytes());
                        out.extend_from_slice(&handler.catch_type.to_be_bytes());
                    }
                    out.extend_from_slice(&0u16.to_be_bytes()); // nested attributes
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        out
    }
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) {
    match constant {
        Constant::Utf8(text) => {
            out.push(CONSTANT_UTF8);
            out.extend_from_slice(&(text.len() as u16).to_be_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        Constant::Int(value) => {
            out.push(CONSTANT_INTEGER);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Constant::Float(value) => {
            out.push(CONSTANT_FLOAT);
            out.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        Constant::Long(value) => {
            out.push(CONSTANT_LONG);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Constant::Double(value) => {
            out.push(CONSTANT_DOUBLE);
            out.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        Constant::Class { name_index } => {
            out.push(CONSTANT_CLASS);
            out.extend_from_slice(&name_index.to_be_bytes());
        }
        Constant::String { string_index } => {
            out.push(CONSTANT_STRING);
            out.extend_from_slice(&string_index.to_be_bytes());
        }
        Constant::FieldRef {
            class_index,
            name_and_type_index,
        } => {
            out.push(CONSTANT_FIELD_REF);
            out.extend_from_slice(&class_index.to_be_bytes());
            out.extend_from_slice(&name_and_type_index.to_be_bytes());
        }
        Constant::MethodRef {
            class_index,
            name_and_type_index,
        } => {
            out.push(CONSTANT_METHOD_REF);
            out.extend_from_slice(&class_index.to_be_bytes());
            out.extend_from_slice(&name_and_type_index.to_be_bytes());
        }
        Constant::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        } => {
            out.push(CONSTANT_INTERFACE_METHOD_REF);
            out.extend_from_slice(&class_index.to_be_bytes());
            out.extend_from_slice(&name_and_type_index.to_be_bytes());
        }
        Constant::NameAndType {
            name_index,
            descriptor_index,
        } => {
            out.push(CONSTANT_NAME_AND_TYPE);
            out.extend_from_slice(&name_index.to_be_bytes());
            out.extend_from_slice(&descriptor_index.to_be_bytes());
        }
        Constant::Placeholder => {}
        x => panic!("builder does not emit {:?}", x),
    }
}
