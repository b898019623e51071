//! Bit-exact reader for the Java class file format. Parsing stops at the
//! binary level; linking names to loaded classes is the VM's job.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate num_derive;

#[macro_use]
mod read;

pub mod attribute;
pub mod builder;
pub mod class;
pub mod constant;
pub mod descriptor;

pub use attribute::{Attribute, CodeAttribute, ExceptionHandler};
pub use builder::ClassBuilder;
pub use class::{AccessFlags, FieldInfo, MethodInfo, RawClass};
pub use constant::{Constant, ConstantPool};
pub use descriptor::{JavaType, MethodDescriptor};
pub use read::ClassRead;
