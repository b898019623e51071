use std::fmt::{self, Debug, Formatter};

use kava_classfile::{AccessFlags, CodeAttribute, ConstantPool, JavaType, MethodDescriptor};
use parking_lot::{Condvar, Mutex};

use crate::mem::raw::RawBlock;
use crate::mem::Slot;

pub mod init;
pub mod loader;
pub mod resolve;

pub use self::loader::{ClassPath, ClassRegistry, LoadError};

/// Stable identity of a loaded class: an index into the registry arena.
/// Classes are never unloaded, so ids stay valid for the process lifetime.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClassId(pub u32);

impl Debug for ClassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Lifecycle per §5.5 of the JLS: `Loaded` after parsing and layout,
/// `Initializing` while some thread runs `<clinit>`, then `Initialized`.
/// The id inside `Initializing` is the owning thread, which may re-enter.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ClassStatus {
    Loaded,
    Initializing(u32),
    Initialized,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub descriptor: JavaType,
    pub desc_str: String,
    pub access: AccessFlags,
    /// Byte offset: absolute from the object header start for instance
    /// fields, from 0 into the static blob for statics.
    pub offset: usize,
    pub size: usize,
    pub constant_value: Option<u16>,
}

impl Field {
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

pub struct Method {
    pub name: String,
    pub desc_str: String,
    pub descriptor: MethodDescriptor,
    pub access: AccessFlags,
    /// Operand cells consumed by a call, receiver included for instance
    /// methods.
    pub param_cells: u16,
    /// Absent for native and abstract methods.
    pub code: Option<CodeAttribute>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access.contains(AccessFlags::NATIVE)
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.desc_str)
    }
}

pub struct Class {
    pub id: ClassId,
    /// Internal slash-form name; `[X` for arrays, one character for
    /// primitives.
    pub name: String,
    pub access: AccessFlags,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub constants: ConstantPool,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    /// Instance size including the object header. Fixed at load time.
    pub object_size: usize,
    pub static_size: usize,
    pub element: Option<JavaType>,
    statics: RawBlock,
    status: Mutex<ClassStatus>,
    status_changed: Condvar,
}

impl Class {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ClassId,
        name: String,
        access: AccessFlags,
        super_class: Option<ClassId>,
        interfaces: Vec<ClassId>,
        constants: ConstantPool,
        fields: Vec<Field>,
        methods: Vec<Method>,
        object_size: usize,
        static_size: usize,
        element: Option<JavaType>,
        status: ClassStatus,
    ) -> Option<Class> {
        Some(Class {
            id,
            name,
            access,
            super_class,
            interfaces,
            constants,
            fields,
            methods,
            object_size,
            static_size,
            element,
            statics: RawBlock::new(static_size)?,
            status: Mutex::new(status),
            status_changed: Condvar::new(),
        })
    }

    pub fn is_array(&self) -> bool {
        self.element.is_some()
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<(usize, &Method)> {
        self.methods
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name && m.desc_str == descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &str, is_static: bool) -> Option<&Field> {
        self.fields.iter().find(|f| {
            f.name == name && f.desc_str == descriptor && f.is_static() == is_static
        })
    }

    pub fn statics(&self) -> &RawBlock {
        &self.statics
    }

    pub fn static_read_slot(&self, offset: usize) -> Slot {
        Slot(self.statics.read_u32(offset))
    }

    pub fn static_write_slot(&self, offset: usize, slot: Slot) {
        self.statics.write_u32(offset, slot.0)
    }

    pub fn status(&self) -> ClassStatus {
        *self.status.lock()
    }

    pub(crate) fn status_lock(&self) -> &Mutex<ClassStatus> {
        &self.status
    }

    pub(crate) fn status_condvar(&self) -> &Condvar {
        &self.status_changed
    }

    pub(crate) fn set_status(&self, status: ClassStatus) {
        *self.status.lock() = status;
        self.status_changed.notify_all();
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("object_size", &self.object_size)
            .field("static_size", &self.static_size)
            .field("status", &self.status())
            .finish()
    }
}
