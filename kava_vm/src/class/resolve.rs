use std::collections::VecDeque;

use kava_classfile::{ConstantPool, JavaType};

use crate::class::{init, ClassId};
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

/// A field reference resolved to its declaring class and layout slot.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub class: ClassId,
    pub offset: usize,
    pub descriptor: JavaType,
    pub is_static: bool,
}

/// Lazily turns a constant-pool `FieldRef` into a direct (class, offset)
/// pair. Loading the named class recursively initialises it. The search
/// checks declared fields, then interfaces breadth-first, then the
/// superclass.
pub fn resolve_field(
    engine: &Engine,
    thread: &mut JavaThread,
    pool: &ConstantPool,
    cp_index: u16,
    expect_static: bool,
) -> Result<ResolvedField, Thrown> {
    let (class_name, field_name, descriptor) = {
        let (class_name, field_name, descriptor) = pool.member_ref(cp_index);
        (
            class_name.to_string(),
            field_name.to_string(),
            descriptor.to_string(),
        )
    };

    let class_id = engine
        .load_class(&class_name)
        .map_err(|e| engine.throw_load_error(thread, e))?;
    init::ensure_initialized(engine, thread, class_id)?;

    match search_field(engine, class_id, &field_name, &descriptor, expect_static) {
        Some(found) => Ok(found),
        None => Err(engine.throw(
            thread,
            "java/lang/IncompatibleClassChangeError",
            &format!("{}::{} {}", class_name, field_name, descriptor),
        )),
    }
}

fn search_field(
    engine: &Engine,
    class_id: ClassId,
    name: &str,
    descriptor: &str,
    expect_static: bool,
) -> Option<ResolvedField> {
    let class = engine.class(class_id);
    if let Some(field) = class.find_field(name, descriptor, expect_static) {
        return Some(ResolvedField {
            class: class_id,
            offset: field.offset,
            descriptor: field.descriptor.clone(),
            is_static: expect_static,
        });
    }

    // Interfaces breadth-first, then the superclass chain.
    let mut queue: VecDeque<ClassId> = class.interfaces.iter().copied().collect();
    while let Some(interface_id) = queue.pop_front() {
        let interface = engine.class(interface_id);
        if let Some(field) = interface.find_field(name, descriptor, expect_static) {
            return Some(ResolvedField {
                class: interface_id,
                offset: field.offset,
                descriptor: field.descriptor.clone(),
                is_static: expect_static,
            });
        }
        queue.extend(interface.interfaces.iter().copied());
    }

    class
        .super_class
        .and_then(|super_id| search_field(engine, super_id, name, descriptor, expect_static))
}

/// Finds a method by walking the superclass chain from `class_id`, then the
/// transitive interfaces. Used both for static resolution (start class from
/// the constant pool) and dynamic dispatch (start class from the receiver).
pub fn find_method(
    engine: &Engine,
    class_id: ClassId,
    name: &str,
    descriptor: &str,
) -> Option<(ClassId, usize)> {
    let mut current = Some(class_id);
    while let Some(id) = current {
        let class = engine.class(id);
        if let Some((index, _)) = class.find_method(name, descriptor) {
            return Some((id, index));
        }
        current = class.super_class;
    }

    let mut queue = VecDeque::new();
    let mut current = Some(class_id);
    while let Some(id) = current {
        let class = engine.class(id);
        queue.extend(class.interfaces.iter().copied());
        current = class.super_class;
    }
    while let Some(interface_id) = queue.pop_front() {
        let interface = engine.class(interface_id);
        if let Some((index, _)) = interface.find_method(name, descriptor) {
            return Some((interface_id, index));
        }
        queue.extend(interface.interfaces.iter().copied());
    }

    None
}
