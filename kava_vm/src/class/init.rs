use kava_classfile::Constant;

use crate::class::{ClassId, ClassStatus};
use crate::thread::JavaThread;
use crate::{interp, strings, Engine, Thrown};

/// Drives a class through `Loaded → Initializing → Initialized`, per the
/// JLS §5.5 protocol:
///
/// * re-entry by the initializing thread succeeds immediately (the
///   cyclic-`<clinit>` allowance),
/// * other threads wait on the class status until the owner finishes,
/// * the superclass initialises first,
/// * `ConstantValue` statics are written before `<clinit>` runs,
/// * a `<clinit>` that completes abruptly rolls the class back to `Loaded`
///   and surfaces `ExceptionInInitializerError`.
pub fn ensure_initialized(
    engine: &Engine,
    thread: &mut JavaThread,
    class_id: ClassId,
) -> Result<(), Thrown> {
    let class = engine.class(class_id);

    loop {
        let mut status = class.status_lock().lock();
        match *status {
            ClassStatus::Initialized => return Ok(()),
            ClassStatus::Initializing(owner) if owner == thread.id => return Ok(()),
            ClassStatus::Initializing(_) => {
                // The collector must not wait on us while we wait on the
                // initializing thread, which is running bytecode.
                engine.gc.blocked_enter(thread.id, thread.roots());
                class.status_condvar().wait(&mut status);
                drop(status);
                engine.gc.blocked_exit(thread.id);
            }
            ClassStatus::Loaded => {
                *status = ClassStatus::Initializing(thread.id);
                break;
            }
        }
    }

    debug!("initializing class {}", class.name);

    if let Some(super_id) = class.super_class {
        if let Err(thrown) = ensure_initialized(engine, thread, super_id) {
            class.set_status(ClassStatus::Loaded);
            return Err(thrown);
        }
    }

    if let Err(thrown) = write_constant_values(engine, thread, class_id) {
        class.set_status(ClassStatus::Loaded);
        return Err(thrown);
    }

    if let Some((clinit_index, _)) = class.find_method("<clinit>", "()V") {
        if let Err(thrown) = interp::call_method(engine, thread, class_id, clinit_index, vec![]) {
            warn!("<clinit> of {} completed abruptly: {}", class.name, thrown.class_name);
            class.set_status(ClassStatus::Loaded);
            return Err(engine.throw(
                thread,
                "java/lang/ExceptionInInitializerError",
                &thrown.class_name,
            ));
        }
    }

    class.set_status(ClassStatus::Initialized);
    Ok(())
}

/// Copies each static field's `ConstantValue` into the static blob:
/// numeric constants as their bit patterns, strings as synthesised
/// `java/lang/String` instances.
fn write_constant_values(
    engine: &Engine,
    thread: &mut JavaThread,
    class_id: ClassId,
) -> Result<(), Thrown> {
    let class = engine.class(class_id);

    for field in &class.fields {
        let constant_index = match (field.is_static(), field.constant_value) {
            (true, Some(index)) => index,
            _ => continue,
        };

        let statics = class.statics();
        match &class.constants[constant_index] {
            Constant::Int(value) => match field.size {
                1 => statics.write_u8(field.offset, *value as u8),
                2 => statics.write_u16(field.offset, *value as u16),
                _ => statics.write_u32(field.offset, *value as u32),
            },
            Constant::Float(value) => statics.write_u32(field.offset, value.to_bits()),
            Constant::Long(value) => statics.write_u64(field.offset, *value as u64),
            Constant::Double(value) => statics.write_u64(field.offset, value.to_bits()),
            Constant::String { string_index } => {
                let text = class.constants.text(*string_index).to_string();
                let slot = strings::build_string(engine, thread, &text)?;
                class.static_write_slot(field.offset, slot);
            }
            x => {
                warn!(
                    "ConstantValue of {}::{} has unexpected type {:?}",
                    class.name, field.name, x
                );
            }
        }
    }

    Ok(())
}
