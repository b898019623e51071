use kava_classfile::MethodDescriptor;

use crate::class::{init, resolve, Class, ClassId};
use crate::interp::{push_method_frame, read_u16, OpResult};
use crate::mem::{Cell, ValueType};
use crate::native::NativeReturn;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Shared call mechanics for `invokevirtual` / `invokespecial` /
/// `invokestatic` / `invokeinterface`:
///
/// * argument cells (receiver first for instance calls) move verbatim from
///   the caller's operand stack into the callee's first locals,
/// * the caller's program counter advances past the instruction before the
///   callee frame is pushed, so returns and uncaught exceptions both land
///   at the return site,
/// * virtual and interface calls re-select the target from the receiver's
///   dynamic class.
pub fn invoke(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
    kind: Kind,
) -> Result<OpResult, Thrown> {
    let (class_name, method_name, descriptor) = {
        let index = read_u16(code, thread.top().pc + 1);
        let (class_name, method_name, descriptor) = class.constants.member_ref(index);
        (
            class_name.to_string(),
            method_name.to_string(),
            descriptor.to_string(),
        )
    };

    // invokeinterface carries a historical count byte and a zero pad.
    let advance = if kind == Kind::Interface { 5 } else { 3 };

    let parsed = MethodDescriptor::parse(&descriptor)
        .expect("method descriptors were validated at class load");
    let argument_cells = parsed.parameter_cells(true) as usize;
    let has_receiver = kind != Kind::Static;
    let total_cells = argument_cells + has_receiver as usize;

    // Pick the class the method lookup starts from.
    let start_class = if kind == Kind::Virtual || kind == Kind::Interface {
        let receiver = thread.top().peek(argument_cells).0.as_slot();
        match engine.object_class(receiver) {
            Some(dynamic_class) => dynamic_class,
            None => {
                return Err(engine.throw(
                    thread,
                    "java/lang/NullPointerException",
                    &format!("invoking {}.{}", class_name, method_name),
                ))
            }
        }
    } else {
        engine
            .load_class(&class_name)
            .map_err(|e| engine.throw_load_error(thread, e))?
    };

    let (target_class, method_index) =
        match resolve::find_method(engine, start_class, &method_name, &descriptor) {
            Some(found) => found,
            None => {
                return Err(engine.throw(
                    thread,
                    "java/lang/IncompatibleClassChangeError",
                    &format!("{}::{}{}", class_name, method_name, descriptor),
                ))
            }
        };

    if kind == Kind::Static {
        init::ensure_initialized(engine, thread, target_class)?;
    }

    // Transfer the argument cells.
    let (cells, tags) = {
        let frame = thread.top();
        let split = frame.stack.len() - total_cells;
        let cells = frame.stack.split_off(split);
        let tags = frame.stack_tags.split_off(split);
        (cells, tags)
    };

    if has_receiver && cells[0].as_slot().is_null() {
        return Err(engine.throw(
            thread,
            "java/lang/NullPointerException",
            &format!("invoking {}.{}", class_name, method_name),
        ));
    }

    // The return site: execution resumes here after the callee pops.
    thread.top().pc += advance;

    let args: Vec<(Cell, ValueType)> = cells.into_iter().zip(tags).collect();
    let is_native = engine.class(target_class).methods[method_index].is_native();
    if is_native {
        call_native(engine, thread, target_class, method_index, args)?;
    } else {
        push_method_frame(engine, thread, target_class, method_index, args)?;
    }
    Ok(OpResult::Jumped)
}

/// Native methods resolve through the engine's hook registry; their return
/// value lands directly on the caller's operand stack.
fn call_native(
    engine: &Engine,
    thread: &mut JavaThread,
    class_id: ClassId,
    method_index: usize,
    args: Vec<(Cell, ValueType)>,
) -> Result<(), Thrown> {
    let (class_name, method_name, descriptor) = {
        let class = engine.class(class_id);
        let method = &class.methods[method_index];
        (class.name.clone(), method.name.clone(), method.desc_str.clone())
    };

    let hook = match engine.natives.lookup(&class_name, &method_name, &descriptor) {
        Some(hook) => hook,
        None => {
            return Err(engine.throw(
                thread,
                "java/lang/UnsatisfiedLinkError",
                &format!("{}.{}{}", class_name, method_name, descriptor),
            ))
        }
    };

    let (cells, tags): (Vec<Cell>, Vec<ValueType>) = args.into_iter().unzip();
    match hook(engine, thread, &cells, &tags)? {
        NativeReturn::Void => {}
        NativeReturn::Single(cell, tag) => thread.top().push(cell, tag),
        NativeReturn::Wide(bits, tag) => thread.top().push_wide(bits, tag),
    }
    Ok(())
}

/// `ireturn` / `freturn` / `areturn`: one cell moves to the caller's stack.
pub fn return_single(thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let (cell, tag) = thread.top().pop();
    thread.pop_frame();
    if thread.depth() > 0 {
        thread.top().push(cell, tag);
    }
    Ok(OpResult::Returned)
}

/// `lreturn` / `dreturn`.
pub fn return_wide(thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let (bits, tag) = thread.top().pop_wide();
    thread.pop_frame();
    if thread.depth() > 0 {
        thread.top().push_wide(bits, tag);
    }
    Ok(OpResult::Returned)
}

pub fn return_void(thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    thread.pop_frame();
    Ok(OpResult::Returned)
}
