use crate::class::{init, resolve, Class};
use crate::interp::{read_u16, OpResult};
use crate::mem::object::{self, FieldValue};
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

fn null_receiver(engine: &Engine, thread: &mut JavaThread) -> Thrown {
    engine.throw(thread, "java/lang/NullPointerException", "")
}

/// `new`: loads and initialises the named class, allocates a zeroed
/// instance, and pushes its reference.
pub fn new_object(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let name = {
        let index = read_u16(code, thread.top().pc + 1);
        class.constants.class_name(index).to_string()
    };

    let class_id = engine
        .load_class(&name)
        .map_err(|e| engine.throw_load_error(thread, e))?;
    init::ensure_initialized(engine, thread, class_id)?;

    let slot = engine.allocate_object(thread, class_id)?;
    thread.top().push_slot(slot);
    Ok(OpResult::Advance(3))
}

pub fn getstatic(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let index = read_u16(code, thread.top().pc + 1);
    let field = resolve::resolve_field(engine, thread, &class.constants, index, true)?;

    let owner = engine.class(field.class);
    let value = object::load_typed(owner.statics(), field.offset, &field.descriptor);
    match value {
        FieldValue::Single(cell, tag) => thread.top().push(cell, tag),
        FieldValue::Wide(bits, tag) => thread.top().push_wide(bits, tag),
    }
    Ok(OpResult::Advance(3))
}

pub fn putstatic(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let index = read_u16(code, thread.top().pc + 1);
    let field = resolve::resolve_field(engine, thread, &class.constants, index, true)?;

    let value = pop_field_value(thread, &field);
    let owner = engine.class(field.class);
    object::store_typed(owner.statics(), field.offset, &field.descriptor, value);
    Ok(OpResult::Advance(3))
}

pub fn getfield(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let index = read_u16(code, thread.top().pc + 1);
    let field = resolve::resolve_field(engine, thread, &class.constants, index, false)?;

    let receiver = thread.top().pop_slot();
    let address = match engine.object_address(receiver) {
        Some(address) => address,
        None => return Err(null_receiver(engine, thread)),
    };

    let value = object::load_typed(engine.heap.data(), address + field.offset, &field.descriptor);
    match value {
        FieldValue::Single(cell, tag) => thread.top().push(cell, tag),
        FieldValue::Wide(bits, tag) => thread.top().push_wide(bits, tag),
    }
    Ok(OpResult::Advance(3))
}

pub fn putfield(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let index = read_u16(code, thread.top().pc + 1);
    let field = resolve::resolve_field(engine, thread, &class.constants, index, false)?;

    let value = pop_field_value(thread, &field);
    let receiver = thread.top().pop_slot();
    let address = match engine.object_address(receiver) {
        Some(address) => address,
        None => return Err(null_receiver(engine, thread)),
    };

    object::store_typed(
        engine.heap.data(),
        address + field.offset,
        &field.descriptor,
        value,
    );
    Ok(OpResult::Advance(3))
}

fn pop_field_value(thread: &mut JavaThread, field: &resolve::ResolvedField) -> FieldValue {
    let frame = thread.top();
    if field.descriptor.cells() == 2 {
        let (bits, tag) = frame.pop_wide();
        FieldValue::Wide(bits, tag)
    } else {
        let (cell, tag) = frame.pop();
        FieldValue::Single(cell, tag)
    }
}

/// `athrow`: a null operand raises a synthesized `NullPointerException`;
/// anything else becomes the thread's in-flight exception and unwinds.
pub fn athrow(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let slot = thread.top().pop_slot();
    if slot.is_null() {
        return Err(null_receiver(engine, thread));
    }

    let (class_name, message) = engine.describe_throwable(slot);
    Err(Thrown {
        slot,
        class_name,
        message,
    })
}

pub fn checkcast(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let (target, slot) = {
        let frame = thread.top();
        let index = read_u16(code, frame.pc + 1);
        (class.constants.class_name(index).to_string(), frame.pop_slot())
    };

    // Null passes every cast.
    if !slot.is_null() {
        let class_id = engine.object_class(slot).expect("cast operand is a live object");
        if !engine.instance_of(class_id, &target) {
            let found = engine.class(class_id).name.clone();
            return Err(engine.throw(
                thread,
                "java/lang/ClassCastException",
                &format!("{} cannot be cast to {}", found, target),
            ));
        }
    }

    thread.top().push_slot(slot);
    Ok(OpResult::Advance(3))
}

pub fn instance_of(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let index = read_u16(code, frame.pc + 1);
    let target = class.constants.class_name(index);
    let slot = frame.pop_slot();

    let result = match engine.object_class(slot) {
        Some(class_id) => engine.instance_of(class_id, target) as i32,
        None => 0,
    };
    thread.top().push_int(result);
    Ok(OpResult::Advance(3))
}

/// `monitorenter`. Contended entry parks the thread as GC-blocked, since
/// the lock holder keeps executing bytecode.
pub fn monitorenter(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let slot = thread.top().pop_slot();
    if slot.is_null() {
        return Err(null_receiver(engine, thread));
    }

    let monitor = engine.monitor(slot);
    if !monitor.try_lock(thread.id) {
        let mut roots = thread.roots();
        roots.push(slot);
        engine.gc.blocked_enter(thread.id, roots);
        monitor.lock(thread.id);
        engine.gc.blocked_exit(thread.id);
    }
    Ok(OpResult::Advance(1))
}

pub fn monitorexit(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let slot = thread.top().pop_slot();
    if slot.is_null() {
        return Err(null_receiver(engine, thread));
    }

    match engine.monitor(slot).unlock(thread.id) {
        Ok(()) => Ok(OpResult::Advance(1)),
        Err(_) => Err(engine.throw(
            thread,
            "java/lang/IllegalMonitorStateException",
            "monitorexit by a thread that does not own the monitor",
        )),
    }
}
