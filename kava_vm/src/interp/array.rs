use crate::class::Class;
use crate::interp::{read_u16, read_u8, OpResult};
use crate::mem::object::{self, FieldValue};
use crate::mem::Slot;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

fn null_array(engine: &Engine, thread: &mut JavaThread) -> Thrown {
    engine.throw(thread, "java/lang/NullPointerException", "Array was null")
}

fn index_out_of_bounds(engine: &Engine, thread: &mut JavaThread, index: i32, length: u32) -> Thrown {
    engine.throw(
        thread,
        "java/lang/ArrayIndexOutOfBoundsException",
        &format!("Index {} out of bounds for length {}", index, length),
    )
}

/// The `iaload`..`saload` family: the element type comes from the array
/// object itself, so one handler covers all eight opcodes.
pub fn array_load(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let (index, array) = {
        let frame = thread.top();
        let index = frame.pop_int();
        (index, frame.pop_slot())
    };

    let address = match engine.object_address(array) {
        Some(address) => address,
        None => return Err(null_array(engine, thread)),
    };

    let class = engine.class(object::class_id(&engine.heap, address));
    let length = object::length(&engine.heap, address);
    if index < 0 || index as u32 >= length {
        return Err(index_out_of_bounds(engine, thread, index, length));
    }

    let element = class.element.as_ref().expect("array load on non-array object");
    let at = object::element_address(&class, address, index as usize);
    match object::load_typed(engine.heap.data(), at, element) {
        FieldValue::Single(cell, tag) => thread.top().push(cell, tag),
        FieldValue::Wide(bits, tag) => thread.top().push_wide(bits, tag),
    }
    Ok(OpResult::Advance(1))
}

/// The `iastore`..`sastore` family. The value's own category picks how many
/// cells to pop; the array's element type picks the store width.
pub fn array_store(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let (value, index, array) = {
        let frame = thread.top();
        let value = if frame.peek_tag(0).is_wide() {
            let (bits, tag) = frame.pop_wide();
            FieldValue::Wide(bits, tag)
        } else {
            let (cell, tag) = frame.pop();
            FieldValue::Single(cell, tag)
        };
        let index = frame.pop_int();
        (value, index, frame.pop_slot())
    };

    let address = match engine.object_address(array) {
        Some(address) => address,
        None => return Err(null_array(engine, thread)),
    };

    let class = engine.class(object::class_id(&engine.heap, address));
    let length = object::length(&engine.heap, address);
    if index < 0 || index as u32 >= length {
        return Err(index_out_of_bounds(engine, thread, index, length));
    }

    let element = class.element.as_ref().expect("array store on non-array object").clone();
    let at = object::element_address(&class, address, index as usize);
    object::store_typed(engine.heap.data(), at, &element, value);
    Ok(OpResult::Advance(1))
}

pub fn arraylength(engine: &Engine, thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    let array = thread.top().pop_slot();
    match engine.array_length(array) {
        Some(length) => {
            thread.top().push_int(length as i32);
            Ok(OpResult::Advance(1))
        }
        None => Err(null_array(engine, thread)),
    }
}

/// `newarray` type codes from the JVMS.
fn primitive_array_name(engine: &Engine, thread: &mut JavaThread, atype: u8) -> Result<&'static str, Thrown> {
    Ok(match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        x => {
            return Err(engine.throw(
                thread,
                "java/lang/InternalError",
                &format!("newarray with unknown type code: {}", x),
            ))
        }
    })
}

fn allocate_checked(
    engine: &Engine,
    thread: &mut JavaThread,
    class_name: &str,
    length: i32,
) -> Result<Slot, Thrown> {
    if length < 0 {
        return Err(engine.throw(
            thread,
            "java/lang/NegativeArraySizeException",
            &length.to_string(),
        ));
    }

    let class_id = engine
        .load_class(class_name)
        .map_err(|e| engine.throw_load_error(thread, e))?;
    engine.allocate_array(thread, class_id, length as u32)
}

pub fn newarray(engine: &Engine, thread: &mut JavaThread, code: &[u8]) -> Result<OpResult, Thrown> {
    let (atype, length) = {
        let frame = thread.top();
        (read_u8(code, frame.pc + 1), frame.pop_int())
    };

    let name = primitive_array_name(engine, thread, atype)?;
    let slot = allocate_checked(engine, thread, name, length)?;
    thread.top().push_slot(slot);
    Ok(OpResult::Advance(2))
}

pub fn anewarray(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let (element_name, length) = {
        let frame = thread.top();
        let index = read_u16(code, frame.pc + 1);
        (class.constants.class_name(index).to_string(), frame.pop_int())
    };

    let array_name = if element_name.starts_with('[') {
        format!("[{}", element_name)
    } else {
        format!("[L{};", element_name)
    };

    let slot = allocate_checked(engine, thread, &array_name, length)?;
    thread.top().push_slot(slot);
    Ok(OpResult::Advance(3))
}

/// `multianewarray` pops its dimension counts and builds the nested arrays
/// bottom-up. The first (outermost) count is pushed first and therefore
/// popped last.
pub fn multianewarray(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
) -> Result<OpResult, Thrown> {
    let (class_name, counts) = {
        let frame = thread.top();
        let index = read_u16(code, frame.pc + 1);
        let dimensions = read_u8(code, frame.pc + 3) as usize;

        let mut counts = vec![0i32; dimensions];
        for count in counts.iter_mut().rev() {
            *count = frame.pop_int();
        }
        (class.constants.class_name(index).to_string(), counts)
    };

    for count in &counts {
        if *count < 0 {
            return Err(engine.throw(
                thread,
                "java/lang/NegativeArraySizeException",
                &count.to_string(),
            ));
        }
    }

    let slot = build_nested(engine, thread, &class_name, &counts)?;
    thread.top().push_slot(slot);
    Ok(OpResult::Advance(4))
}

fn build_nested(
    engine: &Engine,
    thread: &mut JavaThread,
    class_name: &str,
    counts: &[i32],
) -> Result<Slot, Thrown> {
    let array = allocate_checked(engine, thread, class_name, counts[0])?;
    if counts.len() == 1 {
        return Ok(array);
    }

    // Children are only reachable through the parent once written, so the
    // parent stays pinned while the subtree allocates.
    thread.pinned.push(array);
    let result = (|| {
        let element_name = &class_name[1..];
        for index in 0..counts[0] as usize {
            let child = build_nested(engine, thread, element_name, &counts[1..])?;

            let class_id = engine.object_class(array).expect("parent array is pinned");
            let parent = engine.class(class_id);
            let address = engine.object_address(array).expect("parent array is pinned");
            let at = object::element_address(&parent, address, index);
            engine.heap.data().write_u32(at, child.0);
        }
        Ok(array)
    })();
    thread.pinned.pop();
    result
}
