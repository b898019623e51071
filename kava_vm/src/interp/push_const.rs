use kava_classfile::Constant;

use crate::class::Class;
use crate::interp::{read_i16, read_i8, read_u16, read_u8, OpResult};
use crate::mem::Slot;
use crate::strings;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

pub fn aconst_null(thread: &mut JavaThread) -> Result<OpResult, Thrown> {
    thread.top().push_slot(Slot::NULL);
    Ok(OpResult::Advance(1))
}

pub fn iconst(thread: &mut JavaThread, value: i32) -> Result<OpResult, Thrown> {
    thread.top().push_int(value);
    Ok(OpResult::Advance(1))
}

pub fn lconst(thread: &mut JavaThread, value: i64) -> Result<OpResult, Thrown> {
    thread.top().push_long(value);
    Ok(OpResult::Advance(1))
}

pub fn fconst(thread: &mut JavaThread, value: f32) -> Result<OpResult, Thrown> {
    thread.top().push_float(value);
    Ok(OpResult::Advance(1))
}

pub fn dconst(thread: &mut JavaThread, value: f64) -> Result<OpResult, Thrown> {
    thread.top().push_double(value);
    Ok(OpResult::Advance(1))
}

pub fn bipush(thread: &mut JavaThread, code: &[u8]) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let value = read_i8(code, frame.pc + 1) as i32;
    frame.push_int(value);
    Ok(OpResult::Advance(2))
}

pub fn sipush(thread: &mut JavaThread, code: &[u8]) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let value = read_i16(code, frame.pc + 1) as i32;
    frame.push_int(value);
    Ok(OpResult::Advance(3))
}

/// `ldc` / `ldc_w`: loads an int, float, or string constant. String
/// constants are materialised as interned `java/lang/String` instances.
pub fn ldc(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &[u8],
    wide_index: bool,
) -> Result<OpResult, Thrown> {
    let pc = thread.top().pc;
    let (index, advance) = if wide_index {
        (read_u16(code, pc + 1), 3)
    } else {
        (read_u8(code, pc + 1) as u16, 2)
    };

    match &class.constants[index] {
        Constant::Int(value) => thread.top().push_int(*value),
        Constant::Float(value) => thread.top().push_float(*value),
        Constant::String { string_index } => {
            let text = class.constants.text(*string_index).to_string();
            let slot = strings::build_string(engine, thread, &text)?;
            thread.top().push_slot(slot);
        }
        x => {
            return Err(engine.throw(
                thread,
                "java/lang/InternalError",
                &format!("ldc of unsupported constant: {:?}", x),
            ))
        }
    }
    Ok(OpResult::Advance(advance))
}

pub fn ldc2_w(thread: &mut JavaThread, class: &Class, code: &[u8]) -> Result<OpResult, Thrown> {
    let index = read_u16(code, thread.top().pc + 1);
    match &class.constants[index] {
        Constant::Long(value) => thread.top().push_long(*value),
        Constant::Double(value) => thread.top().push_double(*value),
        x => panic!("ldc2_w expects a long or double constant, found {:?}", x),
    }
    Ok(OpResult::Advance(3))
}
