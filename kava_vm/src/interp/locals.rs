use crate::interp::{read_i16, read_i8, read_u16, read_u8, OpResult};
use crate::mem::{Cell, ValueType};
use crate::thread::JavaThread;
use crate::Thrown;

/// Tags for the `iload`/`lload`/`fload`/`dload`/`aload` family, in opcode
/// order.
fn load_tag(kind: u8) -> ValueType {
    match kind {
        0 => ValueType::Int,
        1 => ValueType::Long,
        2 => ValueType::Float,
        3 => ValueType::Double,
        4 => ValueType::Reference,
        x => panic!("not a load kind: {}", x),
    }
}

/// `*load` with an explicit index operand; 16-bit under `wide`.
pub fn load(
    thread: &mut JavaThread,
    code: &[u8],
    kind: u8,
    wide: bool,
) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let index = if wide {
        read_u16(code, frame.pc + 2) as usize
    } else {
        read_u8(code, frame.pc + 1) as usize
    };

    push_local(frame, index, load_tag(kind));
    Ok(OpResult::Advance(if wide { 4 } else { 2 }))
}

/// `*load_<n>` short forms.
pub fn load_n(thread: &mut JavaThread, kind: u8, index: usize) -> Result<OpResult, Thrown> {
    push_local(thread.top(), index, load_tag(kind));
    Ok(OpResult::Advance(1))
}

fn push_local(frame: &mut crate::thread::Frame, index: usize, tag: ValueType) {
    if tag.is_wide() {
        let bits = frame.local_wide(index);
        frame.push_wide(bits, tag);
    } else {
        let (cell, stored_tag) = frame.local(index);
        // References keep their stored tag so the collector's root scan
        // stays exact; numeric loads trust the opcode.
        let tag = if tag == ValueType::Reference {
            debug_assert_eq!(stored_tag, ValueType::Reference);
            stored_tag
        } else {
            tag
        };
        frame.push(cell, tag);
    }
}

/// `*store`: the value's own type tag picks one or two cells, matching the
/// original's peek-then-store behavior.
pub fn store(thread: &mut JavaThread, code: &[u8], wide: bool) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let index = if wide {
        read_u16(code, frame.pc + 2) as usize
    } else {
        read_u8(code, frame.pc + 1) as usize
    };

    store_into(frame, index);
    Ok(OpResult::Advance(if wide { 4 } else { 2 }))
}

pub fn store_n(thread: &mut JavaThread, index: usize) -> Result<OpResult, Thrown> {
    store_into(thread.top(), index);
    Ok(OpResult::Advance(1))
}

fn store_into(frame: &mut crate::thread::Frame, index: usize) {
    if frame.peek_tag(0).is_wide() {
        let (bits, tag) = frame.pop_wide();
        frame.set_local_wide(index, bits, tag);
    } else {
        let (cell, tag) = frame.pop();
        frame.set_local(index, cell, tag);
    }
}

/// `iinc`: 8-bit index and signed constant, or 16-bit of each under `wide`.
pub fn iinc(thread: &mut JavaThread, code: &[u8], wide: bool) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let (index, constant, advance) = if wide {
        (
            read_u16(code, frame.pc + 2) as usize,
            read_i16(code, frame.pc + 4) as i32,
            6,
        )
    } else {
        (
            read_u8(code, frame.pc + 1) as usize,
            read_i8(code, frame.pc + 2) as i32,
            3,
        )
    };

    let (cell, _) = frame.local(index);
    frame.set_local(
        index,
        Cell::from_int(cell.as_int().wrapping_add(constant)),
        ValueType::Int,
    );
    Ok(OpResult::Advance(advance))
}
