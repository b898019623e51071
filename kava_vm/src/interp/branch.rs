use crate::interp::opcodes::*;
use crate::interp::{read_i16, read_i32, read_u16, read_u8, OpResult};
use crate::thread::JavaThread;
use crate::Thrown;

fn take_branch(thread: &mut JavaThread, offset: i64) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    frame.pc = (frame.pc as i64 + offset) as usize;
    Ok(OpResult::Jumped)
}

/// `ifeq`..`ifle` (compare against zero) and `if_icmpeq`..`if_icmple`
/// (compare two ints). The condition index is shared between the groups.
pub fn if_int(
    thread: &mut JavaThread,
    code: &[u8],
    op: u8,
    against_zero: bool,
) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let (a, b, condition) = if against_zero {
        (frame.pop_int(), 0, op - IFEQ)
    } else {
        let b = frame.pop_int();
        (frame.pop_int(), b, op - IF_ICMPEQ)
    };

    let taken = match condition {
        0 => a == b,
        1 => a != b,
        2 => a < b,
        3 => a >= b,
        4 => a > b,
        5 => a <= b,
        x => panic!("not a branch condition: {}", x),
    };

    if taken {
        let offset = read_i16(code, frame.pc + 1) as i64;
        take_branch(thread, offset)
    } else {
        Ok(OpResult::Advance(3))
    }
}

pub fn if_acmp(thread: &mut JavaThread, code: &[u8], op: u8) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let b = frame.pop_slot();
    let a = frame.pop_slot();
    let taken = if op == IF_ACMPEQ { a == b } else { a != b };

    if taken {
        let offset = read_i16(code, frame.pc + 1) as i64;
        take_branch(thread, offset)
    } else {
        Ok(OpResult::Advance(3))
    }
}

pub fn if_null(thread: &mut JavaThread, code: &[u8], op: u8) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let slot = frame.pop_slot();
    let taken = if op == IFNULL {
        slot.is_null()
    } else {
        !slot.is_null()
    };

    if taken {
        let offset = read_i16(code, frame.pc + 1) as i64;
        take_branch(thread, offset)
    } else {
        Ok(OpResult::Advance(3))
    }
}

pub fn goto(thread: &mut JavaThread, code: &[u8], wide: bool) -> Result<OpResult, Thrown> {
    let pc = thread.top().pc;
    let offset = if wide {
        read_i32(code, pc + 1) as i64
    } else {
        read_i16(code, pc + 1) as i64
    };
    take_branch(thread, offset)
}

/// `jsr` pushes the byte offset of the following instruction as a
/// `returnAddress` cell, then branches.
pub fn jsr(thread: &mut JavaThread, code: &[u8], wide: bool) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let (offset, length) = if wide {
        (read_i32(code, frame.pc + 1) as i64, 5)
    } else {
        (read_i16(code, frame.pc + 1) as i64, 3)
    };

    frame.push_return_address((frame.pc + length) as u32);
    take_branch(thread, offset)
}

/// `ret` restores the program counter from a `returnAddress` local.
pub fn ret(thread: &mut JavaThread, code: &[u8], wide: bool) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let index = if wide {
        read_u16(code, frame.pc + 2) as usize
    } else {
        read_u8(code, frame.pc + 1) as usize
    };

    let (cell, _) = frame.local(index);
    frame.pc = cell.as_return_address() as usize;
    Ok(OpResult::Jumped)
}

/// Skips the 0-3 pad bytes that align a switch's operands to a 4-byte
/// boundary within the code stream.
fn switch_operands_start(pc: usize) -> usize {
    (pc + 4) & !3
}

pub fn tableswitch(thread: &mut JavaThread, code: &[u8]) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let base = frame.pc;
    let operands = switch_operands_start(base);

    let default = read_i32(code, operands) as i64;
    let low = read_i32(code, operands + 4);
    let high = read_i32(code, operands + 8);

    let index = frame.pop_int();
    let offset = if index < low || index > high {
        default
    } else {
        let entry = operands + 12 + (index - low) as usize * 4;
        read_i32(code, entry) as i64
    };

    take_branch(thread, offset)
}

/// `lookupswitch` binary-searches its sorted (match, offset) pairs.
pub fn lookupswitch(thread: &mut JavaThread, code: &[u8]) -> Result<OpResult, Thrown> {
    let frame = thread.top();
    let base = frame.pc;
    let operands = switch_operands_start(base);

    let default = read_i32(code, operands) as i64;
    let pair_count = read_i32(code, operands + 4) as usize;
    let key = frame.pop_int();

    let mut low = 0usize;
    let mut high = pair_count;
    let mut offset = default;
    while low < high {
        let mid = (low + high) / 2;
        let entry = operands + 8 + mid * 8;
        let candidate = read_i32(code, entry);
        if candidate == key {
            offset = read_i32(code, entry + 4) as i64;
            break;
        } else if candidate < key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    take_branch(thread, offset)
}
