use crate::interp::opcodes::*;
use crate::interp::OpResult;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

/// The arithmetic/shift/logic family (`iadd` .. `lxor`). Integer division
/// and remainder check for a zero divisor; everything else is a plain
/// two's-complement or IEEE-754 operation.
///
/// Wrapping semantics follow the JVMS: `Int.MIN_VALUE / -1` yields
/// `Int.MIN_VALUE`, shifts mask their distance to 5 or 6 bits.
pub fn arithmetic(
    engine: &Engine,
    thread: &mut JavaThread,
    op: u8,
) -> Result<OpResult, Thrown> {
    macro_rules! int_binop {
        (|$a:ident, $b:ident| $expr:expr) => {{
            let frame = thread.top();
            let $b = frame.pop_int();
            let $a = frame.pop_int();
            frame.push_int($expr);
        }};
    }
    macro_rules! long_binop {
        (|$a:ident, $b:ident| $expr:expr) => {{
            let frame = thread.top();
            let $b = frame.pop_long();
            let $a = frame.pop_long();
            frame.push_long($expr);
        }};
    }
    macro_rules! float_binop {
        (|$a:ident, $b:ident| $expr:expr) => {{
            let frame = thread.top();
            let $b = frame.pop_float();
            let $a = frame.pop_float();
            frame.push_float($expr);
        }};
    }
    macro_rules! double_binop {
        (|$a:ident, $b:ident| $expr:expr) => {{
            let frame = thread.top();
            let $b = frame.pop_double();
            let $a = frame.pop_double();
            frame.push_double($expr);
        }};
    }

    match op {
        IADD => int_binop!(|a, b| a.wrapping_add(b)),
        ISUB => int_binop!(|a, b| a.wrapping_sub(b)),
        IMUL => int_binop!(|a, b| a.wrapping_mul(b)),
        IDIV => {
            let frame = thread.top();
            let divisor = frame.pop_int();
            let dividend = frame.pop_int();
            if divisor == 0 {
                return Err(divide_by_zero(engine, thread));
            }
            thread.top().push_int(dividend.wrapping_div(divisor));
        }
        IREM => {
            let frame = thread.top();
            let divisor = frame.pop_int();
            let dividend = frame.pop_int();
            if divisor == 0 {
                return Err(divide_by_zero(engine, thread));
            }
            thread.top().push_int(dividend.wrapping_rem(divisor));
        }
        INEG => {
            let frame = thread.top();
            let value = frame.pop_int();
            frame.push_int(value.wrapping_neg());
        }
        ISHL => int_binop!(|a, b| a.wrapping_shl(b as u32 & 0x1f)),
        ISHR => int_binop!(|a, b| a.wrapping_shr(b as u32 & 0x1f)),
        IUSHR => int_binop!(|a, b| ((a as u32) >> (b as u32 & 0x1f)) as i32),
        IAND => int_binop!(|a, b| a & b),
        IOR => int_binop!(|a, b| a | b),
        IXOR => int_binop!(|a, b| a ^ b),

        LADD => long_binop!(|a, b| a.wrapping_add(b)),
        LSUB => long_binop!(|a, b| a.wrapping_sub(b)),
        LMUL => long_binop!(|a, b| a.wrapping_mul(b)),
        LDIV => {
            let frame = thread.top();
            let divisor = frame.pop_long();
            let dividend = frame.pop_long();
            if divisor == 0 {
                return Err(divide_by_zero(engine, thread));
            }
            thread.top().push_long(dividend.wrapping_div(divisor));
        }
        LREM => {
            let frame = thread.top();
            let divisor = frame.pop_long();
            let dividend = frame.pop_long();
            if divisor == 0 {
                return Err(divide_by_zero(engine, thread));
            }
            thread.top().push_long(dividend.wrapping_rem(divisor));
        }
        LNEG => {
            let frame = thread.top();
            let value = frame.pop_long();
            frame.push_long(value.wrapping_neg());
        }
        // The shift distance for long shifts is an int, not a long.
        LSHL => {
            let frame = thread.top();
            let shift = frame.pop_int();
            let value = frame.pop_long();
            frame.push_long(value.wrapping_shl(shift as u32 & 0x3f));
        }
        LSHR => {
            let frame = thread.top();
            let shift = frame.pop_int();
            let value = frame.pop_long();
            frame.push_long(value.wrapping_shr(shift as u32 & 0x3f));
        }
        LUSHR => {
            let frame = thread.top();
            let shift = frame.pop_int();
            let value = frame.pop_long();
            frame.push_long(((value as u64) >> (shift as u32 & 0x3f)) as i64);
        }
        LAND => long_binop!(|a, b| a & b),
        LOR => long_binop!(|a, b| a | b),
        LXOR => long_binop!(|a, b| a ^ b),

        FADD => float_binop!(|a, b| a + b),
        FSUB => float_binop!(|a, b| a - b),
        FMUL => float_binop!(|a, b| a * b),
        FDIV => float_binop!(|a, b| a / b),
        FREM => float_binop!(|a, b| a % b),
        FNEG => {
            let frame = thread.top();
            let value = frame.pop_float();
            frame.push_float(-value);
        }

        DADD => double_binop!(|a, b| a + b),
        DSUB => double_binop!(|a, b| a - b),
        DMUL => double_binop!(|a, b| a * b),
        DDIV => double_binop!(|a, b| a / b),
        DREM => double_binop!(|a, b| a % b),
        DNEG => {
            let frame = thread.top();
            let value = frame.pop_double();
            frame.push_double(-value);
        }

        x => panic!("not an arithmetic opcode: 0x{:02x}", x),
    }

    Ok(OpResult::Advance(1))
}

fn divide_by_zero(engine: &Engine, thread: &mut JavaThread) -> Thrown {
    engine.throw(thread, "java/lang/ArithmeticException", "Cannot divide by 0")
}

/// `lcmp` and the four floating comparisons. The `l` variants push -1 on
/// NaN, the `g` variants push +1.
pub fn compare(thread: &mut JavaThread, op: u8) -> Result<OpResult, Thrown> {
    let frame = thread.top();

    let result = match op {
        LCMP => {
            let b = frame.pop_long();
            let a = frame.pop_long();
            match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        }
        FCMPL | FCMPG => {
            let b = frame.pop_float();
            let a = frame.pop_float();
            match a.partial_cmp(&b) {
                Some(std::cmp::Ordering::Less) => -1,
                Some(std::cmp::Ordering::Equal) => 0,
                Some(std::cmp::Ordering::Greater) => 1,
                None => if op == FCMPG { 1 } else { -1 },
            }
        }
        DCMPL | DCMPG => {
            let b = frame.pop_double();
            let a = frame.pop_double();
            match a.partial_cmp(&b) {
                Some(std::cmp::Ordering::Less) => -1,
                Some(std::cmp::Ordering::Equal) => 0,
                Some(std::cmp::Ordering::Greater) => 1,
                None => if op == DCMPG { 1 } else { -1 },
            }
        }
        x => panic!("not a comparison opcode: 0x{:02x}", x),
    };

    frame.push_int(result);
    Ok(OpResult::Advance(1))
}
