use crate::interp::opcodes::*;
use crate::interp::OpResult;
use crate::thread::JavaThread;
use crate::Thrown;

/// The conversion family. Float-to-integer conversions saturate and map
/// NaN to zero, as `as` casts do since Rust 1.45, which matches the JVMS
/// narrowing rules. `i2b`/`i2c`/`i2s` truncate and re-extend in place.
pub fn convert(thread: &mut JavaThread, op: u8) -> Result<OpResult, Thrown> {
    let frame = thread.top();

    match op {
        I2L => {
            let value = frame.pop_int();
            frame.push_long(value as i64);
        }
        I2F => {
            let value = frame.pop_int();
            frame.push_float(value as f32);
        }
        I2D => {
            let value = frame.pop_int();
            frame.push_double(value as f64);
        }
        L2I => {
            let value = frame.pop_long();
            frame.push_int(value as i32);
        }
        L2F => {
            let value = frame.pop_long();
            frame.push_float(value as f32);
        }
        L2D => {
            let value = frame.pop_long();
            frame.push_double(value as f64);
        }
        F2I => {
            let value = frame.pop_float();
            frame.push_int(value as i32);
        }
        F2L => {
            let value = frame.pop_float();
            frame.push_long(value as i64);
        }
        F2D => {
            let value = frame.pop_float();
            frame.push_double(value as f64);
        }
        D2I => {
            let value = frame.pop_double();
            frame.push_int(value as i32);
        }
        D2L => {
            let value = frame.pop_double();
            frame.push_long(value as i64);
        }
        D2F => {
            let value = frame.pop_double();
            frame.push_float(value as f32);
        }
        I2B => {
            let value = frame.pop_int();
            frame.push_int(value as i8 as i32);
        }
        I2C => {
            let value = frame.pop_int();
            frame.push_int(value as u16 as i32);
        }
        I2S => {
            let value = frame.pop_int();
            frame.push_int(value as i16 as i32);
        }
        x => panic!("not a conversion opcode: 0x{:02x}", x),
    }

    Ok(OpResult::Advance(1))
}
