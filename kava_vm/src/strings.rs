//! `java/lang/String` synthesis and reading. Engine-created strings are
//! interned; the intern table doubles as a collector root set so a string's
//! backing `[C` array can never be collected out from under it.

use crate::class::init;
use crate::mem::object;
use crate::mem::Slot;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

/// Builds (or returns the interned) `java/lang/String` for `text`. The
/// instance's `value` field holds a `[C` array of UTF-16 code units.
pub fn build_string(engine: &Engine, thread: &mut JavaThread, text: &str) -> Result<Slot, Thrown> {
    if let Some(slot) = engine.interned_lookup(text) {
        return Ok(slot);
    }

    let string_class = engine
        .load_class("java/lang/String")
        .map_err(|e| engine.throw_load_error(thread, e))?;
    init::ensure_initialized(engine, thread, string_class)?;

    let char_class = engine
        .load_class("[C")
        .map_err(|e| engine.throw_load_error(thread, e))?;

    let units: Vec<u16> = text.encode_utf16().collect();
    let array = engine.allocate_array(thread, char_class, units.len() as u32)?;

    // The array is unreachable until the string's value field is written.
    thread.pinned.push(array);
    let result = (|| {
        {
            let class = engine.class(char_class);
            let address = engine.object_address(array).expect("array was just allocated");
            for (index, unit) in units.iter().enumerate() {
                let at = object::element_address(&class, address, index);
                engine.heap.data().write_u16(at, *unit);
            }
        }

        let string = engine.allocate_object(thread, string_class)?;
        let value_field = {
            let class = engine.class(string_class);
            class.find_field("value", "[C", false).map(|f| f.offset)
        };

        match value_field {
            Some(offset) => {
                let address = engine
                    .object_address(string)
                    .expect("string was just allocated");
                engine.heap.data().write_u32(address + offset, array.0);
            }
            None => warn!("java/lang/String does not declare a value [C field"),
        }

        Ok(string)
    })();
    thread.pinned.pop();

    let slot = result?;
    engine.interned_insert(text.to_string(), slot);
    Ok(slot)
}

/// Reads a `java/lang/String` instance back into a Rust string via its
/// `value` field. `None` for nulls and malformed objects.
pub fn read_string(engine: &Engine, slot: Slot) -> Option<String> {
    let address = engine.object_address(slot)?;
    let class_id = object::class_id(&engine.heap, address);

    let value_offset = {
        let mut current = Some(class_id);
        let mut found = None;
        while let Some(id) = current {
            let class = engine.class(id);
            if let Some(field) = class.find_field("value", "[C", false) {
                found = Some(field.offset);
                break;
            }
            current = class.super_class;
        }
        found?
    };

    let array = Slot(engine.heap.data().read_u32(address + value_offset));
    let array_address = engine.object_address(array)?;
    let array_class = engine.class(object::class_id(&engine.heap, array_address));
    let length = object::length(&engine.heap, array_address) as usize;

    let mut units = Vec::with_capacity(length);
    for index in 0..length {
        let at = object::element_address(&array_class, array_address, index);
        units.push(engine.heap.data().read_u16(at));
    }

    Some(String::from_utf16_lossy(&units))
}
