use kava_classfile::JavaType;

use crate::class::{Class, ClassId};
use crate::mem::heap::{align, Heap};
use crate::mem::raw::RawBlock;
use crate::mem::{Cell, Slot, ValueType};

/// Object header: class id, back-pointer to the object's own indirection
/// slot, array length, and GC age. Field offsets are absolute from the
/// header start, so instance offsets begin at `HEADER_SIZE`.
pub const HEADER_SIZE: usize = 16;

const OFFSET_CLASS: usize = 0;
const OFFSET_SLOT: usize = 4;
const OFFSET_LENGTH: usize = 8;
const OFFSET_AGE: usize = 12;

pub fn write_header(heap: &Heap, address: usize, class: ClassId, slot: Slot, length: u32) {
    let data = heap.data();
    data.write_u32(address + OFFSET_CLASS, class.0);
    data.write_u32(address + OFFSET_SLOT, slot.0);
    data.write_u32(address + OFFSET_LENGTH, length);
    data.write_u32(address + OFFSET_AGE, 0);
}

pub fn class_id(heap: &Heap, address: usize) -> ClassId {
    ClassId(heap.data().read_u32(address + OFFSET_CLASS))
}

pub fn slot(heap: &Heap, address: usize) -> Slot {
    Slot(heap.data().read_u32(address + OFFSET_SLOT))
}

pub fn length(heap: &Heap, address: usize) -> u32 {
    heap.data().read_u32(address + OFFSET_LENGTH)
}

pub fn age(heap: &Heap, address: usize) -> u32 {
    heap.data().read_u32(address + OFFSET_AGE)
}

pub fn set_age(heap: &Heap, address: usize, age: u32) {
    heap.data().write_u32(address + OFFSET_AGE, age)
}

/// Total byte size of the object at `address`, array storage included.
pub fn object_size(heap: &Heap, address: usize, class: &Class) -> usize {
    let mut size = class.object_size;
    if let Some(element) = &class.element {
        size += length(heap, address) as usize * element.data_size();
    }
    align(size)
}

/// A field or array-element value in stack form: narrow integers are
/// widened onto a single cell, category-2 values carry their full bit
/// pattern.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    Single(Cell, ValueType),
    Wide(u64, ValueType),
}

/// Loads a field or array element in stack form. Narrow integers widen
/// into a full cell (sign- or zero-extended per the descriptor) but keep
/// their own type tag, as the original's typed operand stack does.
pub fn load_typed(data: &RawBlock, address: usize, descriptor: &JavaType) -> FieldValue {
    let tag = ValueType::of(descriptor);
    match descriptor {
        JavaType::Boolean => {
            FieldValue::Single(Cell::from_int(data.read_u8(address) as i32), tag)
        }
        JavaType::Byte => {
            FieldValue::Single(Cell::from_int(data.read_u8(address) as i8 as i32), tag)
        }
        JavaType::Char => {
            FieldValue::Single(Cell::from_int(data.read_u16(address) as i32), tag)
        }
        JavaType::Short => {
            FieldValue::Single(Cell::from_int(data.read_u16(address) as i16 as i32), tag)
        }
        JavaType::Int | JavaType::Float | JavaType::Object(_) | JavaType::Array(_) => {
            FieldValue::Single(Cell(data.read_u32(address)), tag)
        }
        JavaType::Long | JavaType::Double => FieldValue::Wide(data.read_u64(address), tag),
    }
}

pub fn store_typed(data: &RawBlock, address: usize, descriptor: &JavaType, value: FieldValue) {
    match (descriptor, value) {
        (JavaType::Boolean, FieldValue::Single(cell, _))
        | (JavaType::Byte, FieldValue::Single(cell, _)) => {
            data.write_u8(address, cell.0 as u8)
        }
        (JavaType::Char, FieldValue::Single(cell, _))
        | (JavaType::Short, FieldValue::Single(cell, _)) => {
            data.write_u16(address, cell.0 as u16)
        }
        (JavaType::Int, FieldValue::Single(cell, _))
        | (JavaType::Float, FieldValue::Single(cell, _))
        | (JavaType::Object(_), FieldValue::Single(cell, _))
        | (JavaType::Array(_), FieldValue::Single(cell, _)) => data.write_u32(address, cell.0),
        (JavaType::Long, FieldValue::Wide(bits, _))
        | (JavaType::Double, FieldValue::Wide(bits, _)) => data.write_u64(address, bits),
        (descriptor, value) => panic!(
            "field store mismatch: {:?} does not accept {:?}",
            descriptor, value
        ),
    }
}

/// Byte address of `array[index]`. The array class's `object_size` is just
/// the header, so element storage starts immediately after it.
pub fn element_address(class: &Class, base: usize, index: usize) -> usize {
    let element = class
        .element
        .as_ref()
        .expect("element_address on a non-array class");
    base + class.object_size + index * element.data_size()
}
