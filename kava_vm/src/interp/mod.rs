//! The bytecode dispatcher. One exhaustive match over the opcode byte plays
//! the role of the 256-entry jump table: every defined opcode has a handler
//! and everything else raises `InternalError`. Handlers return how far to
//! advance the program counter, or a control-transfer sentinel.

use kava_classfile::CodeAttribute;

use crate::class::{Class, ClassId};
use crate::mem::{Cell, ValueType};
use crate::thread::{Frame, JavaThread};
use crate::{Engine, Thrown};

mod array;
mod branch;
mod convert;
mod invoke;
mod locals;
mod math;
mod object;
pub mod opcodes;
mod push_const;
mod stack;

use self::opcodes::*;

/// Outcome of a single instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpResult {
    /// Instruction consumed `n` bytes; advance the program counter.
    Advance(usize),
    /// The handler already redirected the program counter (branches,
    /// switches, frame pushes).
    Jumped,
    /// A frame was popped; the caller's saved program counter resumes.
    Returned,
}

// === Operand readers (big-endian, absolute code offsets) ===

pub(crate) fn read_u8(code: &[u8], at: usize) -> u8 {
    code[at]
}

pub(crate) fn read_i8(code: &[u8], at: usize) -> i8 {
    code[at] as i8
}

pub(crate) fn read_u16(code: &[u8], at: usize) -> u16 {
    ((code[at] as u16) << 8) | code[at + 1] as u16
}

pub(crate) fn read_i16(code: &[u8], at: usize) -> i16 {
    read_u16(code, at) as i16
}

pub(crate) fn read_i32(code: &[u8], at: usize) -> i32 {
    ((code[at] as i32) << 24)
        | ((code[at + 1] as i32) << 16)
        | ((code[at + 2] as i32) << 8)
        | code[at + 3] as i32
}

/// Runs the thread's top frames until the stack shrinks back to
/// `base_depth`. Class initialisation uses this to execute `<clinit>` to
/// completion before the triggering instruction resumes.
pub fn run_to_depth(
    engine: &Engine,
    thread: &mut JavaThread,
    base_depth: usize,
) -> Result<(), Thrown> {
    while thread.depth() > base_depth {
        engine.gc.safepoint(thread);

        let (class_id, method_index) = {
            let frame = thread.top();
            (frame.class, frame.method)
        };
        let class = engine.class(class_id);
        let method = &class.methods[method_index];
        let code = method
            .code
            .as_ref()
            .expect("frames are only pushed for methods with code");

        let pc = thread.top().pc;
        let op = code.code[pc];
        trace!(
            "thread {} {}::{} pc {} op 0x{:02x}",
            thread.id,
            class.name,
            method.name,
            pc,
            op
        );

        match dispatch(engine, thread, &class, code, op) {
            Ok(OpResult::Advance(n)) => thread.top().pc += n,
            Ok(OpResult::Jumped) | Ok(OpResult::Returned) => {}
            Err(thrown) => unwind(engine, thread, base_depth, thrown)?,
        }
    }

    Ok(())
}

/// Pushes a frame for a bytecode method with `args` pre-loaded into its
/// first locals and runs it to completion.
pub fn call_method(
    engine: &Engine,
    thread: &mut JavaThread,
    class_id: ClassId,
    method_index: usize,
    args: Vec<(Cell, ValueType)>,
) -> Result<(), Thrown> {
    let base_depth = thread.depth();
    push_method_frame(engine, thread, class_id, method_index, args)?;
    run_to_depth(engine, thread, base_depth)
}

pub(crate) fn push_method_frame(
    engine: &Engine,
    thread: &mut JavaThread,
    class_id: ClassId,
    method_index: usize,
    args: Vec<(Cell, ValueType)>,
) -> Result<(), Thrown> {
    let class = engine.class(class_id);
    let method = &class.methods[method_index];

    let code = match &method.code {
        Some(code) => code,
        None => {
            return Err(engine.throw(
                thread,
                "java/lang/AbstractMethodError",
                &format!("{}::{}{}", class.name, method.name, method.desc_str),
            ))
        }
    };

    let mut frame = Frame::new(
        class_id,
        method_index,
        code.max_locals as usize,
        code.max_stack as usize,
    );
    for (index, (cell, tag)) in args.into_iter().enumerate() {
        frame.set_local(index, cell, tag);
    }

    if !thread.push_frame(frame) {
        return Err(engine.throw(thread, "java/lang/StackOverflowError", ""));
    }
    Ok(())
}

/// Exception propagation: walk the current method's handler table, else pop
/// the frame and re-raise at the caller's return site. An empty stack (down
/// to `base_depth`) re-raises to the caller of the interpreter, which for a
/// root frame means the exception left the thread.
fn unwind(
    engine: &Engine,
    thread: &mut JavaThread,
    base_depth: usize,
    thrown: Thrown,
) -> Result<(), Thrown> {
    loop {
        if thread.depth() <= base_depth {
            return Err(thrown);
        }

        let (class_id, method_index, pc) = {
            let frame = thread.top();
            (frame.class, frame.method, frame.pc)
        };
        let class = engine.class(class_id);
        let code = class.methods[method_index]
            .code
            .as_ref()
            .expect("frames are only pushed for methods with code");

        if let Some(handler_pc) = find_handler(engine, &class, code, pc, &thrown) {
            debug!(
                "{} caught at {}::{} pc {}",
                thrown.class_name, class.name, class.methods[method_index].name, handler_pc
            );
            let frame = thread.top();
            frame.clear_stack();
            frame.push_slot(thrown.slot);
            frame.pc = handler_pc;
            return Ok(());
        }

        thread.pop_frame();
    }
}

fn find_handler(
    engine: &Engine,
    class: &Class,
    code: &CodeAttribute,
    pc: usize,
    thrown: &Thrown,
) -> Option<usize> {
    for handler in &code.exception_table {
        if pc < handler.start_pc as usize || pc >= handler.end_pc as usize {
            continue;
        }

        if handler.catch_type == 0 {
            return Some(handler.handler_pc as usize);
        }

        let catch_name = class.constants.class_name(handler.catch_type);
        if thrown_instance_of(engine, thrown, catch_name) {
            return Some(handler.handler_pc as usize);
        }
    }
    None
}

/// Handler matching for in-flight exceptions. Slotless exceptions (ones the
/// engine could not materialise) match by walking the named class chain.
fn thrown_instance_of(engine: &Engine, thrown: &Thrown, target: &str) -> bool {
    if let Some(class_id) = engine.object_class(thrown.slot) {
        return engine.instance_of(class_id, target);
    }

    match engine.registry.load(&thrown.class_name) {
        Ok(class_id) => engine.instance_of(class_id, target),
        Err(_) => thrown.class_name == target || target == "java/lang/Object",
    }
}

fn dispatch(
    engine: &Engine,
    thread: &mut JavaThread,
    class: &Class,
    code: &CodeAttribute,
    op: u8,
) -> Result<OpResult, Thrown> {
    let bytes = &code.code[..];
    match op {
        NOP => Ok(OpResult::Advance(1)),

        // === Constants ===
        ACONST_NULL => push_const::aconst_null(thread),
        ICONST_M1..=ICONST_5 => push_const::iconst(thread, op as i32 - ICONST_0 as i32),
        LCONST_0 | LCONST_1 => push_const::lconst(thread, (op - LCONST_0) as i64),
        FCONST_0..=FCONST_2 => push_const::fconst(thread, (op - FCONST_0) as f32),
        DCONST_0 | DCONST_1 => push_const::dconst(thread, (op - DCONST_0) as f64),
        BIPUSH => push_const::bipush(thread, bytes),
        SIPUSH => push_const::sipush(thread, bytes),
        LDC => push_const::ldc(engine, thread, class, bytes, false),
        LDC_W => push_const::ldc(engine, thread, class, bytes, true),
        LDC2_W => push_const::ldc2_w(thread, class, bytes),

        // === Loads and stores ===
        ILOAD..=ALOAD => locals::load(thread, bytes, op - ILOAD, false),
        ILOAD_0..=0x2d => {
            let kind = (op - ILOAD_0) / 4;
            locals::load_n(thread, kind, ((op - ILOAD_0) % 4) as usize)
        }
        ISTORE..=ASTORE => locals::store(thread, bytes, false),
        ISTORE_0..=0x4e => locals::store_n(thread, ((op - ISTORE_0) % 4) as usize),
        IINC => locals::iinc(thread, bytes, false),

        IALOAD..=SALOAD => array::array_load(engine, thread),
        IASTORE..=SASTORE => array::array_store(engine, thread),

        // === Stack shuffles ===
        POP..=SWAP => stack::shuffle(thread, op),

        // === Arithmetic, shifts, logic ===
        IADD..=LXOR => math::arithmetic(engine, thread, op),

        // === Conversions ===
        I2L..=I2S => convert::convert(thread, op),

        // === Comparisons ===
        LCMP..=DCMPG => math::compare(thread, op),

        // === Branches ===
        IFEQ..=IFLE => branch::if_int(thread, bytes, op, true),
        IF_ICMPEQ..=IF_ICMPLE => branch::if_int(thread, bytes, op, false),
        IF_ACMPEQ | IF_ACMPNE => branch::if_acmp(thread, bytes, op),
        IFNULL | IFNONNULL => branch::if_null(thread, bytes, op),
        GOTO => branch::goto(thread, bytes, false),
        GOTO_W => branch::goto(thread, bytes, true),
        JSR => branch::jsr(thread, bytes, false),
        JSR_W => branch::jsr(thread, bytes, true),
        RET => branch::ret(thread, bytes, false),
        TABLESWITCH => branch::tableswitch(thread, bytes),
        LOOKUPSWITCH => branch::lookupswitch(thread, bytes),

        // === Returns ===
        IRETURN | FRETURN | ARETURN => invoke::return_single(thread),
        LRETURN | DRETURN => invoke::return_wide(thread),
        RETURN => invoke::return_void(thread),

        // === Objects and fields ===
        NEW => object::new_object(engine, thread, class, bytes),
        NEWARRAY => array::newarray(engine, thread, bytes),
        ANEWARRAY => array::anewarray(engine, thread, class, bytes),
        MULTIANEWARRAY => array::multianewarray(engine, thread, class, bytes),
        ARRAYLENGTH => array::arraylength(engine, thread),
        GETSTATIC => object::getstatic(engine, thread, class, bytes),
        PUTSTATIC => object::putstatic(engine, thread, class, bytes),
        GETFIELD => object::getfield(engine, thread, class, bytes),
        PUTFIELD => object::putfield(engine, thread, class, bytes),

        // === Invocation ===
        INVOKEVIRTUAL => invoke::invoke(engine, thread, class, bytes, invoke::Kind::Virtual),
        INVOKESPECIAL => invoke::invoke(engine, thread, class, bytes, invoke::Kind::Special),
        INVOKESTATIC => invoke::invoke(engine, thread, class, bytes, invoke::Kind::Static),
        INVOKEINTERFACE => invoke::invoke(engine, thread, class, bytes, invoke::Kind::Interface),
        INVOKEDYNAMIC => Err(engine.throw(
            thread,
            "java/lang/InternalError",
            "invokedynamic is not implemented",
        )),

        // === Exceptions and synchronisation ===
        ATHROW => object::athrow(engine, thread),
        CHECKCAST => object::checkcast(engine, thread, class, bytes),
        INSTANCEOF => object::instance_of(engine, thread, class, bytes),
        MONITORENTER => object::monitorenter(engine, thread),
        MONITOREXIT => object::monitorexit(engine, thread),

        WIDE => wide_dispatch(engine, thread, bytes),

        x => Err(engine.throw(
            thread,
            "java/lang/InternalError",
            &format!("unknown opcode: 0x{:02x}", x),
        )),
    }
}

/// `wide` fetches the next opcode and re-dispatches with 16-bit operands.
/// It modifies `*load`, `*store`, `iinc`, and `ret`.
fn wide_dispatch(
    engine: &Engine,
    thread: &mut JavaThread,
    bytes: &[u8],
) -> Result<OpResult, Thrown> {
    let pc = thread.top().pc;
    let modified = bytes[pc + 1];

    match modified {
        ILOAD..=ALOAD => locals::load(thread, bytes, modified - ILOAD, true),
        ISTORE..=ASTORE => locals::store(thread, bytes, true),
        IINC => locals::iinc(thread, bytes, true),
        RET => branch::ret(thread, bytes, true),
        x => Err(engine.throw(
            thread,
            "java/lang/InternalError",
            &format!("wide applied to unsupported opcode: 0x{:02x}", x),
        )),
    }
}
