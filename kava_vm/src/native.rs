//! The native-method hook registry. The JNI-style shared-object layer is an
//! external collaborator; the engine only consumes this interface: a map
//! from `(class, name, descriptor)` to an in-process handler. The built-in
//! hooks cover the minimal runtime classes (console output, object
//! identity, wait/notify).

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::mem::{join_wide, Cell, Slot, ValueType};
use crate::strings;
use crate::thread::JavaThread;
use crate::{Engine, Thrown};

pub enum NativeReturn {
    Void,
    Single(Cell, ValueType),
    Wide(u64, ValueType),
}

/// A native handler. `cells`/`tags` are the call's argument cells, receiver
/// first for instance methods. Handlers that allocate must pin any argument
/// references they still need afterwards, since popped arguments are no
/// longer collector roots.
pub type NativeFn =
    fn(&Engine, &mut JavaThread, &[Cell], &[ValueType]) -> Result<NativeReturn, Thrown>;

pub struct NativeRegistry {
    hooks: RwLock<HashMap<(String, String, String), NativeFn>>,
}

impl NativeRegistry {
    pub fn new() -> NativeRegistry {
        NativeRegistry {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins() -> NativeRegistry {
        let registry = NativeRegistry::new();
        registry.register_builtins();
        registry
    }

    pub fn register(&self, class: &str, name: &str, descriptor: &str, hook: NativeFn) {
        self.hooks.write().insert(
            (class.to_string(), name.to_string(), descriptor.to_string()),
            hook,
        );
    }

    pub fn lookup(&self, class: &str, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.hooks
            .read()
            .get(&(class.to_string(), name.to_string(), descriptor.to_string()))
            .copied()
    }

    fn register_builtins(&self) {
        self.register("java/io/PrintStream", "println", "(Ljava/lang/String;)V", println_string);
        self.register("java/io/PrintStream", "print", "(Ljava/lang/String;)V", print_string);
        self.register("java/io/PrintStream", "println", "()V", println_empty);
        self.register("java/io/PrintStream", "println", "(I)V", println_int);
        self.register("java/io/PrintStream", "println", "(J)V", println_long);
        self.register("java/io/PrintStream", "println", "(Z)V", println_boolean);
        self.register("java/io/PrintStream", "println", "(C)V", println_char);

        self.register("java/lang/Object", "hashCode", "()I", object_hash_code);
        self.register("java/lang/Object", "wait", "()V", object_wait_forever);
        self.register("java/lang/Object", "wait", "(J)V", object_wait);
        self.register("java/lang/Object", "notify", "()V", object_notify);
        self.register("java/lang/Object", "notifyAll", "()V", object_notify_all);
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        NativeRegistry::new()
    }
}

// === Console output ===

fn string_argument(engine: &Engine, cells: &[Cell]) -> String {
    let slot = cells[1].as_slot();
    if slot.is_null() {
        return "null".to_string();
    }
    strings::read_string(engine, slot).unwrap_or_else(|| "null".to_string())
}

fn println_string(
    engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    println!("{}", string_argument(engine, cells));
    Ok(NativeReturn::Void)
}

fn print_string(
    engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    print!("{}", string_argument(engine, cells));
    Ok(NativeReturn::Void)
}

fn println_empty(
    _engine: &Engine,
    _thread: &mut JavaThread,
    _cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    println!();
    Ok(NativeReturn::Void)
}

fn println_int(
    _engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    println!("{}", cells[1].as_int());
    Ok(NativeReturn::Void)
}

fn println_long(
    _engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    println!("{}", join_wide(cells[1], cells[2]) as i64);
    Ok(NativeReturn::Void)
}

fn println_boolean(
    _engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    println!("{}", cells[1].as_int() != 0);
    Ok(NativeReturn::Void)
}

fn println_char(
    _engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    let value = cells[1].as_int() as u32;
    println!("{}", char::from_u32(value).unwrap_or('\u{fffd}'));
    Ok(NativeReturn::Void)
}

// === Object identity and monitors ===

fn object_hash_code(
    _engine: &Engine,
    _thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    // The indirection slot is stable across relocation, which makes it the
    // natural identity hash.
    Ok(NativeReturn::Single(
        Cell::from_int(cells[0].as_slot().0 as i32),
        ValueType::Int,
    ))
}

fn monitor_wait(
    engine: &Engine,
    thread: &mut JavaThread,
    receiver: Slot,
    millis: i64,
) -> Result<NativeReturn, Thrown> {
    if millis < 0 {
        return Err(engine.throw(
            thread,
            "java/lang/IllegalArgumentException",
            "timeout value is negative",
        ));
    }

    let monitor = engine.monitor(receiver);
    let mut roots = thread.roots();
    roots.push(receiver);

    engine.gc.blocked_enter(thread.id, roots);
    let result = monitor.wait(thread.id, millis as u64);
    engine.gc.blocked_exit(thread.id);

    match result {
        Ok(_) => Ok(NativeReturn::Void),
        Err(_) => Err(not_owner(engine, thread)),
    }
}

fn object_wait_forever(
    engine: &Engine,
    thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    monitor_wait(engine, thread, cells[0].as_slot(), 0)
}

fn object_wait(
    engine: &Engine,
    thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    let millis = join_wide(cells[1], cells[2]) as i64;
    monitor_wait(engine, thread, cells[0].as_slot(), millis)
}

fn object_notify(
    engine: &Engine,
    thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    match engine.monitor(cells[0].as_slot()).notify_one(thread.id) {
        Ok(()) => Ok(NativeReturn::Void),
        Err(_) => Err(not_owner(engine, thread)),
    }
}

fn object_notify_all(
    engine: &Engine,
    thread: &mut JavaThread,
    cells: &[Cell],
    _tags: &[ValueType],
) -> Result<NativeReturn, Thrown> {
    match engine.monitor(cells[0].as_slot()).notify_all(thread.id) {
        Ok(()) => Ok(NativeReturn::Void),
        Err(_) => Err(not_owner(engine, thread)),
    }
}

fn not_owner(engine: &Engine, thread: &mut JavaThread) -> Thrown {
    engine.throw(
        thread,
        "java/lang/IllegalMonitorStateException",
        "current thread is not owner",
    )
}
