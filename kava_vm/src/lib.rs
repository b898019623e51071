//! The execution engine: class registry, generational heap behind an
//! indirection table, cooperative stop-the-world collector, and the
//! bytecode interpreter. All process-wide state lives in an explicit
//! [`Engine`] rather than globals.

// Ensure each result error is either unwrapped or returned
#![deny(unused_must_use)]

#[macro_use]
extern crate log;

pub mod class;
pub mod interp;
pub mod lock;
pub mod mem;
pub mod native;
pub mod strings;
pub mod thread;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::class::{ClassId, ClassPath, ClassRegistry, LoadError};
use crate::lock::ObjectLock;
use crate::mem::{object, GcControl, GcMode, Heap, IndirectionTable, Slot};
use crate::native::NativeRegistry;
use crate::thread::JavaThread;

/// A bytecode-raised exception in flight. `slot` may be null when the
/// throwable object itself could not be materialised (for instance under
/// memory pressure); the class name still drives handler matching.
#[derive(Debug, Clone)]
pub struct Thrown {
    pub slot: Slot,
    pub class_name: String,
    pub message: String,
}

#[derive(Debug)]
pub enum FatalError {
    HeapInit(usize),
    GcThread(io::Error),
    ClassLoad(LoadError),
    MainMethodNotFound(String),
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::HeapInit(size) => {
                write!(f, "failed to initialize heap of {} bytes", size)
            }
            FatalError::GcThread(e) => write!(f, "failed to start GC thread: {}", e),
            FatalError::ClassLoad(e) => write!(f, "{}", e),
            FatalError::MainMethodNotFound(class) => write!(
                f,
                "failed to find method main([Ljava/lang/String;)V in class: {}",
                class
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Heap reservation in bytes; must be a multiple of 4096.
    pub max_heap: usize,
    /// Per-thread frame-stack reservation in bytes.
    pub stack_size: usize,
    /// Target interval between collections.
    pub gc_interval: Duration,
    pub class_path: ClassPath,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_heap: 64 << 20,
            stack_size: 1 << 20,
            gc_interval: Duration::from_millis(1000),
            class_path: ClassPath::default(),
        }
    }
}

pub struct Engine {
    pub options: EngineOptions,
    pub heap: Heap,
    pub table: IndirectionTable,
    pub gc: GcControl,
    pub registry: ClassRegistry,
    pub natives: NativeRegistry,
    monitors: Mutex<HashMap<u32, Arc<ObjectLock>>>,
    interned: Mutex<HashMap<String, Slot>>,
    next_thread_id: AtomicU32,
    exit_status: AtomicI32,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Result<Arc<Engine>, FatalError> {
        let heap = Heap::new(options.max_heap).ok_or(FatalError::HeapInit(options.max_heap))?;
        let registry = ClassRegistry::new(options.class_path.clone());

        let engine = Arc::new(Engine {
            heap,
            table: IndirectionTable::new(),
            gc: GcControl::new(),
            registry,
            natives: NativeRegistry::with_builtins(),
            monitors: Mutex::new(HashMap::new()),
            interned: Mutex::new(HashMap::new()),
            next_thread_id: AtomicU32::new(1),
            exit_status: AtomicI32::new(0),
            options,
        });

        Engine::start_gc_thread(&engine)?;
        Ok(engine)
    }

    /// Spawns the dedicated collector thread. It holds only a weak handle
    /// so dropping the last engine reference shuts it down.
    fn start_gc_thread(engine: &Arc<Engine>) -> Result<(), FatalError> {
        let weak: Weak<Engine> = Arc::downgrade(engine);
        let interval = engine.options.gc_interval;

        std::thread::Builder::new()
            .name("kava-gc".into())
            .spawn(move || {
                let mut last_cycle = Instant::now();
                loop {
                    std::thread::sleep(Duration::from_millis(10));
                    let engine = match weak.upgrade() {
                        Some(engine) => engine,
                        None => break,
                    };

                    if engine.gc.pending() || last_cycle.elapsed() >= interval {
                        engine.gc.run_cycle(&engine);
                        last_cycle = Instant::now();
                    }
                }
            })
            .map_err(FatalError::GcThread)?;
        Ok(())
    }

    // === Threads ===

    /// Registers the calling OS thread as a mutator and hands back its
    /// interpreter state.
    pub fn attach_thread(&self) -> JavaThread {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        self.gc.register_mutator(id);
        JavaThread::new(id, self.options.stack_size)
    }

    pub fn detach_thread(&self, thread: JavaThread) {
        self.gc.unregister_mutator(thread.id);
    }

    // === Classes ===

    pub fn class(&self, id: ClassId) -> Arc<class::Class> {
        self.registry.class(id)
    }

    pub fn load_class(&self, name: &str) -> Result<ClassId, LoadError> {
        self.registry.load(name)
    }

    /// Class loading failure as seen from bytecode.
    pub fn throw_load_error(&self, thread: &mut JavaThread, error: LoadError) -> Thrown {
        warn!("{}", error);
        self.throw(
            thread,
            "java/lang/NoClassDefFoundError",
            &error.class_name().to_string(),
        )
    }

    /// Walks the class hierarchy (superclasses, then interfaces) checking
    /// whether `class` is assignable to the class named `target`.
    pub fn instance_of(&self, class: ClassId, target: &str) -> bool {
        if target == "java/lang/Object" {
            return true;
        }

        let mut current = Some(class);
        while let Some(id) = current {
            let class = self.class(id);
            if class.name == target {
                return true;
            }
            for interface in &class.interfaces {
                if self.instance_of(*interface, target) {
                    return true;
                }
            }
            current = class.super_class;
        }
        false
    }

    // === Objects ===

    pub fn object_address(&self, slot: Slot) -> Option<usize> {
        self.table.read(slot)
    }

    pub fn object_class(&self, slot: Slot) -> Option<ClassId> {
        let address = self.table.read(slot)?;
        Some(object::class_id(&self.heap, address))
    }

    pub fn array_length(&self, slot: Slot) -> Option<u32> {
        let address = self.table.read(slot)?;
        Some(object::length(&self.heap, address))
    }

    /// Eden allocation with the GC retry protocol: on failure request a
    /// minor collection and park, then a major one, then give up.
    fn allocate_raw(&self, thread: &JavaThread, size: usize) -> Option<usize> {
        if let Some(address) = self.heap.try_alloc_eden(size) {
            return Some(address);
        }

        self.gc.request(GcMode::MinorOnly);
        self.gc.safepoint(thread);
        if let Some(address) = self.heap.try_alloc_eden(size) {
            return Some(address);
        }

        self.gc.request(GcMode::ForceMajor);
        self.gc.safepoint(thread);
        self.heap.try_alloc_eden(size)
    }

    fn out_of_memory(&self, requested: usize) -> Thrown {
        error!("heap exhausted allocating {} bytes", requested);
        // Allocating a throwable under memory pressure would fail again;
        // unwinding carries the class name alone.
        Thrown {
            slot: Slot::NULL,
            class_name: "java/lang/OutOfMemoryError".to_string(),
            message: format!("failed to allocate {} bytes", requested),
        }
    }

    pub fn allocate_object(&self, thread: &JavaThread, class_id: ClassId) -> Result<Slot, Thrown> {
        let class = self.class(class_id);
        debug_assert!(!class.is_array());
        let size = class.object_size;

        let address = self
            .allocate_raw(thread, size)
            .ok_or_else(|| self.out_of_memory(size))?;
        let slot = self.table.allocate_slot().ok_or_else(|| self.out_of_memory(size))?;

        object::write_header(&self.heap, address, class_id, slot, 0);
        self.table.write(slot, address);
        Ok(slot)
    }

    pub fn allocate_array(
        &self,
        thread: &JavaThread,
        class_id: ClassId,
        length: u32,
    ) -> Result<Slot, Thrown> {
        let class = self.class(class_id);
        let element = class.element.as_ref().expect("allocate_array on non-array class");
        let size = class.object_size + element.data_size() * length as usize;

        let address = self
            .allocate_raw(thread, size)
            .ok_or_else(|| self.out_of_memory(size))?;
        let slot = self.table.allocate_slot().ok_or_else(|| self.out_of_memory(size))?;

        object::write_header(&self.heap, address, class_id, slot, length);
        self.table.write(slot, address);
        Ok(slot)
    }

    // === Monitors ===

    /// The per-object lock, created on first use. Keyed by slot so the
    /// moving collector never relocates a lock a thread is parked on.
    pub fn monitor(&self, slot: Slot) -> Arc<ObjectLock> {
        debug_assert!(!slot.is_null());
        Arc::clone(
            self.monitors
                .lock()
                .entry(slot.0)
                .or_insert_with(|| Arc::new(ObjectLock::new())),
        )
    }

    pub(crate) fn drop_monitor(&self, slot: Slot) {
        self.monitors.lock().remove(&slot.0);
    }

    // === Interned strings ===

    pub(crate) fn interned_lookup(&self, text: &str) -> Option<Slot> {
        self.interned.lock().get(text).copied()
    }

    pub(crate) fn interned_insert(&self, text: String, slot: Slot) {
        self.interned.lock().insert(text, slot);
    }

    pub(crate) fn interned_roots(&self) -> Vec<Slot> {
        self.interned.lock().values().copied().collect()
    }

    // === Exceptions ===

    /// Builds a throwable of class `name`, falling back to a slotless
    /// exception when the class cannot be loaded or allocated.
    pub fn throw(&self, thread: &mut JavaThread, name: &str, message: &str) -> Thrown {
        debug!("raising {} ({})", name, message);

        let slot = self.materialize_throwable(thread, name, message).unwrap_or(Slot::NULL);
        Thrown {
            slot,
            class_name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn materialize_throwable(
        &self,
        thread: &mut JavaThread,
        name: &str,
        message: &str,
    ) -> Option<Slot> {
        let class_id = self.registry.load(name).ok()?;
        class::init::ensure_initialized(self, thread, class_id).ok()?;

        let slot = self.allocate_object(thread, class_id).ok()?;
        thread.pinned.push(slot);
        let filled = self.fill_throwable_message(thread, slot, class_id, message);
        thread.pinned.pop();
        if !filled {
            trace!("{} carries no message field", name);
        }
        Some(slot)
    }

    /// Writes the message into the conventional `message`/`detailMessage`
    /// string field if the throwable class declares one.
    fn fill_throwable_message(
        &self,
        thread: &mut JavaThread,
        slot: Slot,
        class_id: ClassId,
        message: &str,
    ) -> bool {
        let field = {
            let mut current = Some(class_id);
            let mut found = None;
            while let Some(id) = current {
                let class = self.class(id);
                if let Some(field) = class
                    .find_field("message", "Ljava/lang/String;", false)
                    .or_else(|| class.find_field("detailMessage", "Ljava/lang/String;", false))
                {
                    found = Some((field.offset, field.descriptor.clone()));
                    break;
                }
                current = class.super_class;
            }
            found
        };

        let (offset, _) = match field {
            Some(found) => found,
            None => return false,
        };

        let text = match strings::build_string(self, thread, message) {
            Ok(slot) => slot,
            Err(_) => return false,
        };

        if let Some(address) = self.table.read(slot) {
            self.heap.data().write_u32(address + offset, text.0);
            return true;
        }
        false
    }

    /// Message to show for an exception object raised by `athrow`.
    pub fn describe_throwable(&self, slot: Slot) -> (String, String) {
        let class_name = match self.object_class(slot) {
            Some(id) => self.class(id).name.clone(),
            None => return ("java/lang/Throwable".to_string(), String::new()),
        };

        let message = self
            .object_address(slot)
            .and_then(|address| {
                let mut current = self.object_class(slot);
                while let Some(id) = current {
                    let class = self.class(id);
                    if let Some(field) = class
                        .find_field("message", "Ljava/lang/String;", false)
                        .or_else(|| class.find_field("detailMessage", "Ljava/lang/String;", false))
                    {
                        let text = Slot(self.heap.data().read_u32(address + field.offset));
                        return strings::read_string(self, text);
                    }
                    current = class.super_class;
                }
                None
            })
            .unwrap_or_default();

        (class_name, message)
    }

    // === Process lifecycle ===

    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::SeqCst);
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::SeqCst)
    }

    /// Reports a thread killed by an unhandled exception, per the engine's
    /// error contract: class name and message on standard error, process
    /// status 1.
    pub fn report_uncaught(&self, thrown: &Thrown) {
        let (class_name, message) = if thrown.slot.is_null() {
            (thrown.class_name.clone(), thrown.message.clone())
        } else {
            self.describe_throwable(thrown.slot)
        };

        if message.is_empty() {
            eprintln!("Exception in thread \"main\" {}", class_name.replace('/', "."));
        } else {
            eprintln!(
                "Exception in thread \"main\" {}: {}",
                class_name.replace('/', "."),
                message
            );
        }
        self.set_exit_status(1);
    }

    /// Loads the entry class, materialises the `String[]` argument array,
    /// and drives `main` to completion on the calling thread. Returns the
    /// process exit status.
    pub fn run_main(&self, class_name: &str, program_args: &[String]) -> Result<i32, FatalError> {
        let class_id = self.load_class(class_name).map_err(FatalError::ClassLoad)?;

        let method_index = {
            let class = self.class(class_id);
            match class.find_method("main", "([Ljava/lang/String;)V") {
                Some((index, method)) if method.is_static() => index,
                _ => return Err(FatalError::MainMethodNotFound(class_name.to_string())),
            }
        };

        let mut thread = self.attach_thread();

        let result = match self.build_main_args(&mut thread, program_args) {
            Ok(args_slot) => class::init::ensure_initialized(self, &mut thread, class_id)
                .and_then(|_| {
                    interp::call_method(
                        self,
                        &mut thread,
                        class_id,
                        method_index,
                        vec![(mem::Cell::from_slot(args_slot), mem::ValueType::Reference)],
                    )
                }),
            Err(thrown) => Err(thrown),
        };

        if let Err(thrown) = result {
            self.report_uncaught(&thrown);
        }

        self.detach_thread(thread);
        Ok(self.exit_status())
    }

    /// The `[Ljava/lang/String;` argument array for `main`.
    fn build_main_args(
        &self,
        thread: &mut JavaThread,
        program_args: &[String],
    ) -> Result<Slot, Thrown> {
        let array_class = self
            .load_class("[Ljava/lang/String;")
            .map_err(|e| self.throw_load_error(thread, e))?;

        let array = self.allocate_array(thread, array_class, program_args.len() as u32)?;
        thread.pinned.push(array);

        let result = (|| {
            for (index, arg) in program_args.iter().enumerate() {
                let text = strings::build_string(self, thread, arg)?;
                let class = self.class(array_class);
                let address = self
                    .table
                    .read(array)
                    .expect("argument array was just allocated");
                let element = object::element_address(&class, address, index);
                self.heap.data().write_u32(element, text.0);
            }
            Ok(array)
        })();

        thread.pinned.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_classfile::{AccessFlags, ClassBuilder, ExceptionHandler};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kava-vm-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_class(dir: &Path, name: &str, image: &[u8]) {
        let path = dir.join(format!("{}.class", name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, image).unwrap();
    }

    fn object_image() -> Vec<u8> {
        ClassBuilder::new("java/lang/Object", None)
            .method(AccessFlags::PUBLIC, "<init>", "()V", 0, 1, &[0xb1])
            .build()
    }

    fn engine_for(dir: &Path, max_heap: usize) -> Arc<Engine> {
        write_class(dir, "java/lang/Object", &object_image());
        let options = EngineOptions {
            max_heap,
            stack_size: 1 << 20,
            gc_interval: Duration::from_secs(3600),
            class_path: ClassPath::new(&[dir.to_path_buf()]),
        };
        Engine::new(options).unwrap()
    }

    fn u16be(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    /// Reads a static int field straight out of a class's static blob.
    fn static_int(engine: &Engine, class: &str, field: &str) -> i32 {
        let class = engine.class(engine.registry.by_name(class).unwrap());
        let field = class.find_field(field, "I", true).unwrap();
        class.statics().read_u32(field.offset) as i32
    }

    #[test]
    fn static_method_call_and_arithmetic() {
        let dir = scratch_dir("arith");

        let mut builder = ClassBuilder::new("demo/Calc", Some("java/lang/Object"));
        let compute = builder.method_ref("demo/Calc", "compute", "(II)I");
        let result = builder.field_ref("demo/Calc", "result", "I");
        let min_int = builder.int_const(i32::MIN);

        let mut run_code = vec![0x05, 0x06, 0xb8]; // iconst_2; iconst_3; invokestatic
        run_code.extend_from_slice(&u16be(compute));
        run_code.push(0xb3); // putstatic
        run_code.extend_from_slice(&u16be(result));
        run_code.push(0xb1);

        // Int.MIN_VALUE / -1 wraps back to Int.MIN_VALUE.
        let mut edge_code = vec![0x12, min_int as u8, 0x02, 0x6c, 0xb3];
        edge_code.extend_from_slice(&u16be(result));
        edge_code.push(0xb1);

        let image = builder
            .field(AccessFlags::STATIC, "result", "I")
            .method(
                AccessFlags::STATIC,
                "compute",
                "(II)I",
                2,
                2,
                // iload_0; iload_1; iadd; iconst_2; imul; ireturn => (a+b)*2
                &[0x1a, 0x1b, 0x60, 0x05, 0x68, 0xac],
            )
            .method(AccessFlags::STATIC, "run", "()V", 2, 0, &run_code)
            .method(AccessFlags::STATIC, "edge", "()V", 2, 0, &edge_code)
            .build();
        write_class(&dir, "demo/Calc", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();

        let class_id = engine.load_class("demo/Calc").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, class_id).unwrap();
        let (run, _) = engine.class(class_id).find_method("run", "()V").unwrap();
        interp::call_method(&engine, &mut thread, class_id, run, vec![]).unwrap();
        assert_eq!(static_int(&engine, "demo/Calc", "result"), 10);

        let (edge, _) = engine.class(class_id).find_method("edge", "()V").unwrap();
        interp::call_method(&engine, &mut thread, class_id, edge, vec![]).unwrap();
        assert_eq!(static_int(&engine, "demo/Calc", "result"), i32::MIN);

        engine.detach_thread(thread);
    }

    #[test]
    fn divide_by_zero_escapes_the_thread() {
        let dir = scratch_dir("divzero");

        let mut builder = ClassBuilder::new("demo/Div", Some("java/lang/Object"));
        let result = builder.field_ref("demo/Div", "result", "I");
        let mut code = vec![0x10, 10, 0x03, 0x6c, 0xb3]; // bipush 10; iconst_0; idiv; putstatic
        code.extend_from_slice(&u16be(result));
        code.push(0xb1);

        let image = builder
            .field(AccessFlags::STATIC, "result", "I")
            .method(AccessFlags::STATIC, "run", "()V", 2, 0, &code)
            .build();
        write_class(&dir, "demo/Div", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Div").unwrap();
        let (run, _) = engine.class(class_id).find_method("run", "()V").unwrap();

        let thrown = interp::call_method(&engine, &mut thread, class_id, run, vec![]).unwrap_err();
        assert_eq!(thrown.class_name, "java/lang/ArithmeticException");
        assert_eq!(thrown.message, "Cannot divide by 0");
        assert_eq!(thread.depth(), 0);
        engine.detach_thread(thread);
    }

    #[test]
    fn exception_table_catches_arithmetic_exception() {
        let dir = scratch_dir("catch");

        let mut builder = ClassBuilder::new("demo/Catch", Some("java/lang/Object"));
        let result = builder.field_ref("demo/Catch", "result", "I");
        let catch_type = builder.class_const("java/lang/ArithmeticException");

        // try { result = 10 / 0; } catch (ArithmeticException e) { result = 42; }
        let mut code = vec![0x10, 10, 0x03, 0x6c, 0xb3]; // 0..=4: bipush; iconst_0; idiv; putstatic
        code.extend_from_slice(&u16be(result)); // 5, 6
        code.push(0xb1); // 7: return
        code.push(0x57); // 8: pop (the caught exception)
        code.extend_from_slice(&[0x10, 42, 0xb3]); // 9: bipush 42; 11: putstatic
        code.extend_from_slice(&u16be(result));
        code.push(0xb1); // 14: return

        let handlers = [ExceptionHandler {
            start_pc: 0,
            end_pc: 8,
            handler_pc: 8,
            catch_type,
        }];

        let image = builder
            .field(AccessFlags::STATIC, "result", "I")
            .method_with_handlers(AccessFlags::STATIC, "run", "()V", 2, 0, &code, &handlers)
            .build();
        write_class(&dir, "demo/Catch", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Catch").unwrap();
        let (run, _) = engine.class(class_id).find_method("run", "()V").unwrap();

        interp::call_method(&engine, &mut thread, class_id, run, vec![]).unwrap();
        assert_eq!(static_int(&engine, "demo/Catch", "result"), 42);
        engine.detach_thread(thread);
    }

    #[test]
    fn cyclic_class_initialization_completes() {
        let dir = scratch_dir("clinit");

        // A.<clinit>: x = B.y;  B.<clinit>: y = 7; z = A.x;
        let mut a = ClassBuilder::new("demo/A", Some("java/lang/Object"));
        let a_x = a.field_ref("demo/A", "x", "I");
        let b_y_from_a = a.field_ref("demo/B", "y", "I");
        let mut a_code = vec![0xb2];
        a_code.extend_from_slice(&u16be(b_y_from_a));
        a_code.push(0xb3);
        a_code.extend_from_slice(&u16be(a_x));
        a_code.push(0xb1);
        let a_image = a
            .field(AccessFlags::STATIC, "x", "I")
            .method(AccessFlags::STATIC, "<clinit>", "()V", 1, 0, &a_code)
            .build();

        let mut b = ClassBuilder::new("demo/B", Some("java/lang/Object"));
        let b_y = b.field_ref("demo/B", "y", "I");
        let b_z = b.field_ref("demo/B", "z", "I");
        let a_x_from_b = b.field_ref("demo/A", "x", "I");
        let mut b_code = vec![0x10, 7, 0xb3];
        b_code.extend_from_slice(&u16be(b_y));
        b_code.push(0xb2);
        b_code.extend_from_slice(&u16be(a_x_from_b));
        b_code.push(0xb3);
        b_code.extend_from_slice(&u16be(b_z));
        b_code.push(0xb1);
        let b_image = b
            .field(AccessFlags::STATIC, "y", "I")
            .field(AccessFlags::STATIC, "z", "I")
            .method(AccessFlags::STATIC, "<clinit>", "()V", 1, 0, &b_code)
            .build();

        write_class(&dir, "demo/A", &a_image);
        write_class(&dir, "demo/B", &b_image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();

        let a_id = engine.load_class("demo/A").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, a_id).unwrap();

        // B saw A mid-initialisation (x still 0); A then picked up B's 7.
        assert_eq!(static_int(&engine, "demo/A", "x"), 7);
        assert_eq!(static_int(&engine, "demo/B", "y"), 7);
        assert_eq!(static_int(&engine, "demo/B", "z"), 0);

        let b_id = engine.registry.by_name("demo/B").unwrap();
        assert_eq!(engine.class(a_id).status(), class::ClassStatus::Initialized);
        assert_eq!(engine.class(b_id).status(), class::ClassStatus::Initialized);
        engine.detach_thread(thread);
    }

    #[test]
    fn constant_values_seed_static_fields() {
        let dir = scratch_dir("constval");

        let mut builder = ClassBuilder::new("demo/Const", Some("java/lang/Object"));
        let answer = builder.int_const(1234);
        let scale = builder.double_const(2.5);
        let image = builder
            .constant_field(AccessFlags::STATIC | AccessFlags::FINAL, "ANSWER", "I", answer)
            .constant_field(AccessFlags::STATIC | AccessFlags::FINAL, "SCALE", "D", scale)
            .build();
        write_class(&dir, "demo/Const", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Const").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, class_id).unwrap();

        assert_eq!(static_int(&engine, "demo/Const", "ANSWER"), 1234);
        let class = engine.class(class_id);
        let scale_field = class.find_field("SCALE", "D", true).unwrap();
        assert_eq!(
            f64::from_bits(class.statics().read_u64(scale_field.offset)),
            2.5
        );
        engine.detach_thread(thread);
    }

    #[test]
    fn instance_field_round_trip_for_every_descriptor() {
        let dir = scratch_dir("fields");

        let image = ClassBuilder::new("demo/Holder", Some("java/lang/Object"))
            .field(AccessFlags::PUBLIC, "b", "B")
            .field(AccessFlags::PUBLIC, "c", "C")
            .field(AccessFlags::PUBLIC, "d", "D")
            .field(AccessFlags::PUBLIC, "f", "F")
            .field(AccessFlags::PUBLIC, "i", "I")
            .field(AccessFlags::PUBLIC, "j", "J")
            .field(AccessFlags::PUBLIC, "s", "S")
            .field(AccessFlags::PUBLIC, "z", "Z")
            .field(AccessFlags::PUBLIC, "l", "Ljava/lang/Object;")
            .field(AccessFlags::PUBLIC, "a", "[I")
            .build();
        write_class(&dir, "demo/Holder", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Holder").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, class_id).unwrap();

        let slot = engine.allocate_object(&thread, class_id).unwrap();
        let address = engine.object_address(slot).unwrap();
        let class = engine.class(class_id);

        use mem::object::{load_typed, store_typed, FieldValue};
        use mem::{Cell, ValueType};

        let singles: [(&str, &str, i32); 7] = [
            ("b", "B", -5),
            ("c", "C", 0x1F600),
            ("s", "S", -12345),
            ("z", "Z", 1),
            ("i", "I", i32::MIN),
            ("l", "Ljava/lang/Object;", 17),
            ("a", "[I", 23),
        ];
        for (name, desc, value) in &singles {
            let field = class.find_field(name, desc, false).unwrap();
            let tag = if field.descriptor.is_reference() {
                ValueType::Reference
            } else {
                ValueType::Int
            };
            store_typed(
                engine.heap.data(),
                address + field.offset,
                &field.descriptor,
                FieldValue::Single(Cell::from_int(*value), tag),
            );
        }

        let expect = |name: &str, desc: &str, value: i32| {
            let field = class.find_field(name, desc, false).unwrap();
            match load_typed(engine.heap.data(), address + field.offset, &field.descriptor) {
                FieldValue::Single(cell, _) => assert_eq!(cell.as_int(), value, "field {}", name),
                x => panic!("unexpected load for {}: {:?}", name, x),
            }
        };
        expect("b", "B", -5);
        expect("c", "C", 0x1F600 & 0xFFFF); // chars truncate to 16 bits
        expect("s", "S", -12345);
        expect("z", "Z", 1);
        expect("i", "I", i32::MIN);
        expect("l", "Ljava/lang/Object;", 17);
        expect("a", "[I", 23);

        let j = class.find_field("j", "J", false).unwrap();
        store_typed(
            engine.heap.data(),
            address + j.offset,
            &j.descriptor,
            FieldValue::Wide(i64::MIN as u64, ValueType::Long),
        );
        let d = class.find_field("d", "D", false).unwrap();
        store_typed(
            engine.heap.data(),
            address + d.offset,
            &d.descriptor,
            FieldValue::Wide((-0.5f64).to_bits(), ValueType::Double),
        );
        let f = class.find_field("f", "F", false).unwrap();
        store_typed(
            engine.heap.data(),
            address + f.offset,
            &f.descriptor,
            FieldValue::Single(Cell::from_float(1.25), ValueType::Float),
        );

        assert_eq!(
            load_typed(engine.heap.data(), address + j.offset, &j.descriptor),
            FieldValue::Wide(i64::MIN as u64, ValueType::Long)
        );
        assert_eq!(
            load_typed(engine.heap.data(), address + d.offset, &d.descriptor),
            FieldValue::Wide((-0.5f64).to_bits(), ValueType::Double)
        );
        assert_eq!(
            load_typed(engine.heap.data(), address + f.offset, &f.descriptor),
            FieldValue::Single(Cell::from_float(1.25), ValueType::Float)
        );

        engine.detach_thread(thread);
    }

    #[test]
    fn multianewarray_builds_nested_zeroed_arrays() {
        let dir = scratch_dir("multi");

        let mut builder = ClassBuilder::new("demo/Multi", Some("java/lang/Object"));
        let matrix = builder.field_ref("demo/Multi", "grid", "[[I");
        let int_matrix = builder.class_const("[[I");

        // grid = new int[3][4];
        let mut code = vec![0x06, 0x07, 0xc5]; // iconst_3; iconst_4; multianewarray
        code.extend_from_slice(&u16be(int_matrix));
        code.push(2); // dimensions
        code.push(0xb3);
        code.extend_from_slice(&u16be(matrix));
        code.push(0xb1);

        let image = builder
            .field(AccessFlags::STATIC, "grid", "[[I")
            .method(AccessFlags::STATIC, "run", "()V", 2, 0, &code)
            .build();
        write_class(&dir, "demo/Multi", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Multi").unwrap();
        let (run, _) = engine.class(class_id).find_method("run", "()V").unwrap();
        interp::call_method(&engine, &mut thread, class_id, run, vec![]).unwrap();

        let class = engine.class(class_id);
        let grid_field = class.find_field("grid", "[[I", true).unwrap();
        let grid = class.static_read_slot(grid_field.offset);
        assert_eq!(engine.array_length(grid), Some(3));

        let outer_class = engine.class(engine.object_class(grid).unwrap());
        let outer_address = engine.object_address(grid).unwrap();
        for row in 0..3 {
            let at = mem::object::element_address(&outer_class, outer_address, row);
            let inner = Slot(engine.heap.data().read_u32(at));
            assert_eq!(engine.array_length(inner), Some(4));

            let inner_class = engine.class(engine.object_class(inner).unwrap());
            let inner_address = engine.object_address(inner).unwrap();
            for column in 0..4 {
                let cell = mem::object::element_address(&inner_class, inner_address, column);
                assert_eq!(engine.heap.data().read_u32(cell), 0);
            }
        }
        engine.detach_thread(thread);
    }

    #[test]
    fn tableswitch_selects_by_index() {
        let dir = scratch_dir("switch");

        let mut builder = ClassBuilder::new("demo/Switch", Some("java/lang/Object"));
        let result = builder.field_ref("demo/Switch", "result", "I");

        let mut code = vec![0x1a, 0xaa, 0, 0]; // iload_0; tableswitch; 2 pad bytes
        code.extend_from_slice(&35i32.to_be_bytes()); // default -> 36
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&1i32.to_be_bytes()); // high
        code.extend_from_slice(&23i32.to_be_bytes()); // case 0 -> 24
        code.extend_from_slice(&29i32.to_be_bytes()); // case 1 -> 30
        assert_eq!(code.len(), 24);
        code.extend_from_slice(&[0x10, 10, 0xb3]); // 24: bipush 10; putstatic
        code.extend_from_slice(&u16be(result));
        code.push(0xb1);
        code.extend_from_slice(&[0x10, 20, 0xb3]); // 30: bipush 20; putstatic
        code.extend_from_slice(&u16be(result));
        code.push(0xb1);
        code.extend_from_slice(&[0x10, 30, 0xb3]); // 36: bipush 30; putstatic
        code.extend_from_slice(&u16be(result));
        code.push(0xb1);

        let image = builder
            .field(AccessFlags::STATIC, "result", "I")
            .method(AccessFlags::STATIC, "pick", "(I)V", 2, 1, &code)
            .build();
        write_class(&dir, "demo/Switch", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Switch").unwrap();
        let (pick, _) = engine.class(class_id).find_method("pick", "(I)V").unwrap();

        for (input, expected) in [(0, 10), (1, 20), (5, 30), (-3, 30)] {
            interp::call_method(
                &engine,
                &mut thread,
                class_id,
                pick,
                vec![(mem::Cell::from_int(input), mem::ValueType::Int)],
            )
            .unwrap();
            assert_eq!(static_int(&engine, "demo/Switch", "result"), expected);
        }
        engine.detach_thread(thread);
    }

    #[test]
    fn monitor_reentry_through_bytecode() {
        let dir = scratch_dir("monitor");

        // enter/enter/exit/exit on the argument object.
        let code = [
            0x2a, 0xc2, // aload_0; monitorenter
            0x2a, 0xc2, // again
            0x2a, 0xc3, // aload_0; monitorexit
            0x2a, 0xc3, 0xb1,
        ];
        let image = ClassBuilder::new("demo/Mon", Some("java/lang/Object"))
            .method(
                AccessFlags::STATIC,
                "run",
                "(Ljava/lang/Object;)V",
                1,
                1,
                &code,
            )
            .build();
        write_class(&dir, "demo/Mon", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Mon").unwrap();
        let object_class = engine.registry.by_name("java/lang/Object").unwrap();
        let target = engine.allocate_object(&thread, object_class).unwrap();

        let (run, _) = engine
            .class(class_id)
            .find_method("run", "(Ljava/lang/Object;)V")
            .unwrap();
        interp::call_method(
            &engine,
            &mut thread,
            class_id,
            run,
            vec![(mem::Cell::from_slot(target), mem::ValueType::Reference)],
        )
        .unwrap();

        let monitor = engine.monitor(target);
        assert_eq!(monitor.owner(), 0);
        assert_eq!(monitor.acquired_count(), 0);
        engine.detach_thread(thread);
    }

    #[test]
    fn unbalanced_monitorexit_raises_illegal_monitor_state() {
        let dir = scratch_dir("monbad");

        let image = ClassBuilder::new("demo/MonBad", Some("java/lang/Object"))
            .method(
                AccessFlags::STATIC,
                "run",
                "(Ljava/lang/Object;)V",
                1,
                1,
                &[0x2a, 0xc3, 0xb1], // monitorexit without enter
            )
            .build();
        write_class(&dir, "demo/MonBad", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/MonBad").unwrap();
        let object_class = engine.registry.by_name("java/lang/Object").unwrap();
        let target = engine.allocate_object(&thread, object_class).unwrap();

        let (run, _) = engine
            .class(class_id)
            .find_method("run", "(Ljava/lang/Object;)V")
            .unwrap();
        let thrown = interp::call_method(
            &engine,
            &mut thread,
            class_id,
            run,
            vec![(mem::Cell::from_slot(target), mem::ValueType::Reference)],
        )
        .unwrap_err();
        assert_eq!(thrown.class_name, "java/lang/IllegalMonitorStateException");
        engine.detach_thread(thread);
    }

    #[test]
    fn gc_relocates_objects_and_keeps_references() {
        let dir = scratch_dir("gcmove");
        write_class(
            &dir,
            "demo/Node",
            &ClassBuilder::new("demo/Node", Some("java/lang/Object"))
                .field(AccessFlags::PUBLIC, "next", "Ldemo/Node;")
                .field(AccessFlags::PUBLIC, "value", "I")
                .build(),
        );

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Node").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, class_id).unwrap();

        let class = engine.class(class_id);
        let next = class.find_field("next", "Ldemo/Node;", false).unwrap().offset;
        let value = class.find_field("value", "I", false).unwrap().offset;

        let head = engine.allocate_object(&thread, class_id).unwrap();
        let tail = engine.allocate_object(&thread, class_id).unwrap();
        {
            let head_address = engine.object_address(head).unwrap();
            let tail_address = engine.object_address(tail).unwrap();
            engine.heap.data().write_u32(head_address + next, tail.0);
            engine.heap.data().write_u32(tail_address + value, 0xBEEF);
        }

        // Only `head` stays rooted; `tail` must survive through its field.
        let mut frame = thread::Frame::new(class_id, 0, 1, 1);
        frame.set_local(0, mem::Cell::from_slot(head), mem::ValueType::Reference);
        assert!(thread.push_frame(frame));

        let old_head_address = engine.object_address(head).unwrap();
        engine.gc.request(GcMode::MinorOnly);
        engine.gc.safepoint(&thread);

        let new_head_address = engine.object_address(head).unwrap();
        assert_ne!(old_head_address, new_head_address, "object did not move out of eden");
        assert!(engine.heap.active_survivor().contains(new_head_address));

        // The slot-indirected reference still reads the same tail object.
        let tail_slot = Slot(engine.heap.data().read_u32(new_head_address + next));
        assert_eq!(tail_slot, tail);
        let tail_address = engine.object_address(tail).unwrap();
        assert_eq!(engine.heap.data().read_u32(tail_address + value), 0xBEEF);

        thread.pop_frame();
        engine.detach_thread(thread);
    }

    #[test]
    fn allocation_pressure_is_survivable_with_a_bounded_live_set() {
        let dir = scratch_dir("gcpressure");
        let engine = engine_for(&dir, 1 << 20); // 1 MiB heap, 256 KiB eden
        let mut thread = engine.attach_thread();

        let byte_array = engine.load_class("[B").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, byte_array).unwrap();

        // Allocate and discard far more than the heap holds.
        for _ in 0..2048 {
            engine.allocate_array(&thread, byte_array, 1024).unwrap();
        }

        assert!(engine.gc.cycles() > 0, "allocation pressure never triggered a gc");
        engine.detach_thread(thread);
    }

    #[test]
    fn dead_slots_are_reclaimed_after_collection() {
        let dir = scratch_dir("gcslots");
        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();

        let byte_array = engine.load_class("[B").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, byte_array).unwrap();

        let keep = engine.allocate_array(&thread, byte_array, 16).unwrap();
        let drop_me = engine.allocate_array(&thread, byte_array, 16).unwrap();
        thread.pinned.push(keep);

        engine.gc.request(GcMode::MinorOnly);
        engine.gc.safepoint(&thread);

        assert!(engine.object_address(keep).is_some());
        assert!(engine.object_address(drop_me).is_none(), "dead slot survived");

        thread.pinned.pop();
        engine.detach_thread(thread);
    }

    #[test]
    fn string_constants_intern_and_read_back() {
        let dir = scratch_dir("strings");
        write_class(
            &dir,
            "java/lang/String",
            &ClassBuilder::new("java/lang/String", Some("java/lang/Object"))
                .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "value", "[C")
                .build(),
        );

        let mut builder = ClassBuilder::new("demo/Text", Some("java/lang/Object"));
        let greeting = builder.string_const("hi");
        let field = builder.field_ref("demo/Text", "text", "Ljava/lang/String;");
        let mut code = vec![0x12, greeting as u8, 0xb3]; // ldc; putstatic
        code.extend_from_slice(&u16be(field));
        code.push(0xb1);
        let image = builder
            .field(AccessFlags::STATIC, "text", "Ljava/lang/String;")
            .method(AccessFlags::STATIC, "run", "()V", 1, 0, &code)
            .build();
        write_class(&dir, "demo/Text", &image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let class_id = engine.load_class("demo/Text").unwrap();
        let (run, _) = engine.class(class_id).find_method("run", "()V").unwrap();
        interp::call_method(&engine, &mut thread, class_id, run, vec![]).unwrap();

        let class = engine.class(class_id);
        let text_field = class.find_field("text", "Ljava/lang/String;", true).unwrap();
        let slot = class.static_read_slot(text_field.offset);
        assert_eq!(strings::read_string(&engine, slot), Some("hi".to_string()));

        // A second load of the same constant hands back the interned object.
        assert_eq!(engine.interned_lookup("hi"), Some(slot));
        engine.detach_thread(thread);
    }

    #[test]
    fn virtual_dispatch_selects_the_receiver_class() {
        let dir = scratch_dir("virtual");

        // Base.id() -> 1, Sub.id() -> 2; run(obj) { result = obj.id(); }
        let base_image = ClassBuilder::new("demo/Base", Some("java/lang/Object"))
            .method(AccessFlags::PUBLIC, "id", "()I", 1, 1, &[0x04, 0xac])
            .build();
        let sub_image = ClassBuilder::new("demo/Sub", Some("demo/Base"))
            .method(AccessFlags::PUBLIC, "id", "()I", 1, 1, &[0x05, 0xac])
            .build();

        let mut runner = ClassBuilder::new("demo/Runner", Some("java/lang/Object"));
        let id_ref = runner.method_ref("demo/Base", "id", "()I");
        let result = runner.field_ref("demo/Runner", "result", "I");
        let mut code = vec![0x2a, 0xb6]; // aload_0; invokevirtual
        code.extend_from_slice(&u16be(id_ref));
        code.push(0xb3);
        code.extend_from_slice(&u16be(result));
        code.push(0xb1);
        let runner_image = runner
            .field(AccessFlags::STATIC, "result", "I")
            .method(
                AccessFlags::STATIC,
                "run",
                "(Ldemo/Base;)V",
                2,
                1,
                &code,
            )
            .build();

        write_class(&dir, "demo/Base", &base_image);
        write_class(&dir, "demo/Sub", &sub_image);
        write_class(&dir, "demo/Runner", &runner_image);

        let engine = engine_for(&dir, 1 << 20);
        let mut thread = engine.attach_thread();
        let runner_id = engine.load_class("demo/Runner").unwrap();
        let sub_id = engine.load_class("demo/Sub").unwrap();
        class::init::ensure_initialized(&engine, &mut thread, sub_id).unwrap();

        let receiver = engine.allocate_object(&thread, sub_id).unwrap();
        let (run, _) = engine
            .class(runner_id)
            .find_method("run", "(Ldemo/Base;)V")
            .unwrap();
        interp::call_method(
            &engine,
            &mut thread,
            runner_id,
            run,
            vec![(mem::Cell::from_slot(receiver), mem::ValueType::Reference)],
        )
        .unwrap();

        assert_eq!(static_int(&engine, "demo/Runner", "result"), 2);
        engine.detach_thread(thread);
    }

    #[test]
    fn hello_world_through_run_main() {
        let dir = scratch_dir("hello");
        write_class(
            &dir,
            "java/lang/String",
            &ClassBuilder::new("java/lang/String", Some("java/lang/Object"))
                .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "value", "[C")
                .build(),
        );
        write_class(
            &dir,
            "java/io/PrintStream",
            &ClassBuilder::new("java/io/PrintStream", Some("java/lang/Object"))
                .bodyless_method(
                    AccessFlags::PUBLIC | AccessFlags::NATIVE,
                    "println",
                    "(Ljava/lang/String;)V",
                )
                .build(),
        );

        // System.<clinit>: out = new PrintStream();
        let mut system = ClassBuilder::new("java/lang/System", Some("java/lang/Object"));
        let stream_class = system.class_const("java/io/PrintStream");
        let out_ref = system.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let mut clinit = vec![0xbb]; // new
        clinit.extend_from_slice(&u16be(stream_class));
        clinit.push(0xb3);
        clinit.extend_from_slice(&u16be(out_ref));
        clinit.push(0xb1);
        write_class(
            &dir,
            "java/lang/System",
            &system
                .field(AccessFlags::PUBLIC | AccessFlags::STATIC, "out", "Ljava/io/PrintStream;")
                .method(AccessFlags::STATIC, "<clinit>", "()V", 1, 0, &clinit)
                .build(),
        );

        // main: System.out.println("hi");
        let mut hello = ClassBuilder::new("demo/Hello", Some("java/lang/Object"));
        let out_field = hello.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let greeting = hello.string_const("hi");
        let println = hello.method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
        let mut main_code = vec![0xb2];
        main_code.extend_from_slice(&u16be(out_field));
        main_code.push(0x12);
        main_code.push(greeting as u8);
        main_code.push(0xb6);
        main_code.extend_from_slice(&u16be(println));
        main_code.push(0xb1);
        write_class(
            &dir,
            "demo/Hello",
            &hello
                .method(
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    "main",
                    "([Ljava/lang/String;)V",
                    2,
                    1,
                    &main_code,
                )
                .build(),
        );

        let engine = engine_for(&dir, 1 << 20);
        let status = engine.run_main("demo/Hello", &["ignored".to_string()]).unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn run_main_reports_missing_main_method() {
        let dir = scratch_dir("nomain");
        write_class(
            &dir,
            "demo/Empty",
            &ClassBuilder::new("demo/Empty", Some("java/lang/Object")).build(),
        );

        let engine = engine_for(&dir, 1 << 20);
        match engine.run_main("demo/Empty", &[]) {
            Err(FatalError::MainMethodNotFound(class)) => assert_eq!(class, "demo/Empty"),
            x => panic!("expected MainMethodNotFound, got {:?}", x.map(|_| ())),
        }
    }
}
