use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::yield_now;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};

use crate::mem::heap::align;
use crate::mem::{object, Slot};
use crate::thread::JavaThread;
use crate::Engine;

/// Promotion threshold: objects surviving this many minor collections move
/// to the old generation.
const PROMOTE_AGE: u32 = 4;

/// Every 8th collection also compacts the old generation.
const MAJOR_EVERY: u64 = 8;

/// Free-list fragmentation level that triggers an indirection-table rebuild.
const REBUILD_THRESHOLD: usize = 8192;

/// Requested collection strength. Concurrent requests merge by taking the
/// strongest.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum GcMode {
    Normal,
    MinorOnly,
    ForceMajor,
}

struct GcSync {
    requested: GcMode,
    registered: usize,
    /// Mutators parked at a safepoint.
    waiting: usize,
    /// Mutators blocked in a monitor, wait(), or class-init wait. They
    /// count as stopped and have deposited their roots.
    blocked: usize,
    /// Root slots deposited by parked and blocked threads, keyed by thread.
    parked_roots: HashMap<u32, Vec<Slot>>,
}

/// Stop-the-world coordination. Mutators poll `safepoint` at every
/// instruction; the collector raises `pending`, waits until every
/// registered thread is parked or blocked, runs with the world frozen, then
/// broadcasts the resume.
pub struct GcControl {
    pending: AtomicBool,
    sync: Mutex<GcSync>,
    resume: Condvar,
    cycle: AtomicU64,
}

impl GcControl {
    pub fn new() -> GcControl {
        GcControl {
            pending: AtomicBool::new(false),
            sync: Mutex::new(GcSync {
                requested: GcMode::Normal,
                registered: 0,
                waiting: 0,
                blocked: 0,
                parked_roots: HashMap::new(),
            }),
            resume: Condvar::new(),
            cycle: AtomicU64::new(0),
        }
    }

    pub fn register_mutator(&self, thread_id: u32) {
        let mut sync = self.sync.lock();
        sync.registered += 1;
        trace!("thread {} registered with gc ({} total)", thread_id, sync.registered);
    }

    pub fn unregister_mutator(&self, thread_id: u32) {
        let mut sync = self.sync.lock();
        sync.registered -= 1;
        sync.parked_roots.remove(&thread_id);
        trace!("thread {} unregistered from gc", thread_id);
    }

    /// Asks the collector thread to run. Returns immediately; the caller
    /// must reach a safepoint for the cycle to begin.
    pub fn request(&self, mode: GcMode) {
        let mut sync = self.sync.lock();
        if mode > sync.requested {
            sync.requested = mode;
        }
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    /// The per-instruction check. When no collection is pending this is a
    /// single atomic load; otherwise the thread deposits its reference
    /// roots and parks until the collector finishes.
    pub fn safepoint(&self, thread: &JavaThread) {
        if !self.pending() {
            return;
        }

        let roots = thread.roots();
        let mut sync = self.sync.lock();
        sync.parked_roots.insert(thread.id, roots);
        sync.waiting += 1;

        while self.pending.load(Ordering::SeqCst) {
            self.resume.wait(&mut sync);
        }

        sync.waiting -= 1;
        sync.parked_roots.remove(&thread.id);
    }

    /// Marks the current thread as stopped before it blocks somewhere the
    /// collector cannot see (monitor entry, wait(), class-init waits).
    /// `roots` must include every reference the thread still holds.
    pub fn blocked_enter(&self, thread_id: u32, roots: Vec<Slot>) {
        let mut sync = self.sync.lock();
        sync.parked_roots.insert(thread_id, roots);
        sync.blocked += 1;
    }

    /// Re-joins the mutator world; stalls while a collection is running.
    pub fn blocked_exit(&self, thread_id: u32) {
        let mut sync = self.sync.lock();
        while self.pending.load(Ordering::SeqCst) {
            self.resume.wait(&mut sync);
        }
        sync.blocked -= 1;
        sync.parked_roots.remove(&thread_id);
    }

    /// Runs one stop-the-world cycle. Called from the dedicated collector
    /// thread (or directly by tests with no registered mutators).
    pub fn run_cycle(&self, engine: &Engine) {
        self.pending.store(true, Ordering::SeqCst);

        let mut sync = self.sync.lock();
        loop {
            if sync.waiting + sync.blocked >= sync.registered {
                break;
            }
            drop(sync);
            yield_now();
            sync = self.sync.lock();
        }

        let mode = sync.requested;
        sync.requested = GcMode::Normal;
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;

        let mut roots: Vec<Slot> = sync.parked_roots.values().flatten().copied().collect();
        roots.extend(static_roots(engine));
        roots.extend(engine.interned_roots());

        collect(engine, mode, cycle, &roots);

        self.pending.store(false, Ordering::SeqCst);
        self.resume.notify_all();
    }
}

impl Default for GcControl {
    fn default() -> Self {
        GcControl::new()
    }
}

fn static_roots(engine: &Engine) -> Vec<Slot> {
    let mut roots = Vec::new();
    for class in engine.registry.all_classes() {
        for field in &class.fields {
            if field.is_static() && field.descriptor.is_reference() {
                let slot = class.static_read_slot(field.offset);
                if !slot.is_null() {
                    roots.push(slot);
                }
            }
        }
    }
    roots
}

/// Traces the object graph from the roots. Returns the live list sorted by
/// address (bounding the scan order of the copy phases) and the live slot
/// set.
fn trace_live(engine: &Engine, roots: &[Slot]) -> (Vec<(usize, Slot)>, HashSet<u32>) {
    let heap = &engine.heap;
    let mut live = HashSet::new();
    let mut list = Vec::new();
    let mut work: Vec<Slot> = roots.iter().copied().filter(|s| !s.is_null()).collect();

    while let Some(slot) = work.pop() {
        if slot.is_null() || !live.insert(slot.0) {
            continue;
        }

        let address = match engine.table.read(slot) {
            Some(address) => address,
            None => {
                warn!("{:?} is live but has no address", slot);
                continue;
            }
        };
        list.push((address, slot));

        let class = engine.registry.class(object::class_id(heap, address));
        match &class.element {
            Some(element) if element.is_reference() => {
                for index in 0..object::length(heap, address) as usize {
                    let field = object::element_address(&class, address, index);
                    work.push(Slot(heap.data().read_u32(field)));
                }
            }
            Some(_) => {}
            None => {
                let mut current = Some(class);
                while let Some(class) = current {
                    for field in &class.fields {
                        if !field.is_static() && field.descriptor.is_reference() {
                            work.push(Slot(heap.data().read_u32(address + field.offset)));
                        }
                    }
                    current = class.super_class.map(|id| engine.registry.class(id));
                }
            }
        }
    }

    list.sort_unstable_by_key(|(address, _)| *address);
    (list, live)
}

fn collect(engine: &Engine, mode: GcMode, cycle: u64, roots: &[Slot]) {
    let (live_list, live_set) = trace_live(engine, roots);
    debug!(
        "gc cycle {} ({:?}): {} live objects from {} roots",
        cycle,
        mode,
        live_list.len(),
        roots.len()
    );

    let run_major =
        mode == GcMode::ForceMajor || (mode != GcMode::MinorOnly && cycle % MAJOR_EVERY == 0);
    if run_major {
        major_cycle(engine, &live_list);
    }
    minor_cycle(engine, &live_list);

    reclaim_dead_slots(engine, &live_set);

    if engine.table.fragmented_free() >= REBUILD_THRESHOLD {
        engine.table.rebuild_free_list();
    }
}

/// Evacuates live objects out of eden and the previously active survivor
/// half into the freshly activated half, promoting old-enough objects (or
/// everything once the survivor half overflows) into the old generation.
fn minor_cycle(engine: &Engine, live_list: &[(usize, Slot)]) {
    let heap = &engine.heap;
    heap.switch_active_half();

    let eden = heap.eden();
    let evacuating = heap.inactive_survivor();
    let mut evacuation_failed = false;

    for (address, slot) in live_list {
        let (address, slot) = (*address, *slot);
        if !eden.contains(address) && !evacuating.contains(address) {
            continue;
        }

        let class = engine.registry.class(object::class_id(heap, address));
        let size = object::object_size(heap, address, &class);
        let age = object::age(heap, address) + 1;

        let target = if age >= PROMOTE_AGE {
            heap.alloc_old(size)
        } else {
            heap.alloc_survivor(size).or_else(|| heap.alloc_old(size))
        };

        match target {
            Some(destination) => {
                heap.data().copy_within(address, destination, size);
                object::set_age(heap, destination, age);
                engine.table.write(slot, destination);
            }
            None => evacuation_failed = true,
        }
    }

    if evacuation_failed {
        // Stranded objects still sit in the young regions. Leave them
        // intact and disable survivor allocation so the next cycle cannot
        // bump-allocate over them; the allocator surfaces the pressure as
        // OutOfMemoryError.
        heap.poison_survivors();
        warn!("minor gc could not evacuate the young generation");
    } else {
        heap.reset_young();
    }
}

/// Sliding compaction of the old generation toward its low end. The live
/// list is address-sorted, so each object moves down into space already
/// vacated.
fn major_cycle(engine: &Engine, live_list: &[(usize, Slot)]) {
    let heap = &engine.heap;
    let old = heap.old();
    let mut cursor = old.start;

    for (address, slot) in live_list {
        let (address, slot) = (*address, *slot);
        if !heap.in_old(address) {
            continue;
        }

        let class = engine.registry.class(object::class_id(heap, address));
        let size = object::object_size(heap, address, &class);

        if address != cursor {
            heap.data().copy_within(address, cursor, size);
            engine.table.write(slot, cursor);
        }
        cursor += align(size);
    }

    heap.zero_range(cursor, old.end() - cursor);
    heap.set_old_used(cursor - old.start);
}

/// Frees the slot of every object the trace did not reach and drops any
/// monitor attached to it.
fn reclaim_dead_slots(engine: &Engine, live: &HashSet<u32>) {
    let high_water = engine.table.high_water();
    let mut reclaimed = 0usize;

    for raw in 1..high_water {
        let slot = Slot(raw);
        if live.contains(&raw) {
            continue;
        }
        if engine.table.read(slot).is_some() {
            engine.table.free_slot(slot);
            engine.drop_monitor(slot);
            reclaimed += 1;
        }
    }

    if reclaimed > 0 {
        debug!("reclaimed {} dead slots", reclaimed);
    }
}
