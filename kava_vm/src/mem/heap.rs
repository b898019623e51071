use parking_lot::Mutex;

use crate::mem::raw::RawBlock;

/// Rounds object sizes up to the 8-byte allocation granule.
pub fn align(size: usize) -> usize {
    (size + 7) & !7
}

/// A half-open range of byte offsets within the reservation.
#[derive(Copy, Clone, Debug)]
pub struct Region {
    pub start: usize,
    pub size: usize,
}

impl Region {
    pub fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.start + self.size
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

struct HeapState {
    eden_next: usize,
    survivor_next: usize,
    old_next: usize,
    first_half_active: bool,
    /// Set when an evacuation failed and stranded objects may still sit in
    /// the survivor halves; survivor allocation is disabled until a cycle
    /// completes cleanly.
    survivor_poisoned: bool,
}

/// One contiguous reservation carved into four generational regions:
/// eden (¼), two survivor halves (⅛ each), old (½). Addresses handed out are
/// byte offsets from the reservation base; dereferencing goes through the
/// `RawBlock` primitives.
pub struct Heap {
    data: RawBlock,
    eden: Region,
    survivor_a: Region,
    survivor_b: Region,
    old: Region,
    state: Mutex<HeapState>,
}

impl Heap {
    pub fn new(max_heap: usize) -> Option<Heap> {
        if max_heap == 0 || max_heap % 4096 != 0 {
            return None;
        }

        let data = RawBlock::new(max_heap)?;
        let eden_size = max_heap >> 2;
        let survivor_size = eden_size >> 1;

        let eden = Region {
            start: 0,
            size: eden_size,
        };
        let survivor_a = Region {
            start: eden.end(),
            size: survivor_size,
        };
        let survivor_b = Region {
            start: survivor_a.end(),
            size: survivor_size,
        };
        let old = Region {
            start: survivor_b.end(),
            size: max_heap >> 1,
        };

        Some(Heap {
            data,
            eden,
            survivor_a,
            survivor_b,
            old,
            state: Mutex::new(HeapState {
                eden_next: 0,
                survivor_next: 0,
                old_next: 0,
                first_half_active: true,
                survivor_poisoned: false,
            }),
        })
    }

    pub fn data(&self) -> &RawBlock {
        &self.data
    }

    /// Bump-allocates in eden. `None` means the caller should drive a GC and
    /// retry; this never blocks on the collector itself.
    pub fn try_alloc_eden(&self, size: usize) -> Option<usize> {
        let size = align(size);
        let mut state = self.state.lock();

        if self.eden.size - state.eden_next < size {
            return None;
        }

        let address = self.eden.start + state.eden_next;
        state.eden_next += size;
        drop(state);

        // Vacated regions are zeroed by the collector, but fresh reservations
        // and evacuation-failure cycles still require it here.
        self.data.zero_range(address, size);
        Some(address)
    }

    pub fn eden_used(&self) -> usize {
        self.state.lock().eden_next
    }

    pub fn eden(&self) -> Region {
        self.eden
    }

    pub fn old(&self) -> Region {
        self.old
    }

    pub fn active_survivor(&self) -> Region {
        if self.state.lock().first_half_active {
            self.survivor_a
        } else {
            self.survivor_b
        }
    }

    pub fn inactive_survivor(&self) -> Region {
        if self.state.lock().first_half_active {
            self.survivor_b
        } else {
            self.survivor_a
        }
    }

    pub fn in_old(&self, address: usize) -> bool {
        self.old.contains(address)
    }

    // === Collector-side operations: mutators are frozen while these run ===

    /// Flips which survivor half receives this cycle's copies and resets its
    /// bump pointer.
    pub fn switch_active_half(&self) {
        let mut state = self.state.lock();
        state.first_half_active = !state.first_half_active;
        state.survivor_next = 0;
    }

    pub fn alloc_survivor(&self, size: usize) -> Option<usize> {
        let size = align(size);
        let mut state = self.state.lock();
        if state.survivor_poisoned {
            return None;
        }
        let half = if state.first_half_active {
            self.survivor_a
        } else {
            self.survivor_b
        };

        if half.size - state.survivor_next < size {
            return None;
        }

        let address = half.start + state.survivor_next;
        state.survivor_next += size;
        Some(address)
    }

    pub fn alloc_old(&self, size: usize) -> Option<usize> {
        let size = align(size);
        let mut state = self.state.lock();

        if self.old.size - state.old_next < size {
            return None;
        }

        let address = self.old.start + state.old_next;
        state.old_next += size;
        Some(address)
    }

    /// Truncates the tenured bump pointer after sliding compaction.
    pub fn set_old_used(&self, used: usize) {
        self.state.lock().old_next = used;
    }

    pub fn old_used(&self) -> usize {
        self.state.lock().old_next
    }

    /// Zeros eden and the inactive survivor half and resets the eden bump
    /// pointer after a completed evacuation.
    pub fn reset_young(&self) {
        let inactive = self.inactive_survivor();
        self.data.zero_range(self.eden.start, self.eden.size);
        self.data.zero_range(inactive.start, inactive.size);
        let mut state = self.state.lock();
        state.eden_next = 0;
        state.survivor_poisoned = false;
    }

    pub fn poison_survivors(&self) {
        self.state.lock().survivor_poisoned = true;
    }

    pub fn zero_range(&self, start: usize, len: usize) {
        self.data.zero_range(start, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_partition_the_reservation() {
        let heap = Heap::new(64 * 4096).unwrap();
        assert_eq!(heap.eden().size, 16 * 4096);
        assert_eq!(heap.active_survivor().size, 8 * 4096);
        assert_eq!(heap.old().size, 32 * 4096);
        assert_eq!(heap.old().end(), 64 * 4096);
    }

    #[test]
    fn rejects_unaligned_sizes() {
        assert!(Heap::new(4097).is_none());
        assert!(Heap::new(0).is_none());
    }

    #[test]
    fn eden_allocation_bumps_and_aligns() {
        let heap = Heap::new(16 * 4096).unwrap();
        let first = heap.try_alloc_eden(20).unwrap();
        let second = heap.try_alloc_eden(8).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 24);
        assert_eq!(heap.eden_used(), 32);
    }

    #[test]
    fn eden_exhaustion_returns_none() {
        let heap = Heap::new(16 * 4096).unwrap();
        let eden_size = heap.eden().size;
        assert!(heap.try_alloc_eden(eden_size - 8).is_some());
        assert!(heap.try_alloc_eden(64).is_none());

        heap.reset_young();
        assert!(heap.try_alloc_eden(64).is_some());
    }

    #[test]
    fn survivor_halves_swap() {
        let heap = Heap::new(16 * 4096).unwrap();
        let first = heap.active_survivor();
        heap.switch_active_half();
        let second = heap.active_survivor();
        assert_ne!(first.start, second.start);
        assert_eq!(heap.inactive_survivor().start, first.start);

        let copied = heap.alloc_survivor(32).unwrap();
        assert!(second.contains(copied));
    }

    #[test]
    fn old_allocation_is_separate() {
        let heap = Heap::new(16 * 4096).unwrap();
        let tenured = heap.alloc_old(48).unwrap();
        assert!(heap.in_old(tenured));
        assert_eq!(heap.old_used(), 48);
    }
}
