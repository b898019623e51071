use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::mem::Slot;

const PAGE_BYTES: usize = 4096;
const ENTRIES_PER_PAGE: usize = PAGE_BYTES / size_of::<usize>();

/// Entry value meaning "no object here". A heap address of 0 is valid (the
/// base of eden), so vacancy needs its own sentinel.
const VACANT: usize = usize::MAX;

/// Maps opaque 32-bit slots to heap addresses. Mutators allocate and free
/// slots under the table's own locks; entry *contents* are rewritten only by
/// the collector while every mutator is frozen, so slot reads are plain
/// atomic loads.
pub struct IndirectionTable {
    pages: RwLock<Vec<Box<[AtomicUsize]>>>,
    /// One past the highest slot ever handed out (slot 0 included).
    high_water: Mutex<u32>,
    free_list: Mutex<FreeList>,
}

#[derive(Default)]
struct FreeList {
    slots: Vec<u32>,
    fragmented: usize,
}

fn new_page() -> Box<[AtomicUsize]> {
    (0..ENTRIES_PER_PAGE)
        .map(|_| AtomicUsize::new(VACANT))
        .collect()
}

impl IndirectionTable {
    pub fn new() -> IndirectionTable {
        IndirectionTable {
            pages: RwLock::new(vec![new_page()]),
            high_water: Mutex::new(1),
            free_list: Mutex::new(FreeList::default()),
        }
    }

    fn capacity(&self) -> usize {
        self.pages.read().len() * ENTRIES_PER_PAGE
    }

    /// Claims an unused slot. `None` means the 32-bit slot space is exhausted
    /// or a page could not be mapped.
    pub fn allocate_slot(&self) -> Option<Slot> {
        {
            let mut free = self.free_list.lock();
            if let Some(slot) = free.slots.pop() {
                free.fragmented -= 1;
                return Some(Slot(slot));
            }
        }

        let mut high_water = self.high_water.lock();
        if *high_water == u32::MAX {
            return None;
        }

        if *high_water as usize == self.capacity() {
            self.pages.write().push(new_page());
        }

        let slot = *high_water;
        *high_water += 1;
        Some(Slot(slot))
    }

    /// Releases a slot. Freeing the newest slot shrinks the high-water mark;
    /// interior slots go on the free list.
    pub fn free_slot(&self, slot: Slot) {
        if slot.is_null() {
            return;
        }
        self.clear(slot);

        {
            let mut high_water = self.high_water.lock();
            if slot.0 + 1 == *high_water {
                *high_water -= 1;
                return;
            }
        }

        let mut free = self.free_list.lock();
        free.slots.push(slot.0);
        free.fragmented += 1;
    }

    /// Current address for a slot, or `None` for null/vacant entries.
    pub fn read(&self, slot: Slot) -> Option<usize> {
        if slot.is_null() {
            return None;
        }

        let pages = self.pages.read();
        let page = pages.get(slot.0 as usize / ENTRIES_PER_PAGE)?;
        match page[slot.0 as usize % ENTRIES_PER_PAGE].load(Ordering::Relaxed) {
            VACANT => None,
            address => Some(address),
        }
    }

    /// Points a slot at a new address. Collector-only while mutators are
    /// frozen, except for publishing a freshly allocated object.
    pub fn write(&self, slot: Slot, address: usize) {
        debug_assert!(!slot.is_null(), "slot 0 is permanently null");
        debug_assert_ne!(address, VACANT);

        let pages = self.pages.read();
        let page = &pages[slot.0 as usize / ENTRIES_PER_PAGE];
        page[slot.0 as usize % ENTRIES_PER_PAGE].store(address, Ordering::Relaxed);
    }

    fn clear(&self, slot: Slot) {
        let pages = self.pages.read();
        if let Some(page) = pages.get(slot.0 as usize / ENTRIES_PER_PAGE) {
            page[slot.0 as usize % ENTRIES_PER_PAGE].store(VACANT, Ordering::Relaxed);
        }
    }

    pub fn high_water(&self) -> u32 {
        *self.high_water.lock()
    }

    /// Number of free-list entries in the interior of the occupied range.
    pub fn fragmented_free(&self) -> usize {
        self.free_list.lock().fragmented
    }

    /// Trims trailing vacant entries, releases unused pages, and re-derives
    /// the free list by scanning the interior for vacancies.
    pub fn rebuild_free_list(&self) {
        let mut free = self.free_list.lock();
        let mut high_water = self.high_water.lock();

        while *high_water > 1 && self.entry_is_vacant(*high_water - 1) {
            *high_water -= 1;
        }

        let needed_pages = (*high_water as usize + ENTRIES_PER_PAGE - 1) / ENTRIES_PER_PAGE;
        {
            let mut pages = self.pages.write();
            pages.truncate(needed_pages.max(1));
        }

        free.slots.clear();
        for slot in 1..*high_water {
            if self.entry_is_vacant(slot) {
                free.slots.push(slot);
            }
        }
        free.fragmented = free.slots.len();
    }

    fn entry_is_vacant(&self, slot: u32) -> bool {
        let pages = self.pages.read();
        match pages.get(slot as usize / ENTRIES_PER_PAGE) {
            Some(page) => {
                page[slot as usize % ENTRIES_PER_PAGE].load(Ordering::Relaxed) == VACANT
            }
            None => true,
        }
    }

    /// Packs live entries toward slot 1 and returns the (old, new) slot pairs
    /// the caller must apply to every reference field and root. Only safe
    /// while every mutator is frozen.
    pub fn compact(&self) -> Vec<(Slot, Slot)> {
        let mut free = self.free_list.lock();
        let mut high_water = self.high_water.lock();

        let mut remapped = Vec::new();
        if *high_water <= 1 {
            return remapped;
        }

        let mut start = 1u32;
        let mut end = *high_water - 1;

        while start < end {
            while start < end && !self.entry_is_vacant(start) {
                start += 1;
            }
            while start < end && self.entry_is_vacant(end) {
                end -= 1;
            }

            if start < end {
                let address = {
                    let pages = self.pages.read();
                    pages[end as usize / ENTRIES_PER_PAGE][end as usize % ENTRIES_PER_PAGE]
                        .load(Ordering::Relaxed)
                };
                self.write(Slot(start), address);
                self.clear(Slot(end));
                remapped.push((Slot(end), Slot(start)));
            }
        }

        while *high_water > 1 && self.entry_is_vacant(*high_water - 1) {
            *high_water -= 1;
        }
        free.slots.clear();
        free.fragmented = 0;

        remapped
    }
}

impl Default for IndirectionTable {
    fn default() -> Self {
        IndirectionTable::new()
    }
}
