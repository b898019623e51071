use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Error for monitor operations attempted by a thread that does not own the
/// lock. Surfaces as `IllegalMonitorStateException` in bytecode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NotOwner;

#[derive(Default)]
struct LockState {
    /// Owning thread id, 0 when unowned.
    owner: u32,
    acquired_count: u32,
}

/// A per-object recursive lock with a wait/notify condition. Backs
/// `monitorenter`/`monitorexit`, `Object.wait`/`notify`, and class
/// initialisation. Thread ids are the engine's monotonic ids, never 0.
#[derive(Default)]
pub struct ObjectLock {
    state: Mutex<LockState>,
    /// Threads contending for entry.
    entry: Condvar,
    /// Threads parked in `wait()`.
    waiters: Condvar,
}

impl ObjectLock {
    pub fn new() -> ObjectLock {
        ObjectLock::default()
    }

    /// Acquires the lock, blocking behind the current owner. Re-entry by the
    /// owner increments the acquisition count.
    pub fn lock(&self, thread_id: u32) {
        debug_assert_ne!(thread_id, 0);
        let mut state = self.state.lock();

        loop {
            if state.owner == 0 {
                state.owner = thread_id;
                state.acquired_count = 1;
                return;
            }
            if state.owner == thread_id {
                state.acquired_count += 1;
                return;
            }
            self.entry.wait(&mut state);
        }
    }

    pub fn try_lock(&self, thread_id: u32) -> bool {
        let mut state = self.state.lock();
        if state.owner == 0 {
            state.owner = thread_id;
            state.acquired_count = 1;
            true
        } else if state.owner == thread_id {
            state.acquired_count += 1;
            true
        } else {
            false
        }
    }

    pub fn unlock(&self, thread_id: u32) -> Result<(), NotOwner> {
        let mut state = self.state.lock();
        if state.owner != thread_id {
            return Err(NotOwner);
        }

        state.acquired_count -= 1;
        if state.acquired_count == 0 {
            state.owner = 0;
            self.entry.notify_one();
        }
        Ok(())
    }

    /// Releases the lock fully, parks until notified (or the timeout
    /// elapses; 0 means wait forever), then re-acquires at the saved
    /// recursion depth. Returns whether the wait timed out.
    pub fn wait(&self, thread_id: u32, millis: u64) -> Result<bool, NotOwner> {
        let mut state = self.state.lock();
        if state.owner != thread_id {
            return Err(NotOwner);
        }

        let saved_count = state.acquired_count;
        state.owner = 0;
        state.acquired_count = 0;
        self.entry.notify_one();

        let timed_out = if millis == 0 {
            self.waiters.wait(&mut state);
            false
        } else {
            self.waiters
                .wait_for(&mut state, Duration::from_millis(millis))
                .timed_out()
        };

        while state.owner != 0 {
            self.entry.wait(&mut state);
        }
        state.owner = thread_id;
        state.acquired_count = saved_count;

        Ok(timed_out)
    }

    pub fn notify_one(&self, thread_id: u32) -> Result<(), NotOwner> {
        let state = self.state.lock();
        if state.owner != thread_id {
            return Err(NotOwner);
        }
        self.waiters.notify_one();
        Ok(())
    }

    pub fn notify_all(&self, thread_id: u32) -> Result<(), NotOwner> {
        let state = self.state.lock();
        if state.owner != thread_id {
            return Err(NotOwner);
        }
        self.waiters.notify_all();
        Ok(())
    }

    pub fn owner(&self) -> u32 {
        self.state.lock().owner
    }

    pub fn acquired_count(&self) -> u32 {
        self.state.lock().acquired_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reentrant_lock_and_full_release() {
        let lock = ObjectLock::new();
        lock.lock(1);
        lock.lock(1);
        assert_eq!(lock.acquired_count(), 2);

        lock.unlock(1).unwrap();
        assert_eq!(lock.owner(), 1);
        lock.unlock(1).unwrap();
        assert_eq!(lock.owner(), 0);
        assert_eq!(lock.acquired_count(), 0);
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        let lock = ObjectLock::new();
        lock.lock(1);
        assert_eq!(lock.unlock(2), Err(NotOwner));
        assert_eq!(lock.notify_one(2), Err(NotOwner));
        lock.unlock(1).unwrap();
    }

    #[test]
    fn wait_times_out_and_reacquires() {
        let lock = ObjectLock::new();
        lock.lock(5);
        lock.lock(5);

        let timed_out = lock.wait(5, 10).unwrap();
        assert!(timed_out);
        assert_eq!(lock.owner(), 5);
        assert_eq!(lock.acquired_count(), 2);
    }

    #[test]
    fn contended_lock_hands_over() {
        let lock = Arc::new(ObjectLock::new());
        lock.lock(1);

        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.lock(2);
                let owner = lock.owner();
                lock.unlock(2).unwrap();
                owner
            })
        };

        thread::sleep(Duration::from_millis(20));
        lock.unlock(1).unwrap();
        assert_eq!(contender.join().unwrap(), 2);
    }

    #[test]
    fn notify_wakes_waiter() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let lock = Arc::new(ObjectLock::new());
        let parked = Arc::new(AtomicBool::new(false));

        let waiter = {
            let lock = Arc::clone(&lock);
            let parked = Arc::clone(&parked);
            thread::spawn(move || {
                lock.lock(2);
                parked.store(true, Ordering::SeqCst);
                let timed_out = lock.wait(2, 0).unwrap();
                lock.unlock(2).unwrap();
                timed_out
            })
        };

        // Once we hold the lock and `parked` is set, the waiter must be
        // inside wait(): it only releases the lock through wait().
        loop {
            lock.lock(1);
            if parked.load(Ordering::SeqCst) {
                break;
            }
            lock.unlock(1).unwrap();
            thread::yield_now();
        }

        lock.notify_one(1).unwrap();
        lock.unlock(1).unwrap();

        assert!(!waiter.join().unwrap());
    }
}
