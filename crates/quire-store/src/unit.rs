//! Per-container unit-of-work lock.
//!
//! Every access to a container's transaction state goes through this lock.
//! The owning thread may re-enter it, so container calls made from inside
//! [`crate::Container::unit`] do not wait on themselves.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::error::StoreResult;

#[derive(Default)]
pub(crate) struct UnitLock {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl UnitLock {
    /// Block until no other thread owns the lock, then take it.
    pub(crate) fn acquire(&self) -> StoreResult<UnitGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock()?;
        loop {
            let current = *owner;
            match current {
                None => {
                    *owner = Some((me, 1));
                    return Ok(UnitGuard { lock: self, outermost: true });
                }
                Some((tid, depth)) if tid == me => {
                    *owner = Some((tid, depth + 1));
                    return Ok(UnitGuard { lock: self, outermost: false });
                }
                Some(_) => owner = self.released.wait(owner)?,
            }
        }
    }
}

pub(crate) struct UnitGuard<'a> {
    lock: &'a UnitLock,
    outermost: bool,
}

impl UnitGuard<'_> {
    /// `false` when this thread already held the lock.
    pub(crate) fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut owner) = self.lock.owner.lock() else {
            return;
        };
        let current = *owner;
        match current {
            Some((tid, depth)) if depth > 1 => *owner = Some((tid, depth - 1)),
            _ => {
                *owner = None;
                self.lock.released.notify_all();
            }
        }
    }
}
