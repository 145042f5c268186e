//! Explicit numeric id allocator.
//!
//! Ids are never handed out implicitly: every id in use was either returned
//! by [`IdPool::allocate`] or claimed with [`IdPool::reserve`], and releasing
//! an id that is not in use is an error rather than a silent no-op.

use std::collections::BTreeSet;
use thiserror::Error;

/// Error type for IdPool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{pool} pool exhausted ({first}-{last})")]
    Exhausted {
        pool: String,
        first: u32,
        last: u32,
    },

    #[error("{pool} id {id} is outside {first}-{last}")]
    OutOfRange {
        pool: String,
        id: u32,
        first: u32,
        last: u32,
    },

    #[error("{pool} id {id} is already allocated")]
    AlreadyAllocated { pool: String, id: u32 },

    #[error("{pool} id {id} is not allocated")]
    NotAllocated { pool: String, id: u32 },
}

/// Allocator over an inclusive id range.
///
/// Allocation walks forward from the last handed out id and wraps around,
/// so a released id is not reused right away.
#[derive(Debug, Clone)]
pub struct IdPool {
    name: String,
    first: u32,
    last: u32,
    next: u32,
    used: BTreeSet<u32>,
}

impl IdPool {
    /// Creates a pool over `first..=last`. The bounds are swapped if given
    /// in reverse.
    pub fn new(name: impl Into<String>, first: u32, last: u32) -> Self {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        Self {
            name: name.into(),
            first,
            last,
            next: first,
            used: BTreeSet::new(),
        }
    }

    /// Number of ids in use.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Hands out the next free id.
    pub fn allocate(&mut self) -> Result<u32, PoolError> {
        if self.used.len() as u64 >= self.capacity() {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                first: self.first,
                last: self.last,
            });
        }
        let mut candidate = self.next;
        while self.used.contains(&candidate) {
            candidate = self.step(candidate);
        }
        self.used.insert(candidate);
        self.next = self.step(candidate);
        Ok(candidate)
    }

    /// Claims a specific id, e.g. one recovered from a stored flow.
    pub fn reserve(&mut self, id: u32) -> Result<(), PoolError> {
        if id < self.first || id > self.last {
            return Err(PoolError::OutOfRange {
                pool: self.name.clone(),
                id,
                first: self.first,
                last: self.last,
            });
        }
        if !self.used.insert(id) {
            return Err(PoolError::AlreadyAllocated {
                pool: self.name.clone(),
                id,
            });
        }
        Ok(())
    }

    /// Returns an id to the pool.
    pub fn release(&mut self, id: u32) -> Result<(), PoolError> {
        if self.used.remove(&id) {
            Ok(())
        } else {
            Err(PoolError::NotAllocated {
                pool: self.name.clone(),
                id,
            })
        }
    }

    fn capacity(&self) -> u64 {
        u64::from(self.last) - u64::from(self.first) + 1
    }

    fn step(&self, id: u32) -> u32 {
        if id >= self.last {
            self.first
        } else {
            id + 1
        }
    }
}
