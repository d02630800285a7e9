//! Pipeline latch buffer.
//!
//! A `Latch<T>` is a bounded ordered queue whose entries each carry a ready
//! cycle. Consumers only observe an entry once its ready cycle has been
//! reached; producers append with the cycle at which the entry becomes
//! visible. The three failure modes (empty, stall, full) are the only
//! backpressure signals exchanged between pipeline stages.

use std::collections::VecDeque;
use thiserror::Error;

/// Latch access outcome for the non-`Ok` cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LatchError {
    /// The latch holds no entry at the requested position.
    #[error("is empty")]
    Empty,
    /// The entry exists but its ready cycle has not been reached.
    #[error("content is not ready")]
    Stall,
    /// The latch is at capacity.
    #[error("is full")]
    Full,
}

struct Entry<T> {
    ready: u64,
    elem: T,
}

/// Bounded ordered buffer with per-entry ready cycles.
pub struct Latch<T> {
    max: usize,
    queue: VecDeque<Entry<T>>,
}

impl<T> Latch<T> {
    /// Creates a latch holding at most `max` entries.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            queue: VecDeque::with_capacity(max),
        }
    }

    /// Returns the number of entries, visible or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if the latch holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns true if the head entry is visible at `now`. An empty latch is
    /// considered ready (nothing is stalling).
    pub fn ready(&self, now: u64) -> bool {
        self.queue.front().map_or(true, |e| e.ready <= now)
    }

    /// Appends an entry that becomes visible at `ready`.
    pub fn push_back(&mut self, ready: u64, elem: T) -> Result<(), LatchError> {
        if self.queue.len() >= self.max {
            return Err(LatchError::Full);
        }
        self.queue.push_back(Entry { ready, elem });
        Ok(())
    }

    /// Prepends an entry that becomes visible at `ready`. Used for exception
    /// reinsertion at the head of the ROB.
    pub fn push_front(&mut self, ready: u64, elem: T) -> Result<(), LatchError> {
        if self.queue.len() >= self.max {
            return Err(LatchError::Full);
        }
        self.queue.push_front(Entry { ready, elem });
        Ok(())
    }

    /// Returns the head entry if it is visible at `now`.
    pub fn front(&self, now: u64) -> Result<&T, LatchError> {
        match self.queue.front() {
            None => Err(LatchError::Empty),
            Some(e) if e.ready > now => Err(LatchError::Stall),
            Some(e) => Ok(&e.elem),
        }
    }

    /// Returns the head entry mutably if it is visible at `now`.
    pub fn front_mut(&mut self, now: u64) -> Result<&mut T, LatchError> {
        match self.queue.front_mut() {
            None => Err(LatchError::Empty),
            Some(e) if e.ready > now => Err(LatchError::Stall),
            Some(e) => Ok(&mut e.elem),
        }
    }

    /// Removes and returns the head entry if it is visible at `now`.
    pub fn take_front(&mut self, now: u64) -> Result<T, LatchError> {
        match self.queue.front() {
            None => return Err(LatchError::Empty),
            Some(e) if e.ready > now => return Err(LatchError::Stall),
            Some(_) => {}
        }
        Ok(self.queue.pop_front().unwrap().elem)
    }

    /// Removes the head entry regardless of readiness.
    pub fn pop_front(&mut self) -> Option<T> {
        self.queue.pop_front().map(|e| e.elem)
    }

    /// Returns the most recently appended entry mutably, ignoring readiness.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.queue.back_mut().map(|e| &mut e.elem)
    }

    /// Indexes into the queue; `Stall` if the entry is not yet visible.
    pub fn at(&self, now: u64, index: usize) -> Result<&T, LatchError> {
        match self.queue.get(index) {
            None => Err(LatchError::Empty),
            Some(e) if e.ready > now => Err(LatchError::Stall),
            Some(e) => Ok(&e.elem),
        }
    }

    /// Indexes into the queue mutably; `Stall` if the entry is not yet visible.
    pub fn at_mut(&mut self, now: u64, index: usize) -> Result<&mut T, LatchError> {
        match self.queue.get_mut(index) {
            None => Err(LatchError::Empty),
            Some(e) if e.ready > now => Err(LatchError::Stall),
            Some(e) => Ok(&mut e.elem),
        }
    }

    /// Number of entries in the visible prefix at `now`.
    pub fn visible_len(&self, now: u64) -> usize {
        self.queue.iter().take_while(|e| e.ready <= now).count()
    }

    /// Discards every entry.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Iterates over all entries in order, ignoring readiness.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.queue.iter().map(|e| &e.elem)
    }

    /// Iterates mutably over all entries in order, ignoring readiness.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.queue.iter_mut().map(|e| &mut e.elem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_stall() {
        let mut l: Latch<u32> = Latch::new(4);
        assert_eq!(l.front(0), Err(LatchError::Empty));
        assert!(l.ready(0));

        l.push_back(5, 11).unwrap();
        assert_eq!(l.front(4), Err(LatchError::Stall));
        assert!(!l.ready(4));
        assert_eq!(l.front(5), Ok(&11));
        assert!(l.ready(5));
    }

    #[test]
    fn test_full() {
        let mut l: Latch<u32> = Latch::new(2);
        l.push_back(0, 1).unwrap();
        l.push_back(0, 2).unwrap();
        assert_eq!(l.push_back(0, 3), Err(LatchError::Full));
        assert_eq!(l.push_front(0, 3), Err(LatchError::Full));
    }

    #[test]
    fn test_push_front_ordering() {
        let mut l: Latch<u32> = Latch::new(4);
        l.push_back(0, 1).unwrap();
        l.push_front(0, 2).unwrap();
        assert_eq!(l.take_front(0), Ok(2));
        assert_eq!(l.take_front(0), Ok(1));
        assert_eq!(l.take_front(0), Err(LatchError::Empty));
    }

    #[test]
    fn test_visible_prefix_indexing() {
        let mut l: Latch<u32> = Latch::new(8);
        l.push_back(1, 10).unwrap();
        l.push_back(1, 20).unwrap();
        l.push_back(3, 30).unwrap();

        assert_eq!(l.visible_len(1), 2);
        assert_eq!(l.at(1, 0), Ok(&10));
        assert_eq!(l.at(1, 1), Ok(&20));
        assert_eq!(l.at(1, 2), Err(LatchError::Stall));
        assert_eq!(l.at(1, 3), Err(LatchError::Empty));
        assert_eq!(l.visible_len(3), 3);
    }

    #[test]
    fn test_take_front_respects_ready() {
        let mut l: Latch<u32> = Latch::new(2);
        l.push_back(2, 7).unwrap();
        assert_eq!(l.take_front(1), Err(LatchError::Stall));
        assert_eq!(l.len(), 1);
        assert_eq!(l.take_front(2), Ok(7));
        assert!(l.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut l: Latch<u32> = Latch::new(4);
        l.push_back(0, 1).unwrap();
        l.push_back(0, 2).unwrap();
        l.clear();
        assert!(l.is_empty());
        assert_eq!(l.front(0), Err(LatchError::Empty));
    }
}
