use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

type Shelf = Arc<Mutex<Vec<Vec<u16>>>>;

/// Register-dump buffers shared by the fleet's health checks
#[derive(Clone)]
pub struct ScratchPool {
    shelf: Shelf,
    words: usize,
}

impl ScratchPool {
    /// Preallocate `count` buffers of `words` capacity each
    pub fn new(count: usize, words: usize) -> Self {
        let shelf = (0..count).map(|_| Vec::with_capacity(words)).collect();
        Self {
            shelf: Arc::new(Mutex::new(shelf)),
            words,
        }
    }

    /// Borrow an empty buffer; a fresh one is made when all are lent out
    pub fn take(&self) -> Scratch {
        let spare = self
            .shelf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        Scratch {
            words: spare.unwrap_or_else(|| Vec::with_capacity(self.words)),
            shelf: self.shelf.clone(),
        }
    }
}

/// Buffer lent by a [`ScratchPool`], put back cleared when dropped
pub struct Scratch {
    words: Vec<u16>,
    shelf: Shelf,
}

impl Deref for Scratch {
    type Target = Vec<u16>;

    fn deref(&self) -> &Vec<u16> {
        &self.words
    }
}

impl DerefMut for Scratch {
    fn deref_mut(&mut self) -> &mut Vec<u16> {
        &mut self.words
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let mut words = std::mem::take(&mut self.words);
        words.clear();
        self.shelf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(words);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_buffer_reused_after_drop() {
        let pool = ScratchPool::new(1, 8);

        let mut first = pool.take();
        first.extend_from_slice(&[0x0100, 0x0200]);
        let reused = first.as_ptr();
        drop(first);

        let second = pool.take();
        assert!(second.is_empty());
        assert!(second.capacity() >= 8);
        assert_eq!(second.as_ptr(), reused);
    }

    #[test]
    fn test_dry_pool_lends_fresh_buffer() {
        let pool = ScratchPool::new(0, 4);
        let mut dump = pool.take();
        dump.push(0xbeef);
        assert_eq!(dump.as_slice(), &[0xbeef]);
    }
}
