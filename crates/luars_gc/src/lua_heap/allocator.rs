/// Memory accounting hook consulted for every object and every growable
/// buffer. The heap keeps its own byte counters; the allocator only decides
/// whether a request may proceed.
pub trait Allocator {
    /// Resize a block from `old_size` to `new_size` bytes (0 = free).
    /// Returning `false` refuses a growth request; frees and shrinks always
    /// succeed.
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool;
}

/// Allocator enforcing a hard limit on bytes in use.
#[derive(Debug, Clone)]
pub struct LimitedAllocator {
    limit: usize,
    in_use: usize,
}

impl LimitedAllocator {
    pub fn new(limit: usize) -> Self {
        Self { limit, in_use: 0 }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Allocator for LimitedAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        let base = self.in_use.saturating_sub(old_size);
        if new_size > old_size && base.saturating_add(new_size) > self.limit {
            return false;
        }
        self.in_use = base + new_size;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_refuses_growth_but_not_shrink() {
        let mut a = LimitedAllocator::new(100);
        assert!(a.realloc(0, 60));
        assert!(!a.realloc(0, 50));
        assert!(a.realloc(60, 20));
        assert_eq!(a.in_use(), 20);
        assert!(a.realloc(0, 80));
        assert!(a.realloc(80, 0));
        assert_eq!(a.in_use(), 20);
    }
}
