use std::collections::VecDeque;
use std::fmt;

/// Fixed-capacity queue that evicts its oldest element when full.
///
/// `iter` walks newest-first, `asc_iter` oldest-first.
pub struct CircularQueue<T> {
    deque: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> Clone for CircularQueue<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CircularQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deque.fmt(f)
    }
}

impl<T> CircularQueue<T> {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap.max(1),
        }
    }

    /// Pushes `item` as the newest element, returning the evicted oldest one.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() {
            self.deque.pop_back()
        } else {
            None
        };

        self.deque.push_front(item);

        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() == self.capacity
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ T> {
        self.deque.iter()
    }

    #[inline]
    pub fn asc_iter(&self) -> impl Iterator<Item = &'_ T> {
        self.deque.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut q = CircularQueue::with_capacity(3);

        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.push(3), None);
        assert!(q.is_full());
        assert_eq!(q.push(4), Some(1));

        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(q.asc_iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut q = CircularQueue::with_capacity(0);
        q.push('a');
        q.push('b');

        assert_eq!(q.len(), 1);
        assert_eq!(q.iter().next(), Some(&'b'));
        assert!(!q.is_empty());
    }
}
