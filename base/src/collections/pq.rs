//! A keyed priority queue which pops the *lowest* priority first.
//!
//! The event scheduler keeps its units in one of these, keyed by unit
//! and prioritised by due time, so that the earliest event is always
//! at the head and any queued unit can be cancelled by key.
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

#[derive(Debug, Clone)]
struct ReverseOrdered<T> {
    inner: T,
}

impl<T> From<T> for ReverseOrdered<T> {
    fn from(inner: T) -> ReverseOrdered<T> {
        ReverseOrdered { inner }
    }
}

impl<T: Ord> PartialOrd for ReverseOrdered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for ReverseOrdered<T> {}

impl<T: Eq> PartialEq for ReverseOrdered<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for ReverseOrdered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

#[test]
fn test_reverse_order() {
    assert_eq!(ReverseOrdered::from(1), ReverseOrdered::from(1));
    assert_ne!(ReverseOrdered::from(1), ReverseOrdered::from(0));
    assert!(ReverseOrdered::from(1) < ReverseOrdered::from(0));
    assert!(ReverseOrdered::from(1) <= ReverseOrdered::from(0));
    assert!(ReverseOrdered::from(-5) > ReverseOrdered::from(3));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownKeyError;

impl Display for UnknownKeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("key is not present in the priority queue")
    }
}

impl Error for UnknownKeyError {}

pub struct KeyedReversePriorityQueue<K: Hash + Eq, P: Ord> {
    items: KeyedPriorityQueue<K, ReverseOrdered<P>>,
}

impl<K, P> KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    #[must_use]
    pub fn new() -> KeyedReversePriorityQueue<K, P> {
        KeyedReversePriorityQueue {
            items: KeyedPriorityQueue::<K, ReverseOrdered<P>>::new(),
        }
    }

    /// The item with the lowest priority.
    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.inner))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.inner))
    }

    /// Insert `key` with `priority`.  If `key` was already present,
    /// its priority is replaced and the old one returned.
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items
            .push(key, ReverseOrdered::from(priority))
            .map(|rd| rd.inner)
    }

    /// Remove `key` from the queue, returning its priority.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        self.items.remove(key).map(|rd| rd.inner)
    }

    pub fn get_priority(&self, key: &K) -> Option<&P> {
        self.items.get_priority(key).map(|rd| &rd.inner)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.items.get_priority(key).is_some()
    }

    /// Update the priority of a item (identified by `key`) in the
    /// priority queue.
    ///
    /// # Errors
    ///
    /// Err(UnknownKeyError) is returned when the indicated key is
    /// not present.
    pub fn set_priority(&mut self, key: &K, priority: P) -> Result<P, UnknownKeyError> {
        match self.items.set_priority(key, ReverseOrdered::from(priority)) {
            Ok(priority) => Ok(priority.inner),
            Err(_) => Err(UnknownKeyError),
        }
    }

    /// Visit every item, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &P)> {
        self.items.iter().map(|(k, p)| (k, &p.inner))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedReversePriorityQueue")
            .field("items", &self.items)
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: KeyedReversePriorityQueue<usize, usize> = KeyedReversePriorityQueue::default();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
    assert_eq!(q.remove(&3), None);
    assert_eq!(q.set_priority(&3, 1), Err(UnknownKeyError));
}

#[test]
fn test_repeat_push() {
    let mut q: KeyedReversePriorityQueue<usize, char> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push(0, '2'), None);
    assert_eq!(q.push(0, '4'), Some('2'));
    assert_eq!(q.push(0, '3'), Some('4'));
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop(), Some((0, '3')));
    assert!(q.is_empty());
}

#[test]
fn test_ordering() {
    let mut q: KeyedReversePriorityQueue<usize, char> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push(0, '2'), None);
    assert_eq!(q.push(1, '8'), None);
    assert_eq!(q.pop(), Some((0, '2')));
    assert_eq!(q.pop(), Some((1, '8')));
    assert!(q.is_empty());

    // Pop order depends on priority, not insertion order.
    assert_eq!(q.push(1, '8'), None);
    assert_eq!(q.push(0, '2'), None);
    assert_eq!(q.peek(), Some((&0, &'2')));
    assert_eq!(q.pop(), Some((0, '2')));
    assert_eq!(q.pop(), Some((1, '8')));
    assert!(q.is_empty());
}

#[test]
fn test_remove_from_middle() {
    let mut q: KeyedReversePriorityQueue<&str, (i64, u64)> = KeyedReversePriorityQueue::new();
    q.push("a", (10, 0));
    q.push("b", (20, 1));
    q.push("c", (30, 2));
    assert!(q.contains(&"b"));
    assert_eq!(q.remove(&"b"), Some((20, 1)));
    assert!(!q.contains(&"b"));
    assert_eq!(q.get_priority(&"c"), Some(&(30, 2)));
    assert_eq!(q.set_priority(&"c", (5, 3)), Ok((30, 2)));
    assert_eq!(q.pop(), Some(("c", (5, 3))));
    assert_eq!(q.pop(), Some(("a", (10, 0))));
}

#[test]
fn test_iter_and_clear() {
    let mut q: KeyedReversePriorityQueue<u32, u32> = KeyedReversePriorityQueue::new();
    for k in 0..5 {
        q.push(k, 100 - k);
    }
    let mut keys: Vec<u32> = q.iter().map(|(k, _)| *k).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    q.clear();
    assert!(q.is_empty());
}
