// SPDX-License-Identifier: Apache-2.0

use super::SpinLock;

use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

/// A queue node owning a value of type `T`.
///
/// Nodes are allocated by the caller and moved into the queue on
/// [`push_back`](SpinQueue::push_back); [`pop_front`](SpinQueue::pop_front) moves them back out.
pub struct Node<T> {
    value: T,
    next: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    /// Allocates a new detached node.
    #[inline]
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self { value, next: None })
    }

    /// Consumes the node and returns its value.
    #[inline]
    pub fn into_inner(self: Box<Self>) -> T {
        self.value
    }

    /// Returns `true` if the node is linked to a successor.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }
}

impl<T> Deref for Node<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Node<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("value", &self.value).finish()
    }
}

struct Inner<T> {
    head: Option<Box<Node<T>>>,
    // Points into the last node of the chain owned by `head`, null iff `head` is `None`.
    tail: *mut Node<T>,
    len: usize,
}

// Safety: `tail` only ever points into nodes owned by `head`.
unsafe impl<T: Send> Send for Inner<T> {}

/// A FIFO of owned nodes guarded by a [`SpinLock`].
///
/// Both operations are O(1) and linearizable under the lock. Any number of producers and
/// consumers may use the queue concurrently.
pub struct SpinQueue<T> {
    inner: SpinLock<Inner<T>>,
}

impl<T> SpinQueue<T> {
    /// Creates an empty queue.
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                head: None,
                tail: ptr::null_mut(),
                len: 0,
            }),
        }
    }

    /// Appends `node` to the back of the queue.
    ///
    /// # Panics
    ///
    /// Panics if `node` is still linked to a successor.
    pub fn push_back(&self, mut node: Box<Node<T>>) {
        assert!(!node.is_linked(), "node is still linked");

        let raw: *mut Node<T> = &mut *node;
        let mut inner = self.inner.lock();
        match NonNull::new(inner.tail) {
            // Safety: `tail` points into the last node owned by `head`, and we hold the lock.
            Some(mut tail) => unsafe { tail.as_mut().next = Some(node) },
            None => inner.head = Some(node),
        }
        inner.tail = raw;
        inner.len += 1;
    }

    /// Detaches the node at the front of the queue, if any.
    pub fn pop_front(&self) -> Option<Box<Node<T>>> {
        let mut inner = self.inner.lock();
        let mut node = inner.head.take()?;
        inner.head = node.next.take();
        if inner.head.is_none() {
            inner.tail = ptr::null_mut();
        }
        inner.len -= 1;
        Some(node)
    }

    /// Returns the number of queued nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns `true` if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().head.is_none()
    }
}

impl<T> Default for SpinQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SpinQueue<T> {
    fn drop(&mut self) {
        // Unlink iteratively, a long chain would overflow the stack in the recursive drop.
        let inner = self.inner.get_mut();
        let mut next = inner.head.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
        inner.tail = ptr::null_mut();
    }
}

impl<T> fmt::Debug for SpinQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo() {
        let queue = SpinQueue::new();
        assert!(queue.pop_front().is_none());

        for i in 0..5 {
            queue.push_back(Node::new(i));
        }
        assert_eq!(queue.len(), 5);

        let popped: Vec<_> = core::iter::from_fn(|| queue.pop_front())
            .map(Node::into_inner)
            .collect();
        assert_eq!(popped, [0, 1, 2, 3, 4]);
        assert!(queue.is_empty());

        // The queue is reusable after it ran empty.
        queue.push_back(Node::new(42));
        assert_eq!(queue.pop_front().map(Node::into_inner), Some(42));
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn node_ownership_returns() {
        let queue = SpinQueue::new();
        queue.push_back(Node::new(String::from("a")));
        let mut node = queue.pop_front().unwrap();
        assert!(!node.is_linked());
        node.push('b');
        queue.push_back(node);
        assert_eq!(&**queue.pop_front().unwrap(), "ab");
    }

    #[test]
    fn concurrent_producers_preserve_per_producer_order() {
        const PRODUCERS: usize = 4;
        const ITEMS: usize = 1000;

        let queue = Arc::new(SpinQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..ITEMS {
                        queue.push_back(Node::new((p, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = [None; PRODUCERS];
        let mut seen = HashSet::new();
        while let Some(node) = queue.pop_front() {
            let (p, i) = node.into_inner();
            if let Some(prev) = last[p] {
                assert!(i > prev, "producer {p} out of order");
            }
            last[p] = Some(i);
            assert!(seen.insert((p, i)));
        }
        assert_eq!(seen.len(), PRODUCERS * ITEMS);
    }
}
