//! Newest-first linked list of partitions
//!
//! Partitions are frequently prepended and occasionally swapped or removed,
//! and are only ever walked front to back, so a singly-linked list with
//! head and tail anchors fits. Nodes are matched by pointer identity of the
//! partition handle, which stays unambiguous even when two partitions share
//! a minimum timestamp.

use super::SharedPartition;
use crate::error::{Result, StorageError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Node {
    value: SharedPartition,
    next: RwLock<Option<Arc<Node>>>,
}

impl Node {
    fn new(value: SharedPartition, next: Option<Arc<Node>>) -> Arc<Self> {
        Arc::new(Self {
            value,
            next: RwLock::new(next),
        })
    }

    fn next(&self) -> Option<Arc<Node>> {
        self.next.read().clone()
    }
}

struct Anchors {
    head: Option<Arc<Node>>,
    tail: Option<Arc<Node>>,
}

/// The partition list. The head is always the newest partition and the only
/// one that may be writable; the tail is the oldest.
pub struct PartitionList {
    anchors: RwLock<Anchors>,
    size: AtomicUsize,
}

impl PartitionList {
    pub fn new() -> Self {
        Self {
            anchors: RwLock::new(Anchors {
                head: None,
                tail: None,
            }),
            size: AtomicUsize::new(0),
        }
    }

    /// Prepend a partition at the head
    pub fn insert(&self, partition: SharedPartition) {
        let mut anchors = self.anchors.write();
        let node = Node::new(partition, anchors.head.take());
        if anchors.tail.is_none() {
            anchors.tail = Some(node.clone());
        }
        anchors.head = Some(node);
        self.size.fetch_add(1, Ordering::AcqRel);
    }

    /// The newest partition, if any
    pub fn head(&self) -> Option<SharedPartition> {
        self.anchors.read().head.as_ref().map(|n| n.value.clone())
    }

    /// Unlink the given partition
    pub fn remove(&self, target: &SharedPartition) -> Result<()> {
        let mut anchors = self.anchors.write();

        let mut prev: Option<Arc<Node>> = None;
        let mut current = anchors.head.clone();
        while let Some(node) = current {
            if Arc::ptr_eq(&node.value, target) {
                let next = node.next();
                match &prev {
                    None => anchors.head = next.clone(),
                    Some(p) => *p.next.write() = next.clone(),
                }
                if next.is_none() {
                    anchors.tail = prev;
                }
                self.size.fetch_sub(1, Ordering::AcqRel);
                return Ok(());
            }
            current = node.next();
            prev = Some(node);
        }
        Err(StorageError::PartitionNotFound)
    }

    /// Replace `old` with `new` in place, preserving the node's neighbors.
    /// Iterators already past the node keep walking the old links.
    pub fn swap(&self, old: &SharedPartition, new: SharedPartition) -> Result<()> {
        let mut anchors = self.anchors.write();

        let mut prev: Option<Arc<Node>> = None;
        let mut current = anchors.head.clone();
        while let Some(node) = current {
            if Arc::ptr_eq(&node.value, old) {
                let replacement = Node::new(new, node.next());
                let at_tail = replacement.next().is_none();
                match &prev {
                    None => anchors.head = Some(replacement.clone()),
                    Some(p) => *p.next.write() = Some(replacement.clone()),
                }
                if at_tail {
                    anchors.tail = Some(replacement);
                }
                return Ok(());
            }
            current = node.next();
            prev = Some(node);
        }
        Err(StorageError::PartitionNotFound)
    }

    /// Number of partitions in the list
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// True when no partition has been inserted yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk newest to oldest. The cursor snapshots the head at creation:
    /// partitions inserted afterwards are not seen, and removing the node
    /// under the cursor does not invalidate it.
    pub fn iter(&self) -> PartitionIter {
        PartitionIter {
            current: self.anchors.read().head.clone(),
        }
    }
}

impl Default for PartitionList {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest-to-oldest cursor over the list
pub struct PartitionIter {
    current: Option<Arc<Node>>,
}

impl Iterator for PartitionIter {
    type Item = SharedPartition;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current.take()?;
        self.current = node.next();
        Some(node.value.clone())
    }
}
