//! An in-memory, order-preserving B+ tree mapping typed keys to opaque value blobs.
//!
//! Nodes live in an arena (`Vec<Node>` indexed by [`NodeId`]) rather than as an owned tree of
//! boxed nodes with raw parent pointers — see the re-architecture notes for why. The whole tree
//! is guarded by one `parking_lot::RwLock`; every public operation, including lookups, takes the
//! write half of that lock (see the concurrency contract in the module docs below).

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};
use parking_lot::RwLock;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

struct LeafNode {
    keys: Vec<Value>,
    values: Vec<Vec<u8>>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

struct InternalNode {
    keys: Vec<Value>,
    children: Vec<NodeId>,
}

enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    fn as_leaf(&self) -> &LeafNode {
        match self {
            Node::Leaf(l) => l,
            Node::Internal(_) => unreachable!("expected leaf node"),
        }
    }
    fn as_leaf_mut(&mut self) -> &mut LeafNode {
        match self {
            Node::Leaf(l) => l,
            Node::Internal(_) => unreachable!("expected leaf node"),
        }
    }
    fn as_internal_mut(&mut self) -> &mut InternalNode {
        match self {
            Node::Internal(i) => i,
            Node::Leaf(_) => unreachable!("expected internal node"),
        }
    }
}

struct Inner {
    order: usize,
    key_kind: ValueKind,
    arena: Vec<Node>,
    root: NodeId,
}

/// An order-preserving index from typed keys to opaque byte-string values.
pub struct BPlusTree {
    inner: RwLock<Inner>,
}

impl BPlusTree {
    /// `order` is the maximum number of keys per node plus one (a node splits once it holds
    /// `order` keys); it must be at least 3.
    #[must_use]
    pub fn new(order: usize, key_kind: ValueKind) -> Self {
        let order = order.max(3);
        let root = Node::Leaf(LeafNode { keys: Vec::new(), values: Vec::new(), prev: None, next: None });
        Self { inner: RwLock::new(Inner { order, key_kind, arena: vec![root], root: NodeId(0) }) }
    }

    #[must_use]
    pub fn key_kind(&self) -> ValueKind {
        self.inner.read().key_kind
    }

    pub fn find(&self, key: &Value) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.write();
        check_kind(&inner, key)?;
        let leaf_id = path_to_leaf(&inner, key)?.1;
        let leaf = inner.arena[leaf_id.0].as_leaf();
        Ok(match leaf_search(&leaf.keys, key)? {
            Ok(idx) => Some(leaf.values[idx].clone()),
            Err(_) => None,
        })
    }

    /// Inserts `key => value`, overwriting any existing value for `key` (upsert semantics).
    pub fn insert(&self, key: Value, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write();
        check_kind(&inner, &key)?;
        let (path, leaf_id) = path_to_leaf(&inner, &key)?;

        let overflow = {
            let leaf = inner.arena[leaf_id.0].as_leaf_mut();
            match leaf_search(&leaf.keys, &key)? {
                Ok(idx) => {
                    leaf.values[idx] = value;
                    false
                }
                Err(idx) => {
                    leaf.keys.insert(idx, key);
                    leaf.values.insert(idx, value);
                    leaf.keys.len() >= inner.order
                }
            }
        };

        if overflow {
            let (promoted, new_id) = split_leaf(&mut inner, leaf_id);
            insert_into_parent(&mut inner, &path, leaf_id, promoted, new_id);
        }
        Ok(())
    }

    /// Removes `key` if present. Does not rebalance underfull nodes (accepted gap, see
    /// DESIGN.md); invariants I1–I4 remain intact regardless.
    pub fn delete(&self, key: &Value) -> Result<bool> {
        let mut inner = self.inner.write();
        check_kind(&inner, key)?;
        let leaf_id = path_to_leaf(&inner, key)?.1;
        let leaf = inner.arena[leaf_id.0].as_leaf_mut();
        Ok(match leaf_search(&leaf.keys, key)? {
            Ok(idx) => {
                leaf.keys.remove(idx);
                leaf.values.remove(idx);
                true
            }
            Err(_) => false,
        })
    }

    /// All entries in ascending key order. Collected eagerly under the tree lock so the result is
    /// a consistent snapshot rather than a live, lock-holding iterator.
    #[must_use]
    pub fn iter_all(&self) -> Vec<(Value, Vec<u8>)> {
        let inner = self.inner.write();
        let mut out = Vec::new();
        let mut current = leftmost_leaf(&inner);
        while let Some(id) = current {
            let leaf = inner.arena[id.0].as_leaf();
            out.extend(leaf.keys.iter().cloned().zip(leaf.values.iter().cloned()));
            current = leaf.next;
        }
        out
    }

    /// Entries with `lo <= key <= hi`. Either bound may be omitted for an open end.
    pub fn range(&self, lo: Option<&Value>, hi: Option<&Value>) -> Result<Vec<(Value, Vec<u8>)>> {
        let inner = self.inner.write();
        if let Some(k) = lo {
            check_kind(&inner, k)?;
        }
        if let Some(k) = hi {
            check_kind(&inner, k)?;
        }
        let mut current = match lo {
            Some(k) => Some(path_to_leaf(&inner, k)?.1),
            None => leftmost_leaf(&inner),
        };
        let mut out = Vec::new();
        'outer: while let Some(id) = current {
            let leaf = inner.arena[id.0].as_leaf();
            for (k, v) in leaf.keys.iter().zip(leaf.values.iter()) {
                if let Some(lo) = lo {
                    if k.cmp(lo)? == Ordering::Less {
                        continue;
                    }
                }
                if let Some(hi) = hi {
                    if k.cmp(hi)? == Ordering::Greater {
                        break 'outer;
                    }
                }
                out.push((k.clone(), v.clone()));
            }
            current = leaf.next;
        }
        Ok(out)
    }
}

fn check_kind(inner: &Inner, key: &Value) -> Result<()> {
    match key.kind() {
        Some(k) if k == inner.key_kind => Ok(()),
        Some(actual) => Err(Error::KeyTypeMismatch { expected: inner.key_kind, actual }),
        None => Ok(()),
    }
}

fn child_index(keys: &[Value], key: &Value) -> Result<usize> {
    let mut chosen = 0;
    for key_i in keys {
        if key.cmp(key_i)? != Ordering::Less {
            chosen += 1;
        } else {
            break;
        }
    }
    Ok(chosen)
}

/// Binary search for `key` in a sorted leaf's keys: `Ok(idx)` if present, `Err(idx)` for the
/// sorted insertion point otherwise.
fn leaf_search(keys: &[Value], key: &Value) -> Result<std::result::Result<usize, usize>> {
    let mut lo = 0usize;
    let mut hi = keys.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match key.cmp(&keys[mid])? {
            Ordering::Equal => return Ok(Ok(mid)),
            Ordering::Less => hi = mid,
            Ordering::Greater => lo = mid + 1,
        }
    }
    Ok(Err(lo))
}

fn path_to_leaf(inner: &Inner, key: &Value) -> Result<(Vec<NodeId>, NodeId)> {
    let mut path = Vec::new();
    let mut current = inner.root;
    loop {
        match &inner.arena[current.0] {
            Node::Leaf(_) => return Ok((path, current)),
            Node::Internal(int) => {
                let idx = child_index(&int.keys, key)?;
                path.push(current);
                current = int.children[idx];
            }
        }
    }
}

fn leftmost_leaf(inner: &Inner) -> Option<NodeId> {
    let mut current = inner.root;
    loop {
        match &inner.arena[current.0] {
            Node::Leaf(_) => return Some(current),
            Node::Internal(int) => current = *int.children.first()?,
        }
    }
}

fn split_leaf(inner: &mut Inner, leaf_id: NodeId) -> (Value, NodeId) {
    let (right_keys, right_values, next_id) = {
        let leaf = inner.arena[leaf_id.0].as_leaf_mut();
        let mid = leaf.keys.len() / 2;
        let right_keys = leaf.keys.split_off(mid);
        let right_values = leaf.values.split_off(mid);
        (right_keys, right_values, leaf.next)
    };
    let promoted = right_keys[0].clone();
    let new_id = NodeId(inner.arena.len());
    inner.arena.push(Node::Leaf(LeafNode {
        keys: right_keys,
        values: right_values,
        prev: Some(leaf_id),
        next: next_id,
    }));
    inner.arena[leaf_id.0].as_leaf_mut().next = Some(new_id);
    if let Some(next) = next_id {
        inner.arena[next.0].as_leaf_mut().prev = Some(new_id);
    }
    (promoted, new_id)
}

/// Inserts `(promoted, right_id)` into the parent of `left_id` along `path` (root-to-parent,
/// nearest parent last), splitting internal nodes and growing the root as needed.
fn insert_into_parent(
    inner: &mut Inner,
    path: &[NodeId],
    mut left_id: NodeId,
    mut promoted: Value,
    mut right_id: NodeId,
) {
    let mut remaining = path.len();
    loop {
        if remaining == 0 {
            let new_root = NodeId(inner.arena.len());
            inner.arena.push(Node::Internal(InternalNode { keys: vec![promoted], children: vec![left_id, right_id] }));
            inner.root = new_root;
            return;
        }
        remaining -= 1;
        let parent_id = path[remaining];
        let parent = inner.arena[parent_id.0].as_internal_mut();
        let pos = parent
            .children
            .iter()
            .position(|&c| c == left_id)
            .expect("left child must be present in its parent");
        parent.keys.insert(pos, promoted.clone());
        parent.children.insert(pos + 1, right_id);

        if parent.keys.len() < inner.order {
            return;
        }

        let mid = parent.keys.len() / 2;
        let promote = parent.keys[mid].clone();
        let right_keys = parent.keys.split_off(mid + 1);
        parent.keys.truncate(mid);
        let right_children = parent.children.split_off(mid + 1);
        let new_internal = NodeId(inner.arena.len());
        inner.arena.push(Node::Internal(InternalNode { keys: right_keys, children: right_children }));

        left_id = parent_id;
        right_id = new_internal;
        promoted = promote;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> Value {
        Value::U64(n)
    }

    #[test]
    fn point_lookup_after_insert() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        tree.insert(key(1), b"alice".to_vec()).unwrap();
        tree.insert(key(2), b"bob".to_vec()).unwrap();
        assert_eq!(tree.find(&key(1)).unwrap(), Some(b"alice".to_vec()));
        assert_eq!(tree.find(&key(99)).unwrap(), None);
    }

    #[test]
    fn upsert_replaces_value_without_growing() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        tree.insert(key(1), b"a".to_vec()).unwrap();
        tree.insert(key(1), b"b".to_vec()).unwrap();
        assert_eq!(tree.iter_all().len(), 1);
        assert_eq!(tree.find(&key(1)).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn iter_all_yields_sorted_keys_across_splits() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        for i in (1..=20).rev() {
            tree.insert(key(i), format!("v{i}").into_bytes()).unwrap();
        }
        let all = tree.iter_all();
        let keys: Vec<u64> = all.iter().map(|(k, _)| match k {
            Value::U64(n) => *n,
            _ => unreachable!(),
        }).collect();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn range_is_inclusive_both_ends() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        for i in 1..=20u64 {
            tree.insert(key(i), vec![]).unwrap();
        }
        let got: Vec<u64> = tree
            .range(Some(&key(5)), Some(&key(10)))
            .unwrap()
            .into_iter()
            .map(|(k, _)| match k {
                Value::U64(n) => n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, vec![5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn delete_removes_key() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        tree.insert(key(1), vec![]).unwrap();
        assert!(tree.delete(&key(1)).unwrap());
        assert_eq!(tree.find(&key(1)).unwrap(), None);
        assert!(!tree.delete(&key(1)).unwrap());
    }

    #[test]
    fn mismatched_key_kind_is_rejected() {
        let tree = BPlusTree::new(4, ValueKind::U64);
        let err = tree.insert(Value::Str("x".into()), vec![]);
        assert!(matches!(err, Err(Error::KeyTypeMismatch { .. })));
    }
}
