//! Append-only arena indexed by typed ids.
//!
//! Entries are never moved to a different index. The only way to shrink an
//! [`IndexVec`] is [`IndexVec::truncate`], used to roll back entries created
//! by a failed or throwaway compilation step.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use crate::error::{CompileError, CompileResult};

/// A trait for types that can be used as indices.
pub trait Idx: Copy + Eq {
    fn new(raw: u32) -> Self;
    fn index(self) -> usize;
}

/// A Vec indexed by a newtype index for type safety.
#[derive(Debug, Clone)]
pub struct IndexVec<I: Idx, T> {
    raw: Vec<T>,
    _marker: PhantomData<fn(I) -> I>,
}

impl<I: Idx, T> Default for IndexVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Idx, T> IndexVec<I, T> {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Push a value and return its index.
    pub fn push(&mut self, value: T) -> I {
        let idx = I::new(self.raw.len() as u32);
        self.raw.push(value);
        idx
    }

    /// Push a value, reporting allocation failure instead of aborting.
    pub fn try_push(&mut self, value: T) -> CompileResult<I> {
        self.raw
            .try_reserve(1)
            .map_err(|_| CompileError::NoMemory)?;
        Ok(self.push(value))
    }

    /// Drop every entry at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.raw.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn get(&self, idx: I) -> Option<&T> {
        self.raw.get(idx.index())
    }

    pub fn get_mut(&mut self, idx: I) -> Option<&mut T> {
        self.raw.get_mut(idx.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.raw.iter()
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.raw
            .iter()
            .enumerate()
            .map(|(i, v)| (I::new(i as u32), v))
    }

    pub fn next_idx(&self) -> I {
        I::new(self.raw.len() as u32)
    }
}

impl<I: Idx, T> Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, idx: I) -> &T {
        &self.raw[idx.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, idx: I) -> &mut T {
        &mut self.raw[idx.index()]
    }
}

macro_rules! impl_idx {
    ($ty:ty) => {
        impl Idx for $ty {
            fn new(raw: u32) -> Self {
                Self(raw)
            }
            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

impl_idx!(crate::ids::ModuleId);
impl_idx!(crate::ids::IdentId);
impl_idx!(crate::ids::FeatureId);
impl_idx!(crate::ids::ExtDefId);
impl_idx!(crate::ids::NodeId);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{IdentId, NodeId};

    #[test]
    fn test_push_returns_stable_ids() {
        let mut vec: IndexVec<IdentId, &str> = IndexVec::new();

        let a = vec.push("a");
        let b = vec.try_push("b").unwrap();
        vec.push("c");

        assert_eq!(a, IdentId::new(0));
        assert_eq!(b, IdentId::new(1));
        assert_eq!(vec[a], "a");
        assert_eq!(vec[b], "b");
        assert_eq!(vec.next_idx(), IdentId::new(3));
    }

    #[test]
    fn test_truncate_rolls_back_tail() {
        let mut vec: IndexVec<NodeId, u32> = IndexVec::new();
        vec.push(1);
        let mark = vec.len();
        vec.push(2);
        vec.push(3);

        vec.truncate(mark);
        assert_eq!(vec.len(), 1);
        assert!(vec.get(NodeId::new(1)).is_none());
        assert_eq!(vec.push(4), NodeId::new(1));
    }

    #[test]
    fn test_iter_enumerated() {
        let mut vec: IndexVec<NodeId, char> = IndexVec::new();
        vec.push('x');
        vec.push('y');

        let items: Vec<_> = vec.iter_enumerated().collect();
        assert_eq!(items, vec![(NodeId::new(0), &'x'), (NodeId::new(1), &'y')]);
    }
}
