//! Typed index handles and the arena map they key into.
//!
//! Machine parts, move nodes, program operations and scheduling resources
//! are all stored in dense arenas and addressed with `u32` newtypes. Cross
//! references between entities are handle lists instead of pointers, which
//! keeps the resource model free of reference cycles and runtime casts.
use std::{marker::PhantomData, ops};

/// Implemented by `u32` newtypes that index into an [IndexedMap].
pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}

/// Implement [IndexRef] for a tuple struct wrapping a `u32`.
#[macro_export]
macro_rules! impl_index {
    ($struct_name: ident) => {
        impl $crate::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0 as usize
            }

            fn new(input: usize) -> Self {
                Self(input as u32)
            }
        }

        impl From<usize> for $struct_name {
            fn from(input: usize) -> Self {
                $crate::IndexRef::new(input)
            }
        }
    };
}

/// A dense arena keyed by a typed index. Pushing hands back the key of the
/// inserted entry; entries are never removed.
#[derive(Debug, Clone)]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    phantom: PhantomData<K>,
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: K) -> Option<&mut D> {
        self.data.get_mut(index.index())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, item: D) -> K {
        self.data.push(item);
        K::new(self.data.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.data.len()).map(K::new)
    }
}

impl<K, D> ops::Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<K, D> Default for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::{IndexRef, IndexedMap};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct MyIdx(u32);
    impl_index!(MyIdx);

    #[test]
    fn push_returns_key() {
        let mut map: IndexedMap<MyIdx, usize> = IndexedMap::new();
        for i in 0..10 {
            let k = map.push(i * 7);
            assert_eq!(k.index(), i);
        }
        assert_eq!(map[MyIdx::new(3)], 21);
        assert_eq!(map.get(MyIdx::new(10)), None);
    }

    proptest::proptest! {
        #[test]
        fn keys_round_trip(values in proptest::collection::vec(0usize..1000, 0..100)) {
            let mut map: IndexedMap<MyIdx, usize> = IndexedMap::new();
            let keys: Vec<MyIdx> =
                values.iter().map(|&v| map.push(v)).collect();
            proptest::prop_assert_eq!(map.len(), values.len());
            for (k, v) in keys.iter().zip(values.iter()) {
                proptest::prop_assert_eq!(map[*k], *v);
            }
        }
    }
}
