//! Handle-indexed storage
//!
//! Resources that the renderer owns (meshes, materials, textures) are handed
//! out as small integer handles instead of references. Handles are 1-based so
//! that the zero value can mean "no resource".

use std::marker::PhantomData;

use slotmap::{DefaultKey, SlotMap};

/// Typed 1-based handle into a [`HandleArena`]
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The invalid handle
    pub const INVALID: Self = Self { index: 0, _marker: PhantomData };

    /// Build a handle from its raw value
    pub const fn from_raw(index: u32) -> Self {
        Self { index, _marker: PhantomData }
    }

    /// Raw handle value (0 is invalid)
    pub const fn raw(self) -> u32 {
        self.index
    }

    /// Whether the handle can refer to a stored value
    pub const fn is_valid(self) -> bool {
        self.index != 0
    }

    fn slot(self) -> Option<usize> {
        (self.index as usize).checked_sub(1)
    }
}

// Manual impls so `T` does not need to implement these traits
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Append-only arena addressed by [`Handle`]
///
/// Values live in a [`SlotMap`]; `keys` maps each issued handle (minus one)
/// to its slot key. Values are never removed individually, so every issued
/// handle stays valid for the owner's lifetime.
pub struct HandleArena<T> {
    items: SlotMap<DefaultKey, T>,
    keys: Vec<DefaultKey>,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleArena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            items: SlotMap::new(),
            keys: Vec::new(),
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.keys.push(self.items.insert(value));
        // Arena sizes are bounded by GPU resource limits, far below u32::MAX
        Handle::from_raw(self.keys.len() as u32)
    }

    fn key(&self, handle: Handle<T>) -> Option<DefaultKey> {
        handle.slot().and_then(|slot| self.keys.get(slot)).copied()
    }

    /// Look up a value
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.key(handle).and_then(|key| self.items.get(key))
    }

    /// Look up a value mutably
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let key = self.key(handle)?;
        self.items.get_mut(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over handles and values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.keys
            .iter()
            .enumerate()
            .filter_map(|(i, &key)| self.items.get(key).map(|item| (Handle::from_raw(i as u32 + 1), item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one() {
        let mut arena = HandleArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_invalid_handle_never_resolves() {
        let mut arena = HandleArena::new();
        arena.insert(10_u32);
        assert!(!Handle::<u32>::INVALID.is_valid());
        assert_eq!(arena.get(Handle::INVALID), None);
        assert_eq!(arena.get(Handle::from_raw(2)), None);
    }

    #[test]
    fn test_iter_yields_matching_handles() {
        let mut arena = HandleArena::new();
        let first = arena.insert(1);
        let second = arena.insert(2);
        let handles: Vec<_> = arena.iter().map(|(h, _)| h).collect();
        assert_eq!(handles, vec![first, second]);
    }

    #[test]
    fn test_get_mut_updates_only_target() {
        let mut arena = HandleArena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        *arena.get_mut(b).unwrap() = 20;
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.get(b), Some(&20));
        assert_eq!(arena.len(), 2);
        assert!(arena.get_mut(Handle::INVALID).is_none());
    }
}
