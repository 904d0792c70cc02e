//! Arena-allocated containers backing message fields.
//!
//! - [`RepeatedField<T>`]: growable array for repeated fields
//! - [`Bytes`] / [`String`]: immutable byte and UTF-8 payloads
//! - [`MapField`]: insertion-ordered associative container for map fields
//!
//! None of these implement `Drop`. Storage is reclaimed with the arena, and
//! a grown [`RepeatedField`] simply abandons its old buffer.
//!
//! # Example
//!
//! ```
//! use protoarena::{Arena, Global, containers::{RepeatedField, String}};
//!
//! let mut arena = Arena::new(&Global);
//!
//! let mut numbers = RepeatedField::<i32>::new();
//! numbers.push(1, &mut arena).unwrap();
//! numbers.push(2, &mut arena).unwrap();
//! assert_eq!(&numbers[..], &[1, 2]);
//!
//! let s = String::from_str("hello", &mut arena).unwrap();
//! assert_eq!(s.as_str(), "hello");
//! ```

use core::alloc::Layout;
use core::fmt::Debug;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use std::hash::{BuildHasher, RandomState};
use std::sync::OnceLock;

use crate::arena::Bump;
use crate::base::Scalar;
use crate::{Error, Result};

pub struct RepeatedField<T> {
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    frozen: bool,
}

impl<T: Copy> Clone for RepeatedField<T> {
    fn clone(&self) -> Self {
        *self
    }
}

// Copying shares the buffer. Use `clone_in` for an independent copy.
impl<T: Copy> Copy for RepeatedField<T> {}

impl<T: PartialEq> PartialEq for RepeatedField<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slice() == other.slice()
    }
}

impl<T: PartialEq> PartialEq<&[T]> for RepeatedField<T> {
    fn eq(&self, other: &&[T]) -> bool {
        self.slice() == *other
    }
}

impl<T> Default for RepeatedField<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug> Debug for RepeatedField<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.slice().fmt(f)
    }
}

impl<T> RepeatedField<T> {
    pub const fn new() -> Self {
        RepeatedField {
            ptr: NonNull::dangling(),
            len: 0,
            cap: 0,
            frozen: false,
        }
    }

    pub const fn slice(&self) -> &[T] {
        // Safety: `ptr` is dangling only when `len == 0`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn capacity(&self) -> usize {
        self.cap
    }

    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Rejects every later mutation with [`Error::Frozen`].
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            Err(Error::Frozen)
        } else {
            Ok(())
        }
    }
}

impl<T: Copy> RepeatedField<T> {
    pub fn from_slice(slice: &[T], arena: &mut Bump<'_>) -> Result<Self> {
        let mut rf = Self::new();
        rf.append(slice, arena)?;
        Ok(rf)
    }

    #[inline(never)]
    fn grow(&mut self, min_cap: usize, arena: &mut Bump<'_>) -> Result<()> {
        let new_cap = min_cap.max(self.cap * 2).max(4);
        let layout = Layout::array::<T>(new_cap).map_err(|_| Error::OutOfMemory {
            size: usize::MAX,
        })?;
        let new_ptr = arena.alloc_raw(layout)?.cast::<T>();
        // Safety: the new buffer holds at least `len` elements and does not
        // overlap the old one.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len);
        }
        self.ptr = new_ptr;
        self.cap = new_cap;
        Ok(())
    }

    pub fn reserve(&mut self, additional: usize, arena: &mut Bump<'_>) -> Result<()> {
        self.check_mutable()?;
        let needed = self.len + additional;
        if needed > self.cap {
            self.grow(needed, arena)?;
        }
        Ok(())
    }

    #[inline]
    pub fn push(&mut self, elem: T, arena: &mut Bump<'_>) -> Result<()> {
        self.check_mutable()?;
        if self.len == self.cap {
            self.grow(self.len + 1, arena)?;
        }
        // Safety: `len < cap` after growing.
        unsafe { self.ptr.as_ptr().add(self.len).write(elem) };
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Option<T>> {
        self.check_mutable()?;
        if self.len == 0 {
            return Ok(None);
        }
        self.len -= 1;
        // Safety: the element at the old last index is initialized.
        Ok(Some(unsafe { self.ptr.as_ptr().add(self.len).read() }))
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.slice().get(index).copied()
    }

    pub fn set(&mut self, index: usize, elem: T) -> Result<()> {
        self.check_mutable()?;
        let len = self.len;
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        // Safety: index checked above.
        unsafe { self.ptr.as_ptr().add(index).write(elem) };
        Ok(())
    }

    pub fn insert(&mut self, index: usize, elem: T, arena: &mut Bump<'_>) -> Result<()> {
        self.check_mutable()?;
        let len = self.len;
        if index > len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        if len == self.cap {
            self.grow(len + 1, arena)?;
        }
        // Safety: room for one more element, shifted range is initialized.
        unsafe {
            let base = self.ptr.as_ptr();
            ptr::copy(base.add(index), base.add(index + 1), len - index);
            base.add(index).write(elem);
        }
        self.len = len + 1;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<T> {
        self.check_mutable()?;
        let len = self.len;
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        // Safety: index checked above.
        unsafe {
            let base = self.ptr.as_ptr();
            let result = base.add(index).read();
            ptr::copy(base.add(index + 1), base.add(index), len - index - 1);
            self.len = len - 1;
            Ok(result)
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable()?;
        self.len = 0;
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) -> Result<()> {
        self.check_mutable()?;
        self.len = self.len.min(len);
        Ok(())
    }

    pub fn append(&mut self, slice: &[T], arena: &mut Bump<'_>) -> Result<()> {
        self.reserve(slice.len(), arena)?;
        // Safety: capacity reserved above.
        unsafe {
            self.ptr
                .as_ptr()
                .add(self.len)
                .copy_from_nonoverlapping(slice.as_ptr(), slice.len());
        }
        self.len += slice.len();
        Ok(())
    }

    pub fn assign(&mut self, slice: &[T], arena: &mut Bump<'_>) -> Result<()> {
        self.clear()?;
        self.append(slice, arena)
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.check_mutable()?;
        // Safety: `ptr` is dangling only when `len == 0`.
        Ok(unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Independent, unfrozen copy backed by a new buffer from `arena`.
    pub fn clone_in(&self, arena: &mut Bump<'_>) -> Result<Self> {
        Self::from_slice(self.slice(), arena)
    }
}

impl<T> Deref for RepeatedField<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        self.slice()
    }
}

impl<'a, T> IntoIterator for &'a RepeatedField<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.slice().iter()
    }
}

/// Immutable byte payload living in an arena.
#[derive(Clone, Copy)]
pub struct Bytes {
    ptr: NonNull<u8>,
    len: usize,
}

impl Bytes {
    pub const fn new() -> Self {
        Bytes {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    pub fn copy_from(bytes: &[u8], arena: &mut Bump<'_>) -> Result<Self> {
        Ok(Bytes {
            ptr: arena.copy_slice(bytes)?,
            len: bytes.len(),
        })
    }

    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Bytes {
            // Safety: slice pointers are never null.
            ptr: unsafe { NonNull::new_unchecked(bytes.as_ptr() as *mut u8) },
            len: bytes.len(),
        }
    }

    pub const fn as_slice(&self) -> &[u8] {
        // Safety: points at `len` initialized bytes owned by the arena.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Bytes {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Bytes {}

impl core::hash::Hash for Bytes {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state)
    }
}

impl Debug for Bytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_slice().fmt(f)
    }
}

/// UTF-8 payload living in an arena. Only constructed from validated text.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct String(Bytes);

impl String {
    pub const fn new() -> Self {
        String(Bytes::new())
    }

    pub fn from_str(s: &str, arena: &mut Bump<'_>) -> Result<Self> {
        Ok(String(Bytes::copy_from(s.as_bytes(), arena)?))
    }

    pub const fn from_static(s: &'static str) -> Self {
        String(Bytes::from_static(s.as_bytes()))
    }

    pub const fn as_str(&self) -> &str {
        // Safety: constructed only from `&str`.
        unsafe { core::str::from_utf8_unchecked(self.0.as_slice()) }
    }

    pub const fn as_bytes(&self) -> Bytes {
        self.0
    }
}

impl Deref for String {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Debug for String {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl core::fmt::Display for String {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for String {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for String {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

/// Key of a map field. Float, bytes, enum and message keys are not allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(String),
}

impl MapKey {
    pub fn as_key_ref(&self) -> MapKeyRef<'_> {
        match self {
            MapKey::Bool(v) => MapKeyRef::Bool(*v),
            MapKey::Int32(v) => MapKeyRef::Int32(*v),
            MapKey::Int64(v) => MapKeyRef::Int64(*v),
            MapKey::UInt32(v) => MapKeyRef::UInt32(*v),
            MapKey::UInt64(v) => MapKeyRef::UInt64(*v),
            MapKey::String(v) => MapKeyRef::String(v.as_str()),
        }
    }
}

/// Borrowed map key, for lookups that should not allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapKeyRef<'a> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    String(&'a str),
}

impl core::fmt::Display for MapKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MapKey::Bool(v) => write!(f, "{v}"),
            MapKey::Int32(v) => write!(f, "{v}"),
            MapKey::Int64(v) => write!(f, "{v}"),
            MapKey::UInt32(v) => write!(f, "{v}"),
            MapKey::UInt64(v) => write!(f, "{v}"),
            MapKey::String(v) => f.write_str(v.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapEntry {
    pub key: MapKey,
    pub value: Scalar,
}

/// Map storage. Iteration follows insertion order; re-inserting an existing
/// key replaces the value in place.
///
/// Lookups go through `index`, an open-addressing table of `entry + 1`
/// (0 marks an empty bucket) whose capacity is zero or a power of two kept
/// at most three quarters full.
#[derive(Clone, Copy, Default)]
pub struct MapField {
    entries: RepeatedField<MapEntry>,
    index: RepeatedField<u32>,
}

impl Debug for MapField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|e| (e.key, e.value))).finish()
    }
}

impl PartialEq for MapField {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

fn hash_key(key: MapKeyRef<'_>) -> usize {
    static STATE: OnceLock<RandomState> = OnceLock::new();
    STATE.get_or_init(RandomState::new).hash_one(key) as usize
}

impl MapField {
    pub const fn new() -> Self {
        MapField {
            entries: RepeatedField::new(),
            index: RepeatedField::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MapEntry] {
        self.entries.slice()
    }

    /// Entries ordered by key, for deterministic output.
    pub fn sorted_entries(&self) -> Vec<MapEntry> {
        let mut entries = self.entries.slice().to_vec();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    // Bucket holding `key`, or the empty bucket where it would go.
    fn bucket(&self, key: MapKeyRef<'_>) -> Option<usize> {
        let buckets = self.index.slice();
        if buckets.is_empty() {
            return None;
        }
        let mask = buckets.len() - 1;
        let mut b = hash_key(key) & mask;
        loop {
            match buckets[b] {
                0 => return Some(b),
                slot if self.entries[slot as usize - 1].key.as_key_ref() == key => return Some(b),
                _ => b = (b + 1) & mask,
            }
        }
    }

    pub fn position(&self, key: &MapKey) -> Option<usize> {
        self.find(key.as_key_ref())
    }

    /// Index of the entry under `key`.
    pub fn find(&self, key: MapKeyRef<'_>) -> Option<usize> {
        let b = self.bucket(key)?;
        match self.index[b] {
            0 => None,
            slot => Some(slot as usize - 1),
        }
    }

    pub fn get(&self, key: &MapKey) -> Option<&Scalar> {
        self.position(key).map(|i| &self.entries[i].value)
    }

    /// Returns the replaced value, if any.
    pub fn insert(
        &mut self,
        key: MapKey,
        value: Scalar,
        arena: &mut Bump<'_>,
    ) -> Result<Option<Scalar>> {
        if let Some(i) = self.position(&key) {
            let old = self.entries[i].value;
            self.entries.set(i, MapEntry { key, value })?;
            return Ok(Some(old));
        }
        let slot = u32::try_from(self.entries.len() + 1).map_err(|_| Error::OutOfMemory {
            size: usize::MAX,
        })?;
        self.entries.push(MapEntry { key, value }, arena)?;
        if self.entries.len() * 4 > self.index.len() * 3 {
            let buckets = (self.index.len() * 2).max(8);
            self.index = RepeatedField::new();
            self.index.reserve(buckets, arena)?;
            for _ in 0..buckets {
                self.index.push(0, arena)?;
            }
            self.reindex()?;
        } else if let Some(b) = self.bucket(key.as_key_ref()) {
            self.index.set(b, slot)?;
        }
        Ok(None)
    }

    // Refills the existing buckets from `entries`.
    fn reindex(&mut self) -> Result<()> {
        self.index.as_mut_slice()?.fill(0);
        for i in 0..self.entries.len() {
            if let Some(b) = self.bucket(self.entries[i].key.as_key_ref()) {
                self.index.set(b, i as u32 + 1)?;
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &MapKey) -> Result<Option<Scalar>> {
        self.entries.check_mutable()?;
        match self.position(key) {
            Some(i) => {
                let removed = self.entries.remove(i)?.value;
                self.reindex()?;
                Ok(Some(removed))
            }
            None => Ok(None),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear()?;
        self.index.as_mut_slice()?.fill(0);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.entries.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.entries.is_frozen()
    }

    // Values only; keys stay where the index expects them.
    pub(crate) fn entries_mut(&mut self) -> Result<&mut [MapEntry]> {
        self.entries.as_mut_slice()
    }

    pub fn clone_in(&self, arena: &mut Bump<'_>) -> Result<Self> {
        Ok(MapField {
            entries: self.entries.clone_in(arena)?,
            index: self.index.clone_in(arena)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arena, Global};

    #[test]
    fn repeated_field_grows_and_keeps_order() {
        let mut arena = Arena::new(&Global);
        let mut rf = RepeatedField::<u64>::new();
        for i in 0..100 {
            rf.push(i, &mut arena).unwrap();
        }
        assert_eq!(rf.len(), 100);
        assert_eq!(rf[0], 0);
        assert_eq!(rf[99], 99);
        assert_eq!(rf.remove(0).unwrap(), 0);
        rf.insert(0, 42, &mut arena).unwrap();
        assert_eq!(rf[0], 42);
        assert_eq!(rf.pop().unwrap(), Some(99));
        assert_eq!(
            rf.set(500, 1),
            Err(Error::IndexOutOfBounds {
                index: 500,
                len: 99
            })
        );
    }

    #[test]
    fn frozen_field_rejects_mutation() {
        let mut arena = Arena::new(&Global);
        let mut rf = RepeatedField::from_slice(&[1, 2, 3], &mut arena).unwrap();
        rf.freeze();
        assert_eq!(rf.push(4, &mut arena), Err(Error::Frozen));
        assert_eq!(rf.set(0, 9), Err(Error::Frozen));
        assert_eq!(rf.clear(), Err(Error::Frozen));
        assert_eq!(rf.pop(), Err(Error::Frozen));
        assert_eq!(&rf[..], &[1, 2, 3]);

        let mut copy = rf.clone_in(&mut arena).unwrap();
        copy.push(4, &mut arena).unwrap();
        assert_eq!(&copy[..], &[1, 2, 3, 4]);
        assert_eq!(&rf[..], &[1, 2, 3]);
    }

    #[test]
    fn map_field_replaces_and_sorts() {
        let mut arena = Arena::new(&Global);
        let mut map = MapField::new();
        let b = MapKey::String(String::from_str("b", &mut arena).unwrap());
        let a = MapKey::String(String::from_str("a", &mut arena).unwrap());
        map.insert(b, Scalar::Int32(1), &mut arena).unwrap();
        map.insert(a, Scalar::Int32(2), &mut arena).unwrap();
        assert_eq!(
            map.insert(b, Scalar::Int32(3), &mut arena).unwrap(),
            Some(Scalar::Int32(1))
        );
        assert_eq!(map.len(), 2);
        assert_eq!(map.entries()[0].key, b);
        assert_eq!(map.sorted_entries()[0].key, a);
        assert_eq!(map.get(&b), Some(&Scalar::Int32(3)));
        assert_eq!(map.remove(&a).unwrap(), Some(Scalar::Int32(2)));
        assert_eq!(map.get(&a), None);

        map.freeze();
        assert_eq!(map.remove(&b), Err(Error::Frozen));
    }

    #[test]
    fn map_index_survives_growth_removal_and_clear() {
        let mut arena = Arena::new(&Global);
        let mut map = MapField::new();
        for i in 0..10_000 {
            map.insert(MapKey::Int32(i), Scalar::Int32(i), &mut arena).unwrap();
        }
        assert_eq!(map.len(), 10_000);
        assert_eq!(map.get(&MapKey::Int32(9_999)), Some(&Scalar::Int32(9_999)));
        assert_eq!(map.get(&MapKey::Int32(10_000)), None);

        // Replacing keeps the original position.
        map.insert(MapKey::Int32(5), Scalar::Int32(-5), &mut arena).unwrap();
        assert_eq!(map.position(&MapKey::Int32(5)), Some(5));
        assert_eq!(map.len(), 10_000);

        assert_eq!(map.remove(&MapKey::Int32(0)).unwrap(), Some(Scalar::Int32(0)));
        assert_eq!(map.position(&MapKey::Int32(5)), Some(4));
        assert_eq!(map.get(&MapKey::Int32(0)), None);
        assert_eq!(map.get(&MapKey::Int32(1)), Some(&Scalar::Int32(1)));

        let copy = map.clone_in(&mut arena).unwrap();
        map.clear().unwrap();
        assert!(map.is_empty());
        assert_eq!(map.get(&MapKey::Int32(1)), None);
        map.insert(MapKey::Int32(1), Scalar::Int32(7), &mut arena).unwrap();
        assert_eq!(map.entries().len(), 1);
        assert_eq!(copy.get(&MapKey::Int32(1)), Some(&Scalar::Int32(1)));
        assert_eq!(copy.len(), 9_999);
    }

    #[test]
    fn strings_compare_by_content() {
        let mut arena = Arena::new(&Global);
        let s = String::from_str("hello", &mut arena).unwrap();
        assert_eq!(s, String::from_static("hello"));
        assert!(String::from_static("a") < s);
        assert_eq!(Bytes::copy_from(&[], &mut arena).unwrap().len(), 0);
    }
}
