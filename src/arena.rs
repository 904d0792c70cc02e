//! Arena allocation for messages and their containers.
//!
//! An [`Arena`] owns two things: a bump allocator ([`Bump`]) that backs
//! string, bytes, repeated and map storage, and the slot table of message
//! [`Object`]s that [`Message`] handles index into. Nothing is freed
//! individually; memory goes away when the last arena of a fuse group drops.
//!
//! The arena is not generic over the allocator. Blocks are large and rare,
//! so going through `&dyn Allocator` costs nothing measurable and keeps the
//! message types free of allocator parameters.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::Allocator;
use crate::base::{Message, Object};
use crate::descriptor_pool::{DescriptorPool, MessageDescriptor};
use crate::reflection::{DynamicMessage, DynamicMessageRef};
use crate::{Error, Result};

const FIRST_BLOCK_SIZE: usize = 4 * 1024;
const MAX_BLOCK_SIZE: usize = 1024 * 1024;
const BLOCK_ALIGN: usize = 16;

/// Process-unique identity of an arena; part of every [`Message`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(u64);

impl ArenaId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ArenaId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Blocks obtained from one allocator. Shared so that a fuse group can keep
// them alive after the arena that allocated them is gone.
struct BlockList<'alloc> {
    allocator: &'alloc dyn Allocator,
    blocks: Mutex<Vec<(NonNull<u8>, Layout)>>,
}

impl BlockList<'_> {
    fn bytes(&self) -> usize {
        lock(&self.blocks).iter().map(|(_, layout)| layout.size()).sum()
    }
}

impl Drop for BlockList<'_> {
    fn drop(&mut self) {
        let blocks = core::mem::take(&mut *lock(&self.blocks));
        for (ptr, layout) in blocks {
            // Safety: every block was allocated by `self.allocator` with `layout`.
            unsafe { self.allocator.deallocate(ptr, layout) };
        }
    }
}

// Union-find node. The root holds the block lists of every fused arena.
struct FuseNode<'alloc> {
    parent: Mutex<Option<Arc<FuseNode<'alloc>>>>,
    members: Mutex<Vec<Arc<BlockList<'alloc>>>>,
}

impl<'alloc> FuseNode<'alloc> {
    fn root(node: &Arc<FuseNode<'alloc>>) -> Arc<FuseNode<'alloc>> {
        let mut current = node.clone();
        loop {
            let parent = lock(&current.parent).clone();
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }
}

/// Bump allocator backing arena containers.
pub struct Bump<'alloc> {
    cur: *mut u8,
    end: *mut u8,
    next_block_size: usize,
    blocks: Arc<BlockList<'alloc>>,
}

impl<'alloc> Bump<'alloc> {
    fn new(allocator: &'alloc dyn Allocator) -> Self {
        Bump {
            cur: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
            next_block_size: FIRST_BLOCK_SIZE,
            blocks: Arc::new(BlockList {
                allocator,
                blocks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Allocates uninitialized memory for `layout`.
    #[inline]
    pub fn alloc_raw(&mut self, layout: Layout) -> Result<NonNull<u8>> {
        if !self.cur.is_null() {
            let offset = self.cur.align_offset(layout.align());
            let available = self.end as usize - self.cur as usize;
            if offset <= available && layout.size() <= available - offset {
                // Safety: `offset + size` stays within the current block.
                unsafe {
                    let ptr = self.cur.add(offset);
                    self.cur = ptr.add(layout.size());
                    return Ok(NonNull::new_unchecked(ptr));
                }
            }
        }
        self.alloc_in_new_block(layout)
    }

    #[inline(never)]
    fn alloc_in_new_block(&mut self, layout: Layout) -> Result<NonNull<u8>> {
        let oom = Error::OutOfMemory {
            size: layout.size(),
        };
        let needed = layout
            .size()
            .checked_add(layout.align())
            .ok_or_else(|| oom.clone())?;
        let block_size = self.next_block_size.max(needed);
        let block_layout =
            Layout::from_size_align(block_size, BLOCK_ALIGN).map_err(|_| oom.clone())?;
        let block = self
            .blocks
            .allocator
            .allocate(block_layout)
            .map_err(|_| oom)?
            .cast::<u8>();
        lock(&self.blocks.blocks).push((block, block_layout));
        tracing::trace!(block_size, "arena block allocated");

        self.next_block_size = (self.next_block_size * 2).min(MAX_BLOCK_SIZE);
        self.cur = block.as_ptr();
        // Safety: the block is `block_size` bytes long.
        self.end = unsafe { self.cur.add(block_size) };
        self.alloc_raw(layout)
    }

    /// Copies `src` into the arena and returns the start of the copy.
    pub(crate) fn copy_slice<T: Copy>(&mut self, src: &[T]) -> Result<NonNull<T>> {
        if src.is_empty() {
            return Ok(NonNull::dangling());
        }
        let layout = Layout::array::<T>(src.len()).map_err(|_| Error::OutOfMemory {
            size: usize::MAX,
        })?;
        let ptr = self.alloc_raw(layout)?.cast::<T>();
        // Safety: freshly allocated, sized and aligned for `src.len()` elements.
        unsafe { ptr.as_ptr().copy_from_nonoverlapping(src.as_ptr(), src.len()) };
        Ok(ptr)
    }

    /// Total bytes requested from the underlying allocator.
    pub fn space_allocated(&self) -> usize {
        self.blocks.bytes()
    }
}

/// Memory region owning a graph of messages.
///
/// Handles carry the arena's [`ArenaId`]; using a handle with the wrong arena
/// is reported as [`Error::TypeMismatch`] instead of reading unrelated data.
///
/// An arena is neither `Send` nor `Sync`, so a `Mutex` around it does not
/// make it shareable either. Give each thread its own arena and move
/// messages between them as encoded bytes.
pub struct Arena<'alloc> {
    id: ArenaId,
    pub(crate) bump: Bump<'alloc>,
    pub(crate) objects: Vec<Object>,
    fuse: Arc<FuseNode<'alloc>>,
    // Pools of extensions read through this arena that its messages' own
    // pools do not declare. Append-only until the arena drops.
    retained_pools: Mutex<Vec<Box<DescriptorPool>>>,
}

impl<'alloc> Arena<'alloc> {
    pub fn new(allocator: &'alloc dyn Allocator) -> Self {
        let bump = Bump::new(allocator);
        let fuse = Arc::new(FuseNode {
            parent: Mutex::new(None),
            members: Mutex::new(vec![bump.blocks.clone()]),
        });
        Arena {
            id: ArenaId::next(),
            bump,
            objects: Vec::new(),
            fuse,
            retained_pools: Mutex::new(Vec::new()),
        }
    }

    /// Keeps `pool` alive for as long as the arena, so data borrowed from
    /// the returned handle may live as long as views into the arena.
    pub(crate) fn retain_pool(&self, pool: &DescriptorPool) -> &DescriptorPool {
        let mut pools = lock(&self.retained_pools);
        let retained: *const DescriptorPool = match pools.iter().find(|p| p.ptr_eq(pool)) {
            Some(p) => &**p,
            None => {
                let boxed = Box::new(pool.clone());
                let ptr: *const DescriptorPool = &*boxed;
                pools.push(boxed);
                ptr
            }
        };
        // Safety: the boxed pool is neither moved nor dropped before `self`;
        // the vector only ever grows.
        unsafe { &*retained }
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Allocates `size` bytes aligned for any scalar.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let layout =
            Layout::from_size_align(size, 8).map_err(|_| Error::OutOfMemory { size })?;
        self.bump.alloc_raw(layout)
    }

    /// Ties the lifetimes of `self` and `other` together: memory of either
    /// stays valid while any arena of the merged group is alive.
    ///
    /// Idempotent and commutative.
    pub fn fuse(&self, other: &Arena<'alloc>) {
        let a = FuseNode::root(&self.fuse);
        let b = FuseNode::root(&other.fuse);
        if Arc::ptr_eq(&a, &b) {
            return;
        }
        let moved = core::mem::take(&mut *lock(&b.members));
        lock(&a.members).extend(moved);
        *lock(&b.parent) = Some(a);
        tracing::debug!(arena = self.id.0, other = other.id.0, "arenas fused");
    }

    pub fn is_fused_with(&self, other: &Arena<'_>) -> bool {
        let a = FuseNode::root(&self.fuse);
        let b = FuseNode::root(&other.fuse);
        Arc::as_ptr(&a) as *const () == Arc::as_ptr(&b) as *const ()
    }

    pub fn space_allocated(&self) -> usize {
        self.bump.space_allocated()
    }

    /// Number of message objects created in this arena.
    pub fn message_count(&self) -> usize {
        self.objects.len()
    }

    /// Creates an empty message of type `descriptor`.
    pub fn new_message(&mut self, descriptor: &MessageDescriptor) -> Message {
        let slot = self.objects.len() as u32;
        self.objects.push(Object::new(descriptor.clone()));
        Message::new(self.id, slot)
    }

    pub fn message(&self, msg: Message) -> Result<DynamicMessageRef<'_, 'alloc>> {
        self.object(msg)?;
        Ok(DynamicMessageRef::new(self, msg))
    }

    pub fn message_mut(&mut self, msg: Message) -> Result<DynamicMessage<'_, 'alloc>> {
        self.object(msg)?;
        Ok(DynamicMessage::new(self, msg))
    }

    pub(crate) fn check_handle(&self, msg: Message) -> Result<usize> {
        if msg.arena() != self.id {
            return Err(Error::TypeMismatch(format!(
                "message handle belongs to arena {}, not {}",
                msg.arena().0,
                self.id.0
            )));
        }
        let slot = msg.slot() as usize;
        if slot >= self.objects.len() {
            return Err(Error::TypeMismatch(format!("dangling message handle {slot}")));
        }
        Ok(slot)
    }

    pub(crate) fn object(&self, msg: Message) -> Result<&Object> {
        let slot = self.check_handle(msg)?;
        Ok(&self.objects[slot])
    }

    pub(crate) fn object_mut(&mut self, msg: Message) -> Result<&mut Object> {
        let slot = self.check_handle(msg)?;
        Ok(&mut self.objects[slot])
    }
}

impl<'alloc> core::ops::Deref for Arena<'alloc> {
    type Target = Bump<'alloc>;
    fn deref(&self) -> &Bump<'alloc> {
        &self.bump
    }
}

impl<'alloc> core::ops::DerefMut for Arena<'alloc> {
    fn deref_mut(&mut self) -> &mut Bump<'alloc> {
        &mut self.bump
    }
}

impl core::fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id.0)
            .field("messages", &self.objects.len())
            .field("space_allocated", &self.space_allocated())
            .finish()
    }
}
