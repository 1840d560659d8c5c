/*
 * Copyright 2026 The rollfwd authors.
 *
 * This file is part of rollfwd.
 *
 * rollfwd is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * rollfwd is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * rollfwd. If not, see <https://www.gnu.org/licenses/>.
 */

//! Contracts the engine needs from the rest of the filesystem.
//!
//! Every trait here is something a real mount already has (a node cache, a
//! segment allocator, a directory layer, ...); recovery just borrows it for
//! the duration of one call. [`crate::testing::FakeFs`] implements all of
//! them in memory.
//!
//! Every method takes `&self`: a real mount already guards this state behind
//! its own locks (the per-inode and per-segment locks of §5), so the trait
//! boundary matches how the engine actually gets to touch it — through a
//! shared reference into state someone else owns the locking for, not
//! through exclusive borrows the engine itself would need to thread around
//! the collision resolver's lock-drop-and-reacquire dance.

use crate::block_addr::BlkAddr;
use crate::errno::EResult;
use crate::format::{NodeFooter, SummaryEntry, Timespec, BLOCK_SIZE};

pub type Ino = u32;
pub type Nid = u32;

/// Identifies one node page: either the page carrying an inode's own body,
/// or one of its index (dnode) pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DnodeLocator {
	/// The inode this node page ultimately belongs to.
	pub inode: Ino,
	/// Whether `node` is the inode page itself (`true`) or a separate dnode
	/// page reached by walking the inode's index tree (`false`).
	pub is_inode_page: bool,
	/// The node id of the page in question (equal to `inode` when
	/// `is_inode_page`).
	pub nid: Nid,
	/// The file-block offset of the first address slot this page covers.
	pub start_bidx: u64,
}

/// Holds a filesystem-wide lock for the duration of one recovery call,
/// preventing a concurrent checkpoint from racing the roll-forward.
///
/// Dropping the guard releases the lock; the orchestrator holds it for the
/// entire call and releases it only around the few steps the specification
/// calls out as needing the lock dropped (foreign dnode lookups in
/// [`SegmentLayer::owner_of`]).
pub trait CheckpointLock {
	type Guard<'a>
	where
		Self: 'a;

	/// Acquires the lock. Blocks (or, in a real mount, sleeps) until held.
	fn lock(&self) -> Self::Guard<'_>;
}

/// Reads and writes node pages by node id, and knows how to walk a node's
/// index tree.
pub trait NodeLayer {
	/// Reads the node page for `nid`, along with its footer.
	fn read_node(&self, nid: Nid) -> EResult<([u8; BLOCK_SIZE], NodeFooter)>;

	/// Reads whatever node page currently sits at physical block `addr`,
	/// without going through the NAT. Discovery walks the post-checkpoint
	/// log this way, since the NAT hasn't been updated with these writes
	/// yet.
	fn read_raw(&self, addr: BlkAddr) -> EResult<[u8; BLOCK_SIZE]>;

	/// Writes a node page back in place.
	fn write_node(&self, nid: Nid, block: &[u8; BLOCK_SIZE]) -> EResult<()>;

	/// Resolves the node page (and its locator) covering file-block index
	/// `bidx` for `inode`, allocating intermediate index nodes as needed when
	/// `create` is set.
	fn get_dnode(&self, inode: Ino, bidx: u64, create: bool) -> EResult<DnodeLocator>;

	/// Converts a node's position in `inode`'s index tree (its footer's
	/// `ofs`) into the file-block index of its first address slot.
	fn start_bidx_of_node(&self, inode: Ino, ofs: u32) -> EResult<u64>;

	/// Clears the single index slot at file-block offset `bidx` of `inode`,
	/// so the address it held is no longer reachable from that inode. Used
	/// to detach a stale or colliding index (§4.4 cases (b)/(c), §4.5's
	/// collision resolver).
	fn invalidate_index(&self, inode: Ino, bidx: u64) -> EResult<()>;
}

/// The segment summary layer: reverse lookups from a physical block address
/// back to the logical owner that last claimed it, and segment-validity
/// queries.
pub trait SegmentLayer {
	/// Returns the summary entry describing whoever currently owns the
	/// physical block at `addr`, or `None` if the segment holding it isn't a
	/// currently valid data/node segment.
	fn owner_of(&self, addr: BlkAddr) -> EResult<Option<SummaryEntry>>;

	/// Whether `addr` falls in the post-checkpoint main area recovery is
	/// allowed to read (`META_POR`).
	fn in_meta_por(&self, addr: BlkAddr) -> bool;

	/// Reserves a fresh physical block for `nid`'s next write, used when
	/// repair needs to move a block to a new location (the first-blkaddr
	/// tmp-list move in data repair). The specification guarantees this
	/// cannot run out of space during recovery; see
	/// [`crate::errno::bug_on`].
	fn reserve_new_block(&self, nid: Nid) -> EResult<BlkAddr>;

	/// Clears the summary entry claiming `addr`, once the collision resolver
	/// has detached whatever indexed it.
	fn clear_owner(&self, addr: BlkAddr);

	/// Reconciles zoned-device write pointers with the current segments'
	/// actual write offsets. Only meaningful (and only called) on zoned
	/// mounts that aren't read-only.
	fn fix_curseg_write_pointer(&self) -> EResult<()>;
}

/// Looks inodes up and creates/reuses in-memory inode handles.
pub trait InodeCache {
	/// An opaque handle to an in-memory inode. Recovery never inspects it,
	/// only threads it through to the other traits.
	type Handle: Copy;

	/// Fetches (loading from the node layer if necessary) the in-memory
	/// handle for `ino`.
	fn get(&self, ino: Ino) -> EResult<Self::Handle>;

	/// Reads the live fields [`inode_repair`](crate::inode_repair) needs to
	/// decide whether ownership changed.
	fn snapshot(&self, handle: Self::Handle) -> LiveInodeSnapshot;

	/// Overwrites `handle`'s fields with the values recovered from its
	/// fsynced node page.
	fn apply_recovered(&self, handle: Self::Handle, fields: &RecoveredFields);

	/// Extends `handle`'s size to `new_size`, leaving every other field
	/// untouched. Used when data-index repair found indices past the
	/// current size but no fsynced inode page ever described this ino (its
	/// only post-checkpoint writes were data).
	fn extend_size(&self, handle: Self::Handle, new_size: u64);

	/// Marks `handle` dirty and synced, so it will be written out at the
	/// next checkpoint without re-triggering fsync recovery.
	fn mark_recovered(&self, handle: Self::Handle);

	/// Discards whatever repair may have already applied to `handle` in
	/// memory, so it reloads from its pre-fsync on-disk state at the next
	/// flush instead of the next checkpoint seeing a half-recovered inode.
	/// Called on every fsync-inode table entry when repair fails (§7).
	fn discard_recovery(&self, handle: Self::Handle);
}

/// The subset of a live inode's fields [`crate::inode_repair::recover_inode`]
/// needs to read before overwriting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveInodeSnapshot {
	pub uid: u32,
	pub gid: u32,
	pub projid: u32,
	pub size: u64,
}

/// The fields [`crate::inode_repair::recover_inode`] writes back into the
/// live inode.
#[derive(Debug, Clone)]
pub struct RecoveredFields {
	pub mode: u16,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	pub atime: Timespec,
	pub ctime: Timespec,
	pub mtime: Timespec,
	pub flags: u32,
	/// `i_advise`, copied through verbatim.
	pub advise: u8,
	pub gc_failures: u16,
	pub pin_file: bool,
	pub has_inline_data: bool,
}

/// Directory operations needed to re-link a recovered inode under its
/// parent.
pub trait DirectoryOps {
	type Handle: Copy;

	/// Looks up `name` (using `hash` if the directory is case-folded or
	/// encrypted and a precomputed hash is available) under `parent`.
	fn lookup(&self, parent: Self::Handle, name: &[u8], hash: Option<u32>) -> EResult<Option<Ino>>;

	/// Adds a fresh entry `name` under `parent` pointing at `ino`.
	fn add(&self, parent: Self::Handle, name: &[u8], hash: Option<u32>, ino: Ino) -> EResult<()>;

	/// Deletes the entry `name` under `parent`.
	fn delete(&self, parent: Self::Handle, name: &[u8], hash: Option<u32>) -> EResult<()>;
}

/// Per-project and per-owner quota accounting.
pub trait QuotaOps {
	/// Initializes `inode`'s quota context, so its usage can be charged
	/// against the right ids. Called once per newly discovered fsync-inode
	/// table entry (§4.2's `add`), before any charge against it.
	fn dquot_initialize(&self, inode: Ino) -> EResult<()>;

	/// Charges one inode allocation against `inode`'s quota, for a freshly
	/// materialized inode (a dentry-marked inode page discovery had to
	/// reconstruct rather than one already present in the NAT).
	fn dquot_alloc_inode(&self, inode: Ino) -> EResult<()>;

	/// Transfers `inode`'s block/inode usage from its previous owner to
	/// `new_uid`/`new_gid`, returning `Err(QuotaRepairNeeded)` (never a hard
	/// failure) if the transfer can't be completed inline.
	fn transfer_owner(&self, inode: Ino, new_uid: u32, new_gid: u32) -> EResult<()>;

	/// Transfers `inode`'s project-quota usage to `new_projid`.
	fn transfer_project(&self, inode: Ino, new_projid: u32) -> EResult<()>;

	/// Reserves an orphan-inode slot for `inode`, so a crash partway through
	/// detaching its last link can still be undone on the next mount.
	fn acquire_orphan_inode(&self, inode: Ino) -> EResult<()>;

	/// Enables quota files for the duration of recovery, if this mount has
	/// quotas configured. Returns whether they were actually enabled, so the
	/// orchestrator knows whether to disable them again at teardown.
	fn enable_quotas(&self) -> bool;

	/// Disables quota files previously enabled by `enable_quotas`.
	fn disable_quotas(&self);
}

/// The page cache backing a file's data blocks, as seen during data index
/// repair.
pub trait PageCache {
	/// Drops every cached meta page describing blocks past `MAIN_BLKADDR`.
	/// Run unconditionally at the end of every recovery attempt, successful
	/// or not.
	fn truncate_main_area(&self);

	/// Drops every cached NODE and META page outright. Run only when
	/// recovery fails, so none of the half-applied state can reach the next
	/// checkpoint.
	fn truncate_node_and_meta(&self);
}

/// Superblock-wide flags repair can set.
pub trait SuperblockFlags {
	/// Marks the volume as needing an offline quota repair pass.
	fn set_quota_needs_repair(&self);

	/// Returns the checkpoint version the volume most recently mounted,
	/// against which node footers are checked for recoverability.
	fn mounted_cp_ver(&self) -> u64;

	/// Marks the volume as having just completed a roll-forward recovery.
	fn set_is_recovered(&self);

	/// Commits a fresh checkpoint covering the recovered state.
	fn write_checkpoint(&self) -> EResult<()>;

	/// Whether `POR_DOING` (roll-forward recovery in progress) is currently
	/// set.
	fn por_doing(&self) -> bool;

	/// Clears `POR_DOING`, once recovery has completed without error.
	fn clear_por_doing(&self);

	/// Whether the mount is currently read-only.
	fn is_read_only(&self) -> bool;

	/// Flips the mount's read-only bit, mirroring the orchestrator's
	/// save/clear-temporarily/restore of `s_flags` around a recovery attempt
	/// that needs to write even on a read-only mount.
	fn set_read_only(&self, read_only: bool);

	/// Whether this mount sits on a zoned block device, the precondition for
	/// `SegmentLayer::fix_curseg_write_pointer` to run at all.
	fn is_zoned(&self) -> bool;
}
