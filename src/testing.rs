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

//! An in-memory stand-in for a mount, implementing every collaborator trait
//! in [`crate::collab`].
//!
//! `FakeFs` models only as much of a real filesystem as the engine's traits
//! ask for: one flat dnode per inode (no multi-level index tree, since
//! nothing in this crate depends on tree shape beyond `ofs`/`start_bidx`),
//! a raw block log for the post-checkpoint chain, and a single summary map.
//! Every method takes `&self`; interior mutability (`RefCell`/`Cell`) plays
//! the role a real mount's own locks would.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::block_addr::{BlkAddr, NULL_ADDR};
use crate::collab::{
	CheckpointLock, DirectoryOps, DnodeLocator, Ino, InodeCache, LiveInodeSnapshot, Nid, NodeLayer, PageCache, QuotaOps, RecoveredFields, SegmentLayer,
	SuperblockFlags,
};
use crate::errno::{errno, EResult};
use crate::format::{addr_slots, footer_flags, set_addr_slot, write_footer, write_inode, NodeFooter, RawInode, SummaryEntry, Timespec, BLOCK_SIZE};

#[derive(Debug, Clone, Copy, Default)]
struct LiveInode {
	uid: u32,
	gid: u32,
	projid: u32,
	size: u64,
	mode: u16,
	atime: Timespec,
	ctime: Timespec,
	mtime: Timespec,
	flags: u32,
	advise: u8,
	gc_failures: u16,
	pin_file: bool,
	has_inline_data: bool,
}

pub struct FakeFs {
	log: RefCell<HashMap<BlkAddr, [u8; BLOCK_SIZE]>>,
	live_dnodes: RefCell<HashMap<Ino, ([u8; BLOCK_SIZE], NodeFooter)>>,
	inodes: RefCell<HashMap<Ino, LiveInode>>,
	dirs: RefCell<HashMap<(Ino, Vec<u8>), Ino>>,
	summaries: RefCell<HashMap<BlkAddr, SummaryEntry>>,
	orphans: RefCell<Vec<Ino>>,
	discarded: RefCell<Vec<Ino>>,
	mounted_cp_ver: Cell<u64>,
	chain_cp_ver: Cell<u64>,
	#[allow(dead_code)]
	segment_blocks: u32,
	#[allow(dead_code)]
	total_blocks: u64,
	next_reserved: Cell<BlkAddr>,
	is_recovered: Cell<bool>,
	quota_needs_repair: Cell<bool>,
	checkpoint_written: Cell<bool>,
	por_doing: Cell<bool>,
	read_only: Cell<bool>,
	is_zoned: Cell<bool>,
	quotas_configured: Cell<bool>,
}

impl FakeFs {
	pub fn new(total_blocks: u64, segment_blocks: u32, initial_cp_ver: u64) -> Self {
		Self {
			log: RefCell::new(HashMap::new()),
			live_dnodes: RefCell::new(HashMap::new()),
			inodes: RefCell::new(HashMap::new()),
			dirs: RefCell::new(HashMap::new()),
			summaries: RefCell::new(HashMap::new()),
			orphans: RefCell::new(Vec::new()),
			discarded: RefCell::new(Vec::new()),
			mounted_cp_ver: Cell::new(initial_cp_ver),
			chain_cp_ver: Cell::new(initial_cp_ver),
			segment_blocks,
			total_blocks,
			next_reserved: Cell::new(1_000_000),
			is_recovered: Cell::new(false),
			quota_needs_repair: Cell::new(false),
			checkpoint_written: Cell::new(false),
			por_doing: Cell::new(true),
			read_only: Cell::new(false),
			is_zoned: Cell::new(false),
			quotas_configured: Cell::new(false),
		}
	}

	/// Marks this mount as having quota files configured, so
	/// [`QuotaOps::enable_quotas`] reports `true`.
	pub fn set_quotas_configured(&self, configured: bool) {
		self.quotas_configured.set(configured);
	}

	/// Marks this mount as sitting on a zoned block device.
	pub fn set_zoned(&self, zoned: bool) {
		self.is_zoned.set(zoned);
	}

	pub fn was_discarded(&self, ino: Ino) -> bool {
		self.discarded.borrow().contains(&ino)
	}

	/// Writes a node page into the raw post-checkpoint log at `blkaddr`, the
	/// way a crashed write would have left it.
	pub fn push_dnode(&self, blkaddr: BlkAddr, ino: Ino, ofs: u32, indices: &[BlkAddr], next: Option<BlkAddr>, fsync: bool, dentry: bool) {
		let footer = NodeFooter {
			ino,
			nid: ino,
			ofs,
			flags: footer_flags(false, fsync, dentry),
			cp_ver: self.chain_cp_ver.get(),
			next_blkaddr: next.unwrap_or(NULL_ADDR),
		};
		let mut block = [0u8; BLOCK_SIZE];
		write_footer(&mut block, &footer);
		for (i, &addr) in indices.iter().enumerate() {
			set_addr_slot(&mut block, &footer, i, addr);
		}
		self.log.borrow_mut().insert(blkaddr, block);
	}

	/// Writes an inode-type node page into the raw post-checkpoint log at
	/// `blkaddr`, carrying `name`/`pino` so dentry repair has something to
	/// work with.
	#[allow(clippy::too_many_arguments)]
	pub fn push_inode(&self, blkaddr: BlkAddr, ino: Ino, pino: Ino, name: &[u8], mode: u16, next: Option<BlkAddr>, fsync: bool, dentry: bool) {
		let footer = NodeFooter {
			ino,
			nid: ino,
			ofs: 0,
			flags: footer_flags(true, fsync, dentry),
			cp_ver: self.chain_cp_ver.get(),
			next_blkaddr: next.unwrap_or(NULL_ADDR),
		};
		let mut block = [0u8; BLOCK_SIZE];
		write_footer(&mut block, &footer);
		let raw = RawInode {
			mode,
			uid: 0,
			gid: 0,
			size: 0,
			atime: Timespec::default(),
			ctime: Timespec::default(),
			mtime: Timespec::default(),
			flags: 0,
			inline_bitmap: 0,
			extra_isize: 0,
			projid: 0,
			gc_failures: 0,
			advise: 0,
			name: name.to_vec(),
			pino,
			stored_hash: None,
		};
		write_inode(&mut block, &raw, false);
		self.log.borrow_mut().insert(blkaddr, block);
	}

	pub fn set_mounted_cp_ver(&self, ver: u64) {
		self.mounted_cp_ver.set(ver);
	}

	pub fn bump_mounted_cp_ver(&self) {
		self.mounted_cp_ver.set(self.mounted_cp_ver.get() + 1);
	}

	pub fn add_inode(&self, ino: Ino) {
		self.inodes.borrow_mut().entry(ino).or_insert_with(LiveInode::default);
	}

	pub fn claim_block(&self, addr: BlkAddr, nid: Nid, ofs_in_node: u16) {
		self.summaries.borrow_mut().insert(addr, SummaryEntry { nid, ofs_in_node, version: 0 });
	}

	pub fn index_claims(&self, addr: BlkAddr) -> bool {
		self.summaries.borrow().contains_key(&addr)
	}

	pub fn live_index(&self, ino: Ino, bidx: u64) -> BlkAddr {
		let map = self.live_dnodes.borrow();
		match map.get(&ino) {
			Some((block, footer)) => addr_slots(block, footer).get(bidx as usize).copied().unwrap_or(NULL_ADDR),
			None => NULL_ADDR,
		}
	}

	pub fn set_live_index(&self, ino: Ino, bidx: u64, addr: BlkAddr) {
		self.ensure_dnode(ino);
		let mut map = self.live_dnodes.borrow_mut();
		let (block, footer) = map.get_mut(&ino).unwrap();
		set_addr_slot(block, footer, bidx as usize, addr);
	}

	pub fn dir_lookup(&self, parent: Ino, name: &[u8]) -> Option<Ino> {
		self.dirs.borrow().get(&(parent, name.to_vec())).copied()
	}

	pub fn dir_add(&self, parent: Ino, name: &[u8], ino: Ino) {
		self.dirs.borrow_mut().insert((parent, name.to_vec()), ino);
	}

	pub fn inode_size(&self, ino: Ino) -> u64 {
		self.inodes.borrow()[&ino].size
	}

	pub fn set_inode_owner(&self, ino: Ino, uid: u32, gid: u32) {
		let mut map = self.inodes.borrow_mut();
		let entry = map.entry(ino).or_insert_with(LiveInode::default);
		entry.uid = uid;
		entry.gid = gid;
	}

	pub fn inode_owner(&self, ino: Ino) -> (u32, u32) {
		let entry = &self.inodes.borrow()[&ino];
		(entry.uid, entry.gid)
	}

	pub fn checkpoint_written(&self) -> bool {
		self.checkpoint_written.get()
	}

	pub fn was_orphaned(&self, ino: Ino) -> bool {
		self.orphans.borrow().contains(&ino)
	}

	pub fn inode_mode(&self, ino: Ino) -> u16 {
		self.inodes.borrow()[&ino].mode
	}

	fn ensure_dnode(&self, ino: Ino) {
		let mut map = self.live_dnodes.borrow_mut();
		map.entry(ino).or_insert_with(|| {
			let footer = NodeFooter {
				ino,
				nid: ino,
				ofs: 0,
				flags: footer_flags(false, false, false),
				cp_ver: self.chain_cp_ver.get(),
				next_blkaddr: NULL_ADDR,
			};
			let mut block = [0u8; BLOCK_SIZE];
			write_footer(&mut block, &footer);
			(block, footer)
		});
	}
}

impl CheckpointLock for FakeFs {
	type Guard<'a> = ();

	fn lock(&self) -> Self::Guard<'_> {}
}

impl NodeLayer for FakeFs {
	fn read_node(&self, nid: Nid) -> EResult<([u8; BLOCK_SIZE], NodeFooter)> {
		self.live_dnodes.borrow().get(&nid).copied().ok_or(errno!(NotFound))
	}

	fn read_raw(&self, addr: BlkAddr) -> EResult<[u8; BLOCK_SIZE]> {
		self.log.borrow().get(&addr).copied().ok_or(errno!(NotFound))
	}

	fn write_node(&self, nid: Nid, block: &[u8; BLOCK_SIZE]) -> EResult<()> {
		let footer = crate::format::read_footer(block);
		self.live_dnodes.borrow_mut().insert(nid, (*block, footer));
		Ok(())
	}

	fn get_dnode(&self, inode: Ino, _bidx: u64, create: bool) -> EResult<DnodeLocator> {
		if !self.live_dnodes.borrow().contains_key(&inode) {
			if !create {
				return Err(errno!(NotFound));
			}
			self.ensure_dnode(inode);
		}
		Ok(DnodeLocator {
			inode,
			is_inode_page: false,
			nid: inode,
			start_bidx: 0,
		})
	}

	fn invalidate_index(&self, inode: Ino, bidx: u64) -> EResult<()> {
		let mut map = self.live_dnodes.borrow_mut();
		if let Some((block, footer)) = map.get_mut(&inode) {
			set_addr_slot(block, footer, bidx as usize, NULL_ADDR);
		}
		Ok(())
	}

	fn start_bidx_of_node(&self, _inode: Ino, _ofs: u32) -> EResult<u64> {
		Ok(0)
	}
}

impl SegmentLayer for FakeFs {
	fn owner_of(&self, addr: BlkAddr) -> EResult<Option<SummaryEntry>> {
		Ok(self.summaries.borrow().get(&addr).copied())
	}

	fn in_meta_por(&self, addr: BlkAddr) -> bool {
		!crate::block_addr::is_sentinel(addr)
	}

	fn reserve_new_block(&self, _nid: Nid) -> EResult<BlkAddr> {
		let addr = self.next_reserved.get();
		self.next_reserved.set(addr + 1);
		Ok(addr)
	}

	fn clear_owner(&self, addr: BlkAddr) {
		self.summaries.borrow_mut().remove(&addr);
	}

	fn fix_curseg_write_pointer(&self) -> EResult<()> {
		Ok(())
	}
}

impl InodeCache for FakeFs {
	type Handle = Ino;

	fn get(&self, ino: Ino) -> EResult<Self::Handle> {
		if self.inodes.borrow().contains_key(&ino) {
			Ok(ino)
		} else {
			Err(errno!(NotFound))
		}
	}

	fn snapshot(&self, handle: Self::Handle) -> LiveInodeSnapshot {
		let entry = &self.inodes.borrow()[&handle];
		LiveInodeSnapshot {
			uid: entry.uid,
			gid: entry.gid,
			projid: entry.projid,
			size: entry.size,
		}
	}

	fn apply_recovered(&self, handle: Self::Handle, fields: &RecoveredFields) {
		let mut map = self.inodes.borrow_mut();
		let entry = map.get_mut(&handle).expect("handle came from get()");
		entry.mode = fields.mode;
		entry.uid = fields.uid;
		entry.gid = fields.gid;
		entry.size = fields.size;
		entry.atime = fields.atime;
		entry.ctime = fields.ctime;
		entry.mtime = fields.mtime;
		entry.flags = fields.flags;
		entry.advise = fields.advise;
		entry.gc_failures = fields.gc_failures;
		entry.pin_file = fields.pin_file;
		entry.has_inline_data = fields.has_inline_data;
	}

	fn extend_size(&self, handle: Self::Handle, new_size: u64) {
		let mut map = self.inodes.borrow_mut();
		let entry = map.get_mut(&handle).expect("handle came from get()");
		entry.size = entry.size.max(new_size);
	}

	fn mark_recovered(&self, _handle: Self::Handle) {}

	fn discard_recovery(&self, handle: Self::Handle) {
		self.discarded.borrow_mut().push(handle);
	}
}

impl DirectoryOps for FakeFs {
	type Handle = Ino;

	fn lookup(&self, parent: Self::Handle, name: &[u8], _hash: Option<u32>) -> EResult<Option<Ino>> {
		Ok(self.dirs.borrow().get(&(parent, name.to_vec())).copied())
	}

	fn add(&self, parent: Self::Handle, name: &[u8], _hash: Option<u32>, ino: Ino) -> EResult<()> {
		let mut map = self.dirs.borrow_mut();
		let key = (parent, name.to_vec());
		if map.contains_key(&key) {
			return Err(errno!(AlreadyExists));
		}
		map.insert(key, ino);
		Ok(())
	}

	fn delete(&self, parent: Self::Handle, name: &[u8], _hash: Option<u32>) -> EResult<()> {
		self.dirs.borrow_mut().remove(&(parent, name.to_vec()));
		Ok(())
	}
}

impl QuotaOps for FakeFs {
	fn dquot_initialize(&self, _inode: Ino) -> EResult<()> {
		Ok(())
	}

	fn dquot_alloc_inode(&self, _inode: Ino) -> EResult<()> {
		Ok(())
	}

	fn transfer_owner(&self, _inode: Ino, _new_uid: u32, _new_gid: u32) -> EResult<()> {
		Ok(())
	}

	fn transfer_project(&self, _inode: Ino, _new_projid: u32) -> EResult<()> {
		Ok(())
	}

	fn acquire_orphan_inode(&self, inode: Ino) -> EResult<()> {
		self.orphans.borrow_mut().push(inode);
		Ok(())
	}

	fn enable_quotas(&self) -> bool {
		self.quotas_configured.get()
	}

	fn disable_quotas(&self) {}
}

impl PageCache for FakeFs {
	fn truncate_main_area(&self) {}

	fn truncate_node_and_meta(&self) {}
}

impl SuperblockFlags for FakeFs {
	fn set_quota_needs_repair(&self) {
		self.quota_needs_repair.set(true);
	}

	fn mounted_cp_ver(&self) -> u64 {
		self.mounted_cp_ver.get()
	}

	fn set_is_recovered(&self) {
		self.is_recovered.set(true);
	}

	fn write_checkpoint(&self) -> EResult<()> {
		self.checkpoint_written.set(true);
		Ok(())
	}

	fn por_doing(&self) -> bool {
		self.por_doing.get()
	}

	fn clear_por_doing(&self) {
		self.por_doing.set(false);
	}

	fn is_read_only(&self) -> bool {
		self.read_only.get()
	}

	fn set_read_only(&self, read_only: bool) {
		self.read_only.set(read_only);
	}

	fn is_zoned(&self) -> bool {
		self.is_zoned.get()
	}
}
