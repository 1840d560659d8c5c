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

//! Pure decoders over a block-sized buffer.
//!
//! Nothing in this module touches a device, a cache, or a lock: every
//! function here just reads or writes bytes in an already-in-memory block.
//! All multi-byte fields are little-endian; fields are read unaligned at
//! whatever offset the format places them, the same way this corpus reads
//! on-disk structures directly off a raw block buffer.

use crate::block_addr::BlkAddr;
use crate::errno::{errno, EResult, Errno};

/// The size of a block, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// The maximum length of a file name.
pub const NAME_MAX: usize = 255;

/// The number of address slots carried inline in an inode page (mirrors this
/// corpus's `DIRECT_BLOCKS_COUNT` for ext2 inodes).
pub const DIRECT_INLINE_COUNT: usize = 12;

// ---------------------------------------------------------------------
// Node footer
// ---------------------------------------------------------------------

/// Size in bytes of the node footer.
pub const FOOTER_SIZE: usize = 4 + 4 + 4 + 4 + 8 + 4;

/// Offset of the footer within a block.
pub const FOOTER_OFFSET: usize = BLOCK_SIZE - FOOTER_SIZE;

/// Footer flag bit: the write that produced this page participated in an
/// `fsync`.
const FLAG_FSYNC: u32 = 0x1;
/// Footer flag bit: this write also created or renamed a directory entry.
const FLAG_DENTRY: u32 = 0x2;
/// Footer flag bit: this page carries an inode body rather than index
/// entries.
const FLAG_IS_INODE: u32 = 0x4;

/// The footer every node page carries, independent of its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFooter {
	pub ino: u32,
	pub nid: u32,
	/// This node's offset within its inode's index tree. For an inode page
	/// this is always 0; for a dnode page it is the tree position
	/// `start_bidx_of_node` (a [`crate::collab::NodeLayer`] concern) turns
	/// into a file-block index.
	pub ofs: u32,
	pub flags: u32,
	pub cp_ver: u64,
	pub next_blkaddr: BlkAddr,
}

impl NodeFooter {
	pub fn is_fsync_marked(&self) -> bool {
		self.flags & FLAG_FSYNC != 0
	}

	pub fn is_dentry_marked(&self) -> bool {
		self.flags & FLAG_DENTRY != 0
	}

	pub fn is_inode(&self) -> bool {
		self.flags & FLAG_IS_INODE != 0
	}

	/// A page is recoverable iff its footer's checkpoint version matches the
	/// checkpoint just mounted.
	pub fn is_recoverable(&self, mounted_cp_ver: u64) -> bool {
		self.cp_ver == mounted_cp_ver
	}
}

/// Reads the footer out of a block buffer.
pub fn read_footer(block: &[u8; BLOCK_SIZE]) -> NodeFooter {
	let buf = &block[FOOTER_OFFSET..];
	NodeFooter {
		ino: read_u32(buf, 0),
		nid: read_u32(buf, 4),
		ofs: read_u32(buf, 8),
		flags: read_u32(buf, 12),
		cp_ver: read_u64(buf, 16),
		next_blkaddr: read_u32(buf, 24),
	}
}

/// Writes a footer into a block buffer, overwriting the previous one.
pub fn write_footer(block: &mut [u8; BLOCK_SIZE], footer: &NodeFooter) {
	let buf = &mut block[FOOTER_OFFSET..];
	write_u32(buf, 0, footer.ino);
	write_u32(buf, 4, footer.nid);
	write_u32(buf, 8, footer.ofs);
	write_u32(buf, 12, footer.flags);
	write_u64(buf, 16, footer.cp_ver);
	write_u32(buf, 24, footer.next_blkaddr);
}

pub fn ino_of(block: &[u8; BLOCK_SIZE]) -> u32 {
	read_footer(block).ino
}

pub fn nid_of(block: &[u8; BLOCK_SIZE]) -> u32 {
	read_footer(block).nid
}

pub fn ofs_of(block: &[u8; BLOCK_SIZE]) -> u32 {
	read_footer(block).ofs
}

pub fn next_blkaddr_of(block: &[u8; BLOCK_SIZE]) -> BlkAddr {
	read_footer(block).next_blkaddr
}

// ---------------------------------------------------------------------
// Address slots
// ---------------------------------------------------------------------

/// The number of address slots a non-inode (index/dnode) page can carry.
pub const ADDRS_PER_BLOCK: usize = FOOTER_OFFSET / 4;

/// Returns the address slots carried by this page: the inline slots of an
/// inode page, or the full index array of a dnode page.
///
/// The caller is responsible for combining this with the file-block offset
/// the page covers (`start_bidx_of_node`, an external collaborator call) to
/// get the `[start, end)` range described in the specification.
pub fn addr_slots(block: &[u8; BLOCK_SIZE], footer: &NodeFooter) -> Vec<BlkAddr> {
	if footer.is_inode() {
		let base = inode_addr_offset(block);
		(0..DIRECT_INLINE_COUNT)
			.map(|i| read_u32(block, base + i * 4))
			.collect()
	} else {
		(0..ADDRS_PER_BLOCK).map(|i| read_u32(block, i * 4)).collect()
	}
}

/// Overwrites one address slot of a page in place (used when rewriting the
/// live dnode after repair).
pub fn set_addr_slot(block: &mut [u8; BLOCK_SIZE], footer: &NodeFooter, index: usize, addr: BlkAddr) {
	if footer.is_inode() {
		let base = inode_addr_offset(block);
		write_u32(block, base + index * 4, addr);
	} else {
		write_u32(block, index * 4, addr);
	}
}

// ---------------------------------------------------------------------
// Raw inode body
// ---------------------------------------------------------------------

const INODE_MODE_OFF: usize = 0;
const INODE_UID_OFF: usize = 2;
const INODE_GID_OFF: usize = 6;
const INODE_SIZE_OFF: usize = 10;
const INODE_ATIME_OFF: usize = 18;
const INODE_CTIME_OFF: usize = INODE_ATIME_OFF + 12;
const INODE_MTIME_OFF: usize = INODE_CTIME_OFF + 12;
const INODE_FLAGS_OFF: usize = INODE_MTIME_OFF + 12;
const INODE_INLINE_BITMAP_OFF: usize = INODE_FLAGS_OFF + 4;
const INODE_EXTRA_ISIZE_OFF: usize = INODE_INLINE_BITMAP_OFF + 1;
const INODE_PROJID_OFF: usize = INODE_EXTRA_ISIZE_OFF + 2;
const INODE_GC_FAILURES_OFF: usize = INODE_PROJID_OFF + 4;
const INODE_ADVISE_OFF: usize = INODE_GC_FAILURES_OFF + 2;
const INODE_NAMELEN_OFF: usize = INODE_ADVISE_OFF + 1;
const INODE_NAME_OFF: usize = INODE_NAMELEN_OFF + 4;

/// Inline-data bitmap bit: the file is pinned (never relocated by GC).
pub const INLINE_PIN_FILE: u8 = 0x1;
/// Inline-data bitmap bit: the inode carries its data inline rather than in
/// indexed blocks.
pub const INLINE_DATA_EXIST: u8 = 0x2;
/// Inline-data bitmap bit: the inode has an extra-attribute area (where the
/// project id lives).
pub const INLINE_EXTRA_ATTR: u8 = 0x4;

/// Inode flag bit: do not auto-extend `i_size` from data index repair.
pub const FLAG_KEEP_ISIZE: u32 = 0x1;

/// A timestamp with nanosecond precision, as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
	pub sec: u64,
	pub nsec: u32,
}

/// The inode body recovered from an inode-type node page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInode {
	pub mode: u16,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	pub atime: Timespec,
	pub ctime: Timespec,
	pub mtime: Timespec,
	pub flags: u32,
	pub inline_bitmap: u8,
	pub extra_isize: u16,
	pub projid: u32,
	pub gc_failures: u16,
	/// `i_advise`, e.g. the cold/hot temperature hint. Opaque to recovery:
	/// copied through verbatim (§4.7).
	pub advise: u8,
	pub name: Vec<u8>,
	pub pino: u32,
	/// Precomputed name hash, present only for casefolded+encrypted
	/// directories where the format stores it trailing the name instead of
	/// recomputing it at lookup time.
	pub stored_hash: Option<u32>,
}

impl RawInode {
	pub fn has_extra_attr(&self) -> bool {
		self.inline_bitmap & INLINE_EXTRA_ATTR != 0
	}

	pub fn is_pin_file(&self) -> bool {
		self.inline_bitmap & INLINE_PIN_FILE != 0
	}

	pub fn has_inline_data(&self) -> bool {
		self.inline_bitmap & INLINE_DATA_EXIST != 0
	}
}

/// Where the parent ino is written for a dentry-marked inode page: right
/// after the optional trailing hash.
fn inode_pino_offset(name_end: usize, has_hash: bool) -> usize {
	if has_hash {
		name_end + 4
	} else {
		name_end
	}
}

fn inode_addr_offset(block: &[u8; BLOCK_SIZE]) -> usize {
	let namelen = read_u32(block, INODE_NAMELEN_OFF) as usize;
	let name_end = INODE_NAME_OFF + namelen.min(NAME_MAX);
	let has_hash = false; // inline slots never follow a dentry-marked page in this layout
	let end = inode_pino_offset(name_end, has_hash) + 4 /* pino */;
	end.next_multiple_of(4)
}

/// Parses the raw inode body out of an inode-type node page.
///
/// `has_hash` should be `true` only when the parent directory is both
/// case-folded and encrypted (§4.6): in that case the on-disk hash trails
/// the name and must be read instead of recomputed.
pub fn parse_inode(block: &[u8; BLOCK_SIZE], has_hash: bool) -> EResult<RawInode> {
	let namelen = read_u32(block, INODE_NAMELEN_OFF) as usize;
	if namelen > NAME_MAX {
		return Err(errno!(Corrupt));
	}
	let name_end = INODE_NAME_OFF + namelen;
	if name_end + 4 > FOOTER_OFFSET {
		return Err(errno!(Corrupt));
	}
	let name = block[INODE_NAME_OFF..name_end].to_vec();
	let stored_hash = if has_hash {
		Some(read_u32(block, name_end))
	} else {
		None
	};
	let pino_off = inode_pino_offset(name_end, has_hash);
	let extra_isize = read_u16(block, INODE_EXTRA_ISIZE_OFF);
	if extra_isize as usize > BLOCK_SIZE {
		return Err(errno!(Corrupt));
	}
	Ok(RawInode {
		mode: read_u16(block, INODE_MODE_OFF),
		uid: read_u32(block, INODE_UID_OFF),
		gid: read_u32(block, INODE_GID_OFF),
		size: read_u64(block, INODE_SIZE_OFF),
		atime: Timespec {
			sec: read_u64(block, INODE_ATIME_OFF),
			nsec: read_u32(block, INODE_ATIME_OFF + 8),
		},
		ctime: Timespec {
			sec: read_u64(block, INODE_CTIME_OFF),
			nsec: read_u32(block, INODE_CTIME_OFF + 8),
		},
		mtime: Timespec {
			sec: read_u64(block, INODE_MTIME_OFF),
			nsec: read_u32(block, INODE_MTIME_OFF + 8),
		},
		flags: read_u32(block, INODE_FLAGS_OFF),
		inline_bitmap: block[INODE_INLINE_BITMAP_OFF],
		extra_isize,
		projid: read_u32(block, INODE_PROJID_OFF),
		gc_failures: read_u16(block, INODE_GC_FAILURES_OFF),
		advise: block[INODE_ADVISE_OFF],
		name,
		pino: read_u32(block, pino_off),
		stored_hash,
	})
}

/// Writes a raw inode body (and its owning directory's ino) into an
/// inode-type node page. Exposed for building synthetic chains in tests.
pub fn write_inode(block: &mut [u8; BLOCK_SIZE], inode: &RawInode, has_hash: bool) {
	write_u16(block, INODE_MODE_OFF, inode.mode);
	write_u32(block, INODE_UID_OFF, inode.uid);
	write_u32(block, INODE_GID_OFF, inode.gid);
	write_u64(block, INODE_SIZE_OFF, inode.size);
	write_u64(block, INODE_ATIME_OFF, inode.atime.sec);
	write_u32(block, INODE_ATIME_OFF + 8, inode.atime.nsec);
	write_u64(block, INODE_CTIME_OFF, inode.ctime.sec);
	write_u32(block, INODE_CTIME_OFF + 8, inode.ctime.nsec);
	write_u64(block, INODE_MTIME_OFF, inode.mtime.sec);
	write_u32(block, INODE_MTIME_OFF + 8, inode.mtime.nsec);
	write_u32(block, INODE_FLAGS_OFF, inode.flags);
	block[INODE_INLINE_BITMAP_OFF] = inode.inline_bitmap;
	write_u16(block, INODE_EXTRA_ISIZE_OFF, inode.extra_isize);
	write_u32(block, INODE_PROJID_OFF, inode.projid);
	write_u16(block, INODE_GC_FAILURES_OFF, inode.gc_failures);
	block[INODE_ADVISE_OFF] = inode.advise;
	write_u32(block, INODE_NAMELEN_OFF, inode.name.len() as u32);
	let name_end = INODE_NAME_OFF + inode.name.len();
	block[INODE_NAME_OFF..name_end].copy_from_slice(&inode.name);
	if let Some(hash) = inode.stored_hash {
		write_u32(block, name_end, hash);
	}
	let pino_off = inode_pino_offset(name_end, has_hash);
	write_u32(block, pino_off, inode.pino);
}

// ---------------------------------------------------------------------
// Summary entries
// ---------------------------------------------------------------------

/// The reverse pointer from a physical block back to its logical owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryEntry {
	pub nid: u32,
	pub ofs_in_node: u16,
	pub version: u8,
}

const SUMMARY_ENTRY_SIZE: usize = 4 + 2 + 1;

pub fn read_summary_entry(buf: &[u8], slot: usize) -> SummaryEntry {
	let off = slot * SUMMARY_ENTRY_SIZE;
	SummaryEntry {
		nid: read_u32(buf, off),
		ofs_in_node: read_u16(buf, off + 4),
		version: buf[off + 6],
	}
}

pub fn write_summary_entry(buf: &mut [u8], slot: usize, entry: &SummaryEntry) {
	let off = slot * SUMMARY_ENTRY_SIZE;
	write_u32(buf, off, entry.nid);
	write_u16(buf, off + 4, entry.ofs_in_node);
	buf[off + 6] = entry.version;
}

// ---------------------------------------------------------------------
// Byte helpers
// ---------------------------------------------------------------------

fn read_u16(buf: &[u8], off: usize) -> u16 {
	u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
	u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
	u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

fn write_u16(buf: &mut [u8], off: usize, v: u16) {
	buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
	buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut [u8], off: usize, v: u64) {
	buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Builds the raw flag bits for a footer from the three predicates.
pub fn footer_flags(is_inode: bool, fsync: bool, dentry: bool) -> u32 {
	let mut flags = 0;
	if is_inode {
		flags |= FLAG_IS_INODE;
	}
	if fsync {
		flags |= FLAG_FSYNC;
	}
	if dentry {
		flags |= FLAG_DENTRY;
	}
	flags
}

#[cfg(test)]
mod tests {
	use super::*;

	fn blank_block() -> [u8; BLOCK_SIZE] {
		[0u8; BLOCK_SIZE]
	}

	#[test]
	fn footer_round_trips() {
		let mut block = blank_block();
		let footer = NodeFooter {
			ino: 7,
			nid: 7,
			ofs: 0,
			flags: footer_flags(true, true, false),
			cp_ver: 42,
			next_blkaddr: 101,
		};
		write_footer(&mut block, &footer);
		let read = read_footer(&block);
		assert_eq!(read, footer);
		assert!(read.is_fsync_marked());
		assert!(read.is_inode());
		assert!(!read.is_dentry_marked());
		assert!(read.is_recoverable(42));
		assert!(!read.is_recoverable(41));
	}

	#[test]
	fn dnode_addr_slots_round_trip() {
		let mut block = blank_block();
		let footer = NodeFooter {
			ino: 7,
			nid: 8,
			ofs: 3,
			flags: footer_flags(false, true, false),
			cp_ver: 1,
			next_blkaddr: 0,
		};
		write_footer(&mut block, &footer);
		set_addr_slot(&mut block, &footer, 0, 200);
		let slots = addr_slots(&block, &footer);
		assert_eq!(slots[0], 200);
		assert_eq!(slots.len(), ADDRS_PER_BLOCK);
	}

	#[test]
	fn inode_body_round_trips() {
		let mut block = blank_block();
		let footer = NodeFooter {
			ino: 50,
			nid: 50,
			ofs: 0,
			flags: footer_flags(true, true, true),
			cp_ver: 1,
			next_blkaddr: 0,
		};
		write_footer(&mut block, &footer);
		let inode = RawInode {
			mode: 0o100644,
			uid: 1000,
			gid: 1000,
			size: 0,
			atime: Timespec::default(),
			ctime: Timespec::default(),
			mtime: Timespec::default(),
			flags: 0,
			inline_bitmap: INLINE_EXTRA_ATTR,
			extra_isize: 32,
			projid: 0,
			gc_failures: 0,
			advise: 3,
			name: b"foo".to_vec(),
			pino: 5,
			stored_hash: None,
		};
		write_inode(&mut block, &inode, false);
		let parsed = parse_inode(&block, false).unwrap();
		assert_eq!(parsed, inode);
	}

	#[test]
	fn rejects_oversized_namelen() {
		let mut block = blank_block();
		write_u32(&mut block, INODE_NAMELEN_OFF, (NAME_MAX + 1) as u32);
		assert_eq!(parse_inode(&block, false), Err(Errno::Corrupt));
	}
}
