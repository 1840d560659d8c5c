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

//! Repairs one node page's data-block indices against a live dnode.
//!
//! xattr and inline-data recovery have no dedicated collaborator trait (the
//! spec's external xattr/inline storage is as out-of-scope as encryption):
//! an inode page whose inline-data bit is set is handled entirely by
//! [`crate::inode_repair::recover_inode`] copying the inode body, and this
//! module skips index repair for it outright.

use crate::block_addr::{is_sentinel, BlkAddr, NEW_ADDR, NULL_ADDR};
use crate::collab::{Ino, InodeCache, Nid, NodeLayer, SegmentLayer};
use crate::collision::{check_index_in_prev_nodes, CurrentNode};
use crate::errno::{bug_on, errno, EResult, Errno};
use crate::format::{addr_slots, footer_flags, parse_inode, read_footer, set_addr_slot, write_footer, NodeFooter, BLOCK_SIZE};

/// What index repair learned about one node page.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataRepairOutcome {
	/// Whether this page is the earliest node block on this inode's fsync
	/// chain (the one the orchestrator should move to the "already settled"
	/// list).
	pub is_first_node: bool,
	/// The largest file offset this page's indices imply the file must
	/// reach, or 0 if none of the installed indices extended it.
	pub min_size_floor: u64,
}

/// Repairs the data indices described by the recovered node page at
/// `page_blkaddr` against the live (pre-recovery) dnode tree of `ino`.
pub fn do_recover_data<N, S, C>(
	nodes: &N,
	segs: &S,
	inodes: &C,
	ino: Ino,
	page_blkaddr: BlkAddr,
	entry_first_blkaddr: BlkAddr,
	max_reserve_retries: Option<usize>,
) -> EResult<DataRepairOutcome>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
{
	let is_first_node = page_blkaddr == entry_first_blkaddr;
	let recovered_block = nodes.read_raw(page_blkaddr)?;
	let recovered_footer = read_footer(&recovered_block);

	if recovered_footer.is_inode() {
		let raw = parse_inode(&recovered_block, false)?;
		if raw.has_inline_data() {
			return Ok(DataRepairOutcome {
				is_first_node,
				min_size_floor: 0,
			});
		}
	}

	let start = if recovered_footer.is_inode() {
		0
	} else {
		nodes.start_bidx_of_node(ino, recovered_footer.ofs)?
	};

	let locator = nodes.get_dnode(ino, start, true)?;
	let (mut live_block, live_footer) = nodes.read_node(locator.nid)?;
	if live_footer.ofs != recovered_footer.ofs {
		return Err(errno!(Corrupt));
	}

	let recovered_slots = addr_slots(&recovered_block, &recovered_footer);
	let live_slots = addr_slots(&live_block, &live_footer);
	bug_on!(recovered_slots.len() != live_slots.len());

	let mut min_size_floor = 0u64;

	for (i, (&dest, &src)) in recovered_slots.iter().zip(live_slots.iter()).enumerate() {
		if dest == src {
			continue; // (a) identity
		}
		let bidx = start + i as u64;
		if !is_sentinel(dest) && !segs.in_meta_por(dest) {
			return Err(errno!(Corrupt));
		}
		if !is_sentinel(src) && !segs.in_meta_por(src) {
			return Err(errno!(Corrupt));
		}

		match dest {
			NULL_ADDR => {
				// (b) destination unallocated: drop whatever the live tree
				// still points at.
				if !is_sentinel(src) {
					nodes.invalidate_index(ino, bidx)?;
				}
				set_addr_slot(&mut live_block, &live_footer, i, NULL_ADDR);
			}
			NEW_ADDR => {
				// (c) reserved, unwritten slot.
				if !is_sentinel(src) {
					nodes.invalidate_index(ino, bidx)?;
				}
				let reserved = reserve_with_retry(segs, locator.nid, max_reserve_retries)?;
				set_addr_slot(&mut live_block, &live_footer, i, reserved);
				min_size_floor = min_size_floor.max(file_floor(bidx));
			}
			_ => {
				// (d)/(e): a concrete destination address.
				if src == NULL_ADDR {
					// (d): the live tree never saw this write; reserve its
					// slot before installing the index below.
					reserve_with_retry(segs, locator.nid, max_reserve_retries)?;
				}
				let current = CurrentNode {
					inode: ino,
					dnode_nid: locator.nid,
					dnode_start_bidx: start,
				};
				check_index_in_prev_nodes(nodes, segs, inodes, current, dest)?;
				set_addr_slot(&mut live_block, &live_footer, i, dest);
				min_size_floor = min_size_floor.max(file_floor(bidx));
			}
		}
	}

	let new_footer = NodeFooter {
		ino,
		nid: locator.nid,
		ofs: recovered_footer.ofs,
		flags: footer_flags(recovered_footer.is_inode(), false, false),
		cp_ver: live_footer.cp_ver,
		next_blkaddr: live_footer.next_blkaddr,
	};
	write_footer(&mut live_block, &new_footer);
	nodes.write_node(locator.nid, &live_block)?;

	Ok(DataRepairOutcome {
		is_first_node,
		min_size_floor,
	})
}

fn file_floor(bidx: u64) -> u64 {
	(bidx + 1) * BLOCK_SIZE as u64
}

fn reserve_with_retry<S: SegmentLayer>(segs: &S, nid: Nid, max_retries: Option<usize>) -> EResult<BlkAddr> {
	let mut attempts = 0usize;
	loop {
		match segs.reserve_new_block(nid) {
			Ok(addr) => return Ok(addr),
			Err(Errno::OutOfMemory) => {
				attempts += 1;
				if let Some(max) = max_retries {
					if attempts >= max {
						return Err(errno!(OutOfMemory));
					}
				}
			}
			Err(Errno::NoSpace) => {
				bug_on!(true);
				unreachable!("reserve_new_block returned NoSpace during recovery");
			}
			Err(e) => return Err(e),
		}
	}
}
