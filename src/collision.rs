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

//! Detaches a stale index that already claims the block we're about to
//! redirect a logical index onto.

use crate::block_addr::BlkAddr;
use crate::collab::{Ino, InodeCache, Nid, NodeLayer, SegmentLayer};
use crate::errno::EResult;
use crate::format::addr_slots;

/// The node page currently being repaired, so the resolver can take the two
/// fast paths from §4.5 instead of re-fetching pages it already holds.
#[derive(Debug, Clone, Copy)]
pub struct CurrentNode {
	pub inode: Ino,
	pub dnode_nid: Nid,
	pub dnode_start_bidx: u64,
}

/// Before redirecting a logical index to `dest`, detach whatever node
/// already indexes it, if one does.
///
/// `dest` must already be known to be `META_POR`-valid; the caller checks
/// that before calling in (§4.4's validity gate covers both this and the
/// direct index case).
pub fn check_index_in_prev_nodes<N, S, C>(
	nodes: &N,
	segs: &S,
	inodes: &C,
	current: CurrentNode,
	dest: BlkAddr,
) -> EResult<()>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
{
	let Some(summary) = segs.owner_of(dest)? else {
		return Ok(());
	};

	// Fast path: the owning node is the inode page we're already holding.
	if summary.nid == current.inode {
		nodes.invalidate_index(current.inode, summary.ofs_in_node as u64)?;
		segs.clear_owner(dest);
		return Ok(());
	}
	// Fast path: the owning node is the dnode page we're already holding.
	if summary.nid == current.dnode_nid {
		let bidx = current.dnode_start_bidx + summary.ofs_in_node as u64;
		nodes.invalidate_index(current.inode, bidx)?;
		segs.clear_owner(dest);
		return Ok(());
	}

	// Foreign node: fetch it to learn which inode and file-block offset it
	// belongs to.
	let (_, foreign_footer) = nodes.read_node(summary.nid)?;
	let foreign_ino = foreign_footer.ino;

	// `inodes.get` loads the foreign inode if it isn't already cached; no
	// separate lock juggling is needed here since every collaborator method
	// takes a shared reference (see the note on collab::NodeLayer).
	inodes.get(foreign_ino)?;

	let start = nodes.start_bidx_of_node(foreign_ino, foreign_footer.ofs)?;
	let bidx = start + summary.ofs_in_node as u64;
	let locator = match nodes.get_dnode(foreign_ino, bidx, false) {
		Ok(locator) => locator,
		Err(_) => return Ok(()), // nothing indexes it there anymore
	};
	let (block, footer) = nodes.read_node(locator.nid)?;
	let slots = addr_slots(&block, &footer);
	let slot = (bidx - locator.start_bidx) as usize;
	if slots.get(slot).copied() == Some(dest) {
		nodes.invalidate_index(foreign_ino, bidx)?;
		segs.clear_owner(dest);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeFs;

	#[test]
	fn no_collision_when_block_unclaimed() {
		let fs = FakeFs::new(16, 8, 1);
		let current = CurrentNode {
			inode: 7,
			dnode_nid: 7,
			dnode_start_bidx: 0,
		};
		check_index_in_prev_nodes(&fs, &fs, &fs, current, 500).unwrap();
	}

	#[test]
	fn detaches_stale_index_on_same_inode() {
		let fs = FakeFs::new(16, 8, 1);
		fs.add_inode(7);
		fs.claim_block(200, 7, 0);
		let current = CurrentNode {
			inode: 7,
			dnode_nid: 7,
			dnode_start_bidx: 0,
		};
		check_index_in_prev_nodes(&fs, &fs, &fs, current, 200).unwrap();
		assert!(!fs.index_claims(200));
	}
}
