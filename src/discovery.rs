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

//! Walks the post-checkpoint log to find every fsync-marked node block.

use crate::block_addr::{is_sentinel, BlkAddr};
use crate::collab::{InodeCache, NodeLayer, QuotaOps, SegmentLayer, SuperblockFlags};
use crate::errno::{errno, EResult};
use crate::format::read_footer;
use crate::fsync_table::FsyncInodeTable;

/// Read-ahead window floor.
const RA_MIN: u32 = 1;
/// Read-ahead window ceiling.
const RA_MAX: u32 = 64;

/// Parameters that bound the discovery walk, independent of the collaborator
/// traits.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryLimits {
	/// Number of free blocks in the main area; the walk is corrupt if it
	/// takes more steps than this without terminating (a back-edge).
	pub free_main_blocks: u64,
	/// Blocks per segment, used only to decide when to shrink the read-ahead
	/// window at a segment boundary.
	pub segment_blocks: u32,
}

/// Outcome of a discovery walk: the table it built, and whether the walk
/// ran in check-only mode (informational, the table is populated either
/// way).
#[derive(Debug)]
pub struct DiscoveryResult {
	pub table: FsyncInodeTable,
}

/// Walks the chain of node blocks written after the checkpoint, starting at
/// `start_blkaddr` (the first free block of the warm-node current segment),
/// and returns every inode with fsynced data in the chain.
///
/// In check-only mode the walk still reads every block (there is no cheaper
/// way to know whether recovery is needed), but skips the NAT-existence
/// check in step 4: the check exists to drop unreachable data-only fsyncs
/// from the real run's table, and has no effect on whether check-only's
/// answer is "clean" vs "needs recovery".
pub fn find_fsync_dnodes<N, S, C, Q, F>(
	nodes: &N,
	segs: &S,
	inodes: &C,
	quotas: &Q,
	sb: &F,
	start_blkaddr: BlkAddr,
	limits: DiscoveryLimits,
	check_only: bool,
) -> EResult<DiscoveryResult>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
	Q: QuotaOps,
	F: SuperblockFlags,
{
	let mut table = FsyncInodeTable::new();
	let mut blkaddr = start_blkaddr;
	let mut steps: u64 = 0;
	let mut ra_window: u32 = RA_MIN;
	let mounted_cp_ver = sb.mounted_cp_ver();

	loop {
		if !segs.in_meta_por(blkaddr) {
			break;
		}
		let block = nodes.read_raw(blkaddr)?;
		let footer = read_footer(&block);
		if !footer.is_recoverable(mounted_cp_ver) {
			break;
		}

		if footer.is_fsync_marked() {
			let ino = footer.ino;
			let is_new = table.find(ino).is_none();
			let mut skip = false;
			if is_new && !check_only {
				match inodes.get(ino) {
					Ok(_) => {}
					Err(e) if e == errno!(NotFound) => skip = true,
					Err(e) => return Err(e),
				}
			}
			if !skip {
				if is_new && !check_only {
					quotas.dquot_initialize(ino)?;
					let quota_inode = footer.is_inode() && footer.is_dentry_marked();
					if quota_inode {
						quotas.dquot_alloc_inode(ino)?;
					}
				}
				table.add(ino, blkaddr, footer.is_dentry_marked());
			}
		}

		let next = footer.next_blkaddr;

		steps += 1;
		if steps >= limits.free_main_blocks || next == blkaddr {
			return Err(errno!(Corrupt));
		}

		let contiguous = next == blkaddr.wrapping_add(1);
		let at_segment_boundary = limits.segment_blocks != 0 && next % limits.segment_blocks == 0;
		if contiguous {
			ra_window = (ra_window.saturating_mul(2)).min(RA_MAX);
		}
		if !at_segment_boundary {
			ra_window = (ra_window / 2).max(RA_MIN);
		}
		let _ = ra_window; // advisory only: no prefetch collaborator to drive in this abstraction

		if is_sentinel(next) {
			break;
		}
		blkaddr = next;
	}

	Ok(DiscoveryResult { table })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeFs;

	#[test]
	fn stops_at_non_recoverable_footer() {
		let fs = FakeFs::new(16, 8, 1);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		fs.set_mounted_cp_ver(2); // chain was written under cp_ver 1
		let limits = DiscoveryLimits {
			free_main_blocks: 16,
			segment_blocks: 8,
		};
		let result = find_fsync_dnodes(&fs, &fs, &fs, &fs, &fs, 100, limits, false).unwrap();
		assert!(result.table.is_empty());
	}

	#[test]
	fn detects_back_edge_as_corrupt() {
		let fs = FakeFs::new(16, 8, 1);
		fs.push_dnode(100, 7, 0, &[200], Some(100), true, false);
		let limits = DiscoveryLimits {
			free_main_blocks: 16,
			segment_blocks: 8,
		};
		let err = find_fsync_dnodes(&fs, &fs, &fs, &fs, &fs, 100, limits, false).unwrap_err();
		assert_eq!(err, crate::errno::Errno::Corrupt);
	}

	#[test]
	fn finds_single_fsync_dnode() {
		let fs = FakeFs::new(16, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		let limits = DiscoveryLimits {
			free_main_blocks: 16,
			segment_blocks: 8,
		};
		let result = find_fsync_dnodes(&fs, &fs, &fs, &fs, &fs, 100, limits, false).unwrap();
		assert_eq!(result.table.len(), 1);
		assert!(result.table.find(7).is_some());
	}

	#[test]
	fn drops_dnode_with_missing_inode() {
		let fs = FakeFs::new(16, 8, 1);
		fs.push_dnode(100, 9, 0, &[200], None, true, false);
		let limits = DiscoveryLimits {
			free_main_blocks: 16,
			segment_blocks: 8,
		};
		let result = find_fsync_dnodes(&fs, &fs, &fs, &fs, &fs, 100, limits, false).unwrap();
		assert!(result.table.is_empty());
	}
}
