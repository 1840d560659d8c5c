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

//! Copies a recovered raw inode body into the live in-memory inode.

use crate::collab::{Ino, InodeCache, QuotaOps, RecoveredFields};
use crate::errno::{EResult, Errno};
use crate::format::{RawInode, FLAG_KEEP_ISIZE};

/// Reconstructs `ino`'s live inode from its recovered raw body, transferring
/// quota ownership if uid/gid/projid changed.
///
/// `raw` is `None` when this inode's fsync chain never contained a
/// fsync-marked inode page (only data, e.g. scenario 1): the only repair
/// left to apply is `min_size_floor`'s extension.
///
/// `min_size_floor` is the largest file offset data-index repair installed
/// an index at (§4.4's i_size extension); it is ignored when the inode has
/// `FLAG_KEEP_ISIZE` set.
pub fn recover_inode<C, Q>(inodes: &C, quotas: &Q, ino: Ino, raw: Option<&RawInode>, min_size_floor: u64) -> EResult<()>
where
	C: InodeCache,
	Q: QuotaOps,
{
	let handle = inodes.get(ino)?;
	let live = inodes.snapshot(handle);

	let Some(raw) = raw else {
		inodes.extend_size(handle, live.size.max(min_size_floor));
		inodes.mark_recovered(handle);
		return Ok(());
	};

	let size = if raw.flags & FLAG_KEEP_ISIZE != 0 {
		raw.size
	} else {
		raw.size.max(min_size_floor)
	};

	let fields = RecoveredFields {
		mode: raw.mode,
		uid: raw.uid,
		gid: raw.gid,
		size,
		atime: raw.atime,
		ctime: raw.ctime,
		mtime: raw.mtime,
		flags: raw.flags,
		advise: raw.advise,
		gc_failures: raw.gc_failures,
		pin_file: raw.is_pin_file(),
		has_inline_data: raw.has_inline_data(),
	};
	inodes.apply_recovered(handle, &fields);

	if live.uid != raw.uid || live.gid != raw.gid {
		match quotas.transfer_owner(ino, raw.uid, raw.gid) {
			Ok(()) | Err(Errno::QuotaRepairNeeded) => {}
			Err(e) => return Err(e),
		}
	}
	if raw.has_extra_attr() && live.projid != raw.projid {
		match quotas.transfer_project(ino, raw.projid) {
			Ok(()) | Err(Errno::QuotaRepairNeeded) => {}
			Err(e) => return Err(e),
		}
	}

	inodes.mark_recovered(handle);
	Ok(())
}
