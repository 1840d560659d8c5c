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

//! Reinstates a filename for a recovered inode under its parent directory.

use crate::collab::{DirectoryOps, Ino, InodeCache, QuotaOps};
use crate::errno::{EResult, Errno};
use crate::fsync_table::FsyncInodeTable;

/// The directory context a dentry-marked inode page carries, as parsed from
/// its raw inode body.
#[derive(Debug, Clone)]
pub struct DentryContext {
	pub parent_ino: Ino,
	pub ino: Ino,
	pub name: Vec<u8>,
	/// The on-disk hash, present only when the parent is both casefolded and
	/// encrypted (§4.6 case 1): that combination stores the hash instead of
	/// letting it be recomputed.
	pub stored_hash: Option<u32>,
	pub casefolded: bool,
}

/// Computes the hash recovery should look the name up (and add it) by,
/// following the three cases of §4.6 step 2.
pub fn resolve_hash(ctx: &DentryContext) -> u32 {
	match (ctx.casefolded, ctx.stored_hash) {
		(true, Some(hash)) => hash,
		(true, None) => hash_name(&fold_case(&ctx.name)),
		(false, _) => hash_name(&ctx.name),
	}
}

/// FNV-1a, used uniformly for both case-sensitive and case-folded names.
fn hash_name(name: &[u8]) -> u32 {
	let mut h: u32 = 0x811c9dc5;
	for &b in name {
		h ^= b as u32;
		h = h.wrapping_mul(0x01000193);
	}
	h
}

fn fold_case(name: &[u8]) -> Vec<u8> {
	name.iter().map(|b| b.to_ascii_lowercase()).collect()
}

/// Reinstates `ctx.name -> ctx.ino` under `ctx.parent_ino`.
pub fn recover_dentry<C, D, Q>(inodes: &C, dirs: &D, quotas: &Q, table: &mut FsyncInodeTable, ctx: &DentryContext) -> EResult<()>
where
	C: InodeCache,
	D: DirectoryOps<Handle = C::Handle>,
	Q: QuotaOps,
{
	if table.find(ctx.parent_ino).is_none() {
		table.add(ctx.parent_ino, 0, false);
	}

	let hash = resolve_hash(ctx);
	let parent = inodes.get(ctx.parent_ino)?;

	loop {
		match dirs.lookup(parent, &ctx.name, Some(hash))? {
			Some(existing) if existing == ctx.ino => return Ok(()),
			Some(existing) => {
				inodes.get(existing)?;
				quotas.acquire_orphan_inode(existing)?;
				dirs.delete(parent, &ctx.name, Some(hash))?;
				continue;
			}
			None => break,
		}
	}

	loop {
		match dirs.add(parent, &ctx.name, Some(hash), ctx.ino) {
			Ok(()) => return Ok(()),
			Err(Errno::OutOfMemory) => continue,
			Err(e) => return Err(e),
		}
	}
}
