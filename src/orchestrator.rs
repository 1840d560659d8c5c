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

//! Ties discovery, data repair, dentry repair, and inode reconstruction
//! together into the one call a mount makes: [`recover_fsync_data`].

use std::collections::HashMap;

use crate::block_addr::{is_sentinel, BlkAddr};
use crate::collab::{CheckpointLock, DirectoryOps, Ino, InodeCache, NodeLayer, PageCache, QuotaOps, SegmentLayer, SuperblockFlags};
use crate::data_repair::do_recover_data;
use crate::dentry_repair::{recover_dentry, DentryContext};
use crate::discovery::{find_fsync_dnodes, DiscoveryLimits};
use crate::errno::EResult;
use crate::format::{parse_inode, read_footer, RawInode};
use crate::fsync_table::FsyncInodeTable;
use crate::inode_repair::recover_inode;

/// The collaborators recovery is driven against, bundled so a caller builds
/// one of these per mount instead of threading eight parameters through
/// every call.
pub struct RecoveryContext<'a, N, S, C, D, Q, P, F, L>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
	D: DirectoryOps<Handle = C::Handle>,
	Q: QuotaOps,
	P: PageCache,
	F: SuperblockFlags,
	L: CheckpointLock,
{
	pub nodes: &'a N,
	pub segs: &'a S,
	pub inodes: &'a C,
	pub dirs: &'a D,
	pub quotas: &'a Q,
	pub pages: &'a P,
	pub sb: &'a F,
	pub lock: &'a L,
}

/// Parameters of one recovery attempt that aren't a property of any single
/// collaborator.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
	/// First free block of the warm-node current segment: where both the
	/// discovery and repair walks start.
	pub start_blkaddr: BlkAddr,
	/// Free blocks in the main area, bounding how many steps a walk can take
	/// before a back-edge is declared corrupt.
	pub free_main_blocks: u64,
	/// Blocks per segment, used only for the discovery pass's read-ahead
	/// heuristic.
	pub segment_blocks: u32,
	/// If set, only determine whether recovery is needed; never mutate
	/// anything.
	pub check_only: bool,
	/// Bound on `reserve_new_block` retries in data-index repair case (d).
	/// `None` retries forever, matching the upstream behavior this
	/// specification's open question allows deviating from.
	pub max_reserve_retries: Option<usize>,
	/// Whether to run the zoned-device write-pointer fixup at teardown.
	/// True whenever the run wasn't check-only-with-nothing-to-do (mirrors
	/// §4.8's `fix_pointers` derivation); the orchestrator ANDs this with
	/// whatever the caller passes, so a non-zoned mount can just pass
	/// `false` unconditionally.
	pub fix_curseg_write_pointer: bool,
}

/// The three possible results of a recovery attempt, replacing the C
/// surface's `0` / `1` / negative-errno trichotomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
	/// Nothing to recover; the mount is already consistent.
	Clean,
	/// `check_only` was set and at least one inode needs recovery.
	NeedsRecovery,
	/// Recovery ran and wrote a fresh checkpoint.
	Recovered { inodes_recovered: usize },
}

struct PerInoState {
	latest_raw: Option<RawInode>,
	min_size_floor: u64,
}

/// Runs roll-forward fsync recovery.
///
/// Wraps the locked recovery attempt with the read-only and quota-file
/// toggling §4.8 performs outside the checkpoint lock: both are restored
/// unconditionally, whether the attempt below succeeded or failed.
pub fn recover_fsync_data<N, S, C, D, Q, P, F, L>(ctx: &RecoveryContext<N, S, C, D, Q, P, F, L>, config: &RecoveryConfig) -> EResult<RecoveryOutcome>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
	D: DirectoryOps<Handle = C::Handle>,
	Q: QuotaOps,
	P: PageCache,
	F: SuperblockFlags,
	L: CheckpointLock,
{
	let was_read_only = ctx.sb.is_read_only();
	if was_read_only {
		ctx.sb.set_read_only(false);
	}
	let quotas_enabled = ctx.quotas.enable_quotas();

	let result = recover_fsync_data_locked(ctx, config);

	if quotas_enabled {
		ctx.quotas.disable_quotas();
	}
	if was_read_only {
		ctx.sb.set_read_only(true);
	}
	result
}

fn recover_fsync_data_locked<N, S, C, D, Q, P, F, L>(ctx: &RecoveryContext<N, S, C, D, Q, P, F, L>, config: &RecoveryConfig) -> EResult<RecoveryOutcome>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
	D: DirectoryOps<Handle = C::Handle>,
	Q: QuotaOps,
	P: PageCache,
	F: SuperblockFlags,
	L: CheckpointLock,
{
	let _guard = ctx.lock.lock();

	let limits = DiscoveryLimits {
		free_main_blocks: config.free_main_blocks,
		segment_blocks: config.segment_blocks,
	};

	let discovery = match find_fsync_dnodes(ctx.nodes, ctx.segs, ctx.inodes, ctx.quotas, ctx.sb, config.start_blkaddr, limits, config.check_only) {
		Ok(result) => result,
		Err(e) => {
			ctx.pages.truncate_main_area();
			ctx.pages.truncate_node_and_meta();
			return Err(e);
		}
	};

	if discovery.table.is_empty() {
		ctx.pages.truncate_main_area();
		if config.fix_curseg_write_pointer && ctx.sb.is_zoned() && !ctx.sb.is_read_only() {
			ctx.segs.fix_curseg_write_pointer()?;
		}
		ctx.sb.clear_por_doing();
		return Ok(RecoveryOutcome::Clean);
	}

	if config.check_only {
		return Ok(RecoveryOutcome::NeedsRecovery);
	}

	let mut table = discovery.table;
	let result = run_repair(ctx, config, &mut table);

	ctx.pages.truncate_main_area();
	if let Err(e) = result {
		ctx.pages.truncate_node_and_meta();
		// §7: a failed repair reverts every discovered inode to its
		// pre-fsync state instead of letting the next checkpoint see
		// whatever repair half-applied.
		for entry in table.iter() {
			if let Ok(handle) = ctx.inodes.get(entry.ino) {
				ctx.inodes.discard_recovery(handle);
			}
		}
		return Err(e);
	}

	if config.fix_curseg_write_pointer && ctx.sb.is_zoned() && !ctx.sb.is_read_only() {
		ctx.segs.fix_curseg_write_pointer()?;
	}
	ctx.sb.clear_por_doing();

	let inodes_recovered = table.len();
	ctx.sb.set_is_recovered();
	ctx.sb.write_checkpoint()?;

	Ok(RecoveryOutcome::Recovered { inodes_recovered })
}

fn run_repair<N, S, C, D, Q, P, F, L>(ctx: &RecoveryContext<N, S, C, D, Q, P, F, L>, config: &RecoveryConfig, table: &mut FsyncInodeTable) -> EResult<()>
where
	N: NodeLayer,
	S: SegmentLayer,
	C: InodeCache,
	D: DirectoryOps<Handle = C::Handle>,
	Q: QuotaOps,
	P: PageCache,
	F: SuperblockFlags,
	L: CheckpointLock,
{
	let mut per_ino: HashMap<Ino, PerInoState> = HashMap::new();
	for entry in table.iter() {
		per_ino.insert(
			entry.ino,
			PerInoState {
				latest_raw: None,
				min_size_floor: 0,
			},
		);
	}

	let mut blkaddr = config.start_blkaddr;
	let mut steps = 0u64;
	let mounted_cp_ver = ctx.sb.mounted_cp_ver();

	loop {
		if !ctx.segs.in_meta_por(blkaddr) {
			break;
		}
		let block = ctx.nodes.read_raw(blkaddr)?;
		let footer = read_footer(&block);
		if !footer.is_recoverable(mounted_cp_ver) {
			break;
		}

		if footer.is_fsync_marked() {
			if let Some(entry) = table.find(footer.ino) {
				let first_blkaddr = entry.first_blkaddr;
				let outcome = do_recover_data(ctx.nodes, ctx.segs, ctx.inodes, footer.ino, blkaddr, first_blkaddr, config.max_reserve_retries)?;

				if footer.is_inode() {
					let raw = parse_inode(&block, false)?;
					if footer.is_dentry_marked() {
						let dentry_ctx = DentryContext {
							parent_ino: raw.pino,
							ino: footer.ino,
							name: raw.name.clone(),
							stored_hash: raw.stored_hash,
							casefolded: false,
						};
						recover_dentry(ctx.inodes, ctx.dirs, ctx.quotas, table, &dentry_ctx)?;
					}
					if let Some(state) = per_ino.get_mut(&footer.ino) {
						state.latest_raw = Some(raw);
					}
				}
				if let Some(state) = per_ino.get_mut(&footer.ino) {
					state.min_size_floor = state.min_size_floor.max(outcome.min_size_floor);
				}
			}
		}

		steps += 1;
		if steps >= config.free_main_blocks {
			break;
		}
		let next = footer.next_blkaddr;
		if is_sentinel(next) {
			break;
		}
		blkaddr = next;
	}

	for (ino, state) in per_ino {
		recover_inode(ctx.inodes, ctx.quotas, ino, state.latest_raw.as_ref(), state.min_size_floor)?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeFs;

	fn ctx<'a>(fs: &'a FakeFs) -> RecoveryContext<'a, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs> {
		RecoveryContext {
			nodes: fs,
			segs: fs,
			inodes: fs,
			dirs: fs,
			quotas: fs,
			pages: fs,
			sb: fs,
			lock: fs,
		}
	}

	fn base_config() -> RecoveryConfig {
		RecoveryConfig {
			start_blkaddr: 100,
			free_main_blocks: 32,
			segment_blocks: 8,
			check_only: false,
			max_reserve_retries: None,
			fix_curseg_write_pointer: false,
		}
	}

	#[test]
	fn clean_mount_returns_clean() {
		let fs = FakeFs::new(32, 8, 1);
		let result = recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert_eq!(result, RecoveryOutcome::Clean);
	}

	#[test]
	fn check_only_reports_needs_recovery_without_mutating() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		let mut config = base_config();
		config.check_only = true;
		let result = recover_fsync_data(&ctx(&fs), &config).unwrap();
		assert_eq!(result, RecoveryOutcome::NeedsRecovery);
		assert_eq!(fs.live_index(7, 0), 0);
	}

	#[test]
	fn recovers_data_only_fsync_dnode() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		let result = recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert_eq!(result, RecoveryOutcome::Recovered { inodes_recovered: 1 });
		assert_eq!(fs.live_index(7, 0), 200);
		assert!(fs.checkpoint_written());
	}

	#[test]
	fn drops_dnode_for_unknown_inode() {
		let fs = FakeFs::new(32, 8, 1);
		fs.push_dnode(100, 9, 0, &[200], None, true, false);
		let result = recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert_eq!(result, RecoveryOutcome::Clean);
		assert!(!fs.checkpoint_written());
	}

	#[test]
	fn idempotent_on_already_recovered_image() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		fs.bump_mounted_cp_ver();
		let second = recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert_eq!(second, RecoveryOutcome::Clean);
	}

	#[test]
	fn clean_mount_clears_por_doing() {
		let fs = FakeFs::new(32, 8, 1);
		recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert!(!fs.por_doing());
	}

	#[test]
	fn successful_recovery_clears_por_doing() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert!(!fs.por_doing());
	}

	#[test]
	fn read_only_mount_is_restored_after_recovery() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		fs.push_dnode(100, 7, 0, &[200], None, true, false);
		fs.set_read_only(true);
		recover_fsync_data(&ctx(&fs), &base_config()).unwrap();
		assert!(fs.is_read_only(), "s_flags must be restored once recovery is done writing");
	}

	#[test]
	fn repair_failure_discards_recovery_for_every_entry() {
		let fs = FakeFs::new(32, 8, 1);
		fs.add_inode(7);
		// ofs 1 never matches the freshly materialized live dnode's ofs 0,
		// forcing do_recover_data's footer check to fail.
		fs.push_dnode(100, 7, 1, &[200], None, true, false);
		let err = recover_fsync_data(&ctx(&fs), &base_config()).unwrap_err();
		assert_eq!(err, crate::errno::Errno::Corrupt);
		assert!(fs.was_discarded(7));
		assert!(!fs.checkpoint_written());
	}
}
