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

//! Literal recovery scenarios and randomized invariant checks, driven
//! entirely against the in-memory `FakeFs` harness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rollfwd::format::BLOCK_SIZE;
use rollfwd::orchestrator::{recover_fsync_data, RecoveryConfig, RecoveryContext, RecoveryOutcome};
use rollfwd::testing::FakeFs;
use rollfwd::Errno;

fn ctx(fs: &FakeFs) -> RecoveryContext<'_, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs, FakeFs> {
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

fn config() -> RecoveryConfig {
	RecoveryConfig {
		start_blkaddr: 100,
		free_main_blocks: 64,
		segment_blocks: 8,
		check_only: false,
		max_reserve_retries: None,
		fix_curseg_write_pointer: false,
	}
}

/// S1: a plain fsynced dnode extends a zero-size inode's index and size.
#[test]
fn scenario_fresh_dnode_extends_size() {
	let fs = FakeFs::new(32, 8, 1);
	fs.add_inode(7);
	fs.push_dnode(100, 7, 0, &[200], None, true, false);

	let result = recover_fsync_data(&ctx(&fs), &config()).unwrap();

	assert_eq!(result, RecoveryOutcome::Recovered { inodes_recovered: 1 });
	assert_eq!(fs.live_index(7, 0), 200);
	assert_eq!(fs.inode_size(7), BLOCK_SIZE as u64);
	assert!(fs.checkpoint_written());
}

/// S2: a trailing inode page without its own fsync/dentry mark is read (the
/// chain keeps walking through it) but never applied: the data index from
/// the fsync-marked dnode still lands, while the inode's mode is untouched.
#[test]
fn scenario_trailing_unmarked_inode_page_is_dropped() {
	let fs = FakeFs::new(32, 8, 1);
	fs.add_inode(7);
	fs.push_dnode(100, 7, 0, &[200], Some(101), true, false);
	fs.push_inode(101, 7, 0, b"", 0o100644, None, false, false);

	let result = recover_fsync_data(&ctx(&fs), &config()).unwrap();

	assert_eq!(result, RecoveryOutcome::Recovered { inodes_recovered: 1 });
	assert_eq!(fs.live_index(7, 0), 200);
	assert_eq!(fs.inode_size(7), BLOCK_SIZE as u64);
	assert_eq!(fs.inode_mode(7), 0, "mode must not come from the unmarked page");
}

/// S3: a fsync-marked dnode for an inode absent from the NAT is dropped
/// silently; nothing is recovered and no checkpoint is written.
#[test]
fn scenario_dnode_for_absent_inode_is_swallowed() {
	let fs = FakeFs::new(32, 8, 1);
	fs.push_dnode(100, 9, 0, &[200], None, true, false);

	let result = recover_fsync_data(&ctx(&fs), &config()).unwrap();

	assert_eq!(result, RecoveryOutcome::Clean);
	assert!(!fs.checkpoint_written());
}

/// S4: a fsynced, dentry-marked new file evicts a stale same-name entry,
/// orphans its old inode, and reinstates the directory entry.
#[test]
fn scenario_dentry_replaces_stale_entry() {
	let fs = FakeFs::new(32, 8, 1);
	fs.add_inode(5);
	fs.add_inode(49);
	fs.add_inode(50);
	fs.dir_add(5, b"foo", 49);
	fs.push_inode(100, 50, 5, b"foo", 0o100644, None, true, true);

	let result = recover_fsync_data(&ctx(&fs), &config()).unwrap();

	assert!(matches!(result, RecoveryOutcome::Recovered { .. }));
	assert_eq!(fs.dir_lookup(5, b"foo"), Some(50));
	assert!(fs.was_orphaned(49));
	assert_eq!(fs.inode_mode(50), 0o100644);
	assert!(fs.checkpoint_written());
}

/// S5: a block already indexed by a pre-checkpoint write to the same inode
/// is detached before the post-checkpoint dnode becomes its sole index.
#[test]
fn scenario_collision_detaches_pre_checkpoint_index() {
	let fs = FakeFs::new(32, 8, 1);
	fs.add_inode(7);
	fs.claim_block(200, 7, 0); // pre-CP index: ino 7, ofs 0, already owns block 200
	fs.push_dnode(100, 7, 0, &[200], None, true, false);

	let result = recover_fsync_data(&ctx(&fs), &config()).unwrap();

	assert_eq!(result, RecoveryOutcome::Recovered { inodes_recovered: 1 });
	assert_eq!(fs.live_index(7, 0), 200);
	assert!(!fs.index_claims(200), "stale pre-CP claim must be detached, not left dangling");
}

/// S6: check-only reports the need for recovery without mutating anything;
/// a subsequent real run then performs it.
#[test]
fn scenario_check_only_then_real_run() {
	let fs = FakeFs::new(32, 8, 1);
	fs.add_inode(7);
	fs.push_dnode(100, 7, 0, &[200], None, true, false);

	let mut check = config();
	check.check_only = true;
	let first = recover_fsync_data(&ctx(&fs), &check).unwrap();
	assert_eq!(first, RecoveryOutcome::NeedsRecovery);
	assert_eq!(fs.live_index(7, 0), 0);
	assert!(!fs.checkpoint_written());

	let second = recover_fsync_data(&ctx(&fs), &config()).unwrap();
	assert_eq!(second, RecoveryOutcome::Recovered { inodes_recovered: 1 });
	assert_eq!(fs.live_index(7, 0), 200);
	assert!(fs.checkpoint_written());
}

// ---------------------------------------------------------------------
// Property tests (§8 invariants 1-6)
// ---------------------------------------------------------------------

fn rng_for(seed: u64) -> StdRng {
	StdRng::seed_from_u64(seed)
}

/// Invariant 1: a chain with a back-edge is always reported `Corrupt`,
/// regardless of how far into the free-block budget the edge sits.
#[test]
fn invariant_back_edge_is_always_corrupt() {
	for seed in 0..20u64 {
		let mut rng = rng_for(seed);
		let fs = FakeFs::new(64, 8, 1);
		let loop_len = rng.gen_range(1..8);
		let base = 100;
		for i in 0..loop_len {
			let this = base + i;
			let next = if i + 1 == loop_len { base } else { base + i + 1 };
			fs.push_dnode(this, 7, 0, &[], Some(next), false, false);
		}
		let mut cfg = config();
		cfg.free_main_blocks = 64;
		let err = recover_fsync_data(&ctx(&fs), &cfg).unwrap_err();
		assert_eq!(err, Errno::Corrupt, "seed {seed}");
	}
}

/// Invariant 2: a chain whose last footer's `next_blkaddr` is the NULL
/// sentinel terminates cleanly instead of erroring.
#[test]
fn invariant_sentinel_next_terminates_cleanly() {
	for seed in 0..20u64 {
		let mut rng = rng_for(seed);
		let fs = FakeFs::new(64, 8, 1);
		let chain_len = rng.gen_range(1..6);
		let base = 100;
		for i in 0..chain_len {
			let this = base + i;
			let next = if i + 1 == chain_len { None } else { Some(base + i + 1) };
			let ino = 7 + i as u32;
			fs.add_inode(ino);
			fs.push_dnode(this, ino, 0, &[200 + i], next, true, false);
		}
		let result = recover_fsync_data(&ctx(&fs), &config());
		assert!(result.is_ok(), "seed {seed}");
	}
}

/// Invariant 4: running recovery twice is idempotent — the second pass, on
/// the resulting image with a bumped checkpoint version, finds nothing.
#[test]
fn invariant_double_recovery_is_idempotent() {
	for seed in 0..20u64 {
		let mut rng = rng_for(seed);
		let fs = FakeFs::new(64, 8, 1);
		let ino = 7;
		let addr: u32 = 200 + rng.gen_range(0..50);
		fs.add_inode(ino);
		fs.push_dnode(100, ino, 0, &[addr], None, true, false);

		let first = recover_fsync_data(&ctx(&fs), &config()).unwrap();
		assert!(matches!(first, RecoveryOutcome::Recovered { .. }), "seed {seed}");

		fs.bump_mounted_cp_ver();
		let second = recover_fsync_data(&ctx(&fs), &config()).unwrap();
		assert_eq!(second, RecoveryOutcome::Clean, "seed {seed}");
	}
}

/// Invariant 5: every (inode, offset) written as fsync -> dest round-trips
/// to that same dest after recovery.
#[test]
fn invariant_recovered_index_round_trips() {
	for seed in 0..20u64 {
		let mut rng = rng_for(seed);
		let fs = FakeFs::new(64, 8, 1);
		let ino = 7;
		let dest: u32 = 300 + rng.gen_range(0..100);
		fs.add_inode(ino);
		fs.push_dnode(100, ino, 0, &[dest], None, true, false);

		recover_fsync_data(&ctx(&fs), &config()).unwrap();
		assert_eq!(fs.live_index(ino, 0), dest, "seed {seed}");
	}
}

/// Invariant 6: after repair, a block that collided with a pre-checkpoint
/// index is claimed by at most the new index, never both.
#[test]
fn invariant_collision_leaves_single_owner() {
	for seed in 0..20u64 {
		let _ = rng_for(seed);
		let fs = FakeFs::new(64, 8, 1);
		let ino = 7;
		let dest: u32 = 200;
		fs.add_inode(ino);
		fs.claim_block(dest, ino, 3); // stale pre-CP claim at a different ofs
		fs.push_dnode(100, ino, 0, &[dest], None, true, false);

		recover_fsync_data(&ctx(&fs), &config()).unwrap();

		assert_eq!(fs.live_index(ino, 0), dest, "seed {seed}");
		assert!(!fs.index_claims(dest), "seed {seed}: stale claim must not survive recovery");
	}
}
