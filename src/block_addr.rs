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

//! Block addresses and their special sentinel values.

/// A 32-bit logical index into the main area.
pub type BlkAddr = u32;

/// Sentinel for "no block allocated at this slot".
pub const NULL_ADDR: BlkAddr = 0;

/// Sentinel for "a slot is reserved but no block has been written to it yet".
pub const NEW_ADDR: BlkAddr = u32::MAX;

/// The category of address validity recovery cares about: blocks that sit in
/// the legitimate post-checkpoint main area.
///
/// Real mounts partition validity more finely (free, pre-allocated,
/// meta-area, etc.); recovery only ever needs to ask for this one category,
/// so it is the only one modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPor;

/// Returns whether `addr` is one of the two sentinels, i.e. not a concrete
/// block on disk.
#[inline]
pub fn is_sentinel(addr: BlkAddr) -> bool {
	addr == NULL_ADDR || addr == NEW_ADDR
}
