//! Startup recovery scan.
//!
//! Rebuilds the in-RAM index from the raw medium and garbage-collects the
//! debris an interrupted mutation can leave behind. Two passes:
//!
//! 1. Per-cluster validation: slot range, end marker, CRC. Survivors seed
//!    the used-cluster bitmap and nominate their slot.
//! 2. Per-slot generation selection: among the START clusters found for a
//!    slot, pick the newest age whose chain walks to completion; everything
//!    else claiming that slot number is invalidated on the medium.
//!
//! The scan is idempotent on a consistent medium and tolerates one
//! interrupted mutation per slot, which is all the write protocol can
//! produce.

use tracing::{debug, warn};

use crate::cluster::{
    self, AGE_MASK, AGE_SHIFT, FLAG_LAST, FLAG_START, OFF_FLAGS, OFF_LEN, OFF_LINK, OFF_SLOT,
};
use crate::config::{Geometry, FIRST_SLOT};
use crate::error::{Result, SlotError};
use crate::index::{ClusterBitmap, SlotBitmap};
use crate::nvm::Nvm;

/// Age-mask resolution table, indexed by the 4-bit mask of ages present
/// among a slot's START clusters.
///
/// Ages are a mod-4 counter, so the set of live ages must form a contiguous
/// cyclic run; the winner is the run's newest end. Low two bits carry the
/// winner, a set high nibble flags masks that cannot come from a single
/// interrupted write (gap or multiple predecessors). The walk loop retries
/// on the winner bits either way, so the flag is diagnostic only.
const AGE_WINNER: [u8; 16] = [
    0xF0, // ____  no age present
    0x00, // 0___
    0x01, // _1__
    0x01, // 01__  0 is the predecessor
    0x02, // __2_
    0xF2, // 0_2_  gap
    0x02, // _12_  1 is the predecessor
    0xF2, // 012_  two predecessors
    0x03, // ___3
    0x00, // 0__3  3 is the predecessor (wrap)
    0xF3, // _1_3  gap
    0xF1, // 01_3  two predecessors
    0x03, // __23  2 is the predecessor
    0xF0, // 0_23  two predecessors
    0xF3, // _123  two predecessors
    0xF3, // 0123  three predecessors
];

/// Scan the medium and build the index. Read failures are fatal; write
/// failures during garbage collection are logged and left for the next run.
pub(crate) fn run<N: Nvm>(nvm: &mut N, geo: &Geometry) -> Result<(ClusterBitmap, SlotBitmap)> {
    let mut used = ClusterBitmap::new(geo.cluster_count);
    let mut avail = SlotBitmap::new(FIRST_SLOT, geo.last_slot);

    scan_clusters(nvm, geo, &mut used, &mut avail)?;

    for slot in FIRST_SLOT..=geo.last_slot {
        if avail.is_set(slot) {
            resolve_slot(nvm, geo, slot, &mut used, &mut avail)?;
        }
    }

    Ok((used, avail))
}

/// Pass 1: validate every cluster in isolation.
fn scan_clusters<N: Nvm>(
    nvm: &mut N,
    geo: &Geometry,
    used: &mut ClusterBitmap,
    avail: &mut SlotBitmap,
) -> Result<()> {
    let mut buf = vec![0u8; geo.cluster_size];
    for c in 0..geo.cluster_count {
        let addr = geo.addr(c);
        if !nvm.read(addr, &mut buf) {
            return Err(SlotError::NvmRead { addr });
        }
        if let Some(header) = cluster::validate(&buf, geo) {
            used.set(c);
            avail.set(header.slot);
        }
    }
    Ok(())
}

/// Pass 2 for one slot: pick the surviving generation and scrub the rest.
fn resolve_slot<N: Nvm>(
    nvm: &mut N,
    geo: &Geometry,
    slot: u8,
    used: &mut ClusterBitmap,
    avail: &mut SlotBitmap,
) -> Result<()> {
    // Clusters claiming this slot number on the medium, split into the ones
    // pass 1 vouched for (chain material) and the rest (sweep targets only,
    // e.g. a generation whose end marker never landed).
    let mut claimed = ClusterBitmap::new(geo.cluster_count);
    let mut members = ClusterBitmap::new(geo.cluster_count);
    let mut start_by_age = [0u8; 4];
    let mut age_mask = 0u8;

    for c in 0..geo.cluster_count {
        let addr = geo.addr(c);
        let owner = nvm
            .read_byte(addr + OFF_SLOT)
            .ok_or(SlotError::NvmRead { addr })?;
        if owner != slot {
            continue;
        }
        claimed.set(c);
        if !used.is_set(c) {
            continue;
        }
        members.set(c);

        let flags = nvm
            .read_byte(addr + OFF_FLAGS)
            .ok_or(SlotError::NvmRead { addr: addr + OFF_FLAGS })?;
        if flags & FLAG_START != 0 {
            let age = (flags & AGE_MASK) >> AGE_SHIFT;
            start_by_age[age as usize] = c as u8;
            age_mask |= 1 << age;
        }
    }

    // Try ages newest-first until a chain validates end to end.
    let mut surviving: Option<ClusterBitmap> = None;
    while age_mask != 0 {
        let entry = AGE_WINNER[age_mask as usize];
        let age = entry & 0x03;
        if entry & 0xF0 != 0 {
            warn!(slot, age_mask, "conflicting generation ages on medium");
        }

        match walk_chain(nvm, geo, &members, start_by_age[age as usize], age)? {
            Some(chain) => {
                surviving = Some(chain);
                break;
            }
            None => {
                debug!(slot, age, "discarding generation with broken chain");
                age_mask &= !(1 << age);
            }
        }
    }

    // Scrub every cluster claiming this slot outside the surviving chain.
    for c in 0..geo.cluster_count {
        if !claimed.is_set(c) {
            continue;
        }
        if let Some(chain) = &surviving {
            if chain.is_set(c) {
                continue;
            }
        }
        debug!(slot, cluster = c, "invalidating stale cluster");
        if cluster::invalidate(nvm, geo, c).is_err() {
            warn!(slot, cluster = c, "invalidation write failed, deferring to next scan");
        }
        used.clear(c);
    }

    if surviving.is_none() {
        avail.clear(slot);
    }
    Ok(())
}

/// Follow one generation's chain from its START cluster.
///
/// Every hop must stay inside this slot's validated clusters, carry the same
/// age, and not be a second START. Accumulated capacity is capped at the
/// declared length plus one cluster's worth, which bounds the walk and kills
/// cycles; a chain that ends before covering the declared length fails too.
fn walk_chain<N: Nvm>(
    nvm: &mut N,
    geo: &Geometry,
    members: &ClusterBitmap,
    start: u8,
    age: u8,
) -> Result<Option<ClusterBitmap>> {
    let mut chain = ClusterBitmap::new(geo.cluster_count);
    chain.set(start as usize);

    let mut addr = geo.addr(start as usize);
    let mut flags = nvm
        .read_byte(addr + OFF_FLAGS)
        .ok_or(SlotError::NvmRead { addr: addr + OFF_FLAGS })?;
    let declared = nvm
        .read_byte(addr + OFF_LEN)
        .ok_or(SlotError::NvmRead { addr: addr + OFF_LEN })? as usize;

    let limit = declared + 1 + geo.user_data;
    let mut capacity = geo.user_data;

    while flags & FLAG_LAST == 0 {
        let next = nvm
            .read_byte(addr + OFF_LINK)
            .ok_or(SlotError::NvmRead { addr: addr + OFF_LINK })? as usize;
        if !members.is_set(next) {
            return Ok(None);
        }
        chain.set(next);
        addr = geo.addr(next);
        flags = nvm
            .read_byte(addr + OFF_FLAGS)
            .ok_or(SlotError::NvmRead { addr: addr + OFF_FLAGS })?;
        if (flags & AGE_MASK) >> AGE_SHIFT != age {
            return Ok(None);
        }
        if flags & FLAG_START != 0 {
            return Ok(None);
        }
        capacity += geo.user_data;
        if capacity >= limit {
            return Ok(None);
        }
    }

    if capacity < declared + 1 {
        return Ok(None);
    }
    Ok(Some(chain))
}
