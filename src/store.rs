//! The slot store.
//!
//! [`SlotStore`] owns the NVM adapter and the in-RAM index and exposes the
//! public slot operations. Every mutation follows the transactional write
//! protocol: new clusters are made valid tail-first with the START cluster
//! last, and only then is the previous generation torn down, so a power
//! loss at any byte leaves either the old or the new value recoverable.
//!
//! The store is strictly single-caller. There is no locking and no
//! suspension point inside an operation; a hardware abort is equivalent to
//! power loss and is repaired by the next [`SlotStore::begin`] on that
//! medium.

use tracing::{debug, trace};

use crate::cluster::{self, ClusterHeader, FLAG_LAST, FLAG_START, OFF_FLAGS, OFF_LEN, OFF_LINK, OFF_PAYLOAD, OFF_SLOT};
use crate::config::{Geometry, SlotConfig, FIRST_SLOT, MAX_PAYLOAD};
use crate::error::{Result, SlotError};
use crate::index::{ClusterBitmap, SlotBitmap};
use crate::nvm::Nvm;
use crate::recovery;

/// Transactional slot storage over a byte-addressable NVM device.
pub struct SlotStore<N: Nvm> {
    nvm: N,
    geo: Geometry,
    /// Wear-leveling placement source. `None` = deterministic placement.
    rng: Option<Box<dyn FnMut() -> u32>>,
    used: ClusterBitmap,
    avail: SlotBitmap,
    init_done: bool,
}

impl<N: Nvm> SlotStore<N> {
    /// Build a store over `nvm`. Validates the geometry; the medium itself
    /// is not touched until [`SlotStore::begin`].
    pub fn new(nvm: N, config: SlotConfig) -> Result<Self> {
        let geo = Geometry::resolve(&config, nvm.size())?;
        Ok(SlotStore {
            nvm,
            geo,
            rng: None,
            used: ClusterBitmap::new(geo.cluster_count),
            avail: SlotBitmap::new(FIRST_SLOT, geo.last_slot),
            init_done: false,
        })
    }

    /// Build a store with wear-leveling: each allocation starts probing at a
    /// position drawn from `rng`, spreading writes across the medium.
    pub fn with_rng(nvm: N, config: SlotConfig, rng: impl FnMut() -> u32 + 'static) -> Result<Self> {
        let mut store = Self::new(nvm, config)?;
        store.rng = Some(Box::new(rng));
        Ok(store)
    }

    /// Scan the medium, repair interrupted mutations, and build the index.
    ///
    /// Must be called exactly once before any other operation. Fails on any
    /// NVM read error or if called twice.
    pub fn begin(&mut self) -> Result<()> {
        if self.init_done {
            return Err(SlotError::AlreadyInitialized);
        }
        let (used, avail) = recovery::run(&mut self.nvm, &self.geo)?;
        debug!(
            clusters = used.count_set(),
            total = self.geo.cluster_count,
            "medium scan complete"
        );
        self.used = used;
        self.avail = avail;
        self.init_done = true;
        Ok(())
    }

    /// Whether [`SlotStore::begin`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.init_done
    }

    /// Whether `slot` currently holds data. Out-of-range slots report
    /// `false`.
    pub fn is_slot_available(&self, slot: u8) -> bool {
        self.avail.is_set(slot)
    }

    /// Replace the contents of `slot` with `data`, transactionally.
    ///
    /// On success the new value is durable. On failure the old value (if
    /// any) is still recoverable; an interrupted call may leave debris that
    /// the next [`SlotStore::begin`] collects.
    pub fn write_slot(&mut self, slot: u8, data: &[u8]) -> Result<()> {
        self.ensure_init()?;
        if data.is_empty() {
            return Err(SlotError::EmptyPayload);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(SlotError::PayloadTooLarge(data.len()));
        }
        if !self.geo.slot_in_range(slot) {
            return Err(SlotError::InvalidSlot(slot));
        }

        let old_start = self.find_start_cluster(slot)?;

        let mut new_age = 0u8;
        let mut free = self.free();
        if let Some(start) = old_start {
            let base = self.geo.addr(start as usize);
            let flags = self.read_byte(base + OFF_FLAGS)?;
            new_age = (((flags & cluster::AGE_MASK) >> cluster::AGE_SHIFT) + 1) & 0x03;

            // Rewrites may dip into the provision, but only up to the space
            // the old generation gives back.
            let old_len = self.read_byte(base + OFF_LEN)? as usize + 1;
            free += self.geo.round_up(old_len).min(self.geo.provision);
        }
        if free < data.len() {
            return Err(SlotError::NoSpace);
        }

        // Pick target clusters before touching the medium.
        let count = self.geo.clusters_for(data.len());
        let mut clusters = Vec::with_capacity(count);
        let mut pos = match &mut self.rng {
            Some(rng) => rng() as usize % self.geo.cluster_count,
            None => self.geo.cluster_count,
        };
        for _ in 0..count {
            pos = self.next_free_cluster(pos).ok_or(SlotError::NoSpace)?;
            clusters.push(pos as u8);
        }
        trace!(slot, ?clusters, len = data.len(), "allocated clusters");

        // Commit tail-first; the START cluster's end marker is the point at
        // which the new generation becomes the recoverable one.
        for i in (0..count).rev() {
            let offset = i * self.geo.user_data;
            let chunk = &data[offset..(offset + self.geo.user_data).min(data.len())];
            let header = ClusterHeader {
                slot,
                age: new_age,
                start: i == 0,
                last: i == count - 1,
                link: if i == count - 1 { slot } else { clusters[i + 1] },
                length: if i == 0 {
                    (data.len() - 1) as u8
                } else {
                    chunk.len() as u8
                },
            };
            cluster::write_cluster(&mut self.nvm, &self.geo, clusters[i] as usize, &header, chunk)?;
            self.used.set(clusters[i] as usize);
        }

        if let Some(start) = old_start {
            // The new generation is durable; a failed teardown only leaves
            // stale clusters for the next scan to reclaim.
            if let Err(err) = self.clear_chain(start) {
                debug!(slot, %err, "old generation teardown failed");
            }
        } else {
            self.avail.set(slot);
        }
        Ok(())
    }

    /// Read the contents of `slot` into `buf`, returning the payload size.
    ///
    /// A too-small buffer fails with [`SlotError::BufferTooSmall`] carrying
    /// the required size and copies nothing; see [`SlotStore::slot_size`]
    /// for the probe-only form.
    pub fn read_slot(&mut self, slot: u8, buf: &mut [u8]) -> Result<usize> {
        self.ensure_init()?;
        if !self.geo.slot_in_range(slot) {
            return Err(SlotError::InvalidSlot(slot));
        }
        let start = self
            .find_start_cluster(slot)?
            .ok_or(SlotError::SlotEmpty(slot))?;

        let mut base = self.geo.addr(start as usize);
        let size = self.read_byte(base + OFF_LEN)? as usize + 1;
        if size > buf.len() {
            return Err(SlotError::BufferTooSmall { needed: size });
        }

        let mut copied = 0;
        loop {
            let flags = self.read_byte(base + OFF_FLAGS)?;
            let take = (size - copied).min(self.geo.user_data);
            if !self.nvm.read(base + OFF_PAYLOAD, &mut buf[copied..copied + take]) {
                return Err(SlotError::NvmRead {
                    addr: base + OFF_PAYLOAD,
                });
            }
            copied += take;
            if flags & FLAG_LAST != 0 || copied >= size {
                break;
            }
            let next = self.read_byte(base + OFF_LINK)?;
            base = self.geo.addr(next as usize);
        }
        Ok(size)
    }

    /// Size of the payload stored in `slot`, without reading it.
    pub fn slot_size(&mut self, slot: u8) -> Result<usize> {
        self.ensure_init()?;
        if !self.geo.slot_in_range(slot) {
            return Err(SlotError::InvalidSlot(slot));
        }
        let start = self
            .find_start_cluster(slot)?
            .ok_or(SlotError::SlotEmpty(slot))?;
        let len = self.read_byte(self.geo.addr(start as usize) + OFF_LEN)?;
        Ok(len as usize + 1)
    }

    /// Delete the contents of `slot`.
    ///
    /// The head cluster's invalidation is the commit point; stragglers of a
    /// partially torn-down chain are reclaimed by the next scan.
    pub fn erase_slot(&mut self, slot: u8) -> Result<()> {
        self.ensure_init()?;
        if !self.geo.slot_in_range(slot) {
            return Err(SlotError::InvalidSlot(slot));
        }
        let start = self
            .find_start_cluster(slot)?
            .ok_or(SlotError::SlotEmpty(slot))?;
        self.clear_chain(start)?;
        self.avail.clear(slot);
        Ok(())
    }

    /// Total payload capacity of the medium in bytes, provision included.
    pub fn size(&self) -> usize {
        self.geo.cluster_count * self.geo.user_data
    }

    /// Capacity available to callers: [`SlotStore::size`] minus the rounded
    /// provision.
    pub fn usable_size(&self) -> usize {
        self.size() - self.geo.provision
    }

    /// Bytes still writable without dipping into the provision.
    pub fn free(&self) -> usize {
        let free = self.size() - self.used.count_set() * self.geo.user_data;
        free.saturating_sub(self.geo.provision)
    }

    /// Number of clusters the medium is divided into.
    pub fn cluster_count(&self) -> usize {
        self.geo.cluster_count
    }

    /// First usable slot number (always 1).
    pub fn first_slot(&self) -> u8 {
        FIRST_SLOT
    }

    /// Highest usable slot number for this configuration.
    pub fn last_slot(&self) -> u8 {
        self.geo.last_slot
    }

    /// Borrow the underlying adapter (inspection only).
    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    /// Mutable access to the underlying adapter, for fault injection and
    /// instrumentation. Changing medium bytes through this desynchronizes
    /// the in-RAM index; treat the store as poisoned afterwards and rescan
    /// with a fresh one.
    pub fn nvm_mut(&mut self) -> &mut N {
        &mut self.nvm
    }

    /// Consume the store and return the adapter.
    pub fn into_inner(self) -> N {
        self.nvm
    }

    fn ensure_init(&self) -> Result<()> {
        if self.init_done {
            Ok(())
        } else {
            Err(SlotError::NotInitialized)
        }
    }

    fn read_byte(&mut self, addr: usize) -> Result<u8> {
        self.nvm.read_byte(addr).ok_or(SlotError::NvmRead { addr })
    }

    /// Locate the START cluster of `slot`'s current generation via the
    /// used-cluster bitmap.
    fn find_start_cluster(&mut self, slot: u8) -> Result<Option<u8>> {
        for c in 0..self.geo.cluster_count {
            if !self.used.is_set(c) {
                continue;
            }
            let base = self.geo.addr(c);
            let owner = self.read_byte(base + OFF_SLOT)?;
            if owner != slot {
                continue;
            }
            let flags = self.read_byte(base + OFF_FLAGS)?;
            if flags & FLAG_START != 0 {
                return Ok(Some(c as u8));
            }
        }
        Ok(None)
    }

    /// Next free cluster strictly after `from` in cyclic order. Passing the
    /// cluster count starts the search at cluster 0.
    fn next_free_cluster(&self, from: usize) -> Option<usize> {
        let n = self.geo.cluster_count;
        let start = from.min(n);
        let probes = if start == n { n } else { n - 1 };
        let mut pos = start;
        for _ in 0..probes {
            pos += 1;
            if pos >= n {
                pos = 0;
            }
            if !self.used.is_set(pos) {
                return Some(pos);
            }
        }
        None
    }

    /// Invalidate a chain starting at its head. The head write is the
    /// commit; later failures are swallowed since the next scan reclaims
    /// whatever is left. Walk depth is bounded against damaged links.
    fn clear_chain(&mut self, head: u8) -> Result<()> {
        let mut base = self.geo.addr(head as usize);
        cluster::invalidate(&mut self.nvm, &self.geo, head as usize)?;
        self.used.clear(head as usize);

        let mut depth = MAX_PAYLOAD / self.geo.user_data;
        while depth > 0 {
            let Some(flags) = self.nvm.read_byte(base + OFF_FLAGS) else {
                break;
            };
            if flags & FLAG_LAST != 0 {
                break;
            }
            let Some(next) = self.nvm.read_byte(base + OFF_LINK) else {
                break;
            };
            base = self.geo.addr(next as usize);
            if cluster::invalidate(&mut self.nvm, &self.geo, next as usize).is_err() {
                break;
            }
            self.used.clear(next as usize);
            depth -= 1;
        }
        Ok(())
    }
}
