//! Construction-time configuration.
//!
//! A [`SlotConfig`] is resolved against the adapter's reported size into a
//! [`Geometry`] when the store is built; every constraint is checked once
//! there so the hot paths never re-validate.

use crate::error::{Result, SlotError};

/// Injected CRC-8 update function: `f(crc_in, byte) -> crc_out`.
pub type Crc8Fn = fn(u8, u8) -> u8;

/// Largest payload a single slot can hold, in bytes.
pub const MAX_PAYLOAD: usize = 256;

/// First usable slot number. Slot 0 doubles as the on-media "free" marker.
pub const FIRST_SLOT: u8 = 1;

/// Largest slot number any configuration may expose (`0xFB..0xFE` are
/// reserved on the medium, `0xFF` marks a free cluster).
pub const MAX_SLOT: u8 = 250;

/// Store configuration.
///
/// `cluster_size` is the only mandatory choice; everything else defaults to
/// the smallest-footprint behavior (no provision, auto slot range, no CRC).
#[derive(Debug, Clone, Copy)]
pub struct SlotConfig {
    pub(crate) cluster_size: usize,
    pub(crate) provision: usize,
    pub(crate) last_slot: u8,
    pub(crate) crc: Option<Crc8Fn>,
}

impl SlotConfig {
    /// Config with the given cluster size and all defaults.
    pub fn new(cluster_size: usize) -> Self {
        SlotConfig {
            cluster_size,
            provision: 0,
            last_slot: 0,
            crc: None,
        }
    }

    /// Start building a config with non-default fields.
    pub fn builder(cluster_size: usize) -> SlotConfigBuilder {
        SlotConfigBuilder {
            config: SlotConfig::new(cluster_size),
        }
    }
}

/// Builder for [`SlotConfig`].
pub struct SlotConfigBuilder {
    config: SlotConfig,
}

impl SlotConfigBuilder {
    /// Bytes held back so a rewrite of up to this size always succeeds.
    /// Rounded up to a whole number of clusters at resolution time.
    pub fn provision(mut self, bytes: usize) -> Self {
        self.config.provision = bytes;
        self
    }

    /// Highest usable slot number (1..=250). `0` resolves to
    /// `min(cluster_count, 250)`.
    pub fn last_slot(mut self, slot: u8) -> Self {
        self.config.last_slot = slot;
        self
    }

    /// Enable per-cluster CRC-8 with the given update function. Costs one
    /// payload byte per cluster and switches the end marker value.
    pub fn crc(mut self, f: Crc8Fn) -> Self {
        self.config.crc = Some(f);
        self
    }

    pub fn build(self) -> SlotConfig {
        self.config
    }
}

/// Resolved medium geometry. Derived once from a [`SlotConfig`] and the
/// adapter size; immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    /// Cluster size in bytes (`C`).
    pub cluster_size: usize,
    /// Number of whole clusters on the medium (`N`, at most 256).
    pub cluster_count: usize,
    /// Payload bytes per cluster (`U`): `C - 6` with CRC, `C - 5` without.
    pub user_data: usize,
    /// Provision rounded up to a multiple of `user_data`.
    pub provision: usize,
    /// Highest usable slot number.
    pub last_slot: u8,
    /// Commit witness value for the last byte of a valid cluster.
    pub end_marker: u8,
    pub crc: Option<Crc8Fn>,
}

impl Geometry {
    pub fn resolve(config: &SlotConfig, nvm_size: usize) -> Result<Geometry> {
        let c = config.cluster_size;
        if !(7..=256).contains(&c) {
            return Err(SlotError::Geometry(format!(
                "cluster size {} outside 7..=256",
                c
            )));
        }

        let n = nvm_size / c;
        if n == 0 {
            return Err(SlotError::Geometry(format!(
                "medium of {} bytes holds no {} byte cluster",
                nvm_size, c
            )));
        }
        if n > 256 {
            return Err(SlotError::Geometry(format!(
                "{} clusters exceed the 256 cluster limit, increase cluster size",
                n
            )));
        }

        let user_data = if config.crc.is_some() { c - 6 } else { c - 5 };
        let provision = config.provision.div_ceil(user_data) * user_data;
        if provision * 2 > n * user_data {
            return Err(SlotError::Geometry(format!(
                "provision of {} bytes exceeds half of the {} usable bytes",
                provision,
                n * user_data
            )));
        }

        let last_slot = match config.last_slot {
            0 => (n as u8).min(MAX_SLOT),
            s => s.min(MAX_SLOT),
        };

        let end_marker = if config.crc.is_some() {
            crate::cluster::END_MARKER_CRC
        } else {
            crate::cluster::END_MARKER_PLAIN
        };

        Ok(Geometry {
            cluster_size: c,
            cluster_count: n,
            user_data,
            provision,
            last_slot,
            end_marker,
            crc: config.crc,
        })
    }

    /// Byte address of the first byte of a cluster.
    #[inline]
    pub fn addr(&self, cluster: usize) -> usize {
        cluster * self.cluster_size
    }

    #[inline]
    pub fn slot_in_range(&self, slot: u8) -> bool {
        (FIRST_SLOT..=self.last_slot).contains(&slot)
    }

    /// Clusters needed to hold `len` payload bytes.
    #[inline]
    pub fn clusters_for(&self, len: usize) -> usize {
        (len - 1) / self.user_data + 1
    }

    /// `len` rounded up to a whole number of clusters, in bytes.
    #[inline]
    pub fn round_up(&self, len: usize) -> usize {
        len.div_ceil(self.user_data) * self.user_data
    }
}
