//! Cluster codec: the on-media record format and its commit protocol.
//!
//! A cluster of `C` bytes is laid out as:
//!
//! ```text
//! ┌────────┬───────────────────────────────────────────────────────────┐
//! │ Offset │ Field                                                     │
//! ├────────┼───────────────────────────────────────────────────────────┤
//! │ 0      │ slot_no   0x00/0xFF free, 0x01..0xFA owner, 0xFB.. rsvd   │
//! │ 1      │ flags     bits 7-6 age, bit 5 START, bit 4 LAST           │
//! │ 2      │ link      next cluster, or own slot_no in the LAST one    │
//! │ 3      │ length    START: total payload - 1; else bytes here       │
//! │ 4..C-3 │ payload                                                   │
//! │ C-2    │ CRC-8 over header + used payload (payload in no-CRC mode) │
//! │ C-1    │ end marker: 0xA1 with CRC, 0xA0 without                   │
//! └────────┴───────────────────────────────────────────────────────────┘
//! ```
//!
//! The end marker is the commit witness. [`write_cluster`] writes it last,
//! and scrubs a stale valid marker before touching any other byte, so a
//! power loss at any point leaves the cluster either fully valid or
//! recognizably invalid. Tearing down a cluster is the opposite single-byte
//! operation: zero the slot number ([`invalidate`]).
//!
//! The marker values are format version markers; an incompatible layout
//! change must pick new ones.

use crate::config::Geometry;
use crate::error::{Result, SlotError};
use crate::nvm::Nvm;

pub(crate) const OFF_SLOT: usize = 0;
pub(crate) const OFF_FLAGS: usize = 1;
pub(crate) const OFF_LINK: usize = 2;
pub(crate) const OFF_LEN: usize = 3;
pub(crate) const OFF_PAYLOAD: usize = 4;

pub(crate) const FLAG_START: u8 = 0x20;
pub(crate) const FLAG_LAST: u8 = 0x10;
pub(crate) const AGE_MASK: u8 = 0xC0;
pub(crate) const AGE_SHIFT: u8 = 6;

/// End marker of a valid cluster when a CRC function is configured.
pub(crate) const END_MARKER_CRC: u8 = 0xA1;
/// End marker of a valid cluster without CRC.
pub(crate) const END_MARKER_PLAIN: u8 = 0xA0;

/// Decoded cluster header (bytes 0..4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClusterHeader {
    pub slot: u8,
    /// Generation age, 0..=3.
    pub age: u8,
    pub start: bool,
    pub last: bool,
    pub link: u8,
    /// Raw length byte; meaning depends on `start`.
    pub length: u8,
}

impl ClusterHeader {
    pub fn flags_byte(&self) -> u8 {
        (self.age << AGE_SHIFT)
            | if self.start { FLAG_START } else { 0 }
            | if self.last { FLAG_LAST } else { 0 }
    }

    /// Decode from the first four bytes of a cluster. Reserved flag bits are
    /// carried by the CRC but otherwise ignored, so old media stay readable.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let flags = bytes[OFF_FLAGS];
        ClusterHeader {
            slot: bytes[OFF_SLOT],
            age: (flags & AGE_MASK) >> AGE_SHIFT,
            start: flags & FLAG_START != 0,
            last: flags & FLAG_LAST != 0,
            link: bytes[OFF_LINK],
            length: bytes[OFF_LEN],
        }
    }
}

/// Validate one cluster image (pass-1 check).
///
/// `bytes` must hold the full cluster. Returns the decoded header when the
/// cluster is superficially valid: owner slot in range, end marker present,
/// and in CRC mode a verified checksum plus a sane non-START length. Chain
/// level problems are left for the recovery walk.
pub(crate) fn validate(bytes: &[u8], geo: &Geometry) -> Option<ClusterHeader> {
    let header = ClusterHeader::from_bytes(bytes);
    if !geo.slot_in_range(header.slot) {
        return None;
    }
    if bytes[geo.cluster_size - 1] != geo.end_marker {
        return None;
    }

    if let Some(f) = geo.crc {
        let used = if header.start {
            (header.length as usize + 1).min(geo.user_data)
        } else {
            if header.length as usize > geo.user_data {
                return None;
            }
            header.length as usize
        };

        let mut crc = 0u8;
        for &b in &bytes[..OFF_PAYLOAD + used] {
            crc = f(crc, b);
        }
        if crc != bytes[geo.cluster_size - 2] {
            return None;
        }
    }

    Some(header)
}

/// Write one cluster, committing with the end marker.
///
/// Order on the medium: scrub a pre-existing valid marker, header, payload,
/// CRC, then the marker. Callers mark the cluster used only after this
/// returns.
pub(crate) fn write_cluster<N: Nvm>(
    nvm: &mut N,
    geo: &Geometry,
    cluster: usize,
    header: &ClusterHeader,
    payload: &[u8],
) -> Result<()> {
    debug_assert!(payload.len() <= geo.user_data);

    let base = geo.addr(cluster);
    let marker_addr = base + geo.cluster_size - 1;

    // A leftover valid marker must die before any other byte changes,
    // otherwise a crash mid-update could leave a half-written cluster that
    // still scans as valid.
    let current = nvm
        .read_byte(marker_addr)
        .ok_or(SlotError::NvmRead { addr: marker_addr })?;
    if current == geo.end_marker && !nvm.write_byte(marker_addr, 0x00) {
        return Err(SlotError::NvmWrite { addr: marker_addr });
    }

    let head = [header.slot, header.flags_byte(), header.link, header.length];
    if !nvm.write(base, &head) {
        return Err(SlotError::NvmWrite { addr: base });
    }
    if !nvm.write(base + OFF_PAYLOAD, payload) {
        return Err(SlotError::NvmWrite {
            addr: base + OFF_PAYLOAD,
        });
    }

    if let Some(f) = geo.crc {
        let mut crc = 0u8;
        for &b in head.iter().chain(payload) {
            crc = f(crc, b);
        }
        let crc_addr = base + geo.cluster_size - 2;
        if !nvm.write_byte(crc_addr, crc) {
            return Err(SlotError::NvmWrite { addr: crc_addr });
        }
    }

    if !nvm.write_byte(marker_addr, geo.end_marker) {
        return Err(SlotError::NvmWrite { addr: marker_addr });
    }
    Ok(())
}

/// Invalidate a cluster by zeroing its slot number. Single-byte, so atomic
/// with respect to power loss.
pub(crate) fn invalidate<N: Nvm>(nvm: &mut N, geo: &Geometry, cluster: usize) -> Result<()> {
    let addr = geo.addr(cluster);
    if !nvm.write_byte(addr, 0x00) {
        return Err(SlotError::NvmWrite { addr });
    }
    Ok(())
}
