//! # slotnvm
//!
//! Transactional slot storage for small byte-addressable NVM devices,
//! typically on-chip EEPROM of 64 bytes to 32 KiB.
//!
//! Variable-length blobs of 1..=256 bytes live in numbered *slots*. Each
//! slot is realized on the medium as a chain of fixed-size *clusters*, and
//! every rewrite builds a complete new chain before the old one is torn
//! down, so an arbitrary power loss leaves either the previous or the new
//! value recoverable — never a partial one. The only write primitive
//! required from the device is a single-byte write that commits atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SlotStore                     │
//! │    write_slot / read_slot / erase_slot       │
//! └──────┬───────────────┬───────────────┬───────┘
//!        │               │               │
//!        ▼               ▼               ▼
//! ┌────────────┐  ┌─────────────┐  ┌───────────┐
//! │  recovery  │  │   cluster   │  │   index   │
//! │ (begin/GC) │  │   (codec)   │  │ (bitmaps) │
//! └──────┬─────┘  └──────┬──────┘  └───────────┘
//!        │               │
//!        ▼               ▼
//! ┌──────────────────────────────────────────────┐
//! │              Nvm adapter trait               │
//! │          MemNvm / FileNvm / yours            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use slotnvm::{crc8_ccitt_update, MemNvm, SlotConfig, SlotStore};
//!
//! let config = SlotConfig::builder(16).crc(crc8_ccitt_update).build();
//! let mut store = SlotStore::new(MemNvm::new(512), config)?;
//! store.begin()?;
//!
//! store.write_slot(1, b"hello")?;
//! let mut buf = [0u8; 16];
//! let len = store.read_slot(1, &mut buf)?;
//! assert_eq!(&buf[..len], b"hello");
//! # Ok::<(), slotnvm::SlotError>(())
//! ```

pub mod config;
pub mod crc;
pub mod error;
pub mod nvm;
pub mod store;

mod cluster;
mod index;
mod recovery;

pub use config::{Crc8Fn, SlotConfig, SlotConfigBuilder, FIRST_SLOT, MAX_PAYLOAD, MAX_SLOT};
pub use crc::crc8_ccitt_update;
pub use error::{Result, SlotError};
pub use nvm::{FileNvm, MemNvm, Nvm};
pub use store::SlotStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
