//! Block device driver for legacy Parallel ATA controllers and ATAPI
//! optical drives behind a PCI IDE function (PIIX/PIIX3 compatible).
//!
//! The driver exposes each drive as a byte-addressable block node and
//! translates arbitrary byte ranges into whole-sector hardware transfers:
//!
//! - [`IdeController`]: probe the four legacy slots, publish nodes, field
//!   the channel interrupts
//! - [`BlockDevice`]: the capability surface the VFS consumes
//! - [`hal`]: the collaborator traits a kernel (or test harness) provides:
//!   port I/O, PCI configuration space, DMA memory, interrupts, mounts
//!
//! Disks transfer via Bus Master DMA when BAR4 decodes to I/O space, with a
//! PIO fallback; optical drives use IRQ-synchronized ATAPI packet commands.
//! A single lock serializes every hardware transaction, matching the shared
//! legacy IDE bus.

mod ata;
mod atapi;
mod blockdev;
mod controller;
mod device;
mod error;
pub mod hal;
mod identify;
pub mod regs;
mod sync;

pub use blockdev::{BlockDevice, NodeInfo, NodeKind};
pub use controller::{IdeController, IdeControllerConfig};
pub use device::{Channel, DeviceKind, IdeDevice};
pub use error::{AtaError, Result};
pub use identify::IdentifyBlock;
