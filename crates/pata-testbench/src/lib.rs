//! In-process test double for the PATA/ATAPI driver: an emulated
//! PIIX3-compatible IDE controller wired to emulated physical memory, PCI
//! configuration space, synchronous IRQ delivery and a recording VFS.
//!
//! - [`TestMachine`]: implements every `pata_driver::hal` trait
//! - [`DiskImage`] / [`IsoImage`]: backing media
//! - [`EmulatedIde`]: the port-protocol model, with a command/packet trace
//!
//! ```no_run
//! use std::sync::Arc;
//! use pata_driver::{Channel, IdeController, IdeControllerConfig};
//! use pata_testbench::{DiskImage, TestMachine, TestMachineConfig};
//!
//! let machine = TestMachine::new(TestMachineConfig::default());
//! machine.attach_disk(Channel::Primary, false, DiskImage::new(32768), "TEST DISK");
//! let controller = IdeController::initialize(
//!     machine.clone(),
//!     machine.clone(),
//!     machine.clone(),
//!     machine.clone(),
//!     machine.clone(),
//!     IdeControllerConfig::default(),
//! );
//! let node = machine.node("/dev/hda").unwrap();
//! # let _ = (controller, node);
//! ```

mod ide;
mod machine;
mod mem;

pub use ide::{CommandRecord, DiskImage, EmulatedIde, IsoImage, BM_BASE};
pub use machine::{TestMachine, TestMachineConfig};
pub use mem::{BumpDmaAllocator, PhysMemory, TestDmaRegion};
