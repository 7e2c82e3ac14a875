//! The test machine: emulated ports, PCI configuration space, physical
//! memory, IRQ delivery and a recording mount table, all behind the
//! driver's collaborator traits.
//!
//! Interrupt delivery is synchronous: when a port access completes and the
//! device model has raised a line, the installed handler runs inline before
//! the access returns to the driver. This models the "IRQ preempts at an
//! arbitrary point" contract without threads, and exercises the
//! wakeup-before-sleep path of packet reads (the IRQ always fires during
//! the final packet word write, before the caller parks).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use pata_driver::hal::{
    DmaAllocator, DmaRegion, IrqServices, PciAddress, PciConfigAccess, PortIo, Vfs,
};
use pata_driver::regs::{PCI_BAR4, PCI_COMMAND, PCI_DEVICE_PIIX_IDE, PCI_VENDOR_INTEL};
use pata_driver::{BlockDevice, Channel, Result};

use crate::ide::{DiskImage, EmulatedIde, IsoImage, BM_BASE};
use crate::mem::{BumpDmaAllocator, PhysMemory};

/// Machine knobs, in the spirit of a flag-struct config.
#[derive(Debug, Clone)]
pub struct TestMachineConfig {
    pub ram_size: usize,
    /// Present BAR4 as an I/O BAR (bit 0 set). When false the driver must
    /// fall back to PIO.
    pub bar4_io_space: bool,
    /// Whether the IDE function answers the PCI scan at all.
    pub pci_present: bool,
}

impl Default for TestMachineConfig {
    fn default() -> Self {
        Self {
            ram_size: 1 << 20,
            bar4_io_space: true,
            pci_present: true,
        }
    }
}

type IrqHandler = Arc<dyn Fn() + Send + Sync>;

pub struct TestMachine {
    phys: Arc<PhysMemory>,
    dma: BumpDmaAllocator,
    ide: Mutex<EmulatedIde>,
    handlers: Mutex<HashMap<u8, IrqHandler>>,
    acks: Mutex<Vec<u8>>,
    interrupts_enabled: AtomicBool,
    irq_enable_calls: AtomicU32,
    mounts: Mutex<Vec<(String, Arc<dyn BlockDevice>)>>,
    pci_present: bool,
}

impl TestMachine {
    pub fn new(config: TestMachineConfig) -> Arc<Self> {
        let phys = Arc::new(PhysMemory::new(config.ram_size));
        // DMA allocations come from a window above the PRD/test scratch
        // area at the bottom of RAM.
        let dma = BumpDmaAllocator::new(Arc::clone(&phys), 0x1_0000, config.ram_size as u32);
        let bar4 = if config.bar4_io_space {
            u32::from(BM_BASE) | 0x1
        } else {
            0xFEB0_0000
        };
        Arc::new(Self {
            phys: Arc::clone(&phys),
            dma,
            ide: Mutex::new(EmulatedIde::new(phys, bar4)),
            handlers: Mutex::new(HashMap::new()),
            acks: Mutex::new(Vec::new()),
            interrupts_enabled: AtomicBool::new(true),
            irq_enable_calls: AtomicU32::new(0),
            mounts: Mutex::new(Vec::new()),
            pci_present: config.pci_present,
        })
    }

    pub fn attach_disk(&self, channel: Channel, slave: bool, disk: DiskImage, model: &str) {
        self.ide.lock().unwrap().attach_ata(channel, slave, disk, model);
    }

    pub fn attach_cdrom(&self, channel: Channel, slave: bool, iso: Option<IsoImage>, model: &str) {
        self.ide.lock().unwrap().attach_atapi(channel, slave, iso, model);
    }

    /// Make the next `count` sector reads on a disk fail with UNC.
    pub fn inject_read_errors(&self, channel: Channel, slave: bool, count: u32) {
        self.ide
            .lock()
            .unwrap()
            .inject_read_errors(channel, slave, count);
    }

    /// Corrupt the next `count` sector writes on a disk (first byte
    /// flipped), so write verification sees a mismatch.
    pub fn corrupt_writes(&self, channel: Channel, slave: bool, count: u32) {
        self.ide.lock().unwrap().corrupt_writes(channel, slave, count);
    }

    /// Inspect or edit a disk's backing image.
    pub fn with_disk<R>(
        &self,
        channel: Channel,
        slave: bool,
        f: impl FnOnce(&mut DiskImage) -> R,
    ) -> Option<R> {
        self.ide.lock().unwrap().with_disk(channel, slave, f)
    }

    pub fn mounts(&self) -> Vec<(String, Arc<dyn BlockDevice>)> {
        self.mounts.lock().unwrap().clone()
    }

    pub fn node(&self, path: &str) -> Option<Arc<dyn BlockDevice>> {
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, node)| Arc::clone(node))
    }

    /// Every ATA command issued so far, as (channel, opcode).
    pub fn command_log(&self) -> Vec<(Channel, u8)> {
        self.ide.lock().unwrap().command_log()
    }

    /// Every 12-byte ATAPI packet issued so far.
    pub fn packet_log(&self) -> Vec<(Channel, [u8; 12])> {
        self.ide.lock().unwrap().packet_log()
    }

    pub fn clear_logs(&self) {
        self.ide.lock().unwrap().clear_logs();
    }

    /// Lines acknowledged at the interrupt controller, in order.
    pub fn irq_acks(&self) -> Vec<u8> {
        self.acks.lock().unwrap().clone()
    }

    /// How many times the driver enabled interrupts (one per DMA spin).
    pub fn irq_enable_calls(&self) -> u32 {
        self.irq_enable_calls.load(Ordering::SeqCst)
    }

    /// Current state of the emulated interrupt gate.
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.load(Ordering::SeqCst)
    }

    fn dispatch(&self, lines: Vec<u8>) {
        for line in lines {
            let handler = self.handlers.lock().unwrap().get(&line).cloned();
            if let Some(handler) = handler {
                handler();
            }
        }
    }
}

impl PortIo for TestMachine {
    fn inb(&self, port: u16) -> u8 {
        let (value, raised) = {
            let mut ide = self.ide.lock().unwrap();
            (ide.read8(port), ide.take_raised())
        };
        self.dispatch(raised);
        value
    }

    fn outb(&self, port: u16, value: u8) {
        let raised = {
            let mut ide = self.ide.lock().unwrap();
            ide.write8(port, value);
            ide.take_raised()
        };
        self.dispatch(raised);
    }

    fn inw(&self, port: u16) -> u16 {
        let (value, raised) = {
            let mut ide = self.ide.lock().unwrap();
            (ide.read16(port), ide.take_raised())
        };
        self.dispatch(raised);
        value
    }

    fn outw(&self, port: u16, value: u16) {
        let raised = {
            let mut ide = self.ide.lock().unwrap();
            ide.write16(port, value);
            ide.take_raised()
        };
        self.dispatch(raised);
    }

    fn outl(&self, port: u16, value: u32) {
        let raised = {
            let mut ide = self.ide.lock().unwrap();
            ide.write32(port, value);
            ide.take_raised()
        };
        self.dispatch(raised);
    }
}

impl PciConfigAccess for TestMachine {
    fn scan(&self, visit: &mut dyn FnMut(PciAddress, u16, u16)) {
        if self.pci_present {
            // Bus 0, device 1, function 1: the classic PIIX IDE slot.
            visit(
                PciAddress((1 << 11) | (1 << 8)),
                PCI_VENDOR_INTEL,
                PCI_DEVICE_PIIX_IDE,
            );
        }
    }

    fn read_u32(&self, _addr: PciAddress, offset: u8) -> u32 {
        let ide = self.ide.lock().unwrap();
        match offset {
            PCI_COMMAND => ide.pci_command,
            PCI_BAR4 => ide.bar4,
            _ => 0,
        }
    }

    fn write_u32(&self, _addr: PciAddress, offset: u8, value: u32) {
        if offset == PCI_COMMAND {
            self.ide.lock().unwrap().pci_command = value;
        }
    }
}

impl DmaAllocator for TestMachine {
    fn alloc(&self, len: usize) -> Result<Box<dyn DmaRegion>> {
        self.dma.alloc(len)
    }
}

impl IrqServices for TestMachine {
    fn install_handler(&self, line: u8, _name: &'static str, handler: IrqHandler) {
        self.handlers.lock().unwrap().insert(line, handler);
    }

    fn ack(&self, line: u8) {
        self.acks.lock().unwrap().push(line);
    }

    fn enable(&self) {
        self.interrupts_enabled.store(true, Ordering::SeqCst);
        self.irq_enable_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.interrupts_enabled.store(false, Ordering::SeqCst);
    }
}

impl Vfs for TestMachine {
    fn mount(&self, path: &str, node: Arc<dyn BlockDevice>) {
        self.mounts.lock().unwrap().push((path.to_string(), node));
    }
}
