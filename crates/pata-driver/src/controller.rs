//! Controller lifecycle: PCI discovery, IRQ wiring, the four-slot legacy
//! probe, and node publication.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info, warn};

use crate::blockdev::{AtaNode, AtapiNode};
use crate::device::{
    AtapiCapacity, Channel, ChannelIo, DeviceKind, DmaResources, IdeDevice, Signature,
};
use crate::hal::{DmaAllocator, IrqServices, PciAddress, PciConfigAccess, PortIo, Vfs};
use crate::regs::*;
use crate::sync::IrqEvent;

/// Canonical legacy port assignments for a channel.
fn channel_ports(channel: Channel) -> (u16, u16) {
    match channel {
        Channel::Primary => (0x1F0, 0x3F6),
        Channel::Secondary => (0x170, 0x376),
    }
}

#[derive(Debug, Clone)]
pub struct IdeControllerConfig {
    /// Arm Bus Master DMA for disks when the controller advertises an I/O
    /// BAR4. With this off every disk uses PIO.
    pub enable_dma: bool,
    /// Write-then-verify attempts before a write surfaces as failed.
    pub write_verify_attempts: u32,
    /// Extra attempts for a failed sector read before the error surfaces.
    pub read_retry_attempts: u32,
}

impl Default for IdeControllerConfig {
    fn default() -> Self {
        Self {
            enable_dma: true,
            write_verify_attempts: 8,
            read_retry_attempts: 4,
        }
    }
}

/// Driver instance. One per machine; owns the transfer lock, the channel
/// completions, and every probed device.
pub struct IdeController {
    pub(crate) io: Arc<dyn PortIo>,
    pci: Arc<dyn PciConfigAccess>,
    dma: Arc<dyn DmaAllocator>,
    pub(crate) irq: Arc<dyn IrqServices>,
    pub(crate) config: IdeControllerConfig,

    /// Serializes every hardware transaction across all four devices.
    pub(crate) ata_lock: Mutex<()>,
    /// Per-channel IRQ completions (primary, secondary).
    pub(crate) events: [IrqEvent; 2],

    ata_pci: OnceLock<PciAddress>,
    next_disk: AtomicU8,
    next_cdrom: AtomicU8,
    devices: Mutex<Vec<Arc<IdeDevice>>>,
}

impl IdeController {
    /// Bring the driver up: locate the PCI function, install the channel
    /// IRQ handlers, probe the four legacy slots and publish a node for
    /// every drive found.
    ///
    /// There is no teardown; the returned controller lives for the rest of
    /// the process.
    pub fn initialize(
        io: Arc<dyn PortIo>,
        pci: Arc<dyn PciConfigAccess>,
        dma: Arc<dyn DmaAllocator>,
        irq: Arc<dyn IrqServices>,
        vfs: Arc<dyn Vfs>,
        config: IdeControllerConfig,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            io,
            pci,
            dma,
            irq,
            config,
            ata_lock: Mutex::new(()),
            events: [IrqEvent::new(), IrqEvent::new()],
            ata_pci: OnceLock::new(),
            next_disk: AtomicU8::new(0),
            next_cdrom: AtomicU8::new(0),
            devices: Mutex::new(Vec::new()),
        });

        let mut found = None;
        controller.pci.scan(&mut |addr, vendor, device| {
            if vendor == PCI_VENDOR_INTEL
                && (device == PCI_DEVICE_PIIX_IDE || device == PCI_DEVICE_PIIX3_IDE)
            {
                found = Some(addr);
            }
        });
        match found {
            Some(addr) => {
                info!(address = addr.0, "IDE controller found");
                let _ = controller.ata_pci.set(addr);
            }
            None => warn!("no PIIX IDE function on the PCI bus; DMA unavailable"),
        }

        for channel in [Channel::Primary, Channel::Secondary] {
            let handler = {
                let controller = Arc::clone(&controller);
                Arc::new(move || controller.handle_irq(channel))
            };
            let name = match channel {
                Channel::Primary => "ide primary",
                Channel::Secondary => "ide secondary",
            };
            controller
                .irq
                .install_handler(channel.irq_line(), name, handler);
        }

        for (channel, slave) in [
            (Channel::Primary, false),
            (Channel::Primary, true),
            (Channel::Secondary, false),
            (Channel::Secondary, true),
        ] {
            controller.probe_slot(&vfs, channel, slave);
        }

        controller
    }

    /// Every device the probe published, in discovery order.
    pub fn devices(&self) -> Vec<Arc<IdeDevice>> {
        self.devices.lock().unwrap().clone()
    }

    /// Channel interrupt entry point. Reads the status register (which
    /// acknowledges the device), wakes a parked packet caller if one is
    /// armed, and acks the line. Anything else is a stray interrupt and is
    /// absorbed here.
    pub fn handle_irq(&self, channel: Channel) {
        let (io_base, _) = channel_ports(channel);
        let _ = self.io.inb(io_base + ATA_REG_STATUS);
        self.events[channel.index()].signal();
        self.irq.ack(channel.irq_line());
    }

    pub(crate) fn channel_io(&self, dev: &IdeDevice) -> ChannelIo<'_> {
        ChannelIo::new(&*self.io, dev.io_base, dev.control)
    }

    fn probe_slot(self: &Arc<Self>, vfs: &Arc<dyn Vfs>, channel: Channel, slave: bool) {
        let (io_base, control) = channel_ports(channel);
        let ch = ChannelIo::new(&*self.io, io_base, control);

        match ch.detect(slave) {
            Signature::Absent => {
                debug!(io_base, slave, "no device");
            }
            Signature::Unknown(lba1, lba2) => {
                warn!(io_base, slave, lba1, lba2, "unrecognized device signature, skipping");
            }
            Signature::Pata => {
                let identify = ch.identify(slave, DeviceKind::Pata);
                let dma = if self.config.enable_dma {
                    self.dma_init(channel)
                } else {
                    None
                };
                let device = Arc::new(IdeDevice {
                    channel,
                    io_base,
                    control,
                    slave,
                    kind: DeviceKind::Pata,
                    identify,
                    dma,
                    atapi: None,
                });

                let index = self.next_disk.fetch_add(1, Ordering::SeqCst);
                let letter = (b'a' + index) as char;
                let path = format!("/dev/hd{letter}");
                let node = Arc::new(AtaNode {
                    name: format!("atadev{index}"),
                    controller: Arc::clone(self),
                    device: Arc::clone(&device),
                });
                info!(
                    path = %path,
                    model = device.model(),
                    bytes = device.capacity_bytes(),
                    dma = device.dma.is_some(),
                    "disk attached"
                );
                vfs.mount(&path, node);
                self.devices.lock().unwrap().push(device);
            }
            Signature::Atapi => {
                let identify = ch.identify(slave, DeviceKind::Atapi);
                let capacity = match self.atapi_read_capacity(&ch, slave) {
                    Ok(capacity) => {
                        if capacity.last_lba == 0 {
                            warn!(io_base, slave, "ATAPI drive has no medium");
                        }
                        capacity
                    }
                    Err(err) => {
                        warn!(io_base, slave, %err, "ATAPI capacity probe failed");
                        AtapiCapacity::default()
                    }
                };
                let device = Arc::new(IdeDevice {
                    channel,
                    io_base,
                    control,
                    slave,
                    kind: DeviceKind::Atapi,
                    identify,
                    dma: None,
                    atapi: Some(capacity),
                });

                let index = self.next_cdrom.fetch_add(1, Ordering::SeqCst);
                let path = format!("/dev/cdrom{index}");
                let node = Arc::new(AtapiNode {
                    name: format!("cdrom{index}"),
                    controller: Arc::clone(self),
                    device: Arc::clone(&device),
                });
                info!(
                    path = %path,
                    model = device.model(),
                    bytes = device.capacity_bytes(),
                    "optical drive attached"
                );
                vfs.mount(&path, node);
                self.devices.lock().unwrap().push(device);
            }
        }
    }

    /// Per-device Bus Master setup: allocate the PRD table and bounce
    /// buffer, enable PCI bus mastering, and decode BAR4 into the channel's
    /// BMIDE register block. Any failure degrades the device to PIO.
    fn dma_init(&self, channel: Channel) -> Option<DmaResources> {
        let addr = *self.ata_pci.get()?;

        let prdt = match self.dma.alloc(8) {
            Ok(region) => region,
            Err(err) => {
                warn!(%err, "PRDT allocation failed; using PIO");
                return None;
            }
        };
        let buffer = match self.dma.alloc(4096) {
            Ok(region) => region,
            Err(err) => {
                warn!(%err, "DMA buffer allocation failed; using PIO");
                return None;
            }
        };

        // Single PRD entry: the bounce buffer, one sector, end of table.
        let mut entry = [0u8; 8];
        entry[0..4].copy_from_slice(&buffer.phys_addr().to_le_bytes());
        entry[4..6].copy_from_slice(&(ATA_SECTOR_SIZE as u16).to_le_bytes());
        entry[6..8].copy_from_slice(&PRD_END_OF_TABLE.to_le_bytes());
        prdt.write(0, &entry);

        let command = self.pci.read_u32(addr, PCI_COMMAND);
        if command & PCI_COMMAND_BUS_MASTER == 0 {
            debug!("enabling PCI bus mastering");
            self.pci
                .write_u32(addr, PCI_COMMAND, command | PCI_COMMAND_BUS_MASTER);
        }

        let bar4 = self.pci.read_u32(addr, PCI_BAR4);
        if bar4 & 0x1 == 0 {
            // Memory-mapped bus-master registers: nothing this driver can
            // program. Degrade to PIO instead of poking unknown ports.
            warn!(bar4, "BAR4 is not I/O space; using PIO");
            return None;
        }

        let base = (bar4 & 0xFFFF_FFFC) as u16;
        let bm_base = match channel {
            Channel::Primary => base,
            Channel::Secondary => base + BM_SECONDARY_OFFSET,
        };
        debug!(bm_base, "bus master armed");

        Some(DmaResources {
            prdt,
            buffer,
            bm_base,
        })
    }
}
