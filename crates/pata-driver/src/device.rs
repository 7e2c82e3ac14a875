//! Channel register access and the per-device state machine: soft reset,
//! status polling, signature detection and the IDENTIFY sequence.

use tracing::{debug, info};

use crate::error::{AtaError, Result};
use crate::hal::{DmaRegion, PortIo};
use crate::identify::IdentifyBlock;
use crate::regs::*;

/// Legacy channel position. IRQ 14 serves the primary channel, IRQ 15 the
/// secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Secondary,
}

impl Channel {
    pub fn irq_line(self) -> u8 {
        match self {
            Channel::Primary => 14,
            Channel::Secondary => 15,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Primary => 0,
            Channel::Secondary => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Pata,
    Atapi,
}

/// Outcome of reading the channel signature after soft reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signature {
    Absent,
    Pata,
    Atapi,
    Unknown(u8, u8),
}

/// Bus-master DMA resources for one PATA device: the single-entry PRD table,
/// the 4 KiB bounce buffer, and the channel's BMIDE register block base.
pub(crate) struct DmaResources {
    pub(crate) prdt: Box<dyn DmaRegion>,
    pub(crate) buffer: Box<dyn DmaRegion>,
    pub(crate) bm_base: u16,
}

/// ATAPI medium geometry learned from READ CAPACITY. A zero `last_lba`
/// means no medium is present.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AtapiCapacity {
    pub(crate) last_lba: u32,
    pub(crate) sector_size: u32,
}

/// One (channel, position) slot. Built during probe, immutable afterwards.
pub struct IdeDevice {
    pub(crate) channel: Channel,
    pub(crate) io_base: u16,
    pub(crate) control: u16,
    pub(crate) slave: bool,
    pub(crate) kind: DeviceKind,
    pub(crate) identify: IdentifyBlock,
    pub(crate) dma: Option<DmaResources>,
    pub(crate) atapi: Option<AtapiCapacity>,
}

impl IdeDevice {
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        self.identify.model()
    }

    /// Device capacity in bytes; zero for an ATAPI drive without a medium.
    pub fn capacity_bytes(&self) -> u64 {
        match self.kind {
            DeviceKind::Pata => self.identify.sectors() * ATA_SECTOR_SIZE as u64,
            DeviceKind::Atapi => match self.atapi {
                Some(cap) if cap.last_lba != 0 => {
                    (u64::from(cap.last_lba) + 1) * u64::from(cap.sector_size)
                }
                _ => 0,
            },
        }
    }

    /// Block size used by the byte-range adapter: 512 for disks, the probed
    /// size (usually 2048) for ATAPI media.
    pub fn sector_size(&self) -> u32 {
        match self.kind {
            DeviceKind::Pata => ATA_SECTOR_SIZE as u32,
            DeviceKind::Atapi => self
                .atapi
                .map(|cap| cap.sector_size)
                .filter(|&s| s != 0)
                .unwrap_or(2048),
        }
    }
}

/// Typed wrapper over one channel's command and control blocks.
///
/// All register access funnels through here; the only timing primitive is
/// `io_wait`, four reads of the alternate status register (~400 ns) to let
/// the device latch a register write.
pub(crate) struct ChannelIo<'a> {
    io: &'a dyn PortIo,
    pub(crate) io_base: u16,
    pub(crate) control: u16,
}

impl<'a> ChannelIo<'a> {
    pub(crate) fn new(io: &'a dyn PortIo, io_base: u16, control: u16) -> Self {
        Self {
            io,
            io_base,
            control,
        }
    }

    pub(crate) fn write_reg(&self, reg: u16, value: u8) {
        self.io.outb(self.io_base + reg, value);
    }

    pub(crate) fn read_reg(&self, reg: u16) -> u8 {
        self.io.inb(self.io_base + reg)
    }

    pub(crate) fn status(&self) -> u8 {
        self.read_reg(ATA_REG_STATUS)
    }

    pub(crate) fn write_control(&self, value: u8) {
        self.io.outb(self.control, value);
    }

    pub(crate) fn read_data(&self) -> u16 {
        self.io.inw(self.io_base + ATA_REG_DATA)
    }

    pub(crate) fn write_data(&self, value: u16) {
        self.io.outw(self.io_base + ATA_REG_DATA, value);
    }

    /// ~400 ns settle: four alternate-status reads.
    pub(crate) fn io_wait(&self) {
        for _ in 0..4 {
            let _ = self.io.inb(self.control);
        }
    }

    /// Poll until BSY clears. With a cap, gives up after `cap` iterations
    /// and returns the last observed status either way.
    pub(crate) fn status_wait(&self, cap: Option<u32>) -> u8 {
        match cap {
            Some(cap) => {
                let mut status = self.status();
                let mut i = 0;
                while status & ATA_SR_BSY != 0 && i < cap {
                    status = self.status();
                    i += 1;
                }
                status
            }
            None => loop {
                let status = self.status();
                if status & ATA_SR_BSY == 0 {
                    return status;
                }
            },
        }
    }

    /// Settle, then wait out BSY.
    pub(crate) fn wait(&self) {
        self.io_wait();
        self.status_wait(None);
    }

    /// `wait`, then re-read status and decode: ERR and DF are failures, and
    /// DRQ must be asserted because data is expected next.
    pub(crate) fn wait_data(&self) -> Result<()> {
        self.wait();
        let status = self.status();
        if status & ATA_SR_ERR != 0 {
            let error = self.read_reg(ATA_REG_FEATURES);
            return Err(AtaError::DeviceError { status, error });
        }
        if status & ATA_SR_DF != 0 {
            return Err(AtaError::DeviceFault { status });
        }
        if status & ATA_SR_DRQ == 0 {
            return Err(AtaError::NoDrq { status });
        }
        Ok(())
    }

    /// Decode a completed command's status: ERR and DF are failures.
    pub(crate) fn check_error(&self) -> Result<()> {
        let status = self.status();
        if status & ATA_SR_ERR != 0 {
            let error = self.read_reg(ATA_REG_FEATURES);
            return Err(AtaError::DeviceError { status, error });
        }
        if status & ATA_SR_DF != 0 {
            return Err(AtaError::DeviceFault { status });
        }
        Ok(())
    }

    /// Pulse SRST on the device-control register, resetting both drives on
    /// the channel.
    pub(crate) fn soft_reset(&self) {
        self.write_control(ATA_CTRL_SRST);
        self.io_wait();
        self.write_control(0x00);
    }

    /// Soft reset, select the drive, then read the channel signature.
    pub(crate) fn detect(&self, slave: bool) -> Signature {
        self.soft_reset();
        self.io_wait();
        self.write_reg(ATA_REG_HDDEVSEL, 0xA0 | (slave as u8) << 4);
        self.io_wait();
        self.status_wait(Some(10_000));

        let lba1 = self.read_reg(ATA_REG_LBA1);
        let lba2 = self.read_reg(ATA_REG_LBA2);
        debug!(io_base = self.io_base, lba1, lba2, "channel signature");

        match (lba1, lba2) {
            SIG_ABSENT => Signature::Absent,
            SIG_PATA | SIG_SATA => Signature::Pata,
            SIG_ATAPI | SIG_SATAPI => Signature::Atapi,
            (lo, hi) => Signature::Unknown(lo, hi),
        }
    }

    /// Issue IDENTIFY (disks) or IDENTIFY PACKET (ATAPI) and pull in the
    /// 256-word response.
    pub(crate) fn identify(&self, slave: bool, kind: DeviceKind) -> IdentifyBlock {
        self.write_reg(ATA_REG_FEATURES, 1);
        self.write_control(0);

        self.write_reg(ATA_REG_HDDEVSEL, 0xA0 | (slave as u8) << 4);
        self.io_wait();

        let command = match kind {
            DeviceKind::Pata => ATA_CMD_IDENTIFY,
            DeviceKind::Atapi => ATA_CMD_IDENTIFY_PACKET,
        };
        self.write_reg(ATA_REG_COMMAND, command);
        self.io_wait();

        let status = self.status();
        debug!(io_base = self.io_base, status, "identify issued");
        self.wait();

        let mut words = [0u16; 256];
        for word in words.iter_mut() {
            *word = self.read_data();
        }

        let block = IdentifyBlock::from_words(words);
        info!(
            io_base = self.io_base,
            slave,
            model = block.model(),
            sectors_28 = block.sectors_28(),
            sectors_48 = block.sectors_48(),
            "identified device"
        );
        block
    }
}
