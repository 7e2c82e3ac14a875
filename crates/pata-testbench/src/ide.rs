//! Behavioral model of a PIIX3-compatible IDE controller: two channels with
//! taskfile/HOB shadows, PIO and Bus Master DMA data paths, and an ATAPI
//! packet engine.
//!
//! The model implements exactly the protocol surface a driver exercises,
//! plus a command/packet trace so tests can assert on the bus traffic.

use std::sync::Arc;

use pata_driver::regs::*;
use pata_driver::Channel;

use crate::mem::PhysMemory;

/// Default Bus Master register block base (BAR4).
pub const BM_BASE: u16 = 0xC000;

const ATA_SECTOR: usize = 512;
const ATAPI_SECTOR: usize = 2048;

/// Raw disk image with 512-byte sectors.
pub struct DiskImage {
    data: Vec<u8>,
}

impl DiskImage {
    pub fn new(sectors: u64) -> Self {
        Self {
            data: vec![0; sectors as usize * ATA_SECTOR],
        }
    }

    /// Build from raw bytes; the length must be sector aligned.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        assert!(data.len().is_multiple_of(ATA_SECTOR));
        Self { data }
    }

    pub fn sectors(&self) -> u64 {
        (self.data.len() / ATA_SECTOR) as u64
    }

    pub fn sector(&self, lba: u64) -> &[u8] {
        let start = lba as usize * ATA_SECTOR;
        &self.data[start..start + ATA_SECTOR]
    }

    pub fn sector_mut(&mut self, lba: u64) -> &mut [u8] {
        let start = lba as usize * ATA_SECTOR;
        &mut self.data[start..start + ATA_SECTOR]
    }

    fn read(&self, lba: u64, count: usize) -> Vec<u8> {
        let start = lba as usize * ATA_SECTOR;
        self.data[start..start + count * ATA_SECTOR].to_vec()
    }

    fn write(&mut self, lba: u64, data: &[u8]) {
        let start = lba as usize * ATA_SECTOR;
        self.data[start..start + data.len()].copy_from_slice(data);
    }
}

/// Optical medium with 2048-byte sectors.
pub struct IsoImage {
    data: Vec<u8>,
}

impl IsoImage {
    pub fn new(sectors: u32) -> Self {
        Self {
            data: vec![0; sectors as usize * ATAPI_SECTOR],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        assert!(data.len().is_multiple_of(ATAPI_SECTOR));
        Self { data }
    }

    pub fn sectors(&self) -> u32 {
        (self.data.len() / ATAPI_SECTOR) as u32
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        let start = lba as usize * ATAPI_SECTOR;
        &self.data[start..start + ATAPI_SECTOR]
    }

    pub fn sector_mut(&mut self, lba: u32) -> &mut [u8] {
        let start = lba as usize * ATAPI_SECTOR;
        &mut self.data[start..start + ATAPI_SECTOR]
    }
}

struct AtaDrive {
    disk: DiskImage,
    model: String,
    /// Fault injection: fail this many upcoming sector reads with UNC.
    fail_reads: u32,
    /// Fault injection: corrupt this many upcoming sector writes.
    corrupt_writes: u32,
}

struct AtapiDrive {
    iso: Option<IsoImage>,
    model: String,
}

enum Drive {
    Ata(AtaDrive),
    Atapi(AtapiDrive),
}

/// Shift registers of one channel, with the write-twice HOB shadows used by
/// 48-bit taskfile fills.
#[derive(Default)]
struct TaskFile {
    features: u8,
    sector_count: u8,
    lba0: u8,
    lba1: u8,
    lba2: u8,
    device: u8,

    hob_sector_count: u8,
    hob_lba0: u8,
    hob_lba1: u8,
    hob_lba2: u8,

    pending_sector_count: bool,
    pending_lba0: bool,
    pending_lba1: bool,
    pending_lba2: bool,
}

impl TaskFile {
    fn write_reg(&mut self, reg: u16, val: u8) {
        // The first write to a register lands in the HOB shadow; the second
        // commits the visible value. 28-bit commands fold lone writes back
        // into the visible registers via `normalize`.
        match reg {
            ATA_REG_FEATURES => self.features = val,
            ATA_REG_SECCOUNT0 => {
                if !self.pending_sector_count {
                    self.hob_sector_count = val;
                    self.pending_sector_count = true;
                } else {
                    self.sector_count = val;
                    self.pending_sector_count = false;
                }
            }
            ATA_REG_LBA0 => {
                if !self.pending_lba0 {
                    self.hob_lba0 = val;
                    self.pending_lba0 = true;
                } else {
                    self.lba0 = val;
                    self.pending_lba0 = false;
                }
            }
            ATA_REG_LBA1 => {
                if !self.pending_lba1 {
                    self.hob_lba1 = val;
                    self.pending_lba1 = true;
                } else {
                    self.lba1 = val;
                    self.pending_lba1 = false;
                }
            }
            ATA_REG_LBA2 => {
                if !self.pending_lba2 {
                    self.hob_lba2 = val;
                    self.pending_lba2 = true;
                } else {
                    self.lba2 = val;
                    self.pending_lba2 = false;
                }
            }
            ATA_REG_HDDEVSEL => self.device = val,
            _ => {}
        }
    }

    /// Commit pending lone writes into the visible registers for a
    /// non-48-bit command.
    fn normalize(&mut self) {
        if self.pending_sector_count {
            self.sector_count = self.hob_sector_count;
            self.pending_sector_count = false;
        }
        if self.pending_lba0 {
            self.lba0 = self.hob_lba0;
            self.pending_lba0 = false;
        }
        if self.pending_lba1 {
            self.lba1 = self.hob_lba1;
            self.pending_lba1 = false;
        }
        if self.pending_lba2 {
            self.lba2 = self.hob_lba2;
            self.pending_lba2 = false;
        }
    }

    fn lba28(&self) -> u64 {
        u64::from(self.device & 0x0F) << 24
            | u64::from(self.lba2) << 16
            | u64::from(self.lba1) << 8
            | u64::from(self.lba0)
    }

    fn count28(&self) -> u32 {
        match self.sector_count {
            0 => 256,
            n => u32::from(n),
        }
    }
}

#[derive(PartialEq, Eq)]
enum DataMode {
    None,
    PioIn,
    PioOut,
    PacketOut,
}

#[derive(Default)]
struct BusMaster {
    command: u8,
    status: u8,
    prdt_addr: u32,
}

const ST_DRDY: u8 = 0x40;
const ST_DRDY_DRQ: u8 = 0x48;
const ST_DRDY_ERR: u8 = 0x41;

struct EmChannel {
    irq_line: u8,
    drives: [Option<Drive>; 2],
    tf: TaskFile,
    status: u8,
    error: u8,
    /// Set after SRST: LBA1/LBA2 report the selected drive's signature.
    signature_mode: bool,
    mode: DataMode,
    data: Vec<u8>,
    data_index: usize,
    expected_out: usize,
    pio_write_lba: u64,
    pending_dma: Option<(u64, u32)>,
    irq_pending: bool,
    bm: BusMaster,
}

impl EmChannel {
    fn new(irq_line: u8) -> Self {
        Self {
            irq_line,
            drives: [None, None],
            tf: TaskFile::default(),
            status: ST_DRDY,
            error: 0,
            signature_mode: false,
            mode: DataMode::None,
            data: Vec::new(),
            data_index: 0,
            expected_out: 0,
            pio_write_lba: 0,
            pending_dma: None,
            irq_pending: false,
            bm: BusMaster::default(),
        }
    }

    fn selected_index(&self) -> usize {
        usize::from(self.tf.device & 0x10 != 0)
    }

    fn selected(&self) -> Option<&Drive> {
        self.drives[self.selected_index()].as_ref()
    }

    fn selected_mut(&mut self) -> Option<&mut Drive> {
        let idx = self.selected_index();
        self.drives[idx].as_mut()
    }

    fn reset(&mut self) {
        self.tf = TaskFile::default();
        self.status = ST_DRDY;
        self.error = 0;
        self.signature_mode = true;
        self.mode = DataMode::None;
        self.data.clear();
        self.data_index = 0;
        self.pending_dma = None;
        self.irq_pending = false;
    }

    fn signature(&self) -> (u8, u8) {
        match self.selected() {
            Some(Drive::Ata(_)) => SIG_PATA,
            Some(Drive::Atapi(_)) => SIG_ATAPI,
            None => SIG_ABSENT,
        }
    }

    fn abort(&mut self) {
        self.error = 0x04; // ABRT
        self.status = ST_DRDY_ERR;
        self.mode = DataMode::None;
    }

    fn start_pio_in(&mut self, data: Vec<u8>) {
        self.data = data;
        self.data_index = 0;
        self.mode = DataMode::PioIn;
        self.status = ST_DRDY_DRQ;
    }
}

/// Issued-command record: which channel, which opcode.
pub type CommandRecord = (Channel, u8);

pub struct EmulatedIde {
    channels: [EmChannel; 2],
    phys: Arc<PhysMemory>,
    pub(crate) pci_command: u32,
    pub(crate) bar4: u32,
    raised: Vec<u8>,
    command_log: Vec<CommandRecord>,
    packet_log: Vec<(Channel, [u8; 12])>,
}

enum PortKind {
    Cmd(u16),
    Ctrl,
    BusMaster(u16),
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Primary => 0,
        Channel::Secondary => 1,
    }
}

fn channel_of(index: usize) -> Channel {
    if index == 0 {
        Channel::Primary
    } else {
        Channel::Secondary
    }
}

impl EmulatedIde {
    pub fn new(phys: Arc<PhysMemory>, bar4: u32) -> Self {
        Self {
            channels: [EmChannel::new(14), EmChannel::new(15)],
            phys,
            pci_command: 0x0001,
            bar4,
            raised: Vec::new(),
            command_log: Vec::new(),
            packet_log: Vec::new(),
        }
    }

    pub fn attach_ata(&mut self, channel: Channel, slave: bool, disk: DiskImage, model: &str) {
        self.channels[channel_index(channel)].drives[usize::from(slave)] =
            Some(Drive::Ata(AtaDrive {
                disk,
                model: model.to_string(),
                fail_reads: 0,
                corrupt_writes: 0,
            }));
    }

    pub fn attach_atapi(
        &mut self,
        channel: Channel,
        slave: bool,
        iso: Option<IsoImage>,
        model: &str,
    ) {
        self.channels[channel_index(channel)].drives[usize::from(slave)] =
            Some(Drive::Atapi(AtapiDrive {
                iso,
                model: model.to_string(),
            }));
    }

    pub fn inject_read_errors(&mut self, channel: Channel, slave: bool, count: u32) {
        if let Some(Drive::Ata(drive)) =
            self.channels[channel_index(channel)].drives[usize::from(slave)].as_mut()
        {
            drive.fail_reads = count;
        }
    }

    pub fn corrupt_writes(&mut self, channel: Channel, slave: bool, count: u32) {
        if let Some(Drive::Ata(drive)) =
            self.channels[channel_index(channel)].drives[usize::from(slave)].as_mut()
        {
            drive.corrupt_writes = count;
        }
    }

    pub fn with_disk<R>(
        &mut self,
        channel: Channel,
        slave: bool,
        f: impl FnOnce(&mut DiskImage) -> R,
    ) -> Option<R> {
        match self.channels[channel_index(channel)].drives[usize::from(slave)].as_mut() {
            Some(Drive::Ata(drive)) => Some(f(&mut drive.disk)),
            _ => None,
        }
    }

    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.command_log.clone()
    }

    pub fn packet_log(&self) -> Vec<(Channel, [u8; 12])> {
        self.packet_log.clone()
    }

    pub fn clear_logs(&mut self) {
        self.command_log.clear();
        self.packet_log.clear();
    }

    pub fn irq_pending(&self, channel: Channel) -> bool {
        self.channels[channel_index(channel)].irq_pending
    }

    pub fn take_raised(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.raised)
    }

    fn decode(&self, port: u16) -> Option<(usize, PortKind)> {
        match port {
            0x1F0..=0x1F7 => Some((0, PortKind::Cmd(port - 0x1F0))),
            0x3F6 => Some((0, PortKind::Ctrl)),
            0x170..=0x177 => Some((1, PortKind::Cmd(port - 0x170))),
            0x376 => Some((1, PortKind::Ctrl)),
            p => {
                if self.bar4 & 0x1 == 0 {
                    return None;
                }
                let bm_base = (self.bar4 & 0xFFFF_FFFC) as u16;
                if (bm_base..bm_base + 16).contains(&p) {
                    let offset = p - bm_base;
                    Some((usize::from(offset >= 8), PortKind::BusMaster(offset % 8)))
                } else {
                    None
                }
            }
        }
    }

    pub fn read8(&mut self, port: u16) -> u8 {
        let Some((idx, kind)) = self.decode(port) else {
            return 0xFF;
        };
        let ch = &mut self.channels[idx];
        match kind {
            PortKind::Cmd(reg) => {
                if ch.selected().is_none() {
                    return 0xFF;
                }
                match reg {
                    ATA_REG_STATUS => {
                        ch.irq_pending = false;
                        ch.status
                    }
                    ATA_REG_FEATURES => ch.error,
                    ATA_REG_SECCOUNT0 => ch.tf.sector_count,
                    ATA_REG_LBA0 => ch.tf.lba0,
                    ATA_REG_LBA1 => {
                        if ch.signature_mode {
                            ch.signature().0
                        } else {
                            ch.tf.lba1
                        }
                    }
                    ATA_REG_LBA2 => {
                        if ch.signature_mode {
                            ch.signature().1
                        } else {
                            ch.tf.lba2
                        }
                    }
                    ATA_REG_HDDEVSEL => ch.tf.device,
                    _ => 0,
                }
            }
            PortKind::Ctrl => {
                // Alternate status: same byte, no IRQ acknowledge.
                if ch.selected().is_none() {
                    0xFF
                } else {
                    ch.status
                }
            }
            PortKind::BusMaster(offset) => match offset {
                BM_REG_COMMAND => ch.bm.command,
                BM_REG_STATUS => ch.bm.status,
                _ => 0,
            },
        }
    }

    pub fn write8(&mut self, port: u16, val: u8) {
        let Some((idx, kind)) = self.decode(port) else {
            return;
        };
        match kind {
            PortKind::Cmd(reg) => match reg {
                ATA_REG_COMMAND => self.command(idx, val),
                ATA_REG_HDDEVSEL => self.channels[idx].tf.write_reg(reg, val),
                _ => {
                    let ch = &mut self.channels[idx];
                    ch.signature_mode = false;
                    ch.tf.write_reg(reg, val);
                }
            },
            PortKind::Ctrl => {
                if val & ATA_CTRL_SRST != 0 {
                    self.channels[idx].reset();
                }
                // nIEN is accepted silently; the interrupt condition is
                // latched regardless and delivery gating is the machine's
                // concern.
            }
            PortKind::BusMaster(offset) => self.bm_write8(idx, offset, val),
        }
    }

    pub fn read16(&mut self, port: u16) -> u16 {
        let Some((idx, PortKind::Cmd(ATA_REG_DATA))) = self.decode(port) else {
            return 0xFFFF;
        };
        let ch = &mut self.channels[idx];
        if ch.mode != DataMode::PioIn || ch.data_index + 2 > ch.data.len() {
            return 0xFFFF;
        }
        let word = u16::from_le_bytes([ch.data[ch.data_index], ch.data[ch.data_index + 1]]);
        ch.data_index += 2;
        if ch.data_index >= ch.data.len() {
            // Data phase complete; move to the status phase.
            ch.mode = DataMode::None;
            ch.status = ST_DRDY;
            ch.irq_pending = true;
            self.raised.push(ch.irq_line);
        }
        word
    }

    pub fn write16(&mut self, port: u16, val: u16) {
        let Some((idx, PortKind::Cmd(ATA_REG_DATA))) = self.decode(port) else {
            return;
        };
        let ch = &mut self.channels[idx];
        match ch.mode {
            DataMode::PacketOut => {
                ch.data.extend_from_slice(&val.to_le_bytes());
                if ch.data.len() == 12 {
                    let mut packet = [0u8; 12];
                    packet.copy_from_slice(&ch.data);
                    ch.data.clear();
                    ch.mode = DataMode::None;
                    self.packet_log.push((channel_of(idx), packet));
                    self.handle_packet(idx, packet);
                }
            }
            DataMode::PioOut => {
                ch.data.extend_from_slice(&val.to_le_bytes());
                if ch.data.len() >= ch.expected_out {
                    let lba = ch.pio_write_lba;
                    let mut data = std::mem::take(&mut ch.data);
                    ch.mode = DataMode::None;
                    ch.status = ST_DRDY;
                    ch.irq_pending = true;
                    let line = ch.irq_line;
                    if let Some(Drive::Ata(drive)) = ch.selected_mut() {
                        if drive.corrupt_writes > 0 {
                            drive.corrupt_writes -= 1;
                            data[0] ^= 0xFF;
                        }
                        drive.disk.write(lba, &data);
                    }
                    self.raised.push(line);
                }
            }
            _ => {}
        }
    }

    pub fn write32(&mut self, port: u16, val: u32) {
        if let Some((idx, PortKind::BusMaster(BM_REG_PRDT))) = self.decode(port) {
            self.channels[idx].bm.prdt_addr = val & 0xFFFF_FFFC;
        }
    }

    fn command(&mut self, idx: usize, opcode: u8) {
        if self.channels[idx].selected().is_none() {
            return;
        }
        self.command_log.push((channel_of(idx), opcode));

        enum Outcome {
            DataIn(Vec<u8>),
            ReadFault,
            StartWrite,
            StartPacket,
            Flush,
            DmaPending,
            Abort,
        }

        let ch = &mut self.channels[idx];
        ch.signature_mode = false;
        ch.error = 0;
        ch.tf.normalize();

        let outcome = {
            let lba = ch.tf.lba28();
            let count = ch.tf.count28() as usize;
            match (opcode, ch.selected_mut().unwrap()) {
                (ATA_CMD_IDENTIFY, Drive::Ata(drive)) => Outcome::DataIn(words_to_bytes(
                    &ata_identify_words(&drive.model, drive.disk.sectors()),
                )),
                (ATA_CMD_IDENTIFY_PACKET, Drive::Atapi(drive)) => {
                    Outcome::DataIn(words_to_bytes(&atapi_identify_words(&drive.model)))
                }
                (ATA_CMD_READ_PIO, Drive::Ata(drive)) => {
                    if drive.fail_reads > 0 {
                        drive.fail_reads -= 1;
                        Outcome::ReadFault
                    } else {
                        Outcome::DataIn(drive.disk.read(lba, count))
                    }
                }
                (ATA_CMD_WRITE_PIO, Drive::Ata(_)) => Outcome::StartWrite,
                (ATA_CMD_CACHE_FLUSH, Drive::Ata(_)) => Outcome::Flush,
                (ATA_CMD_READ_DMA, Drive::Ata(_)) => Outcome::DmaPending,
                (ATA_CMD_PACKET, Drive::Atapi(_)) => Outcome::StartPacket,
                _ => Outcome::Abort,
            }
        };

        match outcome {
            Outcome::DataIn(data) => {
                ch.start_pio_in(data);
                ch.irq_pending = true;
                self.raised.push(ch.irq_line);
            }
            Outcome::ReadFault => {
                ch.error = 0x40; // UNC
                ch.status = ST_DRDY_ERR;
                ch.irq_pending = true;
                self.raised.push(ch.irq_line);
            }
            Outcome::StartWrite => {
                ch.pio_write_lba = ch.tf.lba28();
                ch.expected_out = ch.tf.count28() as usize * ATA_SECTOR;
                ch.data.clear();
                ch.mode = DataMode::PioOut;
                ch.status = ST_DRDY_DRQ;
            }
            Outcome::StartPacket => {
                ch.data.clear();
                ch.mode = DataMode::PacketOut;
                ch.status = ST_DRDY_DRQ;
            }
            Outcome::Flush => {
                ch.status = ST_DRDY;
                ch.irq_pending = true;
                self.raised.push(ch.irq_line);
            }
            Outcome::DmaPending => {
                ch.pending_dma = Some((ch.tf.lba28(), ch.tf.count28()));
                ch.status = ST_DRDY;
            }
            Outcome::Abort => ch.abort(),
        }
    }

    fn handle_packet(&mut self, idx: usize, packet: [u8; 12]) {
        enum Outcome {
            DataIn(Vec<u8>),
            Error(u8),
        }

        let ch = &mut self.channels[idx];
        let outcome = {
            let iso = match ch.selected().unwrap() {
                Drive::Atapi(drive) => drive.iso.as_ref(),
                Drive::Ata(_) => None,
            };
            match packet[0] {
                ATAPI_CMD_READ_CAPACITY => {
                    let (last_lba, block_size): (u32, u32) = match iso {
                        Some(iso) => (iso.sectors() - 1, ATAPI_SECTOR as u32),
                        None => (0, 0),
                    };
                    let mut data = Vec::with_capacity(8);
                    data.extend_from_slice(&last_lba.to_be_bytes());
                    data.extend_from_slice(&block_size.to_be_bytes());
                    Outcome::DataIn(data)
                }
                ATAPI_CMD_READ_12 => match iso {
                    None => Outcome::Error(0x02), // not ready
                    Some(iso) => {
                        let lba = u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]);
                        let blocks =
                            u32::from_be_bytes([packet[6], packet[7], packet[8], packet[9]]);
                        if lba + blocks > iso.sectors() {
                            Outcome::Error(0x04)
                        } else {
                            let mut data = Vec::new();
                            for block in lba..lba + blocks {
                                data.extend_from_slice(iso.sector(block));
                            }
                            Outcome::DataIn(data)
                        }
                    }
                },
                _ => Outcome::Error(0x04),
            }
        };

        match outcome {
            Outcome::DataIn(data) => {
                // Advertise the data-phase byte count through LBA1/LBA2.
                let bytes = data.len() as u16;
                ch.tf.lba1 = bytes as u8;
                ch.tf.lba2 = (bytes >> 8) as u8;
                ch.start_pio_in(data);
            }
            Outcome::Error(code) => {
                ch.error = code;
                ch.status = ST_DRDY_ERR;
                ch.mode = DataMode::None;
            }
        }
        ch.irq_pending = true;
        self.raised.push(ch.irq_line);
    }

    fn bm_write8(&mut self, idx: usize, offset: u16, val: u8) {
        match offset {
            BM_REG_COMMAND => {
                self.channels[idx].bm.command = val & 0x09;
                if val & BM_CMD_START != 0 {
                    self.run_dma(idx);
                }
            }
            BM_REG_STATUS => {
                // IRQ and error bits are write-one-to-clear.
                self.channels[idx].bm.status &= !(val & 0x06);
            }
            _ => {}
        }
    }

    fn run_dma(&mut self, idx: usize) {
        if self.pci_command & PCI_COMMAND_BUS_MASTER == 0 {
            return;
        }
        {
            let ch = &self.channels[idx];
            if ch.bm.command & BM_CMD_READ == 0 || ch.pending_dma.is_none() {
                // Memory -> device transfers are never issued by this
                // driver; a start without a pending command just spins the
                // engine.
                return;
            }
        }

        let ch = &mut self.channels[idx];
        let (lba, count) = ch.pending_dma.take().unwrap();

        let data = {
            match ch.selected_mut() {
                Some(Drive::Ata(drive)) => {
                    if drive.fail_reads > 0 {
                        drive.fail_reads -= 1;
                        None
                    } else {
                        Some(drive.disk.read(lba, count as usize))
                    }
                }
                _ => return,
            }
        };

        let Some(data) = data else {
            ch.error = 0x40; // UNC
            ch.status = ST_DRDY_ERR;
            ch.bm.status |= BM_STATUS_IRQ | BM_STATUS_ERR;
            ch.bm.command &= !BM_CMD_START;
            ch.irq_pending = true;
            self.raised.push(ch.irq_line);
            return;
        };

        // Walk the PRD table, scattering the transfer into physical memory.
        let mut prd = ch.bm.prdt_addr;
        let mut copied = 0usize;
        loop {
            let addr = self.phys.read_u32(prd);
            let raw_count = self.phys.read_u16(prd + 4);
            let flags = self.phys.read_u16(prd + 6);
            let entry_len = if raw_count == 0 {
                65536
            } else {
                raw_count as usize
            };

            let chunk = entry_len.min(data.len() - copied);
            self.phys.write(addr, &data[copied..copied + chunk]);
            copied += chunk;

            if flags & PRD_END_OF_TABLE != 0 || copied == data.len() {
                break;
            }
            prd += 8;
        }

        if copied < data.len() {
            ch.bm.status |= BM_STATUS_ERR;
        }
        ch.bm.status |= BM_STATUS_IRQ;
        ch.bm.command &= !BM_CMD_START;
        ch.status = ST_DRDY;
        ch.irq_pending = true;
        self.raised.push(ch.irq_line);
    }
}

fn words_to_bytes(words: &[u16; 256]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(512);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// IDENTIFY DEVICE words: model in 27..46 (byte-swapped pairs), 28-bit
/// capacity in 60-61, 48-bit capacity in 100-103.
fn ata_identify_words(model: &str, sectors: u64) -> [u16; 256] {
    let mut words = [0u16; 256];
    words[0] = 0x0040;
    fill_model(&mut words, model);
    words[60] = sectors as u16;
    words[61] = (sectors >> 16) as u16;
    words[100] = sectors as u16;
    words[101] = (sectors >> 16) as u16;
    words[102] = (sectors >> 32) as u16;
    words[103] = (sectors >> 48) as u16;
    words
}

/// IDENTIFY PACKET DEVICE words: ATAPI device class, model string only.
fn atapi_identify_words(model: &str) -> [u16; 256] {
    let mut words = [0u16; 256];
    words[0] = 0x8581;
    fill_model(&mut words, model);
    words
}

fn fill_model(words: &mut [u16; 256], model: &str) {
    let mut padded = [b' '; 40];
    let n = model.len().min(40);
    padded[..n].copy_from_slice(&model.as_bytes()[..n]);
    for (i, pair) in padded.chunks_exact(2).enumerate() {
        words[27 + i] = u16::from(pair[0]) << 8 | u16::from(pair[1]);
    }
}
