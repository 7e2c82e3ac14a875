//! ATAPI packet transport: 12-byte SCSI commands tunneled through the ATA
//! PACKET command, capacity probing, and the IRQ-synchronized sector read.

use tracing::{debug, warn};

use crate::controller::IdeController;
use crate::device::{AtapiCapacity, ChannelIo, IdeDevice};
use crate::error::{AtaError, Result};
use crate::regs::*;

/// 12-byte packet, pushed to the data port as six little-endian words.
fn push_packet(ch: &ChannelIo<'_>, packet: &[u8; 12]) {
    for pair in packet.chunks_exact(2) {
        ch.write_data(u16::from(pair[0]) | u16::from(pair[1]) << 8);
    }
}

/// Poll until ERR, or until BSY clears with any of `ready_bits` set.
fn poll_ready(ch: &ChannelIo<'_>, ready_bits: u8) -> Result<u8> {
    loop {
        let status = ch.status();
        if status & ATA_SR_ERR != 0 {
            return Err(AtaError::PacketError { status });
        }
        if status & ATA_SR_BSY == 0 && status & ready_bits != 0 {
            return Ok(status);
        }
    }
}

impl IdeController {
    /// READ CAPACITY(10) probe, run once at init after IDENTIFY PACKET.
    ///
    /// A zero last-LBA means no medium; the caller still publishes the node
    /// and reads against it return nothing.
    pub(crate) fn atapi_read_capacity(
        &self,
        ch: &ChannelIo<'_>,
        slave: bool,
    ) -> Result<AtapiCapacity> {
        ch.write_reg(ATA_REG_HDDEVSEL, 0xA0 | (slave as u8) << 4);
        ch.io_wait();

        // Byte-count limit for the response window.
        ch.write_reg(ATA_REG_FEATURES, 0x00);
        ch.write_reg(ATA_REG_LBA1, 0x08);
        ch.write_reg(ATA_REG_LBA2, 0x08);
        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_PACKET);

        poll_ready(ch, ATA_SR_DRDY)?;

        let mut packet = [0u8; 12];
        packet[0] = ATAPI_CMD_READ_CAPACITY;
        push_packet(ch, &packet);

        poll_ready(ch, ATA_SR_DRDY | ATA_SR_DRQ)?;

        let mut words = [0u16; 4];
        for word in words.iter_mut() {
            *word = ch.read_data();
        }

        // The response is two big-endian 32-bit values: last LBA, then
        // block length.
        let last_lba = u32::from_be_bytes([
            words[0] as u8,
            (words[0] >> 8) as u8,
            words[1] as u8,
            (words[1] >> 8) as u8,
        ]);
        let sector_size = u32::from_be_bytes([
            words[2] as u8,
            (words[2] >> 8) as u8,
            words[3] as u8,
            (words[3] >> 8) as u8,
        ]);

        debug!(last_lba, sector_size, "ATAPI capacity");
        Ok(AtapiCapacity {
            last_lba,
            sector_size,
        })
    }

    /// Read one medium sector (usually 2048 bytes). The caller sleeps on
    /// the channel completion between packet issue and the data phase; the
    /// channel IRQ handler wakes it.
    ///
    /// Returns the number of bytes the device actually delivered.
    pub(crate) fn atapi_read_sector(
        &self,
        dev: &IdeDevice,
        lba: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let capacity = dev.atapi.filter(|cap| cap.last_lba != 0).ok_or(AtaError::NoMedium)?;

        let _guard = self.ata_lock.lock().unwrap();
        let ch = self.channel_io(dev);

        ch.write_reg(ATA_REG_HDDEVSEL, 0xA0 | (dev.slave as u8) << 4);
        ch.io_wait();

        ch.write_reg(ATA_REG_FEATURES, 0x00);
        ch.write_reg(ATA_REG_LBA1, (capacity.sector_size & 0xFF) as u8);
        ch.write_reg(ATA_REG_LBA2, (capacity.sector_size >> 8) as u8);
        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_PACKET);

        poll_ready(&ch, ATA_SR_DRQ)?;

        // Arm before the last packet word goes out: the wakeup may arrive
        // before this thread reaches wait().
        let event = &self.events[dev.channel.index()];
        event.arm();

        let mut packet = [0u8; 12];
        packet[0] = ATAPI_CMD_READ_12;
        packet[2] = (lba >> 24) as u8;
        packet[3] = (lba >> 16) as u8;
        packet[4] = (lba >> 8) as u8;
        packet[5] = lba as u8;
        packet[9] = 1; // transfer length, in sectors
        push_packet(&ch, &packet);

        event.wait();

        poll_ready(&ch, ATA_SR_DRQ)?;

        // The device reports how many bytes this data phase carries.
        let byte_count =
            usize::from(ch.read_reg(ATA_REG_LBA2)) << 8 | usize::from(ch.read_reg(ATA_REG_LBA1));
        if byte_count > buf.len() {
            warn!(byte_count, buf_len = buf.len(), "ATAPI data phase larger than buffer");
        }

        let mut copied = 0;
        for _ in 0..byte_count / 2 {
            let word = ch.read_data();
            if copied + 2 <= buf.len() {
                buf[copied] = word as u8;
                buf[copied + 1] = (word >> 8) as u8;
                copied += 2;
            }
        }

        poll_ready(&ch, ATA_SR_DRDY)?;
        Ok(copied)
    }
}
