//! PATA single-sector transport: Bus Master DMA reads with PIO fallback,
//! PIO writes, and the write-verify contract.

use tracing::warn;

use crate::controller::IdeController;
use crate::device::{ChannelIo, DmaResources, IdeDevice};
use crate::error::{AtaError, Result};
use crate::regs::*;

/// Fill the taskfile for a single-sector transfer at `lba`, high-order
/// bytes first so the low registers hold LBA bits 0..24 when a 28-bit
/// command follows.
fn load_taskfile(ch: &ChannelIo<'_>, lba: u64) {
    ch.write_reg(ATA_REG_FEATURES, 0x00);
    ch.write_reg(ATA_REG_SECCOUNT0, 1);
    ch.write_reg(ATA_REG_LBA0, (lba >> 24) as u8);
    ch.write_reg(ATA_REG_LBA1, (lba >> 32) as u8);
    ch.write_reg(ATA_REG_LBA2, (lba >> 40) as u8);
    ch.write_reg(ATA_REG_LBA0, lba as u8);
    ch.write_reg(ATA_REG_LBA1, (lba >> 8) as u8);
    ch.write_reg(ATA_REG_LBA2, (lba >> 16) as u8);
}

/// Word-wise comparison used by write verification. Both buffers must be a
/// multiple of 4 bytes long.
fn buffers_match(a: &[u8], b: &[u8]) -> Result<bool> {
    if !a.len().is_multiple_of(4) || a.len() != b.len() {
        return Err(AtaError::UnalignedLength {
            len: a.len(),
            alignment: 4,
        });
    }
    let matches = a
        .chunks_exact(4)
        .zip(b.chunks_exact(4))
        .all(|(x, y)| x == y);
    Ok(matches)
}

impl IdeController {
    /// Read one 512-byte sector. DMA when the device has bus-master
    /// resources, PIO otherwise; either path is retried up to the
    /// configured cap before the error surfaces.
    pub(crate) fn read_sector(&self, dev: &IdeDevice, lba: u64, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), ATA_SECTOR_SIZE);

        let _guard = self.ata_lock.lock().unwrap();
        let mut attempt = 0;
        loop {
            let result = match &dev.dma {
                Some(dma) => self.dma_read_once(dev, dma, lba, buf),
                None => self.pio_read_once(dev, lba, buf),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.read_retry_attempts => {
                    attempt += 1;
                    warn!(lba, attempt, %err, "sector read failed, retrying");
                }
                Err(err) => {
                    warn!(lba, %err, "sector read failed, giving up");
                    return Err(err);
                }
            }
        }
    }

    fn dma_read_once(
        &self,
        dev: &IdeDevice,
        dma: &DmaResources,
        lba: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let ch = self.channel_io(dev);
        let bm = dma.bm_base;

        ch.wait();

        // Stop the engine, point it at the PRDT, clear stale error/irq
        // status, then arm the device->memory direction.
        self.io.outb(bm + BM_REG_COMMAND, 0x00);
        self.io.outl(bm + BM_REG_PRDT, dma.prdt.phys_addr());
        self.io.outb(bm + BM_REG_STATUS, BM_STATUS_IRQ | BM_STATUS_ERR);
        self.io.outb(bm + BM_REG_COMMAND, BM_CMD_READ);

        self.irq.enable();
        while ch.status() & ATA_SR_BSY != 0 {}

        ch.write_control(0x00);
        ch.write_reg(ATA_REG_HDDEVSEL, 0xE0 | (dev.slave as u8) << 4);
        ch.io_wait();
        load_taskfile(&ch, lba);

        loop {
            let status = ch.status();
            if status & ATA_SR_BSY == 0 && status & ATA_SR_DRDY != 0 {
                break;
            }
        }

        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_READ_DMA);
        ch.io_wait();

        self.io.outb(bm + BM_REG_COMMAND, BM_CMD_READ | BM_CMD_START);

        // Completion: bus-master interrupt latched and the device out of
        // BSY. A busy wait, not a sleep; the channel IRQ fires here too and
        // is absorbed by the (unarmed) handler.
        loop {
            let bm_status = self.io.inb(bm + BM_REG_STATUS);
            let status = ch.status();
            if bm_status & BM_STATUS_IRQ == 0 {
                continue;
            }
            if status & ATA_SR_BSY == 0 {
                break;
            }
        }
        self.irq.disable();

        ch.check_error()?;

        dma.buffer.read(0, buf);

        // Tell the engine we are done with this transfer.
        self.io.outb(bm + BM_REG_STATUS, BM_STATUS_IRQ | BM_STATUS_ERR);
        Ok(())
    }

    fn pio_read_once(&self, dev: &IdeDevice, lba: u64, buf: &mut [u8]) -> Result<()> {
        let ch = self.channel_io(dev);

        ch.write_control(ATA_CTRL_NIEN);
        ch.wait();
        ch.write_reg(ATA_REG_HDDEVSEL, 0xE0 | (dev.slave as u8) << 4);
        ch.io_wait();
        load_taskfile(&ch, lba);
        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_READ_PIO);

        ch.wait_data()?;

        for chunk in buf.chunks_exact_mut(2) {
            let word = ch.read_data();
            chunk[0] = word as u8;
            chunk[1] = (word >> 8) as u8;
        }
        ch.wait();
        Ok(())
    }

    /// Write one 512-byte sector via PIO and flush the device cache.
    pub(crate) fn write_sector(&self, dev: &IdeDevice, lba: u64, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), ATA_SECTOR_SIZE);

        let _guard = self.ata_lock.lock().unwrap();
        let ch = self.channel_io(dev);

        ch.write_control(ATA_CTRL_NIEN);
        ch.wait();
        ch.write_reg(ATA_REG_HDDEVSEL, 0xE0 | (dev.slave as u8) << 4);
        ch.wait();

        load_taskfile(&ch, lba);
        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_WRITE_PIO);
        ch.wait();

        for chunk in buf.chunks_exact(2) {
            ch.write_data(u16::from(chunk[0]) | u16::from(chunk[1]) << 8);
        }

        ch.write_reg(ATA_REG_COMMAND, ATA_CMD_CACHE_FLUSH);
        ch.wait();
        ch.check_error()
    }

    /// Write a sector and read it back until the device returns identical
    /// data. A write is not considered durable until a verifying read
    /// matches word for word.
    pub(crate) fn write_sector_verified(
        &self,
        dev: &IdeDevice,
        lba: u64,
        buf: &[u8],
    ) -> Result<()> {
        let mut read_back = vec![0u8; ATA_SECTOR_SIZE];
        let attempts = self.config.write_verify_attempts.max(1);
        for attempt in 1..=attempts {
            self.write_sector(dev, lba, buf)?;
            self.read_sector(dev, lba, &mut read_back)?;
            if buffers_match(buf, &read_back)? {
                return Ok(());
            }
            warn!(lba, attempt, "write verification mismatch");
        }
        Err(AtaError::WriteVerifyFailed { lba, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::buffers_match;
    use crate::error::AtaError;

    #[test]
    fn buffers_match_compares_word_wise() {
        let a = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut b = a;
        assert!(buffers_match(&a, &b).unwrap());
        b[5] = 0xFF;
        assert!(!buffers_match(&a, &b).unwrap());
    }

    #[test]
    fn buffers_match_rejects_non_word_sizes() {
        let a = [0u8; 6];
        let b = [0u8; 6];
        assert!(matches!(
            buffers_match(&a, &b),
            Err(AtaError::UnalignedLength { len: 6, alignment: 4 })
        ));
    }
}
