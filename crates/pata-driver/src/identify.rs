//! The 512-byte response block of IDENTIFY DEVICE / IDENTIFY PACKET DEVICE.
//!
//! Only three fields are consumed: the 28-bit capacity (words 60-61), the
//! 48-bit capacity (words 100-103) and the model string (words 27-46). The
//! model arrives with the bytes of each word swapped and is fixed up once on
//! receipt.

/// 256 16-bit words as read from the data port.
#[derive(Clone)]
pub struct IdentifyBlock {
    words: [u16; 256],
    model: [u8; 40],
}

impl IdentifyBlock {
    pub fn from_words(words: [u16; 256]) -> Self {
        let mut model = [0u8; 40];
        for (i, chunk) in model.chunks_exact_mut(2).enumerate() {
            // Each model word carries its two ASCII bytes swapped.
            let word = words[27 + i];
            chunk[0] = (word >> 8) as u8;
            chunk[1] = (word & 0xFF) as u8;
        }
        Self { words, model }
    }

    /// 28-bit LBA capacity in sectors (words 60-61).
    pub fn sectors_28(&self) -> u64 {
        u64::from(self.words[60]) | u64::from(self.words[61]) << 16
    }

    /// 48-bit LBA capacity in sectors (words 100-103).
    pub fn sectors_48(&self) -> u64 {
        u64::from(self.words[100])
            | u64::from(self.words[101]) << 16
            | u64::from(self.words[102]) << 32
            | u64::from(self.words[103]) << 48
    }

    /// Addressable sectors: the 48-bit count when nonzero, else the 28-bit
    /// count.
    pub fn sectors(&self) -> u64 {
        let sectors = self.sectors_48();
        if sectors != 0 {
            sectors
        } else {
            self.sectors_28()
        }
    }

    /// Model string with trailing padding trimmed.
    pub fn model(&self) -> &str {
        let end = self
            .model
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        std::str::from_utf8(&self.model[..end]).unwrap_or("")
    }
}

impl Default for IdentifyBlock {
    fn default() -> Self {
        Self::from_words([0u16; 256])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(f: impl FnOnce(&mut [u16; 256])) -> IdentifyBlock {
        let mut words = [0u16; 256];
        f(&mut words);
        IdentifyBlock::from_words(words)
    }

    #[test]
    fn sectors_48_takes_precedence_when_nonzero() {
        let id = block_with(|w| {
            w[60] = 0x8000;
            w[100] = 0x1234;
            w[101] = 0x0001;
        });
        assert_eq!(id.sectors_28(), 0x8000);
        assert_eq!(id.sectors_48(), 0x0001_1234);
        assert_eq!(id.sectors(), 0x0001_1234);
    }

    #[test]
    fn sectors_falls_back_to_28_bit_count() {
        let id = block_with(|w| w[60] = 32_768);
        assert_eq!(id.sectors(), 32_768);
    }

    #[test]
    fn model_unswaps_bytes_and_trims_padding() {
        let id = block_with(|w| {
            // "QEMU HARDDISK" padded with spaces, stored byte-swapped.
            let text = b"QEMU HARDDISK                           ";
            for (i, pair) in text.chunks_exact(2).enumerate() {
                w[27 + i] = u16::from(pair[0]) << 8 | u16::from(pair[1]);
            }
        });
        assert_eq!(id.model(), "QEMU HARDDISK");
    }
}
