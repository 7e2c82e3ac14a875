//! The block-device capability surface and the byte/sector translation
//! layer behind it.
//!
//! A request is first planned: at most one prefix partial sector, a run of
//! whole sectors, at most one postfix partial sector, all clamped against
//! the device capacity. The plan then drives the PATA or ATAPI transport;
//! partial-sector writes are read-modify-write through a scratch sector.

use std::ops::Range;
use std::sync::Arc;

use crate::controller::IdeController;
use crate::device::IdeDevice;
use crate::error::{AtaError, Result};
use crate::regs::ATA_SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    BlockDevice,
}

/// Attributes the VFS copies into the published node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub length: u64,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub kind: NodeKind,
}

/// The operation set a block node exposes to the VFS.
///
/// `read`/`write` clamp against capacity and report bytes transferred;
/// hardware failures surface as errors. `open`/`close` are no-ops unless a
/// device has state to manage.
pub trait BlockDevice: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize>;

    fn open(&self) {}
    fn close(&self) {}

    fn info(&self) -> NodeInfo;
}

/// One partial-sector operation of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartialOp {
    pub(crate) sector: u64,
    pub(crate) offset_in_sector: usize,
    pub(crate) len: usize,
}

/// Sector coverage for one byte-range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferPlan {
    pub(crate) prefix: Option<PartialOp>,
    pub(crate) full: Range<u64>,
    pub(crate) postfix: Option<PartialOp>,
    /// Clamped byte count; the sum of all operation bounds.
    pub(crate) len: usize,
}

impl TransferPlan {
    pub(crate) fn empty() -> Self {
        Self {
            prefix: None,
            full: 0..0,
            postfix: None,
            len: 0,
        }
    }

    /// Plan `requested` bytes at `offset` against a device of `capacity`
    /// bytes in `sector_size`-byte sectors.
    pub(crate) fn new(offset: u64, requested: usize, sector_size: u32, capacity: u64) -> Self {
        let sector_size = sector_size as u64;
        if offset >= capacity || requested == 0 {
            return Self::empty();
        }
        let len = (requested as u64).min(capacity - offset);

        let start = offset / sector_size;
        let end = (offset + len - 1) / sector_size;
        let mut full = start..end + 1;
        let mut prefix = None;
        let mut postfix = None;

        let head = (offset % sector_size) as usize;
        if head != 0 {
            prefix = Some(PartialOp {
                sector: start,
                offset_in_sector: head,
                len: (sector_size as usize - head).min(len as usize),
            });
            full.start = start + 1;
        }

        let tail = ((offset + len) % sector_size) as usize;
        if tail != 0 && full.start <= end {
            postfix = Some(PartialOp {
                sector: end,
                offset_in_sector: 0,
                len: tail,
            });
            full.end = end;
        }

        Self {
            prefix,
            full,
            postfix,
            len: len as usize,
        }
    }
}

/// Run a planned read: partial sectors through a scratch buffer, whole
/// sectors straight into the caller's slice.
fn read_planned(
    plan: &TransferPlan,
    sector_size: usize,
    buf: &mut [u8],
    mut read_sector: impl FnMut(u64, &mut [u8]) -> Result<()>,
) -> Result<usize> {
    if plan.len == 0 {
        return Ok(0);
    }
    let mut scratch = vec![0u8; sector_size];
    let mut pos = 0;

    if let Some(op) = plan.prefix {
        read_sector(op.sector, &mut scratch)?;
        buf[..op.len].copy_from_slice(&scratch[op.offset_in_sector..op.offset_in_sector + op.len]);
        pos += op.len;
    }

    for sector in plan.full.clone() {
        read_sector(sector, &mut buf[pos..pos + sector_size])?;
        pos += sector_size;
    }

    if let Some(op) = plan.postfix {
        read_sector(op.sector, &mut scratch)?;
        buf[pos..pos + op.len].copy_from_slice(&scratch[..op.len]);
        pos += op.len;
    }

    debug_assert_eq!(pos, plan.len);
    Ok(plan.len)
}

/// Run a planned write. Partial sectors are merged into freshly-read sector
/// images before being written back.
fn write_planned(
    plan: &TransferPlan,
    sector_size: usize,
    buf: &[u8],
    mut read_sector: impl FnMut(u64, &mut [u8]) -> Result<()>,
    mut write_sector: impl FnMut(u64, &[u8]) -> Result<()>,
) -> Result<usize> {
    if plan.len == 0 {
        return Ok(0);
    }
    let mut scratch = vec![0u8; sector_size];
    let mut pos = 0;

    if let Some(op) = plan.prefix {
        read_sector(op.sector, &mut scratch)?;
        scratch[op.offset_in_sector..op.offset_in_sector + op.len].copy_from_slice(&buf[..op.len]);
        write_sector(op.sector, &scratch)?;
        pos += op.len;
    }

    for sector in plan.full.clone() {
        write_sector(sector, &buf[pos..pos + sector_size])?;
        pos += sector_size;
    }

    if let Some(op) = plan.postfix {
        read_sector(op.sector, &mut scratch)?;
        scratch[..op.len].copy_from_slice(&buf[pos..pos + op.len]);
        write_sector(op.sector, &scratch)?;
        pos += op.len;
    }

    debug_assert_eq!(pos, plan.len);
    Ok(plan.len)
}

/// A hard-disk node.
pub(crate) struct AtaNode {
    pub(crate) name: String,
    pub(crate) controller: Arc<IdeController>,
    pub(crate) device: Arc<IdeDevice>,
}

impl BlockDevice for AtaNode {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let plan = TransferPlan::new(
            offset,
            buf.len(),
            ATA_SECTOR_SIZE as u32,
            self.device.capacity_bytes(),
        );
        read_planned(&plan, ATA_SECTOR_SIZE, buf, |lba, out| {
            self.controller.read_sector(&self.device, lba, out)
        })
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let plan = TransferPlan::new(
            offset,
            buf.len(),
            ATA_SECTOR_SIZE as u32,
            self.device.capacity_bytes(),
        );
        write_planned(
            &plan,
            ATA_SECTOR_SIZE,
            buf,
            |lba, out| self.controller.read_sector(&self.device, lba, out),
            |lba, data| self.controller.write_sector_verified(&self.device, lba, data),
        )
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.name.clone(),
            length: self.device.capacity_bytes(),
            mode: 0o660,
            uid: 0,
            gid: 0,
            kind: NodeKind::BlockDevice,
        }
    }
}

/// An optical-drive node. Read-only; without a medium its length is zero
/// and every read returns nothing.
pub(crate) struct AtapiNode {
    pub(crate) name: String,
    pub(crate) controller: Arc<IdeController>,
    pub(crate) device: Arc<IdeDevice>,
}

impl BlockDevice for AtapiNode {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let sector_size = self.device.sector_size();
        let plan = TransferPlan::new(offset, buf.len(), sector_size, self.device.capacity_bytes());
        read_planned(&plan, sector_size as usize, buf, |lba, out| {
            self.controller.atapi_read_sector(&self.device, lba, out).map(|_| ())
        })
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<usize> {
        Err(AtaError::WriteUnsupported)
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.name.clone(),
            length: self.device.capacity_bytes(),
            mode: 0o660,
            uid: 0,
            gid: 0,
            kind: NodeKind::BlockDevice,
        }
    }
}
