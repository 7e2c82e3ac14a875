//! ATAPI data path: packet-driven reads with IRQ wakeup, capacity
//! handling, and the read-only contract.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use pata_driver::{AtaError, BlockDevice, Channel, IdeController, IdeControllerConfig};
use pata_testbench::{IsoImage, TestMachine, TestMachineConfig};

const BLOCK: usize = 2048;

fn pattern_block(seed: u8) -> Vec<u8> {
    (0..BLOCK)
        .map(|i| (i as u8).wrapping_mul(11).wrapping_add(seed))
        .collect()
}

fn boot_cdrom(iso: Option<IsoImage>) -> Arc<TestMachine> {
    let machine = TestMachine::new(TestMachineConfig::default());
    machine.attach_cdrom(Channel::Secondary, false, iso, "TEST DVD-ROM");
    let _controller = IdeController::initialize(
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        IdeControllerConfig::default(),
    );
    machine.clear_logs();
    machine
}

fn iso_with_blocks(blocks: u32) -> IsoImage {
    let mut iso = IsoImage::new(blocks);
    for block in 0..blocks {
        iso.sector_mut(block)
            .copy_from_slice(&pattern_block(block as u8));
    }
    iso
}

#[test]
fn block_read_issues_one_read12_packet_and_is_woken_by_irq15() {
    let machine = boot_cdrom(Some(iso_with_blocks(8)));
    let node = machine.node("/dev/cdrom0").unwrap();

    let mut buf = vec![0u8; BLOCK];
    assert_eq!(node.read(2 * BLOCK as u64, &mut buf).unwrap(), BLOCK);
    assert_eq!(buf, pattern_block(2));

    let packets = machine.packet_log();
    assert_eq!(packets.len(), 1);
    let (channel, packet) = packets[0];
    assert_eq!(channel, Channel::Secondary);
    assert_eq!(packet[0], 0xA8); // READ(12)
    assert_eq!(u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]), 2);
    assert_eq!(packet[9], 1);

    // The data phase was announced over IRQ 15 and acknowledged.
    assert!(machine.irq_acks().contains(&15));
}

#[test]
fn unaligned_read_spans_blocks_through_the_scratch_buffer() {
    let machine = boot_cdrom(Some(iso_with_blocks(8)));
    let node = machine.node("/dev/cdrom0").unwrap();

    let mut expected = Vec::new();
    for block in 0..8u8 {
        expected.extend_from_slice(&pattern_block(block));
    }

    let mut buf = vec![0u8; 3000];
    assert_eq!(node.read(100, &mut buf).unwrap(), 3000);
    assert_eq!(buf, expected[100..3100]);

    // Prefix of block 0 plus head of block 1: two READ(12) packets.
    assert_eq!(machine.packet_log().len(), 2);
}

#[test]
fn read_is_clamped_at_the_end_of_the_medium() {
    let machine = boot_cdrom(Some(iso_with_blocks(4)));
    let node = machine.node("/dev/cdrom0").unwrap();
    let capacity = 4 * BLOCK as u64;

    let mut buf = vec![0u8; BLOCK];
    assert_eq!(node.read(capacity - 100, &mut buf).unwrap(), 100);
    assert_eq!(buf[..100], pattern_block(3)[BLOCK - 100..]);

    assert_eq!(node.read(capacity, &mut buf).unwrap(), 0);
}

#[test]
fn missing_medium_still_mounts_a_zero_length_node() {
    let machine = boot_cdrom(None);
    let node = machine.node("/dev/cdrom0").unwrap();
    assert_eq!(node.info().length, 0);

    let mut buf = vec![0u8; BLOCK];
    assert_eq!(node.read(0, &mut buf).unwrap(), 0);
    assert!(machine.packet_log().is_empty());
}

#[test]
fn writes_to_optical_media_are_rejected() {
    let machine = boot_cdrom(Some(iso_with_blocks(4)));
    let node = machine.node("/dev/cdrom0").unwrap();

    let buf = vec![0u8; BLOCK];
    assert!(matches!(
        node.write(0, &buf),
        Err(AtaError::WriteUnsupported)
    ));
}

#[test]
fn capacity_probe_sends_read_capacity_during_initialization() {
    let machine = TestMachine::new(TestMachineConfig::default());
    machine.attach_cdrom(
        Channel::Secondary,
        false,
        Some(iso_with_blocks(16)),
        "TEST DVD-ROM",
    );
    let _controller = IdeController::initialize(
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        IdeControllerConfig::default(),
    );

    let probes: Vec<[u8; 12]> = machine
        .packet_log()
        .iter()
        .filter(|(_, p)| p[0] == 0x25)
        .map(|&(_, p)| p)
        .collect();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0][1..], [0u8; 11]);

    assert_eq!(
        machine.node("/dev/cdrom0").unwrap().info().length,
        16 * BLOCK as u64
    );
}
