//! Disk data-path behavior over the emulated controller: DMA reads, PIO
//! writes with verification, byte-range planning at the node surface, and
//! transfer serialization.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use pata_driver::{BlockDevice, Channel, IdeController, IdeControllerConfig};
use pata_testbench::{DiskImage, TestMachine, TestMachineConfig};

const SECTOR: usize = 512;

/// Deterministic per-byte fill so any sector slice is recognizable.
fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(3))
        .collect()
}

fn boot_disk(sectors: u64) -> (Arc<TestMachine>, Vec<u8>) {
    let machine = TestMachine::new(TestMachineConfig::default());
    let image = pattern(sectors as usize * SECTOR);
    machine.attach_disk(
        Channel::Primary,
        false,
        DiskImage::from_bytes(image.clone()),
        "TEST HARDDISK",
    );
    let _controller = IdeController::initialize(
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        IdeControllerConfig::default(),
    );
    machine.clear_logs();
    (machine, image)
}

#[test]
fn aligned_single_sector_read_issues_exactly_one_read_dma() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(0, &mut buf).unwrap(), SECTOR);
    assert_eq!(buf, image[..SECTOR]);

    assert_eq!(machine.command_log(), [(Channel::Primary, 0xC8)]);
}

#[test]
fn unaligned_read_covers_prefix_full_and_postfix_sectors() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    // offset 100, size 1000: sector 0 tail, all of sector 1, sector 2 head.
    let mut buf = vec![0u8; 1000];
    assert_eq!(node.read(100, &mut buf).unwrap(), 1000);
    assert_eq!(buf, image[100..1100]);

    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0xC8, 0xC8, 0xC8]);
}

#[test]
fn sub_sector_read_in_the_middle_of_a_sector() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let mut buf = vec![0u8; 10];
    assert_eq!(node.read(100, &mut buf).unwrap(), 10);
    assert_eq!(buf, image[100..110]);

    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0xC8]);
}

#[test]
fn aligned_write_is_one_write_flush_and_one_verifying_read() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let data = vec![0xAAu8; SECTOR];
    assert_eq!(node.write(SECTOR as u64, &data).unwrap(), SECTOR);

    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0x30, 0xE7, 0xC8]);

    machine.clear_logs();
    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(SECTOR as u64, &mut buf).unwrap(), SECTOR);
    assert_eq!(buf, data);
}

#[test]
fn unaligned_write_read_modify_writes_the_edge_sectors() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let data = vec![0x5Au8; 700];
    assert_eq!(node.write(300, &data).unwrap(), 700);

    let mut expected = image.clone();
    expected[300..1000].copy_from_slice(&data);

    let mut buf = vec![0u8; 4 * SECTOR];
    assert_eq!(node.read(0, &mut buf).unwrap(), 4 * SECTOR);
    assert_eq!(buf, expected[..4 * SECTOR]);
}

#[test]
fn read_of_the_device_tail_is_clamped() {
    let (machine, image) = boot_disk(32_768);
    let node = machine.node("/dev/hda").unwrap();
    let capacity = 32_768 * SECTOR as u64;

    let mut buf = vec![0u8; 1000];
    let n = node.read(capacity - 100, &mut buf).unwrap();
    assert_eq!(n, 100);
    assert_eq!(buf[..100], image[image.len() - 100..]);
}

#[test]
fn read_and_write_past_capacity_transfer_nothing_and_touch_no_ports() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();
    let capacity = 64 * SECTOR as u64;

    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(capacity, &mut buf).unwrap(), 0);
    assert_eq!(node.read(capacity + 12345, &mut buf).unwrap(), 0);
    assert_eq!(node.write(capacity, &buf).unwrap(), 0);

    assert!(machine.command_log().is_empty());
    assert!(machine.packet_log().is_empty());
}

#[test]
fn read_back_of_written_range_is_byte_identical() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let data = pattern(5000);
    assert_eq!(node.write(777, &data).unwrap(), 5000);

    let mut back = vec![0u8; 5000];
    assert_eq!(node.read(777, &mut back).unwrap(), 5000);
    assert_eq!(back, data);
}

#[test]
fn read_then_rewrite_leaves_the_device_unchanged() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let mut slice = vec![0u8; 3000];
    assert_eq!(node.read(450, &mut slice).unwrap(), 3000);
    assert_eq!(node.write(450, &slice).unwrap(), 3000);

    let mut whole = vec![0u8; 64 * SECTOR];
    assert_eq!(node.read(0, &mut whole).unwrap(), 64 * SECTOR);
    assert_eq!(whole, image);
}

#[test]
fn transient_read_error_is_retried_until_it_succeeds() {
    let (machine, image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    machine.inject_read_errors(Channel::Primary, false, 1);
    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(0, &mut buf).unwrap(), SECTOR);
    assert_eq!(buf, image[..SECTOR]);

    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0xC8, 0xC8]);
}

#[test]
fn persistent_read_error_surfaces_after_retries_are_exhausted() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    machine.inject_read_errors(Channel::Primary, false, u32::MAX);
    let mut buf = vec![0u8; SECTOR];
    assert!(node.read(0, &mut buf).is_err());
}

#[test]
fn corrupted_write_is_caught_by_verification_and_rewritten() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    machine.corrupt_writes(Channel::Primary, false, 1);
    let data = vec![0x42u8; SECTOR];
    assert_eq!(node.write(9 * SECTOR as u64, &data).unwrap(), SECTOR);

    // Two write attempts, each flushed and verified.
    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0x30, 0xE7, 0xC8, 0x30, 0xE7, 0xC8]);

    let stored = machine
        .with_disk(Channel::Primary, false, |disk| disk.sector(9).to_vec())
        .unwrap();
    assert_eq!(stored, data);
}

#[test]
fn dma_spin_toggles_the_interrupt_gate() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let before = machine.irq_enable_calls();
    let mut buf = vec![0u8; SECTOR];
    node.read(0, &mut buf).unwrap();
    assert_eq!(machine.irq_enable_calls(), before + 1);
}

#[test]
fn concurrent_writers_to_disjoint_sectors_serialize_cleanly() {
    let (machine, _image) = boot_disk(64);
    let node = machine.node("/dev/hda").unwrap();

    let threads: Vec<_> = (0..4u8)
        .map(|t| {
            let node = Arc::clone(&node);
            std::thread::spawn(move || {
                for i in 0..8u8 {
                    let offset = u64::from(t) * 8 * SECTOR as u64 + u64::from(i) * SECTOR as u64;
                    let data = vec![t * 16 + i; SECTOR];
                    assert_eq!(node.write(offset, &data).unwrap(), SECTOR);
                    let mut back = vec![0u8; SECTOR];
                    assert_eq!(node.read(offset, &mut back).unwrap(), SECTOR);
                    assert_eq!(back, data);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // Every transfer completed whole: each sector holds exactly its
    // writer's fill byte.
    for t in 0..4u8 {
        for i in 0..8u8 {
            let lba = u64::from(t) * 8 + u64::from(i);
            let stored = machine
                .with_disk(Channel::Primary, false, |disk| disk.sector(lba).to_vec())
                .unwrap();
            assert_eq!(stored, vec![t * 16 + i; SECTOR]);
        }
    }
}
