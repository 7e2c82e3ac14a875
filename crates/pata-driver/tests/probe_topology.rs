//! Probe-time behavior: slot classification, node naming, capacities, and
//! DMA arming decisions.

use std::sync::Arc;

use pata_driver::{BlockDevice, Channel, IdeController, IdeControllerConfig, NodeKind};
use pata_testbench::{DiskImage, IsoImage, TestMachine, TestMachineConfig};

const SECTOR: usize = 512;

fn boot(
    config: TestMachineConfig,
    setup: impl FnOnce(&TestMachine),
) -> (Arc<TestMachine>, Arc<IdeController>) {
    let machine = TestMachine::new(config);
    setup(&machine);
    let controller = IdeController::initialize(
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        machine.clone(),
        IdeControllerConfig::default(),
    );
    (machine, controller)
}

#[test]
fn probe_publishes_one_disk_and_one_cdrom_with_exact_lengths() {
    // Primary master: 16 MiB disk. Secondary master: 700 MiB disc.
    // Both slave slots empty.
    let (machine, controller) = boot(TestMachineConfig::default(), |m| {
        m.attach_disk(Channel::Primary, false, DiskImage::new(32_768), "TEST HARDDISK");
        m.attach_cdrom(
            Channel::Secondary,
            false,
            Some(IsoImage::new(358_400)),
            "TEST DVD-ROM",
        );
    });

    let mounts = machine.mounts();
    let paths: Vec<&str> = mounts.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, ["/dev/hda", "/dev/cdrom0"]);

    let hda = machine.node("/dev/hda").unwrap();
    assert_eq!(hda.info().length, 16_777_216);

    let cdrom = machine.node("/dev/cdrom0").unwrap();
    assert_eq!(cdrom.info().length, 734_003_200);

    assert_eq!(controller.devices().len(), 2);
}

#[test]
fn node_attributes_follow_the_block_device_contract() {
    let (machine, _controller) = boot(TestMachineConfig::default(), |m| {
        m.attach_disk(Channel::Primary, false, DiskImage::new(128), "TEST HARDDISK");
        m.attach_cdrom(Channel::Secondary, false, Some(IsoImage::new(16)), "TEST DVD-ROM");
    });

    let info = machine.node("/dev/hda").unwrap().info();
    assert_eq!(info.name, "atadev0");
    assert_eq!(info.mode, 0o660);
    assert_eq!(info.uid, 0);
    assert_eq!(info.gid, 0);
    assert_eq!(info.kind, NodeKind::BlockDevice);

    let info = machine.node("/dev/cdrom0").unwrap().info();
    assert_eq!(info.name, "cdrom0");
    assert_eq!(info.mode, 0o660);
}

#[test]
fn disks_are_lettered_in_discovery_order() {
    let (machine, _controller) = boot(TestMachineConfig::default(), |m| {
        m.attach_disk(Channel::Primary, false, DiskImage::new(64), "DISK A");
        m.attach_disk(Channel::Primary, true, DiskImage::new(64), "DISK B");
        m.attach_disk(Channel::Secondary, true, DiskImage::new(64), "DISK C");
    });

    let paths: Vec<String> = machine.mounts().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths, ["/dev/hda", "/dev/hdb", "/dev/hdc"]);
}

#[test]
fn identify_model_string_is_unswapped() {
    let (_machine, controller) = boot(TestMachineConfig::default(), |m| {
        m.attach_disk(Channel::Primary, false, DiskImage::new(64), "TEST HARDDISK");
    });

    let devices = controller.devices();
    assert_eq!(devices[0].model(), "TEST HARDDISK");
}

#[test]
fn empty_bus_publishes_nothing() {
    let (machine, controller) = boot(TestMachineConfig::default(), |_| {});
    assert!(machine.mounts().is_empty());
    assert!(controller.devices().is_empty());
}

#[test]
fn memory_mapped_bar4_degrades_the_disk_to_pio() {
    let config = TestMachineConfig {
        bar4_io_space: false,
        ..Default::default()
    };
    let (machine, _controller) = boot(config, |m| {
        let mut disk = DiskImage::new(64);
        disk.sector_mut(3)[..4].copy_from_slice(b"PIO!");
        m.attach_disk(Channel::Primary, false, disk, "TEST HARDDISK");
    });

    machine.clear_logs();
    let node = machine.node("/dev/hda").unwrap();
    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(3 * SECTOR as u64, &mut buf).unwrap(), SECTOR);
    assert_eq!(&buf[..4], b"PIO!");

    // The node is still served, but over READ PIO only.
    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0x20]);
}

#[test]
fn missing_pci_function_degrades_the_disk_to_pio() {
    let config = TestMachineConfig {
        pci_present: false,
        ..Default::default()
    };
    let (machine, _controller) = boot(config, |m| {
        m.attach_disk(Channel::Primary, false, DiskImage::new(64), "TEST HARDDISK");
    });

    machine.clear_logs();
    let node = machine.node("/dev/hda").unwrap();
    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(0, &mut buf).unwrap(), SECTOR);

    let opcodes: Vec<u8> = machine.command_log().iter().map(|&(_, op)| op).collect();
    assert_eq!(opcodes, [0x20]);
}

#[test]
fn secondary_channel_disk_uses_its_own_bus_master_block() {
    let (machine, _controller) = boot(TestMachineConfig::default(), |m| {
        let mut disk = DiskImage::new(64);
        disk.sector_mut(7)[..4].copy_from_slice(b"2ND!");
        m.attach_disk(Channel::Secondary, false, disk, "TEST HARDDISK");
    });

    machine.clear_logs();
    let node = machine.node("/dev/hda").unwrap();
    let mut buf = vec![0u8; SECTOR];
    assert_eq!(node.read(7 * SECTOR as u64, &mut buf).unwrap(), SECTOR);
    assert_eq!(&buf[..4], b"2ND!");

    let log = machine.command_log();
    assert_eq!(log, [(Channel::Secondary, 0xC8)]);
}
