use std::io::Cursor;

use super::{CipherContext, DeviceType, DiskIo, HddDevice};
use crate::error::HddError;
use crate::keys::HddKeys;
use crate::partition::Region;
use crate::testutil::{DiskImage, SECTOR, TEST_KEYS, vflash_contents};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Drive with a VFLASH (or plain) first partition and a data partition.
fn build(device_type: DeviceType) -> Vec<u8> {
    let mut disk = DiskImage::new();
    if device_type.has_vflash() {
        disk.add_partition(0, &vflash_contents(&[&[0u8; 4 * SECTOR][..]]));
    } else {
        disk.add_partition(0, &[0u8; 16 * SECTOR]);
    }
    disk.add_partition(1, &patterned(32 * SECTOR));
    disk.encrypt(device_type)
}

#[test]
fn detects_every_device_type() {
    for device_type in [DeviceType::FatNand, DeviceType::FatNor, DeviceType::SlimNor] {
        let device = HddDevice::open(Cursor::new(build(device_type)), &TEST_KEYS).unwrap();
        assert_eq!(device.device_type(), device_type);
        assert_eq!(device.label().partitions[0].start, 8);
    }
}

#[test]
fn vflash_range_is_first_partition_on_nor_models() {
    let device = HddDevice::open(Cursor::new(build(DeviceType::FatNor)), &TEST_KEYS).unwrap();
    let first = device.label().partitions[0].region();
    assert_eq!(device.context().vflash_range(), Some(first));

    let nand = HddDevice::open(Cursor::new(build(DeviceType::FatNand)), &TEST_KEYS).unwrap();
    assert_eq!(nand.context().vflash_range(), None);
}

#[test]
fn wrong_keys_are_reported() {
    let raw = build(DeviceType::SlimNor);
    let keys = HddKeys {
        ata_k1: [0x99; 32],
        ..TEST_KEYS
    };
    assert!(matches!(
        HddDevice::open(Cursor::new(raw), &keys),
        Err(HddError::WrongKey)
    ));
}

#[test]
fn sectors_decrypt_to_plaintext() {
    for device_type in [DeviceType::FatNand, DeviceType::FatNor, DeviceType::SlimNor] {
        let mut device = HddDevice::open(Cursor::new(build(device_type)), &TEST_KEYS).unwrap();
        let data = device.label().partitions[1].region();
        let plain = device.read_sectors(data.start, 32).unwrap();
        assert_eq!(plain, patterned(32 * SECTOR), "{device_type}");
    }
}

#[test]
fn unaligned_byte_ranges_round_trip() {
    let mut device = HddDevice::open(Cursor::new(build(DeviceType::SlimNor)), &TEST_KEYS).unwrap();
    let data = device.label().partitions[1].region();
    let base = data.byte_offset();

    for (offset, len) in [(100u64, 20usize), (300, 512), (511, 1030), (1, 5 * SECTOR - 2), (2048, 4 * SECTOR)] {
        let payload: Vec<u8> = (0..len).map(|i| (i as u8) ^ 0x5A).collect();
        let before = device.read_bytes(base, 8 * SECTOR).unwrap();

        device.write_bytes(base + offset, &payload).unwrap();
        assert_eq!(device.read_bytes(base + offset, len).unwrap(), payload);

        // Bytes around the written range are preserved
        let after = device.read_bytes(base, 8 * SECTOR).unwrap();
        let (start, end) = (offset as usize, offset as usize + len);
        assert_eq!(&after[..start], &before[..start]);
        assert_eq!(&after[end..], &before[end..]);
    }
}

#[test]
fn empty_and_misaligned_requests() {
    let mut device = HddDevice::open(Cursor::new(build(DeviceType::FatNand)), &TEST_KEYS).unwrap();
    assert!(device.read_bytes(1234, 0).unwrap().is_empty());
    device.write_at(1234, &[]).unwrap();
    assert!(matches!(
        device.write_sectors(8, &[0u8; 100]),
        Err(HddError::OutOfRange(_))
    ));
}

#[test]
fn vflash_layer_applies_only_inside_its_range() {
    let plain = patterned(40 * SECTOR);
    let mut nor = CipherContext::new(DeviceType::FatNor, &TEST_KEYS);
    nor.set_vflash_range(Region::new(8, 16));

    let mut raw = plain.clone();
    nor.encrypt(0, &mut raw).unwrap();

    // Undo only the ATA layer
    let ata_only = CipherContext::new(DeviceType::FatNand, &TEST_KEYS);
    let mut partial = raw.clone();
    ata_only.decrypt(0, &mut partial).unwrap();

    for sector in 0..40 {
        let span = sector * SECTOR..(sector + 1) * SECTOR;
        let inside = (8..24).contains(&sector);
        assert_eq!(partial[span.clone()] == plain[span], !inside, "sector {sector}");
    }

    // A buffer starting mid-range sees the same tweaks
    let mut tail = raw[12 * SECTOR..30 * SECTOR].to_vec();
    nor.decrypt(12, &mut tail).unwrap();
    assert_eq!(tail, plain[12 * SECTOR..30 * SECTOR]);
}

#[test]
fn raw_sectors_are_halfword_swapped() {
    let plain = vec![0u8; SECTOR];
    let context = CipherContext::new(DeviceType::FatNand, &TEST_KEYS);

    let mut raw = plain.clone();
    context.encrypt(0, &mut raw).unwrap();

    let mut unswapped_cbc = plain;
    hdk_secure::SectorCipher::encrypt_sectors(&TEST_KEYS.ata_cbc(), 0, &mut unswapped_cbc).unwrap();
    hdk_secure::swap_halfwords(&mut unswapped_cbc);
    assert_eq!(raw, unswapped_cbc);
}
