//! Property tests over the wire-format builders and the classifier.

use proptest::prelude::*;

use canopen_rs::canopen::classifier::{classify, proof_of_life, MessageKind};
use canopen_rs::canopen::client::{sdo_read_request, sdo_write_request, NodeAddress, SdoSize};
use canopen_rs::CanFrame;

fn any_sdo_size() -> impl Strategy<Value = SdoSize> {
    prop_oneof![Just(SdoSize::One), Just(SdoSize::Two), Just(SdoSize::Four)]
}

proptest! {
    #[test]
    fn read_request_encodes_index_little_endian(
        node in 1u8..=127,
        index in any::<u16>(),
        sub in any::<u8>(),
    ) {
        let frame = sdo_read_request(node, index, sub);
        prop_assert_eq!(frame.id(), 0x600 + u32::from(node));
        prop_assert_eq!(frame.len(), 8);
        let data = frame.data();
        prop_assert_eq!(data[0], 0x40);
        prop_assert_eq!(u16::from_le_bytes([data[1], data[2]]), index);
        prop_assert_eq!(data[3], sub);
        prop_assert_eq!(&data[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn write_request_encodes_value_and_width(
        node in 1u8..=127,
        index in any::<u16>(),
        sub in any::<u8>(),
        value in any::<u32>(),
        size in any_sdo_size(),
    ) {
        let frame = sdo_write_request(node, index, sub, value, size);
        let data = frame.data();
        // Command byte carries the unused-byte count in bits 2-3.
        let unused = (data[0] >> 2) & 0x03;
        prop_assert_eq!(4 - unused, size.byte_count());
        prop_assert_eq!(data[0] & 0xE3, 0x23);
        prop_assert_eq!(u32::from_le_bytes([data[4], data[5], data[6], data[7]]), value);
    }

    #[test]
    fn node_address_accepts_exactly_1_to_127(raw in any::<u8>()) {
        let valid = (1..=127).contains(&raw);
        prop_assert_eq!(NodeAddress::try_from(raw).is_ok(), valid);
    }

    #[test]
    fn proof_of_life_never_names_node_zero(id in 0u32..=0x7FF) {
        if let Some(node) = proof_of_life(id) {
            prop_assert_ne!(node, 0);
            prop_assert_eq!(u32::from(node), id & 0x7F);
        }
    }

    #[test]
    fn proof_of_life_matches_the_documented_bases(node in 1u8..=127) {
        let node32 = u32::from(node);
        prop_assert_eq!(proof_of_life(0x580 + node32), Some(node));
        prop_assert_eq!(proof_of_life(0x700 + node32), Some(node));
        prop_assert_eq!(proof_of_life(0x080 + node32), Some(node));
        for tpdo in [0x180, 0x280, 0x380, 0x480] {
            prop_assert_eq!(proof_of_life(tpdo + node32), Some(node));
        }
        prop_assert_eq!(proof_of_life(0x600 + node32), None);
    }

    #[test]
    fn classification_is_consistent_with_liveness(
        id in 0u32..=0x7FF,
        payload in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let frame = CanFrame::new(id, &payload).unwrap();
        // Anything the classifier calls an SDO response, heartbeat,
        // boot-up, emergency or TPDO must also count as proof of life,
        // except at node 0, which is never a live device.
        let alive = proof_of_life(id).is_some();
        match classify(&frame) {
            MessageKind::SdoResponse { .. }
            | MessageKind::Heartbeat { .. }
            | MessageKind::BootUp { .. }
            | MessageKind::Emergency { .. }
            | MessageKind::Tpdo { .. } => prop_assert!(alive || id & 0x7F == 0),
            MessageKind::NmtCommand
            | MessageKind::Sync
            | MessageKind::TimeStamp
            | MessageKind::SdoRequest { .. }
            | MessageKind::Rpdo { .. } => prop_assert!(!alive),
            MessageKind::Unknown => {}
        }
    }
}
