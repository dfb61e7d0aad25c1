//! End-to-end scenarios against the scripted bus: the tool drives the same
//! code paths the CLI does, with a manual clock so the timing-heavy
//! sequences finish instantly.

use std::time::Duration;

use canopen_rs::can::mock::MockCanBus;
use canopen_rs::canopen::arbiter::ControlSource;
use canopen_rs::canopen::classifier::{FilterClass, MonitorFilter};
use canopen_rs::canopen::client::{
    CanOpenClient, NmtCommand, NmtTarget, NodeAddress, PersistenceStatus, SdoSize,
};
use canopen_rs::error::CanOpenError;
use canopen_rs::settings::Settings;
use canopen_rs::tool::DiagnosticTool;
use canopen_rs::util::clock::{Clock, ManualClock};
use canopen_rs::CanFrame;

fn harness() -> (DiagnosticTool, MockCanBus, ManualClock) {
    let bus = MockCanBus::new();
    let clock = ManualClock::new();
    let client = CanOpenClient::with_clock(Box::new(bus.clone()), Box::new(clock.clone()));
    let mut tool = DiagnosticTool::with_client(Settings::default(), client);
    tool.connect().unwrap();
    (tool, bus, clock)
}

fn node(raw: u8) -> NodeAddress {
    NodeAddress::try_from(raw).unwrap()
}

#[test]
fn scan_then_interrogate_the_found_node() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(3, 0x0002_0192);

    let found = tool.scan(node(1), node(5)).unwrap();
    assert_eq!(found, vec![3]);

    tool.claim_command_line();
    let device_type = tool.read_parameter(node(3), 0x1000, 0).unwrap();
    assert_eq!(device_type, 0x0002_0192);
}

#[test]
fn readdress_a_node_and_reach_it_under_the_new_address() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(5, 0x00);
    bus.bootup_after_reset(9);

    tool.claim_command_line();
    let outcome = tool.change_node_address(node(5), node(9), true).unwrap();
    assert_eq!(outcome.persistence, PersistenceStatus::Stored);

    // The transaction went through the documented sequence on the wire.
    let sent = bus.sent();
    let to_node_5: Vec<&[u8]> = sent.iter().filter(|f| f.id() == 0x605).map(|f| f.data()).collect();
    assert_eq!(to_node_5[0][0], 0x40); // reachability probe
    assert_eq!(&to_node_5[1][..4], &[0x23, 0x00, 0x20, 0x01]); // unlock
    assert_eq!(&to_node_5[2][..4], &[0x23, 0x00, 0x20, 0x02]); // new address
    assert_eq!(&to_node_5[3][..4], &[0x23, 0x10, 0x10, 0x02]); // store

    // Reach the device at its new home.
    bus.respond_sdo(9, 0x42);
    assert_eq!(tool.read_parameter(node(9), 0x1001, 0).unwrap(), 0x42);
}

#[test]
fn readdress_without_persist_skips_the_store_object() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(5, 0x00);
    bus.bootup_after_reset(9);

    tool.claim_command_line();
    let outcome = tool.change_node_address(node(5), node(9), false).unwrap();
    assert_eq!(outcome.persistence, PersistenceStatus::NotRequested);

    let touched_store = bus
        .sent()
        .iter()
        .any(|f| f.id() == 0x605 && f.data().len() >= 3 && f.data()[1] == 0x10 && f.data()[2] == 0x10);
    assert!(!touched_store);
}

#[test]
fn detection_then_scan_runs_at_the_detected_rate() {
    let (mut tool, bus, _clock) = harness();
    bus.chatter_at(125);
    bus.respond_sdo(1, 7);

    let rate = tool.detect_bitrate().unwrap();
    assert_eq!(rate, 125);
    assert_eq!(bus.open_bitrate(), Some(125));

    let found = tool.scan(node(1), node(2)).unwrap();
    // Node 1 answers probes, and the chatter heartbeat also names node 1.
    assert_eq!(found, vec![1]);
}

#[test]
fn automation_reverts_to_the_command_holder() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(2, 1);

    tool.claim_command_line();
    tool.scan(node(1), node(2)).unwrap();
    // Reverted to the command-line holder, so a follow-up command works.
    assert_eq!(tool.arbiter().active(), ControlSource::Command);
    assert_eq!(tool.read_parameter(node(2), 0x1001, 0).unwrap(), 1);
}

#[test]
fn nmt_commands_hit_the_wire_unanswered() {
    let (mut tool, bus, _clock) = harness();
    tool.claim_command_line();
    tool.send_nmt(NmtCommand::Stop, NmtTarget::All).unwrap();
    tool.send_nmt(NmtCommand::ResetCommunication, NmtTarget::Node(node(6)))
        .unwrap();

    let sent = bus.sent();
    assert_eq!(sent[0].data(), &[0x02, 0x00]);
    assert_eq!(sent[1].data(), &[0x82, 0x06]);
}

#[test]
fn aborting_node_still_counts_as_reachable() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(4, 0);
    bus.abort_on_index(0x1001, 0x0602_0000);

    tool.claim_command_line();
    assert!(tool.test_node(node(4)).unwrap());

    let err = tool.read_parameter(node(4), 0x1001, 0).unwrap_err();
    assert!(matches!(err, CanOpenError::ProtocolAbort { code: 0x0602_0000 }));
}

#[test]
fn write_then_read_back_through_the_tool() {
    let (mut tool, bus, _clock) = harness();
    bus.respond_sdo(7, 0x55);

    tool.claim_command_line();
    tool.write_parameter(node(7), 0x2100, 1, 0x55, SdoSize::One)
        .unwrap();
    assert_eq!(tool.read_parameter(node(7), 0x2100, 1).unwrap(), 0x55);
}

#[test]
fn monitor_decodes_filtered_traffic() {
    let (mut tool, bus, _clock) = harness();
    bus.queue_frame(CanFrame::new(0x185, &[0xAA, 0xBB]).unwrap());
    bus.queue_frame(CanFrame::new(0x703, &[0x7F]).unwrap());
    bus.queue_frame(CanFrame::new(0x085, &[0x10, 0x21]).unwrap());

    let filter = MonitorFilter {
        class: FilterClass::Heartbeat,
        ..Default::default()
    };
    let (frame, text) = tool.monitor_once(&filter).unwrap();
    assert_eq!(frame.id(), 0x703);
    assert_eq!(text, "[Heartbeat from node 3] (pre-operational)");
    assert!(tool.monitor_once(&filter).is_none());
}

#[test]
fn change_to_a_silent_address_reports_the_ambiguity() {
    let (mut tool, bus, clock) = harness();
    bus.respond_sdo(5, 0x00);
    // No boot-up scripted: the node never shows up under address 9.

    tool.claim_command_line();
    let err = tool.change_node_address(node(5), node(9), false).unwrap_err();
    assert!(matches!(err, CanOpenError::NewAddressSilent(9)));
    // The wait consumed the heartbeat budget rather than bailing early.
    assert!(clock.now() >= Duration::from_millis(5000));
}
