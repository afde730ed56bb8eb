//! Typed commands against the simulated firmware.

mod common;

use std::sync::Arc;

use common::{DEFAULT_NAME, FIRMWARE_VERSION, SimDevice};
use proptest::prelude::*;
use spd_core::protocol::constants::*;
use spd_core::{
    ClockMode, MockTransport, ModuleInfo, ModuleType, NullObserver, Pin, Programmer,
    ProgrammerConfig, RswpSupport, SpdError,
};

#[test]
fn test_device_identity() {
    let sim = SimDevice::ddr4();
    let c = sim.connect();
    assert!(c.programmer.ping().unwrap());
    assert_eq!(c.programmer.version().unwrap(), FIRMWARE_VERSION);
    assert_eq!(c.programmer.name().unwrap(), DEFAULT_NAME);
    assert_eq!(c.programmer.read_setting(3).unwrap(), 0xA5);
}

#[test]
fn test_name_and_factory_reset() {
    let sim = SimDevice::ddr4();
    let c = sim.connect();
    assert!(c.programmer.set_name("Bench 2").unwrap());
    assert_eq!(c.programmer.name().unwrap(), "Bench 2");

    assert!(c.programmer.set_clock_mode(ClockMode::Fast).unwrap());
    assert!(c.programmer.factory_reset().unwrap());
    assert_eq!(c.programmer.name().unwrap(), DEFAULT_NAME);
    assert_eq!(c.programmer.clock_mode().unwrap(), ClockMode::Standard);
}

#[test]
fn test_detection() {
    for (sim, expected) in [
        (SimDevice::ddr3(), ModuleInfo::new(0x50, ModuleType::Ddr3OrOther, 256)),
        (SimDevice::ddr4(), ModuleInfo::new(0x50, ModuleType::Ddr4, 512)),
        (SimDevice::ddr5(), ModuleInfo::new(0x50, ModuleType::Ddr5, 1024)),
    ] {
        let c = sim.connect();
        assert_eq!(c.programmer.detect_module(0x50).unwrap(), expected);
        assert_eq!(c.programmer.detect_module(0x51).unwrap(), ModuleInfo::not_detected(0x51));
    }
}

#[test]
fn test_detection_on_firmware_without_ddr5() {
    let sim = SimDevice::ddr4();
    sim.state().ddr5_detect_supported = false;
    let c = sim.connect();
    assert!(matches!(
        c.programmer.ddr5_detect(0x50),
        Err(SpdError::UnsupportedHardware { .. })
    ));
    assert_eq!(
        c.programmer.detect_module(0x50).unwrap().kind,
        ModuleType::Ddr4
    );
}

#[test]
fn test_scan_and_probe() {
    let sim = SimDevice::ddr5();
    sim.state().address = 0x53;
    sim.state().pmic = Some((0x4B, vec![0; 256]));
    let c = sim.connect();

    assert_eq!(c.programmer.scan_bus().unwrap(), vec![0x53]);
    assert!(c.programmer.probe_address(0x53).unwrap());
    assert!(c.programmer.probe_address(0x4B).unwrap());
    assert!(!c.programmer.probe_address(0x50).unwrap());
    assert!(c.programmer.probe_address(0x20).is_err());
}

#[test]
fn test_single_byte_access() {
    let sim = SimDevice::ddr3();
    let c = sim.connect();
    assert!(c.programmer.write_spd_byte(0x50, 0x10, 0xEE).unwrap());
    assert_eq!(c.programmer.read_spd_byte(0x50, 0x10).unwrap(), 0xEE);

    assert!(c.programmer.write_spd_page(0x50, 0x20, &[1, 2, 3, 4]).unwrap());
    assert_eq!(c.programmer.read_spd(0x50, 0x20, 4).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn test_read_past_end_is_device_failure() {
    let sim = SimDevice::ddr3();
    let c = sim.connect();
    assert!(matches!(
        c.programmer.read_spd(0x50, 250, 16),
        Err(SpdError::DeviceReportedFailure { .. })
    ));
}

#[test]
fn test_rswp_idempotence() {
    let sim = SimDevice::ddr5();
    let c = sim.connect();

    assert!(c.programmer.clear_rswp().unwrap());
    assert!(c.programmer.clear_rswp().unwrap());

    assert!(c.programmer.set_rswp(3).unwrap());
    assert!(c.programmer.get_rswp(3).unwrap());
    assert!(!c.programmer.get_rswp(4).unwrap());

    assert!(c.programmer.clear_rswp().unwrap());
    assert!(!c.programmer.get_rswp(3).unwrap());
    assert!(c.programmer.set_rswp(16).is_err());
}

#[test]
fn test_rswp_blocks_writes() {
    let sim = SimDevice::ddr5();
    let c = sim.connect();
    assert!(c.programmer.set_rswp(0).unwrap());
    assert!(!c.programmer.write_spd_byte(0x50, 5, 1).unwrap());
    assert!(c.programmer.clear_rswp().unwrap());
    assert!(c.programmer.write_spd_byte(0x50, 5, 1).unwrap());
}

#[test]
fn test_rswp_support_report() {
    let sim = SimDevice::ddr4();
    let c = sim.connect();
    let support = c.programmer.rswp_support().unwrap();
    assert_eq!(
        support,
        RswpSupport {
            ddr3: true,
            ddr4: true,
            ddr5: true
        }
    );

    sim.state().rswp_supported = false;
    assert!(!c.programmer.rswp_support().unwrap().supports(ModuleType::Ddr4));
}

#[test]
fn test_pswp_is_permanent() {
    let sim = SimDevice::ddr4();
    let c = sim.connect();
    assert!(c.programmer.test_write(0x50).unwrap());
    assert!(!c.programmer.get_pswp(0x50).unwrap());

    assert!(c.programmer.set_pswp(0x50).unwrap());
    assert!(c.programmer.get_pswp(0x50).unwrap());
    assert!(!c.programmer.test_write(0x50).unwrap());
    assert!(!c.programmer.write_spd_byte(0x50, 0, 0).unwrap());
}

#[test]
fn test_hub_registers() {
    let sim = SimDevice::ddr5();
    let c = sim.connect();
    assert!(c.programmer.write_hub_register(0x50, MR11_PAGE_SELECT, 4).unwrap());
    assert_eq!(c.programmer.read_hub_register(0x50, MR11_PAGE_SELECT).unwrap(), 4);

    assert!(c.programmer.write_hub_register(0x50, MR13_RSWP_HIGH, 0x80).unwrap());
    assert!(c.programmer.get_rswp(15).unwrap());

    c.mock.clear_writes();
    assert!(matches!(
        c.programmer.write_hub_register(0x50, 0x12, 0),
        Err(SpdError::InvalidArgument(_))
    ));
    assert!(c.mock.get_writes().is_empty());
}

#[test]
fn test_pmic_registers() {
    let sim = SimDevice::ddr5();
    sim.state().pmic = Some((0x48, (0..=255).collect()));
    let c = sim.connect();

    assert_eq!(c.programmer.read_pmic(0x48, 0x30, 4).unwrap(), vec![0x30, 0x31, 0x32, 0x33]);
    assert!(c.programmer.write_pmic(0x48, 0x30, 0).unwrap());
    assert_eq!(c.programmer.read_pmic(0x48, 0x30, 1).unwrap(), vec![0]);

    assert!(matches!(
        c.programmer.read_pmic(0x50, 0, 1),
        Err(SpdError::InvalidArgument(_))
    ));
}

#[test]
fn test_clock_and_pins() {
    let sim = SimDevice::ddr4();
    let c = sim.connect();

    assert_eq!(c.programmer.clock_mode().unwrap(), ClockMode::Standard);
    assert!(c.programmer.set_clock_mode(ClockMode::Fast).unwrap());
    assert_eq!(c.programmer.clock_mode().unwrap(), ClockMode::Fast);

    assert!(!c.programmer.get_pin(Pin::HighVoltage).unwrap());
    assert!(c.programmer.set_pin(Pin::HighVoltage, true).unwrap());
    assert!(c.programmer.get_pin(Pin::HighVoltage).unwrap());
    assert!(c.programmer.set_pin(Pin::Sa1, true).unwrap());

    assert!(c.programmer.reset_pins().unwrap());
    assert!(!c.programmer.get_pin(Pin::HighVoltage).unwrap());
    assert!(!c.programmer.get_pin(Pin::Sa1).unwrap());
    assert_eq!(sim.state().pins[9], 0);
}

#[test]
fn test_unsupported_opcode_not_retried() {
    let mock = MockTransport::new();
    mock.queue_reply(&[READY_MARKER]);
    let programmer = Programmer::connect(
        mock.clone(),
        ProgrammerConfig::for_testing(),
        Arc::new(NullObserver),
    )
    .unwrap();
    mock.clear_writes();
    mock.queue_reply(&[UNKNOWN_MARKER]);

    assert!(matches!(
        programmer.test_write(0x50),
        Err(SpdError::UnsupportedHardware { .. })
    ));
    assert_eq!(mock.get_writes().len(), 1);
}

fn non_spd_address() -> impl Strategy<Value = u8> {
    any::<u8>().prop_filter("outside SPD range", |a| !(0x50..=0x57).contains(a))
}

proptest! {
    #[test]
    fn spd_only_commands_reject_before_sending(address in non_spd_address()) {
        let sim = SimDevice::ddr4();
        let c = sim.connect();

        prop_assert!(matches!(c.programmer.read_spd(address, 0, 1), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.write_spd_byte(address, 0, 0), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.ddr4_detect(address), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.spd_size(address), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.set_pswp(address), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.read_hub_register(address, 0), Err(SpdError::InvalidArgument(_))));
        prop_assert!(matches!(c.programmer.detect_module(address), Err(SpdError::InvalidArgument(_))));
        prop_assert!(c.mock.get_writes().is_empty());
    }

    #[test]
    fn spd_addresses_accepted(address in 0x50u8..=0x57) {
        let sim = SimDevice::ddr4();
        sim.state().address = address;
        let c = sim.connect();
        let info = c.programmer.detect_module(address).unwrap();
        prop_assert_eq!(info, ModuleInfo::new(address, ModuleType::Ddr4, 512));
    }
}
