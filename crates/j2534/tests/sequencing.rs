mod common;

use std::ptr;

use common::MisreportingDriver;
use j2534::ffi::PassThruDriver;
use j2534::{
    device_state, voltage, ChannelDescriptor, ChannelId, ConnectFlags, DeviceId, ErrorCode,
    MockDriver, MockThing, PassThruClient, ProtocolId, Resource,
};

fn client(devices: usize) -> PassThruClient<MockDriver> {
    PassThruClient::with_driver(MockDriver::with_devices(devices))
}

fn assert_status<T: std::fmt::Debug>(result: j2534::Result<T>, code: ErrorCode) {
    match result {
        Err(e) => assert!(e.is(code), "expected {}, got {e}", code.name()),
        Ok(value) => panic!("expected {}, got Ok({value:?})", code.name()),
    }
}

fn can_pins() -> Resource {
    Resource::j1962(&[6, 14])
}

#[test]
fn test_scan_reports_registered_count() {
    for registered in 0..=2 {
        let client = client(registered);
        assert_eq!(client.scan_for_devices().unwrap(), registered as u32);
    }
}

#[test]
fn test_scan_devices_lists_every_thing() {
    let client = client(2);
    let devices = client.scan_devices().unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["passthru-1", "passthru-2"]);
    assert!(devices.iter().all(|d| d.is_available()));

    // Draining twice rescans each time.
    assert_eq!(client.scan_devices().unwrap().len(), 2);
}

#[test]
fn test_scan_devices_without_devices() {
    assert!(client(0).scan_devices().unwrap().is_empty());
}

#[test]
fn test_scan_devices_ignores_reported_count() {
    let client = PassThruClient::with_driver(MisreportingDriver {
        read_status: ErrorCode::Timeout,
    });
    assert_eq!(client.scan_for_devices().unwrap(), u32::MAX);
    assert!(client.scan_devices().unwrap().is_empty());
}

#[test]
fn test_get_next_device_before_scan() {
    assert_status(client(1).get_next_device(), ErrorCode::BufferEmpty);
}

#[test]
fn test_get_next_device_after_empty_scan() {
    let client = client(0);
    assert_eq!(client.scan_for_devices().unwrap(), 0);
    assert_status(client.get_next_device(), ErrorCode::BufferEmpty);
}

#[test]
fn test_get_next_device_past_scanned_count() {
    let client = client(1);
    client.scan_for_devices().unwrap();
    assert_eq!(client.get_next_device().unwrap().name, "passthru-1");
    assert_status(client.get_next_device(), ErrorCode::ExceededLimit);

    // A new scan rewinds the cursor.
    client.scan_for_devices().unwrap();
    assert!(client.get_next_device().is_ok());
}

#[test]
fn test_open_null_name() {
    assert_status(client(1).open(None), ErrorCode::NullParameter);
}

#[test]
fn test_open_null_device_id() {
    let driver = MockDriver::<u32>::with_devices(1);
    let name = std::ffi::CString::new("passthru-1").unwrap();
    let status = unsafe { driver.open(name.as_ptr(), ptr::null_mut()) };
    assert_eq!(status, ErrorCode::NullParameter.as_status());
}

#[test]
fn test_open_absent_device() {
    let client = client(1);
    assert_status(client.open(Some("passthru-9")), ErrorCode::DeviceNotConnected);

    client.driver().register(MockThing::new("bench").unplugged()).unwrap();
    assert_status(client.open(Some("bench")), ErrorCode::DeviceNotConnected);
}

#[test]
fn test_open_twice_is_device_in_use() {
    let client = client(1);
    client.open(Some("passthru-1")).unwrap();
    assert_status(client.open(Some("passthru-1")), ErrorCode::DeviceInUse);

    client.scan_for_devices().unwrap();
    assert_eq!(client.get_next_device().unwrap().availability, device_state::IN_USE);
}

#[test]
fn test_close_never_opened() {
    assert_status(client(1).close(DeviceId(1)), ErrorCode::DeviceNotOpen);
}

#[test]
fn test_close_unopened_id() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    assert_status(client.close(DeviceId(device.0 + 1)), ErrorCode::InvalidDeviceId);
    client.close(device).unwrap();
    assert_status(client.close(device), ErrorCode::DeviceNotOpen);
}

#[test]
fn test_connect_before_open() {
    let client = client(1);
    let result = client.connect(DeviceId(1), ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins());
    assert_status(result, ErrorCode::DeviceNotOpen);
}

#[test]
fn test_connect_after_open() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    let channel = client
        .connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins())
        .unwrap();
    assert_eq!(client.driver().channel_count(), 1);

    client.disconnect(channel).unwrap();
    assert_eq!(client.driver().channel_count(), 0);
}

#[test]
fn test_connect_validates_resources() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    client
        .connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins())
        .unwrap();

    let again = client.connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins());
    assert_status(again, ErrorCode::ResourceConflict);

    let bad_pin = client.connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &Resource::j1962(&[17]));
    assert_status(bad_pin, ErrorCode::PinNotSupported);

    let logical = client.connect(device, ProtocolId::Iso15765Logical, ConnectFlags::empty(), 500_000, &Resource::j1962(&[3, 11]));
    assert_status(logical, ErrorCode::ProtocolIdNotSupported);

    let no_baud = client.connect(device, ProtocolId::Can, ConnectFlags::empty(), 0, &Resource::j1962(&[3, 11]));
    assert_status(no_baud, ErrorCode::BaudrateNotSupported);
}

#[test]
fn test_disconnect_unknown_channel() {
    assert_status(client(1).disconnect(ChannelId(42)), ErrorCode::InvalidChannelId);
}

#[test]
fn test_close_releases_channels() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    let channel = client
        .connect(device, ProtocolId::Can, ConnectFlags::CAN_29BIT_ID, 250_000, &can_pins())
        .unwrap();
    client.close(device).unwrap();
    assert_eq!(client.driver().channel_count(), 0);
    assert_status(client.disconnect(channel), ErrorCode::InvalidChannelId);
}

#[test]
fn test_unplugged_device_is_not_connected() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    assert!(client.driver().unplug("passthru-1"));
    assert_status(client.read_version(device), ErrorCode::DeviceNotConnected);
}

#[test]
fn test_narrow_ulong_driver() {
    let client = PassThruClient::with_driver(MockDriver::<u32>::with_devices(1));
    let device = client.open(Some("passthru-1")).unwrap();
    let channel = client
        .connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins())
        .unwrap();
    client.disconnect(channel).unwrap();
    client.close(device).unwrap();
}

#[test]
fn test_read_version() {
    let client = client(0);
    let mut thing = MockThing::new("bench");
    thing.firmware_version = "2.4.1".to_string();
    client.driver().register(thing).unwrap();

    let device = client.open(Some("bench")).unwrap();
    let version = client.read_version(device).unwrap();
    assert_eq!(version.firmware_version, "2.4.1");
    assert_eq!(version.api_version, "05.00");
}

#[test]
fn test_last_error_describes_failure() {
    let client = client(1);
    assert!(client.close(DeviceId(3)).is_err());
    let text = client.get_last_error().unwrap();
    assert!(text.starts_with("PassThruClose"), "{text}");
}

#[test]
fn test_logical_channels() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    let can = client
        .connect(device, ProtocolId::Can, ConnectFlags::empty(), 500_000, &can_pins())
        .unwrap();
    let descriptor = ChannelDescriptor {
        local_tx_flags: 0,
        remote_tx_flags: 0,
        local_address: [0x00, 0x00, 0x07, 0xE0, 0x00],
        remote_address: [0x00, 0x00, 0x07, 0xE8, 0x00],
    };

    let logical = client
        .logical_connect(can, ProtocolId::Iso15765Logical, 0, &descriptor)
        .unwrap();
    assert_status(
        client.logical_connect(can, ProtocolId::Iso15765Logical, 0, &descriptor),
        ErrorCode::NotUnique,
    );
    assert_status(client.disconnect(logical), ErrorCode::InvalidChannelId);

    client.logical_disconnect(logical).unwrap();
    assert_status(client.logical_disconnect(logical), ErrorCode::InvalidChannelId);
}

#[test]
fn test_logical_channel_needs_can() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    let kline = client
        .connect(device, ProtocolId::Iso9141, ConnectFlags::K_LINE_ONLY, 10_400, &Resource::j1962(&[7]))
        .unwrap();
    let result = client.logical_connect(kline, ProtocolId::Iso15765Logical, 0, &ChannelDescriptor::default());
    assert_status(result, ErrorCode::LogChanNotAllowed);
}

#[test]
fn test_programming_voltage() {
    let client = client(1);
    let device = client.open(Some("passthru-1")).unwrap();
    let pin12 = Resource::j1962(&[12]);

    client.set_programming_voltage(device, &pin12, 18_000).unwrap();
    assert_eq!(client.driver().programming_voltage(device, 12), Some(18_000));
    assert_eq!(client.read_prog_voltage(device).unwrap(), 18_000);
    assert_eq!(client.read_voltage(device, &pin12).unwrap(), 18_000);
    assert_eq!(client.read_voltage(device, &Resource::j1962(&[16])).unwrap(), 12_600);

    assert_status(
        client.set_programming_voltage(device, &Resource::j1962(&[9]), 12_000),
        ErrorCode::VoltageInUse,
    );
    assert_status(
        client.set_programming_voltage(device, &pin12, 30_000),
        ErrorCode::ExceededLimit,
    );

    client.set_programming_voltage(device, &pin12, voltage::PIN_OFF).unwrap();
    assert_eq!(client.driver().programming_voltage(device, 12), None);
    assert_eq!(client.read_prog_voltage(device).unwrap(), 0);
}
