use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use j2534::ffi::PassThruDriver;
use j2534::{
    ChannelId, ConnectFlags, Device, DeviceId, ErrorCode, FilterType, Message, MockDriver, MockThing,
    PassThruClient, ProtocolId, Resource,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the PassThru interfaces the library can see
    Scan,
    /// Print firmware, DLL and API versions of a device
    Version(VersionArgs),
    /// Print messages received on a channel
    Monitor(MonitorArgs),
    /// Print the PassThru status code table
    Errors,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Device name as reported by `scan`
    pub device: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Device name as reported by `scan`
    pub device: String,

    #[arg(long, value_enum, default_value = "can")]
    pub protocol: Protocol,

    /// Bus bit rate; defaults to the protocol's usual rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Stop after this many messages
    #[arg(long, default_value_t = 100)]
    pub count: usize,

    /// Stop after this many consecutive reads return nothing
    #[arg(long, default_value_t = 3)]
    pub idle_reads: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    J1850vpw,
    J1850pwm,
    Iso9141,
    Iso14230,
    Can,
    J2610,
}

impl Protocol {
    pub fn id(self) -> ProtocolId {
        match self {
            Protocol::J1850vpw => ProtocolId::J1850Vpw,
            Protocol::J1850pwm => ProtocolId::J1850Pwm,
            Protocol::Iso9141 => ProtocolId::Iso9141,
            Protocol::Iso14230 => ProtocolId::Iso14230,
            Protocol::Can => ProtocolId::Can,
            Protocol::J2610 => ProtocolId::J2610,
        }
    }

    /// J1962 pins the protocol is wired to
    pub fn pins(self) -> &'static [u32] {
        match self {
            Protocol::J1850vpw => &[2],
            Protocol::J1850pwm => &[2, 10],
            Protocol::Iso9141 | Protocol::Iso14230 | Protocol::J2610 => &[7],
            Protocol::Can => &[6, 14],
        }
    }

    /// Width of the mask and pattern of a filter admitting everything
    fn header_len(self) -> usize {
        match self {
            Protocol::Can => 4,
            _ => 1,
        }
    }
}

/// An emulated library with `count` devices replaying a short OBD exchange
pub fn mock_driver(count: usize) -> Result<MockDriver> {
    let driver = MockDriver::new();
    for i in 1..=count {
        let traffic = vec![
            Message::new(ProtocolId::Can, &[0x00, 0x00, 0x07, 0xE8, 0x04, 0x41, 0x0C, 0x1A, 0xF8]),
            Message::new(ProtocolId::Can, &[0x00, 0x00, 0x07, 0xE8, 0x03, 0x41, 0x0D, 0x32]),
            Message::new(ProtocolId::Can, &[0x00, 0x00, 0x07, 0xE8, 0x03, 0x41, 0x05, 0x7B]),
        ];
        driver.register(MockThing::new(format!("passthru-{i}")).with_traffic(traffic))?;
    }
    Ok(driver)
}

pub fn run<D: PassThruDriver>(client: &PassThruClient<D>, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Scan => scan(client, json),
        Command::Version(args) => version(client, &args.device, json),
        Command::Monitor(args) => monitor(client, &args, json),
        Command::Errors => errors(json),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn scan<D: PassThruDriver>(client: &PassThruClient<D>, json: bool) -> Result<()> {
    let devices = client.scan_devices().context("device scan failed")?;
    if json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No PassThru devices found");
        return Ok(());
    }
    println!("{:<32} {:<10} {:>10} {:>8}", "NAME", "STATE", "SPEED", "SIGNAL");
    for device in &devices {
        println!(
            "{:<32} {:<10} {:>10} {:>8}",
            device.name,
            availability(device),
            device.connect_speed,
            device.signal_strength
        );
    }
    Ok(())
}

fn availability(device: &Device) -> &'static str {
    if device.is_in_use() {
        "in use"
    } else if device.is_available() {
        "available"
    } else {
        "unknown"
    }
}

fn version<D: PassThruDriver>(client: &PassThruClient<D>, name: &str, json: bool) -> Result<()> {
    let device = client
        .open(Some(name))
        .with_context(|| format!("failed to open {name}"))?;
    let versions = client.read_version(device);
    close(client, device);

    let versions = versions.context("failed to read versions")?;
    if json {
        return print_json(&versions);
    }
    println!("Firmware: {}", versions.firmware_version);
    println!("DLL:      {}", versions.dll_version);
    println!("API:      {}", versions.api_version);
    Ok(())
}

fn close<D: PassThruDriver>(client: &PassThruClient<D>, device: DeviceId) {
    if let Err(e) = client.close(device) {
        warn!(device = %device, error = %e, "Failed to close device");
    }
}

fn monitor<D: PassThruDriver>(client: &PassThruClient<D>, args: &MonitorArgs, json: bool) -> Result<()> {
    let device = client
        .open(Some(&args.device))
        .with_context(|| format!("failed to open {}", args.device))?;
    let result = monitor_device(client, device, args, json);
    close(client, device);
    result
}

fn monitor_device<D: PassThruDriver>(
    client: &PassThruClient<D>,
    device: DeviceId,
    args: &MonitorArgs,
    json: bool,
) -> Result<()> {
    let protocol = args.protocol.id();
    let baud = args.baud.unwrap_or_else(|| protocol.default_baud_rate());
    let channel = client
        .connect(device, protocol, ConnectFlags::empty(), baud, &Resource::j1962(args.protocol.pins()))
        .with_context(|| format!("failed to connect {protocol:?} at {baud} baud"))?;
    info!(channel = %channel, ?protocol, baud, "Monitoring channel");

    let header = vec![0u8; args.protocol.header_len()];
    let pass_all = Message::new(protocol, &header);
    let result = client
        .start_msg_filter(channel, FilterType::Pass, &pass_all, &pass_all)
        .context("failed to install pass filter")
        .and_then(|_| read_loop(client, channel, args, json));

    if let Err(e) = client.disconnect(channel) {
        warn!(channel = %channel, error = %e, "Failed to disconnect channel");
    }
    result
}

fn read_loop<D: PassThruDriver>(
    client: &PassThruClient<D>,
    channel: ChannelId,
    args: &MonitorArgs,
    json: bool,
) -> Result<()> {
    let mut seen = 0;
    let mut idle = 0;
    while seen < args.count && idle < args.idle_reads {
        let messages = match client.read_batch(channel) {
            Ok(messages) => messages,
            Err(e) if e.is(ErrorCode::Timeout) || e.is(ErrorCode::BufferEmpty) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if messages.is_empty() {
            idle += 1;
            debug!(channel = %channel, idle, "No messages");
            continue;
        }
        idle = 0;
        for message in messages.iter().take(args.count - seen) {
            if json {
                println!("{}", serde_json::to_string(message)?);
            } else {
                println!("{}", format_message(message));
            }
        }
        seen += messages.len().min(args.count - seen);
    }
    info!(channel = %channel, seen, "Monitor finished");
    Ok(())
}

pub fn format_message(message: &Message) -> String {
    let data: Vec<String> = message.data.iter().map(|b| format!("{b:02X}")).collect();
    let direction = if message.is_echo() { "TX" } else { "RX" };
    format!("{:>10} {direction} {}", message.timestamp, data.join(" "))
}

#[derive(Serialize)]
struct StatusRow {
    code: i64,
    name: &'static str,
    description: String,
}

fn errors(json: bool) -> Result<()> {
    let rows: Vec<StatusRow> = ErrorCode::ALL
        .iter()
        .map(|code| StatusRow {
            code: code.code(),
            name: code.name(),
            description: code.description(),
        })
        .collect();
    if json {
        return print_json(&rows).context("failed to encode status table");
    }
    for row in rows {
        println!("0x{:02X} {:<32} {}", row.code, row.name, row.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message() {
        let mut message = Message::new(ProtocolId::Can, &[0x00, 0x00, 0x07, 0xE8, 0x41]);
        message.timestamp = 1000;
        assert_eq!(format_message(&message), "      1000 RX 00 00 07 E8 41");
    }

    #[test]
    fn test_monitor_reads_mock_traffic() {
        let client = PassThruClient::with_driver(mock_driver(1).unwrap());
        let args = MonitorArgs {
            device: "passthru-1".to_string(),
            protocol: Protocol::Can,
            baud: None,
            count: 2,
            idle_reads: 1,
        };
        monitor(&client, &args, false).unwrap();
        assert_eq!(client.driver().open_device_count(), 0);
        assert_eq!(client.driver().channel_count(), 0);
    }

    #[test]
    fn test_errors_table() {
        errors(false).unwrap();
        errors(true).unwrap();
    }

    #[test]
    fn test_version_of_missing_device() {
        let client = PassThruClient::with_driver(mock_driver(1).unwrap());
        assert!(version(&client, "passthru-7", false).is_err());
    }
}
