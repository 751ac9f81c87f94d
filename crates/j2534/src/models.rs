//! PassThru Model Objects
//!
//! Plain value types exchanged with the client. None of them hold native
//! memory; the codec copies them in and out of native structures per call.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{connector, device_state, IoctlShape, ProtocolId, RxStatus, TxFlags};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// The native handle value
            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle!(
    /// Device handle issued by `PassThruOpen`
    DeviceId
);
handle!(
    /// Channel handle issued by `PassThruConnect` or `PassThruLogicalConnect`
    ChannelId
);
handle!(
    /// Filter handle issued by `PassThruStartMsgFilter`
    FilterId
);
handle!(
    /// Periodic message handle issued by `PassThruStartPeriodicMsg`
    PeriodicMsgId
);

/// A discovered PassThru interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device name, at most 79 bytes so it stays NUL-terminated
    pub name: String,
    pub availability: u32,
    pub dll_fw_status: u32,
    pub connect_media: u32,
    pub connect_speed: u32,
    pub signal_quality: u32,
    pub signal_strength: u32,
}

impl Device {
    pub fn is_available(&self) -> bool {
        self.availability == device_state::AVAILABLE
    }

    pub fn is_in_use(&self) -> bool {
        self.availability == device_state::IN_USE
    }
}

/// A group of connector pins used when opening a channel or applying voltage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub connector: u32,
    /// Pin numbers on the connector
    pub resources: Vec<u32>,
}

impl Resource {
    /// The J1962 diagnostic connector with the given pins
    pub fn j1962(pins: &[u32]) -> Self {
        Self {
            connector: connector::J1962,
            resources: pins.to_vec(),
        }
    }

    pub fn num_of_resources(&self) -> usize {
        self.resources.len()
    }
}

/// Channels waited on by `PassThruSelect`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet {
    /// Number of channels that must be ready before the call returns
    pub channel_threshold: u32,
    pub channels: Vec<ChannelId>,
}

impl ChannelSet {
    pub fn new(channels: Vec<ChannelId>, channel_threshold: u32) -> Self {
        Self {
            channel_threshold,
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// One protocol frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub protocol_id: u32,
    pub msg_handle: u32,
    pub rx_status: u32,
    pub tx_flags: u32,
    /// Receive timestamp in microseconds
    pub timestamp: u32,
    pub extra_data_index: u32,
    pub data: Vec<u8>,
    /// Capacity of the native data buffer; never less than `data.len()`
    pub data_buffer_size: u32,
}

impl Message {
    /// An outgoing frame whose buffer is exactly the payload
    pub fn new(protocol: ProtocolId, data: &[u8]) -> Self {
        Self {
            protocol_id: protocol.as_raw(),
            data: data.to_vec(),
            data_buffer_size: data.len() as u32,
            extra_data_index: data.len() as u32,
            ..Default::default()
        }
    }

    /// An empty frame with room for `capacity` payload bytes, for receiving
    pub fn with_capacity(protocol_id: u32, capacity: u32) -> Self {
        Self {
            protocol_id,
            data_buffer_size: capacity,
            ..Default::default()
        }
    }

    pub fn with_tx_flags(mut self, flags: TxFlags) -> Self {
        self.tx_flags = flags.bits();
        self
    }

    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    pub fn protocol(&self) -> Option<ProtocolId> {
        ProtocolId::from_raw(self.protocol_id)
    }

    pub fn rx_flags(&self) -> RxStatus {
        RxStatus::from_bits_retain(self.rx_status)
    }

    /// Whether this is an echo of a frame this client transmitted
    pub fn is_echo(&self) -> bool {
        self.rx_flags().contains(RxStatus::TX_MSG_TYPE)
    }
}

/// Version strings reported by `PassThruReadVersion`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub firmware_version: String,
    pub dll_version: String,
    pub api_version: String,
}

/// One `GET_CONFIG` / `SET_CONFIG` entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParam {
    pub parameter: u32,
    pub value: u32,
}

impl ConfigParam {
    pub fn new(parameter: u32, value: u32) -> Self {
        Self { parameter, value }
    }
}

/// Addressing of an ISO 15765 logical channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub local_tx_flags: u32,
    pub remote_tx_flags: u32,
    pub local_address: [u8; 5],
    pub remote_address: [u8; 5],
}

/// Input of a `PassThruIoctl` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlInput {
    None,
    ConfigList(Vec<ConfigParam>),
    Bytes(Vec<u8>),
    Message(Message),
    Resource(Resource),
}

impl IoctlInput {
    pub fn shape(&self) -> IoctlShape {
        match self {
            IoctlInput::None => IoctlShape::None,
            IoctlInput::ConfigList(_) => IoctlShape::ConfigList,
            IoctlInput::Bytes(_) => IoctlShape::Bytes,
            IoctlInput::Message(_) => IoctlShape::Message,
            IoctlInput::Resource(_) => IoctlShape::Resource,
        }
    }
}

/// Output of a `PassThruIoctl` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlOutput {
    None,
    ConfigList(Vec<ConfigParam>),
    Bytes(Vec<u8>),
    Message(Message),
    /// Millivolts
    Voltage(u32),
}

impl IoctlOutput {
    pub fn shape(&self) -> IoctlShape {
        match self {
            IoctlOutput::None => IoctlShape::None,
            IoctlOutput::ConfigList(_) => IoctlShape::ConfigList,
            IoctlOutput::Bytes(_) => IoctlShape::Bytes,
            IoctlOutput::Message(_) => IoctlShape::Message,
            IoctlOutput::Voltage(_) => IoctlShape::Voltage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_sizes_buffer_to_payload() {
        let msg = Message::new(ProtocolId::Can, &[0x00, 0x00, 0x07, 0xDF, 0x02, 0x01, 0x0C]);
        assert_eq!(msg.protocol_id, 0x05);
        assert_eq!(msg.data_length(), 7);
        assert_eq!(msg.data_buffer_size, 7);
        assert_eq!(msg.protocol(), Some(ProtocolId::Can));
    }

    #[test]
    fn test_echo_flag() {
        let mut msg = Message::with_capacity(ProtocolId::Can.as_raw(), 12);
        assert!(!msg.is_echo());
        msg.rx_status = RxStatus::TX_MSG_TYPE.bits();
        assert!(msg.is_echo());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(ChannelId(3).to_string(), "3");
        assert_eq!(DeviceId(1).raw(), 1);
    }

    #[test]
    fn test_resource_j1962() {
        let resource = Resource::j1962(&[6, 14]);
        assert_eq!(resource.connector, connector::J1962);
        assert_eq!(resource.num_of_resources(), 2);
    }
}
