//! J2534 Protocol Definitions

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Vehicle network protocols accepted by `PassThruConnect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolId {
    /// SAE J1850 VPW (GM / Chrysler Class 2)
    J1850Vpw,
    /// SAE J1850 PWM (Ford SCP)
    J1850Pwm,
    /// ISO 9141 and ISO 9141-2
    Iso9141,
    /// ISO 14230 (Keyword Protocol 2000)
    Iso14230,
    /// Raw CAN frames, no transport layer
    Can,
    /// SAE J2610 (Chrysler SCI)
    J2610,
    /// ISO 15765 logical channel on top of a CAN channel
    Iso15765Logical,
}

impl ProtocolId {
    /// Native protocol id
    pub fn as_raw(&self) -> u32 {
        match self {
            ProtocolId::J1850Vpw => 0x0000_0001,
            ProtocolId::J1850Pwm => 0x0000_0002,
            ProtocolId::Iso9141 => 0x0000_0003,
            ProtocolId::Iso14230 => 0x0000_0004,
            ProtocolId::Can => 0x0000_0005,
            ProtocolId::J2610 => 0x0000_0007,
            ProtocolId::Iso15765Logical => 0x0000_0200,
        }
    }

    /// Look up a native protocol id
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0000_0001 => Some(ProtocolId::J1850Vpw),
            0x0000_0002 => Some(ProtocolId::J1850Pwm),
            0x0000_0003 => Some(ProtocolId::Iso9141),
            0x0000_0004 => Some(ProtocolId::Iso14230),
            0x0000_0005 => Some(ProtocolId::Can),
            0x0000_0007 => Some(ProtocolId::J2610),
            0x0000_0200 => Some(ProtocolId::Iso15765Logical),
            _ => None,
        }
    }

    /// Check if this is a CAN protocol
    pub fn is_can(&self) -> bool {
        matches!(self, ProtocolId::Can | ProtocolId::Iso15765Logical)
    }

    /// Whether channels of this protocol are opened with `PassThruLogicalConnect`
    pub fn is_logical(&self) -> bool {
        matches!(self, ProtocolId::Iso15765Logical)
    }

    /// Get the usual bus bit rate for this protocol
    pub fn default_baud_rate(&self) -> u32 {
        match self {
            ProtocolId::J1850Vpw => 10_400,
            ProtocolId::J1850Pwm => 41_600,
            ProtocolId::Iso9141 | ProtocolId::Iso14230 => 10_400,
            ProtocolId::Can | ProtocolId::Iso15765Logical => 500_000,
            ProtocolId::J2610 => 7_812,
        }
    }
}

bitflags! {
    /// `Flags` argument of `PassThruConnect`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConnectFlags: u32 {
        const FULL_DUPLEX = 1 << 0;
        const CAN_29BIT_ID = 1 << 8;
        const CHECKSUM_DISABLED = 1 << 9;
        const CAN_ID_BOTH = 1 << 11;
        const K_LINE_ONLY = 1 << 12;
    }
}

bitflags! {
    /// `TxFlags` of an outgoing message
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TxFlags: u32 {
        const ISO15765_FRAME_PAD = 0x0000_0040;
        const ISO15765_ADDR_TYPE = 0x0000_0080;
        const CAN_29BIT_ID = 0x0000_0100;
        const WAIT_P3_MIN_ONLY = 0x0000_0200;
        const SW_CAN_HV_TX = 0x0000_0400;
        const SCI_MODE = 0x0040_0000;
        const SCI_TX_VOLTAGE = 0x0080_0000;
    }
}

bitflags! {
    /// `RxStatus` of a received message
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RxStatus: u32 {
        /// Message is an echo of a transmitted frame
        const TX_MSG_TYPE = 0x0000_0001;
        const START_OF_MESSAGE = 0x0000_0002;
        const RX_BREAK = 0x0000_0004;
        const TX_INDICATION = 0x0000_0008;
        const ISO15765_PADDING_ERROR = 0x0000_0010;
        const ISO15765_ADDR_TYPE = 0x0000_0080;
        const CAN_29BIT_ID = 0x0000_0100;
    }
}

/// Message filter kinds for `PassThruStartMsgFilter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    /// Allow matching messages into the receive queue
    Pass,
    /// Keep matching messages out of the receive queue
    Block,
}

impl FilterType {
    pub fn as_raw(&self) -> u32 {
        match self {
            FilterType::Pass => 0x0000_0001,
            FilterType::Block => 0x0000_0002,
        }
    }
}

/// Readiness condition waited on by `PassThruSelect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectType {
    /// At least one message is waiting in the receive queue
    Readable,
}

impl SelectType {
    pub fn as_raw(&self) -> u32 {
        match self {
            SelectType::Readable => 0x0000_0001,
        }
    }
}

/// Control requests for `PassThruIoctl`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoctlId {
    GetConfig,
    SetConfig,
    ReadPinVoltage,
    FiveBaudInit,
    FastInit,
    ClearTxQueue,
    ClearRxQueue,
    ClearPeriodicMsgs,
    ClearMsgFilters,
    ClearFunctMsgLookupTable,
    AddToFunctMsgLookupTable,
    DeleteFromFunctMsgLookupTable,
    ReadProgVoltage,
    BusOn,
}

impl IoctlId {
    pub fn as_raw(&self) -> u32 {
        match self {
            IoctlId::GetConfig => 0x01,
            IoctlId::SetConfig => 0x02,
            IoctlId::ReadPinVoltage => 0x03,
            IoctlId::FiveBaudInit => 0x04,
            IoctlId::FastInit => 0x05,
            IoctlId::ClearTxQueue => 0x07,
            IoctlId::ClearRxQueue => 0x08,
            IoctlId::ClearPeriodicMsgs => 0x09,
            IoctlId::ClearMsgFilters => 0x0A,
            IoctlId::ClearFunctMsgLookupTable => 0x0B,
            IoctlId::AddToFunctMsgLookupTable => 0x0C,
            IoctlId::DeleteFromFunctMsgLookupTable => 0x0D,
            IoctlId::ReadProgVoltage => 0x0E,
            IoctlId::BusOn => 0x0F,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x01 => Some(IoctlId::GetConfig),
            0x02 => Some(IoctlId::SetConfig),
            0x03 => Some(IoctlId::ReadPinVoltage),
            0x04 => Some(IoctlId::FiveBaudInit),
            0x05 => Some(IoctlId::FastInit),
            0x07 => Some(IoctlId::ClearTxQueue),
            0x08 => Some(IoctlId::ClearRxQueue),
            0x09 => Some(IoctlId::ClearPeriodicMsgs),
            0x0A => Some(IoctlId::ClearMsgFilters),
            0x0B => Some(IoctlId::ClearFunctMsgLookupTable),
            0x0C => Some(IoctlId::AddToFunctMsgLookupTable),
            0x0D => Some(IoctlId::DeleteFromFunctMsgLookupTable),
            0x0E => Some(IoctlId::ReadProgVoltage),
            0x0F => Some(IoctlId::BusOn),
            _ => None,
        }
    }

    /// Shape of the `pInput` argument this request expects
    pub fn input_shape(&self) -> IoctlShape {
        match self {
            IoctlId::GetConfig | IoctlId::SetConfig => IoctlShape::ConfigList,
            IoctlId::ReadPinVoltage => IoctlShape::Resource,
            IoctlId::FiveBaudInit
            | IoctlId::AddToFunctMsgLookupTable
            | IoctlId::DeleteFromFunctMsgLookupTable => IoctlShape::Bytes,
            IoctlId::FastInit => IoctlShape::Message,
            IoctlId::ClearTxQueue
            | IoctlId::ClearRxQueue
            | IoctlId::ClearPeriodicMsgs
            | IoctlId::ClearMsgFilters
            | IoctlId::ClearFunctMsgLookupTable
            | IoctlId::ReadProgVoltage
            | IoctlId::BusOn => IoctlShape::None,
        }
    }

    /// Shape of the `pOutput` argument this request fills
    pub fn output_shape(&self) -> IoctlShape {
        match self {
            IoctlId::GetConfig => IoctlShape::ConfigList,
            IoctlId::ReadPinVoltage | IoctlId::ReadProgVoltage => IoctlShape::Voltage,
            IoctlId::FiveBaudInit => IoctlShape::Bytes,
            IoctlId::FastInit => IoctlShape::Message,
            _ => IoctlShape::None,
        }
    }
}

/// Argument shapes carried through the untyped ioctl pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlShape {
    None,
    ConfigList,
    Bytes,
    Message,
    Resource,
    Voltage,
}

impl IoctlShape {
    pub fn name(&self) -> &'static str {
        match self {
            IoctlShape::None => "no argument",
            IoctlShape::ConfigList => "a configuration list",
            IoctlShape::Bytes => "a byte array",
            IoctlShape::Message => "a message",
            IoctlShape::Resource => "a resource",
            IoctlShape::Voltage => "a voltage",
        }
    }
}

/// Parameters read and written by `GET_CONFIG` / `SET_CONFIG`
pub mod config_param {
    pub const DATA_RATE: u32 = 0x01;
    pub const LOOPBACK: u32 = 0x03;
    pub const NODE_ADDRESS: u32 = 0x04;
    pub const NETWORK_LINE: u32 = 0x05;
    pub const P1_MIN: u32 = 0x06;
    pub const P1_MAX: u32 = 0x07;
    pub const P2_MIN: u32 = 0x08;
    pub const P2_MAX: u32 = 0x09;
    pub const P3_MIN: u32 = 0x0A;
    pub const P3_MAX: u32 = 0x0B;
    pub const P4_MIN: u32 = 0x0C;
    pub const P4_MAX: u32 = 0x0D;
    pub const W1_MAX: u32 = 0x0E;
    pub const W2_MAX: u32 = 0x0F;
    pub const W3_MAX: u32 = 0x10;
    pub const W4_MIN: u32 = 0x11;
    pub const W5_MIN: u32 = 0x12;
    pub const TIDLE: u32 = 0x13;
    pub const TINIL: u32 = 0x14;
    pub const TWUP: u32 = 0x15;
    pub const PARITY: u32 = 0x16;
    pub const W0_MIN: u32 = 0x19;
    pub const T1_MAX: u32 = 0x1A;
    pub const T2_MIN: u32 = 0x1B;
    pub const T4_MAX: u32 = 0x1C;
    pub const T5_MIN: u32 = 0x1D;
    pub const ISO15765_BS: u32 = 0x1E;
    pub const ISO15765_STMIN: u32 = 0x1F;
    pub const DATA_BITS: u32 = 0x20;
    pub const FIVE_BAUD_MOD: u32 = 0x21;
    pub const BS_TX: u32 = 0x22;
    pub const STMIN_TX: u32 = 0x23;
    pub const T3_MAX: u32 = 0x24;
    pub const ISO15765_WAIT_LIMIT: u32 = 0x25;
    pub const W1_MIN: u32 = 0x26;
    pub const W2_MIN: u32 = 0x27;
    pub const W3_MIN: u32 = 0x28;
    pub const W4_MAX: u32 = 0x29;
    pub const N_BR_MIN: u32 = 0x2A;
    pub const ISO15765_PAD_VALUE: u32 = 0x2B;
    pub const N_AS_MAX: u32 = 0x2C;
    pub const N_AR_MAX: u32 = 0x2D;
    pub const N_BS_MAX: u32 = 0x2E;
    pub const N_CR_MAX: u32 = 0x2F;
    pub const N_CS_MIN: u32 = 0x30;
    pub const ECHO_PHYSICAL_CHANNEL_TX: u32 = 0x31;

    /// Whether the id names a parameter defined by J2534-1
    pub fn is_defined(param: u32) -> bool {
        matches!(param, DATA_RATE | LOOPBACK..=PARITY | W0_MIN..=ECHO_PHYSICAL_CHANNEL_TX)
    }
}

/// `SDEVICE.DeviceAvailable`
pub mod device_state {
    pub const UNKNOWN: u32 = 0;
    pub const AVAILABLE: u32 = 1;
    pub const IN_USE: u32 = 2;
}

/// `SDEVICE.DeviceDLLFWStatus`
pub mod dll_fw_status {
    pub const UNKNOWN: u32 = 0;
    pub const COMPATIBLE: u32 = 1;
    pub const DLL_FW_UPDATE_RECOMMENDED: u32 = 2;
    pub const DLL_UPDATE_REQUIRED: u32 = 3;
    pub const FW_UPDATE_REQUIRED: u32 = 4;
}

/// `SDEVICE.DeviceConnectMedia`
pub mod connect_media {
    pub const UNKNOWN: u32 = 0;
    pub const WIRELESS: u32 = 1;
    pub const WIRED: u32 = 2;
}

/// `RESOURCE_STRUCT.Connector`
pub mod connector {
    pub const J1962: u32 = 0x0000_0001;
}

/// Special `PassThruSetProgrammingVoltage` values; anything else is millivolts
pub mod voltage {
    pub const SHORT_TO_GROUND: u32 = 0xFFFF_FFFE;
    pub const PIN_OFF: u32 = 0xFFFF_FFFF;
    pub const MIN_MILLIVOLTS: u32 = 5_000;
    pub const MAX_MILLIVOLTS: u32 = 20_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_raw_round_trip() {
        for protocol in [
            ProtocolId::J1850Vpw,
            ProtocolId::J1850Pwm,
            ProtocolId::Iso9141,
            ProtocolId::Iso14230,
            ProtocolId::Can,
            ProtocolId::J2610,
            ProtocolId::Iso15765Logical,
        ] {
            assert_eq!(ProtocolId::from_raw(protocol.as_raw()), Some(protocol));
        }
        assert_eq!(ProtocolId::from_raw(0x06), None);
    }

    #[test]
    fn test_connect_flag_bits() {
        assert_eq!(ConnectFlags::CAN_29BIT_ID.bits(), 0x100);
        assert_eq!(ConnectFlags::CAN_ID_BOTH.bits(), 0x800);
        assert_eq!(ConnectFlags::K_LINE_ONLY.bits(), 0x1000);
    }

    #[test]
    fn test_ioctl_shapes() {
        assert_eq!(IoctlId::GetConfig.input_shape(), IoctlShape::ConfigList);
        assert_eq!(IoctlId::GetConfig.output_shape(), IoctlShape::ConfigList);
        assert_eq!(IoctlId::SetConfig.output_shape(), IoctlShape::None);
        assert_eq!(IoctlId::ReadProgVoltage.input_shape(), IoctlShape::None);
        assert_eq!(IoctlId::ReadProgVoltage.output_shape(), IoctlShape::Voltage);
        assert_eq!(IoctlId::from_raw(0x06), None);
        assert_eq!(IoctlId::from_raw(0x0F), Some(IoctlId::BusOn));
    }

    #[test]
    fn test_config_param_table() {
        assert!(config_param::is_defined(config_param::DATA_RATE));
        assert!(config_param::is_defined(config_param::ECHO_PHYSICAL_CHANNEL_TX));
        assert!(!config_param::is_defined(0x02));
        assert!(!config_param::is_defined(0x17));
        assert!(!config_param::is_defined(0x32));
    }
}
