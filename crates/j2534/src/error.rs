//! PassThru Error Types
//!
//! Every native status other than [`STATUS_NOERROR`] maps to exactly one
//! [`ErrorCode`]. Codes outside the vendor table are kept as
//! [`ErrorCode::Unknown`] so the lookup itself can never fail.

use libc::c_long;
use thiserror::Error;

/// The single success status returned by every PassThru entry point.
pub const STATUS_NOERROR: c_long = 0;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PassThruError>;

/// Status codes defined by SAE J2534-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotSupported,
    InvalidChannelId,
    ProtocolIdNotSupported,
    NullParameter,
    IoctlValueNotSupported,
    FlagNotSupported,
    Failed,
    DeviceNotConnected,
    Timeout,
    InvalidMsg,
    TimeIntervalNotSupported,
    ExceededLimit,
    InvalidMsgId,
    DeviceInUse,
    IoctlIdNotSupported,
    BufferEmpty,
    BufferFull,
    BufferOverflow,
    PinNotSupported,
    ResourceConflict,
    MsgProtocolId,
    InvalidFilterId,
    NoFlowControl,
    NotUnique,
    BaudrateNotSupported,
    InvalidDeviceId,
    DeviceNotOpen,
    NullRequired,
    FilterTypeNotSupported,
    IoctlParamIdNotSupported,
    VoltageInUse,
    PinInUse,
    InitFailed,
    OpenFailed,
    BufferTooSmall,
    LogChanNotAllowed,
    SelectTypeNotSupported,
    ConcurrentApiCall,
    /// A nonzero status outside the vendor table
    Unknown(i64),
}

impl ErrorCode {
    /// Every named code, in table order
    pub const ALL: [ErrorCode; 38] = [
        Self::NotSupported,
        Self::InvalidChannelId,
        Self::ProtocolIdNotSupported,
        Self::NullParameter,
        Self::IoctlValueNotSupported,
        Self::FlagNotSupported,
        Self::Failed,
        Self::DeviceNotConnected,
        Self::Timeout,
        Self::InvalidMsg,
        Self::TimeIntervalNotSupported,
        Self::ExceededLimit,
        Self::InvalidMsgId,
        Self::DeviceInUse,
        Self::IoctlIdNotSupported,
        Self::BufferEmpty,
        Self::BufferFull,
        Self::BufferOverflow,
        Self::PinNotSupported,
        Self::ResourceConflict,
        Self::MsgProtocolId,
        Self::InvalidFilterId,
        Self::NoFlowControl,
        Self::NotUnique,
        Self::BaudrateNotSupported,
        Self::InvalidDeviceId,
        Self::DeviceNotOpen,
        Self::NullRequired,
        Self::FilterTypeNotSupported,
        Self::IoctlParamIdNotSupported,
        Self::VoltageInUse,
        Self::PinInUse,
        Self::InitFailed,
        Self::OpenFailed,
        Self::BufferTooSmall,
        Self::LogChanNotAllowed,
        Self::SelectTypeNotSupported,
        Self::ConcurrentApiCall,
    ];

    /// Map a native status to its error code. Returns `None` for
    /// [`STATUS_NOERROR`].
    pub fn from_status(status: c_long) -> Option<Self> {
        let code = i64::from(status);
        match code {
            0 => None,
            0x01 => Some(Self::NotSupported),
            0x02 => Some(Self::InvalidChannelId),
            0x03 => Some(Self::ProtocolIdNotSupported),
            0x04 => Some(Self::NullParameter),
            0x05 => Some(Self::IoctlValueNotSupported),
            0x06 => Some(Self::FlagNotSupported),
            0x07 => Some(Self::Failed),
            0x08 => Some(Self::DeviceNotConnected),
            0x09 => Some(Self::Timeout),
            0x0A => Some(Self::InvalidMsg),
            0x0B => Some(Self::TimeIntervalNotSupported),
            0x0C => Some(Self::ExceededLimit),
            0x0D => Some(Self::InvalidMsgId),
            0x0E => Some(Self::DeviceInUse),
            0x0F => Some(Self::IoctlIdNotSupported),
            0x10 => Some(Self::BufferEmpty),
            0x11 => Some(Self::BufferFull),
            0x12 => Some(Self::BufferOverflow),
            0x13 => Some(Self::PinNotSupported),
            0x14 => Some(Self::ResourceConflict),
            0x15 => Some(Self::MsgProtocolId),
            0x16 => Some(Self::InvalidFilterId),
            0x17 => Some(Self::NoFlowControl),
            0x18 => Some(Self::NotUnique),
            0x19 => Some(Self::BaudrateNotSupported),
            0x1A => Some(Self::InvalidDeviceId),
            0x1B => Some(Self::DeviceNotOpen),
            0x1C => Some(Self::NullRequired),
            0x1D => Some(Self::FilterTypeNotSupported),
            0x1E => Some(Self::IoctlParamIdNotSupported),
            0x1F => Some(Self::VoltageInUse),
            0x20 => Some(Self::PinInUse),
            0x21 => Some(Self::InitFailed),
            0x22 => Some(Self::OpenFailed),
            0x23 => Some(Self::BufferTooSmall),
            0x24 => Some(Self::LogChanNotAllowed),
            0x25 => Some(Self::SelectTypeNotSupported),
            0x26 => Some(Self::ConcurrentApiCall),
            other => Some(Self::Unknown(other)),
        }
    }

    /// Turn a native status into a `Result`
    pub fn check(status: c_long) -> Result<()> {
        match Self::from_status(status) {
            None => Ok(()),
            Some(code) => Err(PassThruError::Status(code)),
        }
    }

    /// The numeric status this code was decoded from
    pub fn code(&self) -> i64 {
        match self {
            Self::NotSupported => 0x01,
            Self::InvalidChannelId => 0x02,
            Self::ProtocolIdNotSupported => 0x03,
            Self::NullParameter => 0x04,
            Self::IoctlValueNotSupported => 0x05,
            Self::FlagNotSupported => 0x06,
            Self::Failed => 0x07,
            Self::DeviceNotConnected => 0x08,
            Self::Timeout => 0x09,
            Self::InvalidMsg => 0x0A,
            Self::TimeIntervalNotSupported => 0x0B,
            Self::ExceededLimit => 0x0C,
            Self::InvalidMsgId => 0x0D,
            Self::DeviceInUse => 0x0E,
            Self::IoctlIdNotSupported => 0x0F,
            Self::BufferEmpty => 0x10,
            Self::BufferFull => 0x11,
            Self::BufferOverflow => 0x12,
            Self::PinNotSupported => 0x13,
            Self::ResourceConflict => 0x14,
            Self::MsgProtocolId => 0x15,
            Self::InvalidFilterId => 0x16,
            Self::NoFlowControl => 0x17,
            Self::NotUnique => 0x18,
            Self::BaudrateNotSupported => 0x19,
            Self::InvalidDeviceId => 0x1A,
            Self::DeviceNotOpen => 0x1B,
            Self::NullRequired => 0x1C,
            Self::FilterTypeNotSupported => 0x1D,
            Self::IoctlParamIdNotSupported => 0x1E,
            Self::VoltageInUse => 0x1F,
            Self::PinInUse => 0x20,
            Self::InitFailed => 0x21,
            Self::OpenFailed => 0x22,
            Self::BufferTooSmall => 0x23,
            Self::LogChanNotAllowed => 0x24,
            Self::SelectTypeNotSupported => 0x25,
            Self::ConcurrentApiCall => 0x26,
            Self::Unknown(code) => *code,
        }
    }

    /// The status as the native library would return it
    pub fn as_status(&self) -> c_long {
        // Codes decoded from a c_long always fit back into one.
        c_long::try_from(self.code()).unwrap_or(c_long::MAX)
    }

    /// Vendor identifier for this code
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotSupported => "ERR_NOT_SUPPORTED",
            Self::InvalidChannelId => "ERR_INVALID_CHANNEL_ID",
            Self::ProtocolIdNotSupported => "ERR_PROTOCOL_ID_NOT_SUPPORTED",
            Self::NullParameter => "ERR_NULL_PARAMETER",
            Self::IoctlValueNotSupported => "ERR_IOCTL_VALUE_NOT_SUPPORTED",
            Self::FlagNotSupported => "ERR_FLAG_NOT_SUPPORTED",
            Self::Failed => "ERR_FAILED",
            Self::DeviceNotConnected => "ERR_DEVICE_NOT_CONNECTED",
            Self::Timeout => "ERR_TIMEOUT",
            Self::InvalidMsg => "ERR_INVALID_MSG",
            Self::TimeIntervalNotSupported => "ERR_TIME_INTERVAL_NOT_SUPPORTED",
            Self::ExceededLimit => "ERR_EXCEEDED_LIMIT",
            Self::InvalidMsgId => "ERR_INVALID_MSG_ID",
            Self::DeviceInUse => "ERR_DEVICE_IN_USE",
            Self::IoctlIdNotSupported => "ERR_IOCTL_ID_NOT_SUPPORTED",
            Self::BufferEmpty => "ERR_BUFFER_EMPTY",
            Self::BufferFull => "ERR_BUFFER_FULL",
            Self::BufferOverflow => "ERR_BUFFER_OVERFLOW",
            Self::PinNotSupported => "ERR_PIN_NOT_SUPPORTED",
            Self::ResourceConflict => "ERR_RESOURCE_CONFLICT",
            Self::MsgProtocolId => "ERR_MSG_PROTOCOL_ID",
            Self::InvalidFilterId => "ERR_INVALID_FILTER_ID",
            Self::NoFlowControl => "ERR_NO_FLOW_CONTROL",
            Self::NotUnique => "ERR_NOT_UNIQUE",
            Self::BaudrateNotSupported => "ERR_BAUDRATE_NOT_SUPPORTED",
            Self::InvalidDeviceId => "ERR_INVALID_DEVICE_ID",
            Self::DeviceNotOpen => "ERR_DEVICE_NOT_OPEN",
            Self::NullRequired => "ERR_NULL_REQUIRED",
            Self::FilterTypeNotSupported => "ERR_FILTER_TYPE_NOT_SUPPORTED",
            Self::IoctlParamIdNotSupported => "ERR_IOCTL_PARAM_ID_NOT_SUPPORTED",
            Self::VoltageInUse => "ERR_VOLTAGE_IN_USE",
            Self::PinInUse => "ERR_PIN_IN_USE",
            Self::InitFailed => "ERR_INIT_FAILED",
            Self::OpenFailed => "ERR_OPEN_FAILED",
            Self::BufferTooSmall => "ERR_BUFFER_TOO_SMALL",
            Self::LogChanNotAllowed => "ERR_LOG_CHAN_NOT_ALLOWED",
            Self::SelectTypeNotSupported => "ERR_SELECT_TYPE_NOT_SUPPORTED",
            Self::ConcurrentApiCall => "ERR_CONCURRENT_API_CALL",
            Self::Unknown(_) => "ERR_UNKNOWN",
        }
    }

    /// Fixed human-readable message
    pub fn description(&self) -> String {
        let text = match self {
            Self::NotSupported => "function or option is not supported by the interface",
            Self::InvalidChannelId => "channel id is not valid",
            Self::ProtocolIdNotSupported => "protocol id is not supported",
            Self::NullParameter => "NULL pointer supplied where a valid pointer is required",
            Self::IoctlValueNotSupported => "ioctl value is invalid or out of range",
            Self::FlagNotSupported => "flag value is invalid or not appropriate for the channel",
            Self::Failed => "undefined error, see PassThruGetLastError",
            Self::DeviceNotConnected => "PassThru device is not connected",
            Self::Timeout => "request could not be completed within the timeout",
            Self::InvalidMsg => "message structure is invalid for the channel",
            Self::TimeIntervalNotSupported => "time interval is outside the supported range",
            Self::ExceededLimit => "exceeded the allowed limit",
            Self::InvalidMsgId => "message id is not valid",
            Self::DeviceInUse => "device is already open",
            Self::IoctlIdNotSupported => "ioctl id is not supported",
            Self::BufferEmpty => "no data available to return",
            Self::BufferFull => "transmit queue is full",
            Self::BufferOverflow => "receive buffer overflowed and messages were lost",
            Self::PinNotSupported => "pin number or connector is invalid",
            Self::ResourceConflict => "request conflicts with a resource already in use",
            Self::MsgProtocolId => "message protocol does not match the channel protocol",
            Self::InvalidFilterId => "filter id is not valid",
            Self::NoFlowControl => "no flow control filter matches the outgoing message",
            Self::NotUnique => "filter duplicates an existing filter",
            Self::BaudrateNotSupported => "baud rate is invalid or unachievable",
            Self::InvalidDeviceId => "device id is not valid",
            Self::DeviceNotOpen => "PassThruOpen has not been called successfully",
            Self::NullRequired => "parameter must be NULL for this request",
            Self::FilterTypeNotSupported => "filter type is not supported",
            Self::IoctlParamIdNotSupported => "configuration parameter is not supported",
            Self::VoltageInUse => "programming voltage is already applied to another pin",
            Self::PinInUse => "pin is already in use",
            Self::InitFailed => "vehicle initialization failed",
            Self::OpenFailed => "device could not be opened",
            Self::BufferTooSmall => "supplied buffer is too small for the data",
            Self::LogChanNotAllowed => "logical channel is not allowed on this physical channel",
            Self::SelectTypeNotSupported => "select type is not supported",
            Self::ConcurrentApiCall => "a previous API call has not completed",
            Self::Unknown(code) => return format!("unknown error code {}", code),
        };
        text.to_string()
    }
}

/// Errors raised by the PassThru binding
#[derive(Debug, Error)]
pub enum PassThruError {
    /// The native library returned a failure status
    #[error("{}: {}", .0.name(), .0.description())]
    Status(ErrorCode),

    /// A model field does not fit its fixed native width
    #[error("{field} is {actual} wide, native field holds at most {max}")]
    ValueTooLarge {
        field: &'static str,
        max: u64,
        actual: u64,
    },

    /// The caller passed a model of the wrong kind for this request
    #[error("{operation} expects {expected}, got {found}")]
    InvalidArgumentType {
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A string argument cannot be represented as a C string
    #[error("{field} contains an interior NUL byte")]
    InteriorNul { field: &'static str },

    /// The shared library could not be loaded
    #[error("Failed to load PassThru library {path}: {source}")]
    LibraryLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// A required entry point is missing from the shared library
    #[error("PassThru library does not export {symbol}: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was read but is not usable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PassThruError {
    /// The vendor status carried by this error, if it came from the library
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }

    /// Whether this error is the given vendor status
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

impl From<ErrorCode> for PassThruError {
    fn from(code: ErrorCode) -> Self {
        PassThruError::Status(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_success_is_not_an_error() {
        assert_eq!(ErrorCode::from_status(STATUS_NOERROR), None);
        assert!(ErrorCode::check(STATUS_NOERROR).is_ok());
    }

    #[test]
    fn test_every_named_code_round_trips() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_status(code.as_status()), Some(code));
        }
    }

    #[test]
    fn test_codes_and_names_are_distinct() {
        let codes: HashSet<i64> = ErrorCode::ALL.iter().map(|c| c.code()).collect();
        let names: HashSet<&str> = ErrorCode::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(codes.len(), ErrorCode::ALL.len());
        assert_eq!(names.len(), ErrorCode::ALL.len());
        let expected: HashSet<i64> = (1..=0x26).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn test_unknown_codes_do_not_panic() {
        for status in [0x27, 0xFF, -1, c_long::MAX, c_long::MIN] {
            let code = ErrorCode::from_status(status).unwrap();
            assert_eq!(code, ErrorCode::Unknown(i64::from(status)));
            assert_eq!(code.code(), i64::from(status));
            assert!(code.description().contains(&status.to_string()));
        }
    }

    #[test]
    fn test_error_message_names_the_code() {
        let err = ErrorCode::check(0x1B).unwrap_err();
        assert!(err.is(ErrorCode::DeviceNotOpen));
        assert!(err.to_string().starts_with("ERR_DEVICE_NOT_OPEN"));

        let err = ErrorCode::check(0x99).unwrap_err();
        assert_eq!(err.to_string(), "ERR_UNKNOWN: unknown error code 153");
    }
}
