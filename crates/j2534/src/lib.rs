//! SAE J2534 PassThru Bindings
//!
//! This crate binds the vendor-supplied J2534 shared library. It mirrors the
//! C ABI structures, converts them to plain Rust models, and maps the
//! library's status codes to typed errors. [`PassThruClient`] is the
//! operation surface; [`MockDriver`] emulates a library in process.

mod client;
pub mod codec;
mod config;
mod error;
pub mod ffi;
mod library;
mod mock;
mod models;
mod protocol;

pub use client::PassThruClient;
pub use codec::NativeCodec;
pub use config::ClientConfig;
pub use error::{ErrorCode, PassThruError, Result, STATUS_NOERROR};
pub use library::NativeLibrary;
pub use mock::{MockDriver, MockThing};
pub use models::{
    ChannelDescriptor, ChannelId, ChannelSet, ConfigParam, Device, DeviceId, FilterId, IoctlInput,
    IoctlOutput, Message, PeriodicMsgId, Resource, VersionInfo,
};
pub use protocol::{
    config_param, connect_media, connector, device_state, dll_fw_status, voltage, ConnectFlags,
    FilterType, IoctlId, IoctlShape, ProtocolId, RxStatus, SelectType, TxFlags,
};
