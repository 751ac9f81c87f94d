//! PassThru Client
//!
//! One method per J2534 entry point. Every call encodes its arguments,
//! invokes the driver once, maps the returned status, and only then decodes
//! outputs. Nothing is retried.

use libc::{c_char, c_long, c_void};
use std::ffi::CString;
use std::path::Path;
use std::ptr;
use tracing::{debug, info, warn};

use crate::codec::{
    decode_name, NativeByteArray, NativeCodec, NativeConfigList, NativeMessage, NativeMessages,
    NativeResource,
};
use crate::config::ClientConfig;
use crate::error::{ErrorCode, PassThruError, Result};
use crate::ffi::{NativeUlong, PassThruDriver, SDevice, NAME_LEN};
use crate::library::NativeLibrary;
use crate::models::{
    ChannelDescriptor, ChannelId, ChannelSet, ConfigParam, Device, DeviceId, FilterId, IoctlInput,
    IoctlOutput, Message, PeriodicMsgId, Resource, VersionInfo,
};
use crate::protocol::{ConnectFlags, FilterType, IoctlId, IoctlShape, ProtocolId, SelectType};

/// Room for the two key bytes returned by `FIVE_BAUD_INIT`
const KEY_BYTES_CAPACITY: usize = 2;

/// Native storage for an ioctl input, alive until the call returns
enum NativeInput<U> {
    None,
    ConfigList(NativeConfigList<U>),
    Bytes(NativeByteArray<U>),
    Message(NativeMessage<U>),
    Resource(NativeResource<U>),
}

impl<U: NativeUlong> NativeInput<U> {
    fn encode(input: &IoctlInput) -> Result<Self> {
        Ok(match input {
            IoctlInput::None => NativeInput::None,
            IoctlInput::ConfigList(params) => NativeInput::ConfigList(NativeConfigList::encode(params)?),
            IoctlInput::Bytes(bytes) => NativeInput::Bytes(NativeByteArray::encode(bytes)?),
            IoctlInput::Message(msg) => NativeInput::Message(msg.encode::<U>()?),
            IoctlInput::Resource(resource) => NativeInput::Resource(resource.encode::<U>()?),
        })
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            NativeInput::None => ptr::null_mut(),
            NativeInput::ConfigList(list) => list.as_mut_ptr() as *mut c_void,
            NativeInput::Bytes(bytes) => bytes.as_mut_ptr() as *mut c_void,
            NativeInput::Message(msg) => msg.as_mut_ptr() as *mut c_void,
            NativeInput::Resource(resource) => resource.as_mut_ptr() as *mut c_void,
        }
    }
}

/// Native storage the driver writes an ioctl result into
enum NativeOutput<U> {
    None,
    Bytes(NativeByteArray<U>),
    Message(NativeMessage<U>),
    Voltage(U),
}

impl<U: NativeUlong> NativeOutput<U> {
    fn allocate(id: IoctlId, rx_buffer_size: u32) -> Result<Self> {
        Ok(match id.output_shape() {
            IoctlShape::Bytes => NativeOutput::Bytes(NativeByteArray::with_capacity(KEY_BYTES_CAPACITY)?),
            IoctlShape::Message => {
                NativeOutput::Message(Message::with_capacity(0, rx_buffer_size).encode::<U>()?)
            }
            IoctlShape::Voltage => NativeOutput::Voltage(U::default()),
            // GET_CONFIG answers in its input list.
            _ => NativeOutput::None,
        })
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            NativeOutput::None => ptr::null_mut(),
            NativeOutput::Bytes(bytes) => bytes.as_mut_ptr() as *mut c_void,
            NativeOutput::Message(msg) => msg.as_mut_ptr() as *mut c_void,
            NativeOutput::Voltage(value) => value as *mut U as *mut c_void,
        }
    }

    fn decode(&self, id: IoctlId, input: &NativeInput<U>) -> Result<IoctlOutput> {
        match (self, input) {
            (NativeOutput::Bytes(bytes), _) => Ok(IoctlOutput::Bytes(bytes.decode()?)),
            (NativeOutput::Message(msg), _) => Ok(IoctlOutput::Message(Message::decode(msg)?)),
            (NativeOutput::Voltage(value), _) => Ok(IoctlOutput::Voltage(value.to_u32("voltage")?)),
            (NativeOutput::None, NativeInput::ConfigList(list)) if id == IoctlId::GetConfig => {
                Ok(IoctlOutput::ConfigList(list.decode()?))
            }
            (NativeOutput::None, _) => Ok(IoctlOutput::None),
        }
    }
}

fn unexpected_output(id: IoctlId, output: &IoctlOutput) -> PassThruError {
    PassThruError::InvalidArgumentType {
        operation: "PassThruIoctl",
        expected: id.output_shape().name(),
        found: output.shape().name(),
    }
}

/// The J2534 operation surface over a driver
pub struct PassThruClient<D: PassThruDriver = NativeLibrary> {
    driver: D,
    config: ClientConfig,
}

impl PassThruClient<NativeLibrary> {
    /// Load the vendor library named by `config`
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let driver = NativeLibrary::load(config.require_library_path()?)?;
        Ok(Self { driver, config })
    }

    /// Load the vendor library at `path` with default settings
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(ClientConfig::with_library(path.as_ref()))
    }
}

impl<D: PassThruDriver> PassThruClient<D> {
    pub fn with_driver(driver: D) -> Self {
        Self {
            driver,
            config: ClientConfig::default(),
        }
    }

    pub fn with_driver_and_config(driver: D, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { driver, config })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn check(&self, call: &'static str, status: c_long) -> Result<()> {
        match ErrorCode::from_status(status) {
            None => {
                debug!(call, "PassThru call succeeded");
                Ok(())
            }
            Some(code) => {
                warn!(call, status = code.code(), error = code.name(), "PassThru call failed");
                Err(PassThruError::Status(code))
            }
        }
    }

    fn ulong(value: u32) -> D::Ulong {
        D::Ulong::from_u32(value)
    }

    /// Number of interfaces the library can see; resets the device cursor
    pub fn scan_for_devices(&self) -> Result<u32> {
        let mut count = D::Ulong::default();
        let status = unsafe { self.driver.scan_for_devices(&mut count) };
        self.check("PassThruScanForDevices", status)?;
        count.to_u32("device_count")
    }

    /// Next device from the most recent scan
    pub fn get_next_device(&self) -> Result<Device> {
        let mut raw = SDevice::<D::Ulong>::default();
        let status = unsafe { self.driver.get_next_device(&mut raw) };
        self.check("PassThruGetNextDevice", status)?;
        Device::decode(&raw)
    }

    /// Scan and drain the device cursor
    pub fn scan_devices(&self) -> Result<Vec<Device>> {
        let count = self.scan_for_devices()?;
        let mut devices = Vec::new();
        if count == 0 {
            return Ok(devices);
        }
        loop {
            match self.get_next_device() {
                Ok(device) => devices.push(device),
                Err(e) if e.is(ErrorCode::ExceededLimit) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(devices)
    }

    /// Open a device by name; `None` passes a null name
    pub fn open(&self, name: Option<&str>) -> Result<DeviceId> {
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(|_| PassThruError::InteriorNul { field: "name" })?;
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());

        let mut device_id = D::Ulong::default();
        let status = unsafe { self.driver.open(name_ptr, &mut device_id) };
        self.check("PassThruOpen", status)?;

        let device_id = DeviceId(device_id.to_u32("device_id")?);
        info!(device = %device_id, name = ?name, "Opened PassThru device");
        Ok(device_id)
    }

    pub fn close(&self, device: DeviceId) -> Result<()> {
        let status = unsafe { self.driver.close(Self::ulong(device.0)) };
        self.check("PassThruClose", status)?;
        info!(device = %device, "Closed PassThru device");
        Ok(())
    }

    /// Open a physical channel
    pub fn connect(
        &self,
        device: DeviceId,
        protocol: ProtocolId,
        flags: ConnectFlags,
        baud_rate: u32,
        resource: &Resource,
    ) -> Result<ChannelId> {
        self.connect_raw(device, protocol.as_raw(), flags.bits(), baud_rate, resource)
    }

    /// [`connect`](Self::connect) with untyped protocol id and flags
    pub fn connect_raw(
        &self,
        device: DeviceId,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
        resource: &Resource,
    ) -> Result<ChannelId> {
        let native = resource.encode::<D::Ulong>()?;
        let mut channel_id = D::Ulong::default();
        let status = unsafe {
            self.driver.connect(
                Self::ulong(device.0),
                Self::ulong(protocol_id),
                Self::ulong(flags),
                Self::ulong(baud_rate),
                native.raw(),
                &mut channel_id,
            )
        };
        self.check("PassThruConnect", status)?;

        let channel = ChannelId(channel_id.to_u32("channel_id")?);
        info!(device = %device, channel = %channel, protocol_id, baud_rate, "Connected channel");
        Ok(channel)
    }

    pub fn disconnect(&self, channel: ChannelId) -> Result<()> {
        let status = unsafe { self.driver.disconnect(Self::ulong(channel.0)) };
        self.check("PassThruDisconnect", status)?;
        info!(channel = %channel, "Disconnected channel");
        Ok(())
    }

    /// Open a logical channel on top of a physical CAN channel
    pub fn logical_connect(
        &self,
        physical_channel: ChannelId,
        protocol: ProtocolId,
        flags: u32,
        descriptor: &ChannelDescriptor,
    ) -> Result<ChannelId> {
        let mut native = descriptor.encode::<D::Ulong>()?;
        let mut channel_id = D::Ulong::default();
        let status = unsafe {
            self.driver.logical_connect(
                Self::ulong(physical_channel.0),
                Self::ulong(protocol.as_raw()),
                Self::ulong(flags),
                &mut native as *mut _ as *mut c_void,
                &mut channel_id,
            )
        };
        self.check("PassThruLogicalConnect", status)?;

        let channel = ChannelId(channel_id.to_u32("channel_id")?);
        info!(physical = %physical_channel, channel = %channel, "Connected logical channel");
        Ok(channel)
    }

    pub fn logical_disconnect(&self, channel: ChannelId) -> Result<()> {
        let status = unsafe { self.driver.logical_disconnect(Self::ulong(channel.0)) };
        self.check("PassThruLogicalDisconnect", status)?;
        info!(channel = %channel, "Disconnected logical channel");
        Ok(())
    }

    /// Wait until `set.channel_threshold` channels are ready; returns the
    /// ready channels
    pub fn select(&self, set: &ChannelSet, select_type: SelectType, timeout_ms: u32) -> Result<ChannelSet> {
        let mut native = set.encode::<D::Ulong>()?;
        let status = unsafe {
            self.driver.select(
                native.as_mut_ptr(),
                Self::ulong(select_type.as_raw()),
                Self::ulong(timeout_ms),
            )
        };
        self.check("PassThruSelect", status)?;
        ChannelSet::decode(&native)
    }

    /// Read up to `max` messages, waiting up to `timeout_ms`
    ///
    /// When the timeout expires after some messages were already read, those
    /// messages are returned instead of the timeout.
    pub fn read_msgs(&self, channel: ChannelId, max: usize, timeout_ms: u32) -> Result<Vec<Message>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut slots = NativeMessages::<D::Ulong>::receive_slots(max, 0, self.config.rx_buffer_size)?;
        let requested = u32::try_from(max).map_err(|_| PassThruError::ValueTooLarge {
            field: "num_msgs",
            max: u64::from(u32::MAX),
            actual: max as u64,
        })?;
        let mut num_msgs = Self::ulong(requested);
        let status = unsafe {
            self.driver.read_msgs(
                Self::ulong(channel.0),
                slots.as_mut_ptr(),
                &mut num_msgs,
                Self::ulong(timeout_ms),
            )
        };
        // The count is only meaningful once the status says messages were read.
        let read = num_msgs.to_u64().min(slots.len() as u64) as usize;

        match ErrorCode::from_status(status) {
            Some(ErrorCode::Timeout) if read > 0 => {
                debug!(channel = %channel, read, "Read timed out with partial result");
            }
            _ => self.check("PassThruReadMsgs", status)?,
        }
        slots.decode(read)
    }

    /// Read one batch with the configured size and timeout
    pub fn read_batch(&self, channel: ChannelId) -> Result<Vec<Message>> {
        self.read_msgs(channel, self.config.read_batch_size, self.config.default_timeout_ms)
    }

    /// Queue messages for transmission; returns how many were accepted
    pub fn queue_msgs(&self, channel: ChannelId, messages: &[Message]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        let mut native = NativeMessages::<D::Ulong>::encode(messages)?;
        let mut num_msgs = Self::ulong(native.len() as u32);
        let status = unsafe {
            self.driver
                .queue_msgs(Self::ulong(channel.0), native.as_mut_ptr(), &mut num_msgs)
        };
        self.check("PassThruQueueMsgs", status)?;
        Ok(num_msgs.to_u32("num_msgs")? as usize)
    }

    pub fn start_periodic_msg(
        &self,
        channel: ChannelId,
        message: &Message,
        interval_ms: u32,
    ) -> Result<PeriodicMsgId> {
        let mut native = message.encode::<D::Ulong>()?;
        let mut msg_id = D::Ulong::default();
        let status = unsafe {
            self.driver.start_periodic_msg(
                Self::ulong(channel.0),
                native.as_mut_ptr(),
                &mut msg_id,
                Self::ulong(interval_ms),
            )
        };
        self.check("PassThruStartPeriodicMsg", status)?;
        Ok(PeriodicMsgId(msg_id.to_u32("msg_id")?))
    }

    pub fn stop_periodic_msg(&self, channel: ChannelId, msg_id: PeriodicMsgId) -> Result<()> {
        let status = unsafe {
            self.driver
                .stop_periodic_msg(Self::ulong(channel.0), Self::ulong(msg_id.0))
        };
        self.check("PassThruStopPeriodicMsg", status)
    }

    pub fn start_msg_filter(
        &self,
        channel: ChannelId,
        filter_type: FilterType,
        mask: &Message,
        pattern: &Message,
    ) -> Result<FilterId> {
        let mut mask = mask.encode::<D::Ulong>()?;
        let mut pattern = pattern.encode::<D::Ulong>()?;
        let mut filter_id = D::Ulong::default();
        let status = unsafe {
            self.driver.start_msg_filter(
                Self::ulong(channel.0),
                Self::ulong(filter_type.as_raw()),
                mask.as_mut_ptr(),
                pattern.as_mut_ptr(),
                &mut filter_id,
            )
        };
        self.check("PassThruStartMsgFilter", status)?;
        Ok(FilterId(filter_id.to_u32("filter_id")?))
    }

    pub fn stop_msg_filter(&self, channel: ChannelId, filter: FilterId) -> Result<()> {
        let status = unsafe {
            self.driver
                .stop_msg_filter(Self::ulong(channel.0), Self::ulong(filter.0))
        };
        self.check("PassThruStopMsgFilter", status)
    }

    /// Apply `millivolts` (or one of the `voltage` specials) to a pin
    pub fn set_programming_voltage(&self, device: DeviceId, resource: &Resource, millivolts: u32) -> Result<()> {
        let native = resource.encode::<D::Ulong>()?;
        let status = unsafe {
            self.driver
                .set_programming_voltage(Self::ulong(device.0), native.raw(), Self::ulong(millivolts))
        };
        self.check("PassThruSetProgrammingVoltage", status)
    }

    pub fn read_version(&self, device: DeviceId) -> Result<VersionInfo> {
        let mut firmware = [0 as c_char; NAME_LEN];
        let mut dll = [0 as c_char; NAME_LEN];
        let mut api = [0 as c_char; NAME_LEN];
        let status = unsafe {
            self.driver.read_version(
                Self::ulong(device.0),
                firmware.as_mut_ptr(),
                dll.as_mut_ptr(),
                api.as_mut_ptr(),
            )
        };
        self.check("PassThruReadVersion", status)?;
        Ok(VersionInfo {
            firmware_version: decode_name(&firmware),
            dll_version: decode_name(&dll),
            api_version: decode_name(&api),
        })
    }

    /// Text describing the library's most recent failure
    pub fn get_last_error(&self) -> Result<String> {
        let mut text = [0 as c_char; NAME_LEN];
        let status = unsafe { self.driver.get_last_error(text.as_mut_ptr()) };
        self.check("PassThruGetLastError", status)?;
        Ok(decode_name(&text))
    }

    /// Typed `PassThruIoctl`; `target` is a device or channel id depending on `id`
    pub fn ioctl(&self, target: u32, id: IoctlId, input: IoctlInput) -> Result<IoctlOutput> {
        let expected = id.input_shape();
        let found = input.shape();
        if found != expected {
            return Err(PassThruError::InvalidArgumentType {
                operation: "PassThruIoctl",
                expected: expected.name(),
                found: found.name(),
            });
        }

        let mut native_input = NativeInput::<D::Ulong>::encode(&input)?;
        let mut native_output = NativeOutput::<D::Ulong>::allocate(id, self.config.rx_buffer_size)?;
        let status = unsafe {
            self.driver.ioctl(
                Self::ulong(target),
                Self::ulong(id.as_raw()),
                native_input.as_mut_ptr(),
                native_output.as_mut_ptr(),
            )
        };
        self.check("PassThruIoctl", status)?;
        native_output.decode(id, &native_input)
    }

    /// Read configuration parameters of a channel
    pub fn get_config(&self, channel: ChannelId, params: &[u32]) -> Result<Vec<ConfigParam>> {
        let list = params.iter().map(|p| ConfigParam::new(*p, 0)).collect();
        match self.ioctl(channel.0, IoctlId::GetConfig, IoctlInput::ConfigList(list))? {
            IoctlOutput::ConfigList(values) => Ok(values),
            other => Err(unexpected_output(IoctlId::GetConfig, &other)),
        }
    }

    pub fn set_config(&self, channel: ChannelId, params: &[ConfigParam]) -> Result<()> {
        self.ioctl(channel.0, IoctlId::SetConfig, IoctlInput::ConfigList(params.to_vec()))
            .map(|_| ())
    }

    /// Millivolts on a connector pin
    pub fn read_voltage(&self, device: DeviceId, pin: &Resource) -> Result<u32> {
        self.voltage(device.0, IoctlId::ReadPinVoltage, IoctlInput::Resource(pin.clone()))
    }

    /// Millivolts of the programming voltage currently applied
    pub fn read_prog_voltage(&self, device: DeviceId) -> Result<u32> {
        self.voltage(device.0, IoctlId::ReadProgVoltage, IoctlInput::None)
    }

    fn voltage(&self, target: u32, id: IoctlId, input: IoctlInput) -> Result<u32> {
        match self.ioctl(target, id, input)? {
            IoctlOutput::Voltage(mv) => Ok(mv),
            other => Err(unexpected_output(id, &other)),
        }
    }

    /// Five-baud initialization; returns the key bytes
    pub fn five_baud_init(&self, channel: ChannelId, address: u8) -> Result<Vec<u8>> {
        match self.ioctl(channel.0, IoctlId::FiveBaudInit, IoctlInput::Bytes(vec![address]))? {
            IoctlOutput::Bytes(keys) => Ok(keys),
            other => Err(unexpected_output(IoctlId::FiveBaudInit, &other)),
        }
    }

    /// Fast initialization; returns the ECU's response
    pub fn fast_init(&self, channel: ChannelId, request: &Message) -> Result<Message> {
        match self.ioctl(channel.0, IoctlId::FastInit, IoctlInput::Message(request.clone()))? {
            IoctlOutput::Message(response) => Ok(response),
            other => Err(unexpected_output(IoctlId::FastInit, &other)),
        }
    }

    fn clear(&self, channel: ChannelId, id: IoctlId) -> Result<()> {
        self.ioctl(channel.0, id, IoctlInput::None).map(|_| ())
    }

    pub fn clear_tx_queue(&self, channel: ChannelId) -> Result<()> {
        self.clear(channel, IoctlId::ClearTxQueue)
    }

    pub fn clear_rx_queue(&self, channel: ChannelId) -> Result<()> {
        self.clear(channel, IoctlId::ClearRxQueue)
    }

    pub fn clear_periodic_msgs(&self, channel: ChannelId) -> Result<()> {
        self.clear(channel, IoctlId::ClearPeriodicMsgs)
    }

    pub fn clear_msg_filters(&self, channel: ChannelId) -> Result<()> {
        self.clear(channel, IoctlId::ClearMsgFilters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn test_ioctl_rejects_wrong_input_shape() {
        let client = PassThruClient::with_driver(MockDriver::<u32>::new());
        let err = client
            .ioctl(1, IoctlId::GetConfig, IoctlInput::Bytes(vec![0x33]))
            .unwrap_err();
        match err {
            PassThruError::InvalidArgumentType {
                operation,
                expected,
                found,
            } => {
                assert_eq!(operation, "PassThruIoctl");
                assert_eq!(expected, "a configuration list");
                assert_eq!(found, "a byte array");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shape_error_skips_native_call() {
        let client = PassThruClient::with_driver(MockDriver::<u64>::new());
        let _ = client.ioctl(1, IoctlId::ClearRxQueue, IoctlInput::Bytes(vec![1]));
        // A native call would have recorded ERR_INVALID_CHANNEL_ID.
        assert_eq!(client.get_last_error().unwrap(), "");
    }

    #[test]
    fn test_unexpected_ioctl_output() {
        let err = unexpected_output(IoctlId::ReadProgVoltage, &IoctlOutput::Bytes(vec![0x08]));
        assert!(matches!(
            err,
            PassThruError::InvalidArgumentType {
                operation: "PassThruIoctl",
                expected: "a voltage",
                found: "a byte array",
            }
        ));
    }

    #[test]
    fn test_open_rejects_interior_nul() {
        let client = PassThruClient::with_driver(MockDriver::<u32>::with_devices(1));
        let err = client.open(Some("passthru\01")).unwrap_err();
        assert!(matches!(err, PassThruError::InteriorNul { field: "name" }));
    }

    #[test]
    fn test_config_is_validated() {
        let config = ClientConfig {
            read_batch_size: 0,
            ..Default::default()
        };
        assert!(PassThruClient::with_driver_and_config(MockDriver::<u32>::new(), config).is_err());
    }

    #[test]
    fn test_from_config_requires_library_path() {
        assert!(matches!(
            PassThruClient::from_config(ClientConfig::default()),
            Err(PassThruError::InvalidConfig(_))
        ));
    }
}
