//! In-process PassThru driver
//!
//! Emulates a registry of PassThru interfaces behind the same function table
//! a vendor library exports. Registered things can be scanned, opened,
//! connected and unplugged; channels keep their own filters, periodic
//! messages, configuration and receive queue. Frames reach a channel from the
//! thing's recorded bus traffic, from [`MockDriver::inject`], or as loopback
//! echoes of queued messages, and are admitted through the channel's filters.
//!
//! The driver never blocks: a read or select that cannot be satisfied
//! immediately reports the timeout at once.

use libc::{c_char, c_long, c_ulong, c_void};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::CStr;
use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::ptr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::codec::{encode_name, read_raw_message, write_raw_message, NativeCodec};
use crate::error::{self, ErrorCode, STATUS_NOERROR};
use crate::ffi::{
    Iso15765ChannelDescriptor, NativeUlong, PassThruDriver, PassThruMsg, ResourceStruct,
    SByteArray, SChannelSet, SConfig, SConfigList, SDevice, NAME_LEN,
};
use crate::models::{ChannelId, Device, DeviceId, Message};
use crate::protocol::{
    config_param, connect_media, connector, device_state, dll_fw_status, voltage, ConnectFlags,
    FilterType, IoctlId, ProtocolId, RxStatus, SelectType,
};

const MAX_FILTERS: usize = 10;
const MAX_PERIODIC_MSGS: usize = 10;
const MAX_LOGICAL_CHANNELS: usize = 10;
const MAX_FILTER_LEN: usize = 12;
const PERIODIC_INTERVAL_MS: RangeInclusive<u32> = 5..=65_535;
const J1962_PINS: RangeInclusive<u32> = 1..=16;
const SHORT_TO_GROUND_PIN: u32 = 15;
const BATTERY_PIN: u32 = 16;
const BATTERY_MILLIVOLTS: u32 = 12_600;
const KEY_BYTES: [u8; 2] = [0x08, 0x08];
const TICK_US: u32 = 1_000;

type Outcome = std::result::Result<(), ErrorCode>;

/// A PassThru interface known to the emulated registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockThing {
    pub name: String,
    /// Whether the interface is physically present
    pub connected: bool,
    pub firmware_version: String,
    pub dll_version: String,
    pub api_version: String,
    pub connect_speed: u32,
    /// Frames the vehicle puts on the bus once a channel of the same
    /// protocol is connected
    pub traffic: Vec<Message>,
}

impl MockThing {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: true,
            firmware_version: "1.0.0".to_string(),
            dll_version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: "05.00".to_string(),
            connect_speed: 480_000_000,
            traffic: Vec::new(),
        }
    }

    /// Registered but not plugged in
    pub fn unplugged(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn with_traffic(mut self, traffic: Vec<Message>) -> Self {
        self.traffic = traffic;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockFilter {
    filter_type: FilterType,
    mask: Vec<u8>,
    pattern: Vec<u8>,
}

impl MockFilter {
    fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.mask.len()
            && self
                .mask
                .iter()
                .zip(&self.pattern)
                .zip(data)
                .all(|((m, p), d)| d & m == p & m)
    }
}

#[derive(Debug)]
struct OpenDevice {
    name: String,
    /// Programming voltage per pin
    pins: BTreeMap<u32, u32>,
}

#[derive(Debug)]
struct MockChannel {
    device_id: u32,
    protocol_id: u32,
    /// Physical channel of a logical channel
    parent: Option<u32>,
    addresses: Option<([u8; 5], [u8; 5])>,
    pins: Vec<u32>,
    config: BTreeMap<u32, u32>,
    filters: BTreeMap<u32, MockFilter>,
    periodic: BTreeMap<u32, (Message, u32)>,
    functional: BTreeSet<u8>,
    bus: VecDeque<Message>,
    rx: VecDeque<Message>,
}

impl MockChannel {
    fn new(device_id: u32, protocol_id: u32) -> Self {
        Self {
            device_id,
            protocol_id,
            parent: None,
            addresses: None,
            pins: Vec::new(),
            config: BTreeMap::new(),
            filters: BTreeMap::new(),
            periodic: BTreeMap::new(),
            functional: BTreeSet::new(),
            bus: VecDeque::new(),
            rx: VecDeque::new(),
        }
    }

    fn protocol(&self) -> Option<ProtocolId> {
        ProtocolId::from_raw(self.protocol_id)
    }

    /// Pass filters admit, block filters veto; no pass filter means nothing gets in
    fn admits(&self, frame: &Message) -> bool {
        let matching = |kind: FilterType| {
            self.filters
                .values()
                .any(|f| f.filter_type == kind && f.matches(&frame.data))
        };
        matching(FilterType::Pass) && !matching(FilterType::Block)
    }

    fn loopback(&self) -> bool {
        self.config.get(&config_param::LOOPBACK) == Some(&1)
    }

    fn get_config(&self, param: u32) -> Result<u32, ErrorCode> {
        if !config_param::is_defined(param) {
            return Err(ErrorCode::IoctlParamIdNotSupported);
        }
        Ok(self.config.get(&param).copied().unwrap_or(0))
    }

    fn check_config(&self, param: u32, value: u32) -> Outcome {
        if !config_param::is_defined(param) {
            return Err(ErrorCode::IoctlParamIdNotSupported);
        }
        match (param, value) {
            (config_param::DATA_RATE, 0) => Err(ErrorCode::IoctlValueNotSupported),
            (config_param::LOOPBACK, v) if v > 1 => Err(ErrorCode::IoctlValueNotSupported),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    things: Vec<MockThing>,
    scan: Option<Vec<Device>>,
    cursor: usize,
    devices: BTreeMap<u32, OpenDevice>,
    channels: BTreeMap<u32, MockChannel>,
    next_device_id: u32,
    next_channel_id: u32,
    next_filter_id: u32,
    next_periodic_id: u32,
    clock_us: u32,
    last_error: String,
}

fn next(counter: &mut u32) -> u32 {
    *counter += 1;
    *counter
}

/// Handles are issued below `u32::MAX`, so an oversized value never matches one
fn narrow<U: NativeUlong>(value: U) -> u32 {
    u32::try_from(value.to_u64()).unwrap_or(u32::MAX)
}

fn require_null(arg: *mut c_void) -> Outcome {
    if arg.is_null() {
        Ok(())
    } else {
        Err(ErrorCode::NullRequired)
    }
}

unsafe fn read_list<U: NativeUlong>(list: *const U, count: U) -> Result<Vec<u32>, ErrorCode> {
    let n = narrow(count) as usize;
    if n == 0 {
        return Ok(Vec::new());
    }
    if list.is_null() {
        return Err(ErrorCode::NullParameter);
    }
    Ok(std::slice::from_raw_parts(list, n)
        .iter()
        .map(|v| narrow(*v))
        .collect())
}

unsafe fn read_bytes<U: NativeUlong>(array: *const SByteArray<U>) -> Result<Vec<u8>, ErrorCode> {
    if array.is_null() {
        return Err(ErrorCode::NullParameter);
    }
    let array = &*array;
    let n = narrow(array.num_of_bytes) as usize;
    if n == 0 {
        return Ok(Vec::new());
    }
    if array.byte_ptr.is_null() {
        return Err(ErrorCode::NullParameter);
    }
    Ok(std::slice::from_raw_parts(array.byte_ptr, n).to_vec())
}

unsafe fn config_entries<'a, U: NativeUlong>(
    input: *mut c_void,
) -> Result<&'a mut [SConfig<U>], ErrorCode> {
    if input.is_null() {
        return Err(ErrorCode::NullParameter);
    }
    let list = &mut *(input as *mut SConfigList<U>);
    let n = narrow(list.num_of_params) as usize;
    if n == 0 {
        return Ok(&mut []);
    }
    if list.config_ptr.is_null() {
        return Err(ErrorCode::NullParameter);
    }
    Ok(std::slice::from_raw_parts_mut(list.config_ptr, n))
}

/// Copy text into an 80-byte buffer, truncated on a character boundary
unsafe fn write_text(dst: *mut c_char, text: &str) {
    let mut end = text.len().min(NAME_LEN - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, dst, end);
    *dst.add(end) = 0;
}

impl MockState {
    fn thing(&self, name: &str) -> Option<&MockThing> {
        self.things.iter().find(|t| t.name == name)
    }

    fn is_connected(&self, name: &str) -> bool {
        self.thing(name).map_or(false, |t| t.connected)
    }

    fn device(&mut self, device_id: u32) -> Result<&mut OpenDevice, ErrorCode> {
        if self.devices.is_empty() {
            return Err(ErrorCode::DeviceNotOpen);
        }
        let name = match self.devices.get(&device_id) {
            Some(device) => device.name.clone(),
            None => return Err(ErrorCode::InvalidDeviceId),
        };
        if !self.is_connected(&name) {
            return Err(ErrorCode::DeviceNotConnected);
        }
        self.devices
            .get_mut(&device_id)
            .ok_or(ErrorCode::InvalidDeviceId)
    }

    fn channel(&mut self, channel_id: u32) -> Result<&mut MockChannel, ErrorCode> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(ErrorCode::InvalidChannelId)
    }

    /// Let pending bus frames arrive on a channel
    fn pump(&mut self, channel_id: u32) -> Result<&mut MockChannel, ErrorCode> {
        let MockState {
            channels, clock_us, ..
        } = self;
        let channel = channels
            .get_mut(&channel_id)
            .ok_or(ErrorCode::InvalidChannelId)?;
        while let Some(mut frame) = channel.bus.pop_front() {
            if channel.admits(&frame) {
                *clock_us = clock_us.wrapping_add(TICK_US);
                frame.timestamp = *clock_us;
                channel.rx.push_back(frame);
            }
        }
        Ok(channel)
    }

    fn snapshot(&self) -> Vec<Device> {
        self.things
            .iter()
            .map(|thing| {
                let open = self.devices.values().any(|d| d.name == thing.name);
                let availability = match (thing.connected, open) {
                    (_, true) => device_state::IN_USE,
                    (true, false) => device_state::AVAILABLE,
                    (false, false) => device_state::UNKNOWN,
                };
                let signal = if thing.connected { 100 } else { 0 };
                Device {
                    name: thing.name.clone(),
                    availability,
                    dll_fw_status: dll_fw_status::COMPATIBLE,
                    connect_media: connect_media::WIRED,
                    connect_speed: thing.connect_speed,
                    signal_quality: signal,
                    signal_strength: signal,
                }
            })
            .collect()
    }

    unsafe fn scan_for_devices<U: NativeUlong>(&mut self, device_count: *mut U) -> Outcome {
        if device_count.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let devices = self.snapshot();
        *device_count = U::from_u32(devices.len() as u32);
        self.scan = Some(devices);
        self.cursor = 0;
        Ok(())
    }

    unsafe fn get_next_device<U: NativeUlong>(&mut self, out: *mut SDevice<U>) -> Outcome {
        if out.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let device = match &self.scan {
            None => return Err(ErrorCode::BufferEmpty),
            Some(devices) if devices.is_empty() => return Err(ErrorCode::BufferEmpty),
            Some(devices) => devices
                .get(self.cursor)
                .cloned()
                .ok_or(ErrorCode::ExceededLimit)?,
        };
        *out = device.encode::<U>().map_err(|_| ErrorCode::Failed)?;
        self.cursor += 1;
        Ok(())
    }

    unsafe fn open<U: NativeUlong>(&mut self, name: *const c_char, device_id: *mut U) -> Outcome {
        if name.is_null() || device_id.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        if name.is_empty() {
            return Err(ErrorCode::NullParameter);
        }
        if !self.is_connected(&name) {
            return Err(ErrorCode::DeviceNotConnected);
        }
        if self.devices.values().any(|d| d.name == name) {
            return Err(ErrorCode::DeviceInUse);
        }

        let id = next(&mut self.next_device_id);
        self.devices.insert(
            id,
            OpenDevice {
                name,
                pins: BTreeMap::new(),
            },
        );
        *device_id = U::from_u32(id);
        Ok(())
    }

    fn close(&mut self, device_id: u32) -> Outcome {
        if self.devices.is_empty() {
            return Err(ErrorCode::DeviceNotOpen);
        }
        if self.devices.remove(&device_id).is_none() {
            return Err(ErrorCode::InvalidDeviceId);
        }
        self.channels.retain(|_, ch| ch.device_id != device_id);
        Ok(())
    }

    unsafe fn connect<U: NativeUlong>(
        &mut self,
        device_id: u32,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
        resource: ResourceStruct<U>,
        channel_id: *mut U,
    ) -> Outcome {
        let name = self.device(device_id)?.name.clone();
        if channel_id.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        match ProtocolId::from_raw(protocol_id) {
            Some(protocol) if !protocol.is_logical() => {}
            _ => return Err(ErrorCode::ProtocolIdNotSupported),
        }
        if ConnectFlags::from_bits(flags).is_none() {
            return Err(ErrorCode::FlagNotSupported);
        }
        if baud_rate == 0 {
            return Err(ErrorCode::BaudrateNotSupported);
        }

        let pins = read_list(resource.resource_list_ptr, resource.num_of_resources)?;
        if narrow(resource.connector) != connector::J1962
            || pins.is_empty()
            || pins.iter().any(|pin| !J1962_PINS.contains(pin))
        {
            return Err(ErrorCode::PinNotSupported);
        }
        let busy = self
            .channels
            .values()
            .filter(|ch| ch.device_id == device_id)
            .any(|ch| ch.pins.iter().any(|pin| pins.contains(pin)));
        if busy {
            return Err(ErrorCode::ResourceConflict);
        }
        let powered = self
            .devices
            .get(&device_id)
            .map_or(false, |d| pins.iter().any(|pin| d.pins.contains_key(pin)));
        if powered {
            return Err(ErrorCode::PinInUse);
        }

        let mut channel = MockChannel::new(device_id, protocol_id);
        channel.pins = pins;
        channel.config.insert(config_param::DATA_RATE, baud_rate);
        channel.config.insert(config_param::LOOPBACK, 0);
        if let Some(thing) = self.thing(&name) {
            channel.bus = thing
                .traffic
                .iter()
                .filter(|frame| frame.protocol_id == protocol_id)
                .cloned()
                .collect();
        }

        let id = next(&mut self.next_channel_id);
        self.channels.insert(id, channel);
        *channel_id = U::from_u32(id);
        Ok(())
    }

    fn disconnect(&mut self, channel_id: u32) -> Outcome {
        match self.channels.get(&channel_id) {
            Some(ch) if ch.parent.is_none() => {}
            _ => return Err(ErrorCode::InvalidChannelId),
        }
        self.channels.remove(&channel_id);
        self.channels.retain(|_, ch| ch.parent != Some(channel_id));
        Ok(())
    }

    unsafe fn logical_connect<U: NativeUlong>(
        &mut self,
        physical_channel_id: u32,
        protocol_id: u32,
        descriptor: *mut c_void,
        channel_id: *mut U,
    ) -> Outcome {
        if descriptor.is_null() || channel_id.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let parent = self.channel(physical_channel_id)?;
        if parent.parent.is_some() || parent.protocol() != Some(ProtocolId::Can) {
            return Err(ErrorCode::LogChanNotAllowed);
        }
        let device_id = parent.device_id;
        if ProtocolId::from_raw(protocol_id) != Some(ProtocolId::Iso15765Logical) {
            return Err(ErrorCode::ProtocolIdNotSupported);
        }

        let descriptor = &*(descriptor as *const Iso15765ChannelDescriptor<U>);
        let addresses = (descriptor.local_address, descriptor.remote_address);
        let siblings: Vec<&MockChannel> = self
            .channels
            .values()
            .filter(|ch| ch.parent == Some(physical_channel_id))
            .collect();
        if siblings.iter().any(|ch| ch.addresses == Some(addresses)) {
            return Err(ErrorCode::NotUnique);
        }
        if siblings.len() >= MAX_LOGICAL_CHANNELS {
            return Err(ErrorCode::ExceededLimit);
        }

        let mut channel = MockChannel::new(device_id, protocol_id);
        channel.parent = Some(physical_channel_id);
        channel.addresses = Some(addresses);
        let id = next(&mut self.next_channel_id);
        self.channels.insert(id, channel);
        *channel_id = U::from_u32(id);
        Ok(())
    }

    fn logical_disconnect(&mut self, channel_id: u32) -> Outcome {
        match self.channels.get(&channel_id) {
            Some(ch) if ch.parent.is_some() => {
                self.channels.remove(&channel_id);
                Ok(())
            }
            _ => Err(ErrorCode::InvalidChannelId),
        }
    }

    unsafe fn select<U: NativeUlong>(
        &mut self,
        channel_set: *mut SChannelSet<U>,
        select_type: u32,
    ) -> Outcome {
        if channel_set.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        if select_type != SelectType::Readable.as_raw() {
            return Err(ErrorCode::SelectTypeNotSupported);
        }
        let set = &mut *channel_set;
        let ids = read_list(set.channel_list, set.channel_count)?;
        if ids.is_empty() {
            return Err(ErrorCode::NullParameter);
        }
        let threshold = narrow(set.channel_threshold) as usize;
        if threshold > ids.len() {
            return Err(ErrorCode::ExceededLimit);
        }

        let mut ready = Vec::new();
        for id in &ids {
            if !self.pump(*id)?.rx.is_empty() {
                ready.push(*id);
            }
        }
        if ready.len() < threshold {
            return Err(ErrorCode::Timeout);
        }

        for (i, id) in ready.iter().enumerate() {
            *set.channel_list.add(i) = U::from_u32(*id);
        }
        set.channel_count = U::from_u32(ready.len() as u32);
        Ok(())
    }

    unsafe fn read_msgs<U: NativeUlong>(
        &mut self,
        channel_id: u32,
        msgs: *mut PassThruMsg<U>,
        num_msgs: *mut U,
        timeout: u32,
    ) -> Outcome {
        if msgs.is_null() || num_msgs.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let requested = narrow(*num_msgs) as usize;
        *num_msgs = U::from_u32(0);
        let channel = self.pump(channel_id)?;

        let mut read = 0usize;
        while read < requested {
            let Some(frame) = channel.rx.front() else {
                break;
            };
            if write_raw_message(frame, msgs.add(read)).is_err() {
                *num_msgs = U::from_u32(read as u32);
                return Err(ErrorCode::BufferTooSmall);
            }
            channel.rx.pop_front();
            read += 1;
        }
        *num_msgs = U::from_u32(read as u32);

        if requested > 0 && read == 0 {
            return Err(if timeout == 0 {
                ErrorCode::BufferEmpty
            } else {
                ErrorCode::Timeout
            });
        }
        if read < requested && timeout > 0 {
            return Err(ErrorCode::Timeout);
        }
        Ok(())
    }

    unsafe fn queue_msgs<U: NativeUlong>(
        &mut self,
        channel_id: u32,
        msgs: *mut PassThruMsg<U>,
        num_msgs: *mut U,
    ) -> Outcome {
        if msgs.is_null() || num_msgs.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let requested = narrow(*num_msgs) as usize;
        *num_msgs = U::from_u32(0);
        let channel = self.channel(channel_id)?;

        for i in 0..requested {
            let frame = match read_raw_message(msgs.add(i)) {
                Ok(frame) if frame.protocol_id != channel.protocol_id => {
                    return Err(ErrorCode::MsgProtocolId)
                }
                Ok(frame) if !frame.data.is_empty() => frame,
                _ => return Err(ErrorCode::InvalidMsg),
            };
            if channel.loopback() {
                channel.bus.push_back(Message {
                    rx_status: RxStatus::TX_MSG_TYPE.bits(),
                    tx_flags: 0,
                    ..frame
                });
            }
            *num_msgs = U::from_u32(i as u32 + 1);
        }
        Ok(())
    }

    unsafe fn start_periodic_msg<U: NativeUlong>(
        &mut self,
        channel_id: u32,
        msg: *mut PassThruMsg<U>,
        msg_id: *mut U,
        interval_ms: u32,
    ) -> Outcome {
        if msg.is_null() || msg_id.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let channel = self.channel(channel_id)?;
        if !PERIODIC_INTERVAL_MS.contains(&interval_ms) {
            return Err(ErrorCode::TimeIntervalNotSupported);
        }
        let frame = read_raw_message(msg).map_err(|_| ErrorCode::InvalidMsg)?;
        if frame.protocol_id != channel.protocol_id {
            return Err(ErrorCode::MsgProtocolId);
        }
        if channel.periodic.len() >= MAX_PERIODIC_MSGS {
            return Err(ErrorCode::ExceededLimit);
        }

        let id = next(&mut self.next_periodic_id);
        self.channel(channel_id)?
            .periodic
            .insert(id, (frame, interval_ms));
        *msg_id = U::from_u32(id);
        Ok(())
    }

    fn stop_periodic_msg(&mut self, channel_id: u32, msg_id: u32) -> Outcome {
        match self.channel(channel_id)?.periodic.remove(&msg_id) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::InvalidMsgId),
        }
    }

    unsafe fn start_msg_filter<U: NativeUlong>(
        &mut self,
        channel_id: u32,
        filter_type: u32,
        mask_msg: *mut PassThruMsg<U>,
        pattern_msg: *mut PassThruMsg<U>,
        filter_id: *mut U,
    ) -> Outcome {
        if mask_msg.is_null() || pattern_msg.is_null() || filter_id.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let channel = self.channel(channel_id)?;
        let filter_type = if filter_type == FilterType::Pass.as_raw() {
            FilterType::Pass
        } else if filter_type == FilterType::Block.as_raw() {
            FilterType::Block
        } else {
            return Err(ErrorCode::FilterTypeNotSupported);
        };
        let mask = read_raw_message(mask_msg).map_err(|_| ErrorCode::InvalidMsg)?;
        let pattern = read_raw_message(pattern_msg).map_err(|_| ErrorCode::InvalidMsg)?;
        if mask.protocol_id != channel.protocol_id || pattern.protocol_id != channel.protocol_id {
            return Err(ErrorCode::MsgProtocolId);
        }
        if mask.data.is_empty()
            || mask.data.len() != pattern.data.len()
            || mask.data.len() > MAX_FILTER_LEN
        {
            return Err(ErrorCode::InvalidMsg);
        }

        let filter = MockFilter {
            filter_type,
            mask: mask.data,
            pattern: pattern.data,
        };
        if channel.filters.values().any(|f| *f == filter) {
            return Err(ErrorCode::NotUnique);
        }
        if channel.filters.len() >= MAX_FILTERS {
            return Err(ErrorCode::ExceededLimit);
        }

        let id = next(&mut self.next_filter_id);
        self.channel(channel_id)?.filters.insert(id, filter);
        *filter_id = U::from_u32(id);
        Ok(())
    }

    fn stop_msg_filter(&mut self, channel_id: u32, filter_id: u32) -> Outcome {
        match self.channel(channel_id)?.filters.remove(&filter_id) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::InvalidFilterId),
        }
    }

    unsafe fn set_programming_voltage<U: NativeUlong>(
        &mut self,
        device_id: u32,
        resource: ResourceStruct<U>,
        millivolts: u32,
    ) -> Outcome {
        self.device(device_id)?;
        let pins = read_list(resource.resource_list_ptr, resource.num_of_resources)?;
        let &[pin] = pins.as_slice() else {
            return Err(ErrorCode::PinNotSupported);
        };
        if narrow(resource.connector) != connector::J1962 || !J1962_PINS.contains(&pin) {
            return Err(ErrorCode::PinNotSupported);
        }
        let busy = self
            .channels
            .values()
            .any(|ch| ch.device_id == device_id && ch.pins.contains(&pin));
        if busy {
            return Err(ErrorCode::PinInUse);
        }

        let device = self.device(device_id)?;
        match millivolts {
            voltage::PIN_OFF => {
                device.pins.remove(&pin);
            }
            voltage::SHORT_TO_GROUND if pin != SHORT_TO_GROUND_PIN => {
                return Err(ErrorCode::PinNotSupported)
            }
            voltage::SHORT_TO_GROUND => {
                device.pins.insert(pin, millivolts);
            }
            mv if (voltage::MIN_MILLIVOLTS..=voltage::MAX_MILLIVOLTS).contains(&mv) => {
                if device.pins.keys().any(|p| *p != pin) {
                    return Err(ErrorCode::VoltageInUse);
                }
                device.pins.insert(pin, mv);
            }
            _ => return Err(ErrorCode::ExceededLimit),
        }
        Ok(())
    }

    unsafe fn read_version(
        &mut self,
        device_id: u32,
        firmware_version: *mut c_char,
        dll_version: *mut c_char,
        api_version: *mut c_char,
    ) -> Outcome {
        let name = self.device(device_id)?.name.clone();
        if firmware_version.is_null() || dll_version.is_null() || api_version.is_null() {
            return Err(ErrorCode::NullParameter);
        }
        let thing = self.thing(&name).ok_or(ErrorCode::DeviceNotConnected)?;
        write_text(firmware_version, &thing.firmware_version);
        write_text(dll_version, &thing.dll_version);
        write_text(api_version, &thing.api_version);
        Ok(())
    }

    unsafe fn ioctl<U: NativeUlong>(
        &mut self,
        target: u32,
        ioctl_id: u32,
        input: *mut c_void,
        output: *mut c_void,
    ) -> Outcome {
        let id = IoctlId::from_raw(ioctl_id).ok_or(ErrorCode::IoctlIdNotSupported)?;
        match id {
            IoctlId::GetConfig => {
                require_null(output)?;
                let channel = self.channel(target)?;
                for entry in config_entries::<U>(input)? {
                    let value = channel.get_config(narrow(entry.parameter))?;
                    entry.value = U::from_u32(value);
                }
            }
            IoctlId::SetConfig => {
                require_null(output)?;
                let channel = self.channel(target)?;
                let entries = config_entries::<U>(input)?;
                for entry in entries.iter() {
                    channel.check_config(narrow(entry.parameter), narrow(entry.value))?;
                }
                for entry in entries.iter() {
                    channel
                        .config
                        .insert(narrow(entry.parameter), narrow(entry.value));
                }
            }
            IoctlId::ReadPinVoltage => {
                let device = self.device(target)?;
                if input.is_null() || output.is_null() {
                    return Err(ErrorCode::NullParameter);
                }
                let resource = &*(input as *const ResourceStruct<U>);
                let pins = read_list(resource.resource_list_ptr, resource.num_of_resources)?;
                let &[pin] = pins.as_slice() else {
                    return Err(ErrorCode::PinNotSupported);
                };
                let mv = match device.pins.get(&pin) {
                    Some(mv) if *mv <= voltage::MAX_MILLIVOLTS => *mv,
                    Some(_) => 0,
                    None if pin == BATTERY_PIN => BATTERY_MILLIVOLTS,
                    None => 0,
                };
                *(output as *mut U) = U::from_u32(mv);
            }
            IoctlId::ReadProgVoltage => {
                let device = self.device(target)?;
                require_null(input)?;
                if output.is_null() {
                    return Err(ErrorCode::NullParameter);
                }
                let mv = device
                    .pins
                    .values()
                    .copied()
                    .find(|mv| *mv <= voltage::MAX_MILLIVOLTS)
                    .unwrap_or(0);
                *(output as *mut U) = U::from_u32(mv);
            }
            IoctlId::FiveBaudInit => {
                let channel = self.channel(target)?;
                if !matches!(
                    channel.protocol(),
                    Some(ProtocolId::Iso9141 | ProtocolId::Iso14230)
                ) {
                    return Err(ErrorCode::IoctlIdNotSupported);
                }
                if output.is_null() {
                    return Err(ErrorCode::NullParameter);
                }
                if read_bytes(input as *const SByteArray<U>)?.len() != 1 {
                    return Err(ErrorCode::InvalidMsg);
                }
                let response = &mut *(output as *mut SByteArray<U>);
                if narrow(response.num_of_bytes) < KEY_BYTES.len() as u32
                    || response.byte_ptr.is_null()
                {
                    return Err(ErrorCode::BufferTooSmall);
                }
                ptr::copy_nonoverlapping(KEY_BYTES.as_ptr(), response.byte_ptr, KEY_BYTES.len());
                response.num_of_bytes = U::from_u32(KEY_BYTES.len() as u32);
            }
            IoctlId::FastInit => {
                let channel = self.channel(target)?;
                if channel.protocol() != Some(ProtocolId::Iso14230) {
                    return Err(ErrorCode::IoctlIdNotSupported);
                }
                if input.is_null() || output.is_null() {
                    return Err(ErrorCode::NullParameter);
                }
                let request = read_raw_message(input as *const PassThruMsg<U>)
                    .map_err(|_| ErrorCode::InvalidMsg)?;
                // Format byte, target, source, service
                if request.data.len() < 4 {
                    return Err(ErrorCode::InvalidMsg);
                }
                let response = Message {
                    protocol_id: channel.protocol_id,
                    data: vec![0x83, request.data[2], request.data[1], 0xC1, 0xEF, 0x8F],
                    ..Default::default()
                };
                write_raw_message(&response, output as *mut PassThruMsg<U>)
                    .map_err(|_| ErrorCode::BufferTooSmall)?;
            }
            IoctlId::ClearTxQueue
            | IoctlId::ClearRxQueue
            | IoctlId::ClearPeriodicMsgs
            | IoctlId::ClearMsgFilters
            | IoctlId::ClearFunctMsgLookupTable
            | IoctlId::BusOn => {
                require_null(input)?;
                require_null(output)?;
                let channel = self.channel(target)?;
                match id {
                    IoctlId::ClearRxQueue => {
                        channel.rx.clear();
                        channel.bus.clear();
                    }
                    IoctlId::ClearPeriodicMsgs => channel.periodic.clear(),
                    IoctlId::ClearMsgFilters => channel.filters.clear(),
                    IoctlId::ClearFunctMsgLookupTable => channel.functional.clear(),
                    IoctlId::BusOn if channel.protocol() != Some(ProtocolId::Can) => {
                        return Err(ErrorCode::IoctlIdNotSupported)
                    }
                    _ => {}
                }
            }
            IoctlId::AddToFunctMsgLookupTable | IoctlId::DeleteFromFunctMsgLookupTable => {
                require_null(output)?;
                let channel = self.channel(target)?;
                if channel.protocol() != Some(ProtocolId::J1850Pwm) {
                    return Err(ErrorCode::IoctlIdNotSupported);
                }
                let addresses = read_bytes(input as *const SByteArray<U>)?;
                for address in addresses {
                    if id == IoctlId::AddToFunctMsgLookupTable {
                        channel.functional.insert(address);
                    } else {
                        channel.functional.remove(&address);
                    }
                }
            }
        }
        Ok(())
    }
}

/// An emulated PassThru library
///
/// `U` is the width of `unsigned long` the driver speaks; it defaults to the
/// host's `c_ulong` like a real library.
#[derive(Debug, Default)]
pub struct MockDriver<U = c_ulong> {
    state: Mutex<MockState>,
    _ulong: PhantomData<fn() -> U>,
}

impl<U: NativeUlong> MockDriver<U> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            _ulong: PhantomData,
        }
    }

    /// A registry of `count` connected things named `passthru-1` ..
    pub fn with_devices(count: usize) -> Self {
        let driver = Self::new();
        for i in 1..=count {
            driver.insert(MockThing::new(format!("passthru-{i}")));
        }
        driver
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report a call's outcome the way a vendor library would
    fn finish(&self, state: &mut MockState, call: &'static str, outcome: Outcome) -> c_long {
        match outcome {
            Ok(()) => STATUS_NOERROR,
            Err(code) => {
                debug!(call, code = code.name(), "Emulated call failed");
                state.last_error = format!("{call}: {}", code.description());
                code.as_status()
            }
        }
    }

    /// Add a thing, replacing any with the same name
    ///
    /// The name must fit an `SDEVICE` name field.
    pub fn register(&self, thing: MockThing) -> error::Result<()> {
        encode_name(&thing.name, "name")?;
        self.insert(thing);
        Ok(())
    }

    fn insert(&self, thing: MockThing) {
        let mut state = self.state();
        state.things.retain(|t| t.name != thing.name);
        state.things.push(thing);
    }

    /// Mark a thing as no longer physically present
    pub fn unplug(&self, name: &str) -> bool {
        let mut state = self.state();
        match state.things.iter_mut().find(|t| t.name == name) {
            Some(thing) => {
                thing.connected = false;
                true
            }
            None => false,
        }
    }

    /// Put a frame on the bus of a connected channel
    pub fn inject(&self, channel: ChannelId, frame: Message) -> bool {
        let mut state = self.state();
        match state.channels.get_mut(&channel.0) {
            Some(ch) => {
                ch.bus.push_back(frame);
                true
            }
            None => false,
        }
    }

    pub fn open_device_count(&self) -> usize {
        self.state().devices.len()
    }

    pub fn channel_count(&self) -> usize {
        self.state().channels.len()
    }

    pub fn filter_count(&self, channel: ChannelId) -> usize {
        self.state()
            .channels
            .get(&channel.0)
            .map_or(0, |ch| ch.filters.len())
    }

    pub fn periodic_count(&self, channel: ChannelId) -> usize {
        self.state()
            .channels
            .get(&channel.0)
            .map_or(0, |ch| ch.periodic.len())
    }

    /// Programming voltage currently applied to a pin
    pub fn programming_voltage(&self, device: DeviceId, pin: u32) -> Option<u32> {
        self.state()
            .devices
            .get(&device.0)
            .and_then(|d| d.pins.get(&pin).copied())
    }
}

impl<U: NativeUlong> PassThruDriver for MockDriver<U> {
    type Ulong = U;

    unsafe fn scan_for_devices(&self, device_count: *mut U) -> c_long {
        let mut state = self.state();
        let outcome = state.scan_for_devices(device_count);
        self.finish(&mut state, "PassThruScanForDevices", outcome)
    }

    unsafe fn get_next_device(&self, device: *mut SDevice<U>) -> c_long {
        let mut state = self.state();
        let outcome = state.get_next_device(device);
        self.finish(&mut state, "PassThruGetNextDevice", outcome)
    }

    unsafe fn open(&self, name: *const c_char, device_id: *mut U) -> c_long {
        let mut state = self.state();
        let outcome = state.open(name, device_id);
        self.finish(&mut state, "PassThruOpen", outcome)
    }

    unsafe fn close(&self, device_id: U) -> c_long {
        let mut state = self.state();
        let outcome = state.close(narrow(device_id));
        self.finish(&mut state, "PassThruClose", outcome)
    }

    unsafe fn connect(
        &self,
        device_id: U,
        protocol_id: U,
        flags: U,
        baud_rate: U,
        resource: ResourceStruct<U>,
        channel_id: *mut U,
    ) -> c_long {
        let mut state = self.state();
        let outcome = state.connect(
            narrow(device_id),
            narrow(protocol_id),
            narrow(flags),
            narrow(baud_rate),
            resource,
            channel_id,
        );
        self.finish(&mut state, "PassThruConnect", outcome)
    }

    unsafe fn disconnect(&self, channel_id: U) -> c_long {
        let mut state = self.state();
        let outcome = state.disconnect(narrow(channel_id));
        self.finish(&mut state, "PassThruDisconnect", outcome)
    }

    unsafe fn logical_connect(
        &self,
        physical_channel_id: U,
        protocol_id: U,
        _flags: U,
        channel_descriptor: *mut c_void,
        channel_id: *mut U,
    ) -> c_long {
        let mut state = self.state();
        let outcome = state.logical_connect(
            narrow(physical_channel_id),
            narrow(protocol_id),
            channel_descriptor,
            channel_id,
        );
        self.finish(&mut state, "PassThruLogicalConnect", outcome)
    }

    unsafe fn logical_disconnect(&self, channel_id: U) -> c_long {
        let mut state = self.state();
        let outcome = state.logical_disconnect(narrow(channel_id));
        self.finish(&mut state, "PassThruLogicalDisconnect", outcome)
    }

    unsafe fn select(&self, channel_set: *mut SChannelSet<U>, select_type: U, _timeout: U) -> c_long {
        let mut state = self.state();
        let outcome = state.select(channel_set, narrow(select_type));
        self.finish(&mut state, "PassThruSelect", outcome)
    }

    unsafe fn read_msgs(
        &self,
        channel_id: U,
        msgs: *mut PassThruMsg<U>,
        num_msgs: *mut U,
        timeout: U,
    ) -> c_long {
        let mut state = self.state();
        let outcome = state.read_msgs(narrow(channel_id), msgs, num_msgs, narrow(timeout));
        self.finish(&mut state, "PassThruReadMsgs", outcome)
    }

    unsafe fn queue_msgs(&self, channel_id: U, msgs: *mut PassThruMsg<U>, num_msgs: *mut U) -> c_long {
        let mut state = self.state();
        let outcome = state.queue_msgs(narrow(channel_id), msgs, num_msgs);
        self.finish(&mut state, "PassThruQueueMsgs", outcome)
    }

    unsafe fn start_periodic_msg(
        &self,
        channel_id: U,
        msg: *mut PassThruMsg<U>,
        msg_id: *mut U,
        time_interval: U,
    ) -> c_long {
        let mut state = self.state();
        let outcome =
            state.start_periodic_msg(narrow(channel_id), msg, msg_id, narrow(time_interval));
        self.finish(&mut state, "PassThruStartPeriodicMsg", outcome)
    }

    unsafe fn stop_periodic_msg(&self, channel_id: U, msg_id: U) -> c_long {
        let mut state = self.state();
        let outcome = state.stop_periodic_msg(narrow(channel_id), narrow(msg_id));
        self.finish(&mut state, "PassThruStopPeriodicMsg", outcome)
    }

    unsafe fn start_msg_filter(
        &self,
        channel_id: U,
        filter_type: U,
        mask_msg: *mut PassThruMsg<U>,
        pattern_msg: *mut PassThruMsg<U>,
        filter_id: *mut U,
    ) -> c_long {
        let mut state = self.state();
        let outcome = state.start_msg_filter(
            narrow(channel_id),
            narrow(filter_type),
            mask_msg,
            pattern_msg,
            filter_id,
        );
        self.finish(&mut state, "PassThruStartMsgFilter", outcome)
    }

    unsafe fn stop_msg_filter(&self, channel_id: U, filter_id: U) -> c_long {
        let mut state = self.state();
        let outcome = state.stop_msg_filter(narrow(channel_id), narrow(filter_id));
        self.finish(&mut state, "PassThruStopMsgFilter", outcome)
    }

    unsafe fn set_programming_voltage(
        &self,
        device_id: U,
        resource: ResourceStruct<U>,
        voltage: U,
    ) -> c_long {
        let mut state = self.state();
        let outcome = state.set_programming_voltage(narrow(device_id), resource, narrow(voltage));
        self.finish(&mut state, "PassThruSetProgrammingVoltage", outcome)
    }

    unsafe fn read_version(
        &self,
        device_id: U,
        firmware_version: *mut c_char,
        dll_version: *mut c_char,
        api_version: *mut c_char,
    ) -> c_long {
        let mut state = self.state();
        let outcome =
            state.read_version(narrow(device_id), firmware_version, dll_version, api_version);
        self.finish(&mut state, "PassThruReadVersion", outcome)
    }

    unsafe fn get_last_error(&self, error_description: *mut c_char) -> c_long {
        let state = self.state();
        if error_description.is_null() {
            return ErrorCode::NullParameter.as_status();
        }
        write_text(error_description, &state.last_error);
        STATUS_NOERROR
    }

    unsafe fn ioctl(&self, control_target: U, ioctl_id: U, input: *mut c_void, output: *mut c_void) -> c_long {
        let mut state = self.state();
        let outcome = state.ioctl::<U>(narrow(control_target), narrow(ioctl_id), input, output);
        self.finish(&mut state, "PassThruIoctl", outcome)
    }
}
