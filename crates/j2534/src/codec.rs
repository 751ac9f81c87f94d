//! Struct Codec
//!
//! Converts model objects to and from their native layouts. Structures that
//! reference out-of-line memory (resource lists, channel lists, payload
//! buffers) are encoded into owning wrappers whose pointers refer to storage
//! held by the wrapper itself, so everything allocated for a call is released
//! when the wrapper drops, on every exit path.

use libc::c_char;
use std::ptr;

use crate::error::{PassThruError, Result};
use crate::ffi::{
    Iso15765ChannelDescriptor, NativeUlong, PassThruMsg, ResourceStruct, SByteArray, SChannelSet,
    SConfig, SConfigList, SDevice, NAME_LEN,
};
use crate::models::{ChannelDescriptor, ChannelId, ChannelSet, ConfigParam, Device, Message, Resource};

/// Lossless conversion between a model and its native structure
pub trait NativeCodec: Sized {
    type Native<U: NativeUlong>;

    fn encode<U: NativeUlong>(&self) -> Result<Self::Native<U>>;

    fn decode<U: NativeUlong>(native: &Self::Native<U>) -> Result<Self>;
}

fn count<U: NativeUlong>(len: usize, field: &'static str) -> Result<U> {
    u32::try_from(len)
        .map(U::from_u32)
        .map_err(|_| PassThruError::ValueTooLarge {
            field,
            max: u64::from(u32::MAX),
            actual: len as u64,
        })
}

fn mut_ptr_or_null<T>(items: &mut [T]) -> *mut T {
    if items.is_empty() {
        ptr::null_mut()
    } else {
        items.as_mut_ptr()
    }
}

/// Copy a string into a fixed, NUL-padded text field
pub fn encode_name(value: &str, field: &'static str) -> Result<[c_char; NAME_LEN]> {
    let bytes = value.as_bytes();
    if bytes.contains(&0) {
        return Err(PassThruError::InteriorNul { field });
    }
    // One byte is reserved for the terminator.
    if bytes.len() >= NAME_LEN {
        return Err(PassThruError::ValueTooLarge {
            field,
            max: (NAME_LEN - 1) as u64,
            actual: bytes.len() as u64,
        });
    }

    let mut out = [0 as c_char; NAME_LEN];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src as c_char;
    }
    Ok(out)
}

/// Read a fixed text field up to the first NUL or the end of the field
pub fn decode_name(field: &[c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl NativeCodec for Device {
    type Native<U: NativeUlong> = SDevice<U>;

    fn encode<U: NativeUlong>(&self) -> Result<SDevice<U>> {
        Ok(SDevice {
            device_name: encode_name(&self.name, "device_name")?,
            device_available: U::from_u32(self.availability),
            device_dll_fw_status: U::from_u32(self.dll_fw_status),
            device_connect_media: U::from_u32(self.connect_media),
            device_connect_speed: U::from_u32(self.connect_speed),
            device_signal_quality: U::from_u32(self.signal_quality),
            device_signal_strength: U::from_u32(self.signal_strength),
        })
    }

    fn decode<U: NativeUlong>(native: &SDevice<U>) -> Result<Self> {
        Ok(Device {
            name: decode_name(&native.device_name),
            availability: native.device_available.to_u32("device_available")?,
            dll_fw_status: native.device_dll_fw_status.to_u32("device_dll_fw_status")?,
            connect_media: native.device_connect_media.to_u32("device_connect_media")?,
            connect_speed: native.device_connect_speed.to_u32("device_connect_speed")?,
            signal_quality: native.device_signal_quality.to_u32("device_signal_quality")?,
            signal_strength: native.device_signal_strength.to_u32("device_signal_strength")?,
        })
    }
}

/// `RESOURCE_STRUCT` together with the pin list it points at
#[derive(Debug)]
pub struct NativeResource<U> {
    raw: ResourceStruct<U>,
    list: Vec<U>,
}

impl<U: NativeUlong> NativeResource<U> {
    /// Copy of the structure for by-value calls; valid while `self` lives
    pub fn raw(&self) -> ResourceStruct<U> {
        self.raw
    }

    pub fn as_mut_ptr(&mut self) -> *mut ResourceStruct<U> {
        &mut self.raw
    }
}

impl NativeCodec for Resource {
    type Native<U: NativeUlong> = NativeResource<U>;

    fn encode<U: NativeUlong>(&self) -> Result<NativeResource<U>> {
        let mut list: Vec<U> = self.resources.iter().map(|pin| U::from_u32(*pin)).collect();
        let raw = ResourceStruct {
            connector: U::from_u32(self.connector),
            num_of_resources: count(list.len(), "num_of_resources")?,
            resource_list_ptr: mut_ptr_or_null(&mut list),
        };
        Ok(NativeResource { raw, list })
    }

    fn decode<U: NativeUlong>(native: &NativeResource<U>) -> Result<Self> {
        let n = native.raw.num_of_resources.to_u32("num_of_resources")? as usize;
        let resources = native.list[..n.min(native.list.len())]
            .iter()
            .map(|pin| pin.to_u32("resource_list"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Resource {
            connector: native.raw.connector.to_u32("connector")?,
            resources,
        })
    }
}

/// `SCHANNELSET` together with its channel list
#[derive(Debug)]
pub struct NativeChannelSet<U> {
    raw: SChannelSet<U>,
    list: Vec<U>,
}

impl<U: NativeUlong> NativeChannelSet<U> {
    pub fn as_mut_ptr(&mut self) -> *mut SChannelSet<U> {
        &mut self.raw
    }
}

impl NativeCodec for ChannelSet {
    type Native<U: NativeUlong> = NativeChannelSet<U>;

    fn encode<U: NativeUlong>(&self) -> Result<NativeChannelSet<U>> {
        let mut list: Vec<U> = self.channels.iter().map(|ch| U::from_u32(ch.0)).collect();
        let raw = SChannelSet {
            channel_count: count(list.len(), "channel_count")?,
            channel_threshold: U::from_u32(self.channel_threshold),
            channel_list: mut_ptr_or_null(&mut list),
        };
        Ok(NativeChannelSet { raw, list })
    }

    fn decode<U: NativeUlong>(native: &NativeChannelSet<U>) -> Result<Self> {
        let n = native.raw.channel_count.to_u32("channel_count")? as usize;
        let channels = native.list[..n.min(native.list.len())]
            .iter()
            .map(|ch| ch.to_u32("channel_list").map(ChannelId))
            .collect::<Result<Vec<_>>>()?;
        Ok(ChannelSet {
            channel_threshold: native.raw.channel_threshold.to_u32("channel_threshold")?,
            channels,
        })
    }
}

/// `PASSTHRU_MSG` together with its payload buffer
#[derive(Debug)]
pub struct NativeMessage<U> {
    raw: PassThruMsg<U>,
    buffer: Vec<u8>,
}

impl<U: NativeUlong> NativeMessage<U> {
    pub fn raw(&self) -> &PassThruMsg<U> {
        &self.raw
    }

    pub fn as_mut_ptr(&mut self) -> *mut PassThruMsg<U> {
        &mut self.raw
    }

    fn into_parts(self) -> (PassThruMsg<U>, Vec<u8>) {
        (self.raw, self.buffer)
    }
}

fn decode_message<U: NativeUlong>(raw: &PassThruMsg<U>, buffer: &[u8]) -> Result<Message> {
    let length = raw.data_length.to_u32("data_length")? as usize;
    // A library may report a length larger than the buffer it was given.
    let data = buffer[..length.min(buffer.len())].to_vec();
    Ok(Message {
        protocol_id: raw.protocol_id.to_u32("protocol_id")?,
        msg_handle: raw.msg_handle.to_u32("msg_handle")?,
        rx_status: raw.rx_status.to_u32("rx_status")?,
        tx_flags: raw.tx_flags.to_u32("tx_flags")?,
        timestamp: raw.timestamp.to_u32("timestamp")?,
        extra_data_index: raw.extra_data_index.to_u32("extra_data_index")?,
        data,
        data_buffer_size: raw.data_buffer_size.to_u32("data_buffer_size")?,
    })
}

/// Read a message handed over by pointer from the other side of the ABI
///
/// # Safety
///
/// `raw` must point at a valid `PASSTHRU_MSG` whose `DataBuffer` is null or
/// holds at least `DataBufferSize` bytes.
pub(crate) unsafe fn read_raw_message<U: NativeUlong>(raw: *const PassThruMsg<U>) -> Result<Message> {
    let raw = &*raw;
    let size = raw.data_buffer_size.to_u32("data_buffer_size")? as usize;
    let buffer: &[u8] = if raw.data_buffer.is_null() || size == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(raw.data_buffer, size)
    };
    decode_message(raw, buffer)
}

/// Fill a caller-allocated `PASSTHRU_MSG`, keeping its buffer and capacity
///
/// # Safety
///
/// Same contract as [`read_raw_message`], with write access.
pub(crate) unsafe fn write_raw_message<U: NativeUlong>(
    message: &Message,
    raw: *mut PassThruMsg<U>,
) -> Result<()> {
    let raw = &mut *raw;
    let capacity = raw.data_buffer_size.to_u32("data_buffer_size")? as usize;
    let len = message.data.len();
    if len > capacity || (raw.data_buffer.is_null() && len > 0) {
        return Err(PassThruError::ValueTooLarge {
            field: "data",
            max: capacity as u64,
            actual: len as u64,
        });
    }

    if len > 0 {
        ptr::copy_nonoverlapping(message.data.as_ptr(), raw.data_buffer, len);
    }
    raw.protocol_id = U::from_u32(message.protocol_id);
    raw.msg_handle = U::from_u32(message.msg_handle);
    raw.rx_status = U::from_u32(message.rx_status);
    raw.tx_flags = U::from_u32(message.tx_flags);
    raw.timestamp = U::from_u32(message.timestamp);
    raw.data_length = count(len, "data_length")?;
    raw.extra_data_index = U::from_u32(message.extra_data_index);
    Ok(())
}

impl NativeCodec for Message {
    type Native<U: NativeUlong> = NativeMessage<U>;

    fn encode<U: NativeUlong>(&self) -> Result<NativeMessage<U>> {
        let capacity = self.data_buffer_size as usize;
        if self.data.len() > capacity {
            return Err(PassThruError::ValueTooLarge {
                field: "data",
                max: capacity as u64,
                actual: self.data.len() as u64,
            });
        }

        let mut buffer = vec![0u8; capacity];
        buffer[..self.data.len()].copy_from_slice(&self.data);
        let raw = PassThruMsg {
            protocol_id: U::from_u32(self.protocol_id),
            msg_handle: U::from_u32(self.msg_handle),
            rx_status: U::from_u32(self.rx_status),
            tx_flags: U::from_u32(self.tx_flags),
            timestamp: U::from_u32(self.timestamp),
            data_length: count(self.data.len(), "data_length")?,
            extra_data_index: U::from_u32(self.extra_data_index),
            data_buffer: mut_ptr_or_null(&mut buffer),
            data_buffer_size: U::from_u32(self.data_buffer_size),
        };
        Ok(NativeMessage { raw, buffer })
    }

    fn decode<U: NativeUlong>(native: &NativeMessage<U>) -> Result<Self> {
        decode_message(&native.raw, &native.buffer)
    }
}

/// A contiguous `PASSTHRU_MSG` array, as taken by read and queue calls
#[derive(Debug)]
pub struct NativeMessages<U> {
    raw: Vec<PassThruMsg<U>>,
    buffers: Vec<Vec<u8>>,
}

impl<U: NativeUlong> NativeMessages<U> {
    pub fn encode(messages: &[Message]) -> Result<Self> {
        let mut raw = Vec::with_capacity(messages.len());
        let mut buffers = Vec::with_capacity(messages.len());
        for message in messages {
            let (msg, buffer) = message.encode::<U>()?.into_parts();
            raw.push(msg);
            buffers.push(buffer);
        }
        Ok(Self { raw, buffers })
    }

    /// `count` empty receive slots of `capacity` payload bytes each
    pub fn receive_slots(count: usize, protocol_id: u32, capacity: u32) -> Result<Self> {
        let slots = vec![Message::with_capacity(protocol_id, capacity); count];
        Self::encode(&slots)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_mut_ptr(&mut self) -> *mut PassThruMsg<U> {
        mut_ptr_or_null(&mut self.raw)
    }

    /// Decode the first `n` slots
    pub fn decode(&self, n: usize) -> Result<Vec<Message>> {
        self.raw
            .iter()
            .zip(&self.buffers)
            .take(n)
            .map(|(raw, buffer)| decode_message(raw, buffer))
            .collect()
    }
}

/// `SCONFIG_LIST` together with its entries
#[derive(Debug)]
pub struct NativeConfigList<U> {
    raw: SConfigList<U>,
    params: Vec<SConfig<U>>,
}

impl<U: NativeUlong> NativeConfigList<U> {
    pub fn encode(params: &[ConfigParam]) -> Result<Self> {
        let mut params: Vec<SConfig<U>> = params
            .iter()
            .map(|p| SConfig {
                parameter: U::from_u32(p.parameter),
                value: U::from_u32(p.value),
            })
            .collect();
        let raw = SConfigList {
            num_of_params: count(params.len(), "num_of_params")?,
            config_ptr: mut_ptr_or_null(&mut params),
        };
        Ok(Self { raw, params })
    }

    pub fn as_mut_ptr(&mut self) -> *mut SConfigList<U> {
        &mut self.raw
    }

    pub fn decode(&self) -> Result<Vec<ConfigParam>> {
        let n = self.raw.num_of_params.to_u32("num_of_params")? as usize;
        self.params[..n.min(self.params.len())]
            .iter()
            .map(|p| {
                Ok(ConfigParam {
                    parameter: p.parameter.to_u32("parameter")?,
                    value: p.value.to_u32("value")?,
                })
            })
            .collect()
    }
}

/// `SBYTE_ARRAY` together with its bytes
#[derive(Debug)]
pub struct NativeByteArray<U> {
    raw: SByteArray<U>,
    bytes: Vec<u8>,
}

impl<U: NativeUlong> NativeByteArray<U> {
    pub fn encode(bytes: &[u8]) -> Result<Self> {
        let mut bytes = bytes.to_vec();
        let raw = SByteArray {
            num_of_bytes: count(bytes.len(), "num_of_bytes")?,
            byte_ptr: mut_ptr_or_null(&mut bytes),
        };
        Ok(Self { raw, bytes })
    }

    /// A zeroed array the native side fills in
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::encode(&vec![0u8; capacity])
    }

    pub fn as_mut_ptr(&mut self) -> *mut SByteArray<U> {
        &mut self.raw
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        let n = self.raw.num_of_bytes.to_u32("num_of_bytes")? as usize;
        Ok(self.bytes[..n.min(self.bytes.len())].to_vec())
    }
}

impl NativeCodec for ChannelDescriptor {
    type Native<U: NativeUlong> = Iso15765ChannelDescriptor<U>;

    fn encode<U: NativeUlong>(&self) -> Result<Iso15765ChannelDescriptor<U>> {
        Ok(Iso15765ChannelDescriptor {
            local_tx_flags: U::from_u32(self.local_tx_flags),
            remote_tx_flags: U::from_u32(self.remote_tx_flags),
            local_address: self.local_address,
            remote_address: self.remote_address,
        })
    }

    fn decode<U: NativeUlong>(native: &Iso15765ChannelDescriptor<U>) -> Result<Self> {
        Ok(ChannelDescriptor {
            local_tx_flags: native.local_tx_flags.to_u32("local_tx_flags")?,
            remote_tx_flags: native.remote_tx_flags.to_u32("remote_tx_flags")?,
            local_address: native.local_address,
            remote_address: native.remote_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolId;
    use proptest::prelude::*;

    fn device(name: &str) -> Device {
        Device {
            name: name.to_string(),
            availability: 1,
            dll_fw_status: 1,
            connect_media: 2,
            connect_speed: 500_000,
            signal_quality: 90,
            signal_strength: 75,
        }
    }

    #[test]
    fn test_device_name_is_nul_padded() {
        let raw = device("thing-1").encode::<u32>().unwrap();
        assert_eq!(raw.device_name[..7], encode_name("thing-1", "n").unwrap()[..7]);
        assert!(raw.device_name[7..].iter().all(|c| *c == 0));
        assert_eq!(raw.device_connect_speed, 500_000);
    }

    #[test]
    fn test_device_name_limit() {
        let longest = "x".repeat(NAME_LEN - 1);
        assert!(device(&longest).encode::<u64>().is_ok());

        let too_long = "x".repeat(NAME_LEN);
        let err = device(&too_long).encode::<u64>().unwrap_err();
        assert!(matches!(
            err,
            PassThruError::ValueTooLarge { field: "device_name", max: 79, actual: 80 }
        ));
    }

    #[test]
    fn test_device_name_rejects_interior_nul() {
        let err = device("bad\0name").encode::<u32>().unwrap_err();
        assert!(matches!(err, PassThruError::InteriorNul { field: "device_name" }));
    }

    #[test]
    fn test_decode_name_without_terminator() {
        let field = [b'a' as c_char; NAME_LEN];
        assert_eq!(decode_name(&field).len(), NAME_LEN);
    }

    #[test]
    fn test_message_payload_exceeding_buffer() {
        let mut msg = Message::new(ProtocolId::Can, &[1, 2, 3, 4]);
        msg.data_buffer_size = 3;
        let err = msg.encode::<u32>().unwrap_err();
        assert!(matches!(
            err,
            PassThruError::ValueTooLarge { field: "data", max: 3, actual: 4 }
        ));
    }

    #[test]
    fn test_message_points_at_own_buffer() {
        let msg = Message::new(ProtocolId::Can, &[0, 0, 7, 0xE8, 0x41]);
        let native = msg.encode::<u64>().unwrap();
        let payload = unsafe { std::slice::from_raw_parts(native.raw().data_buffer, 5) };
        assert_eq!(payload, &[0, 0, 7, 0xE8, 0x41]);
        assert_eq!(native.raw().data_length, 5);
    }

    #[test]
    fn test_empty_lists_encode_null() {
        let native = Resource::j1962(&[]).encode::<u32>().unwrap();
        assert!(native.raw().resource_list_ptr.is_null());
        assert_eq!(native.raw().num_of_resources, 0);
    }

    #[test]
    fn test_decode_clamps_reported_length() {
        let msg = Message::with_capacity(ProtocolId::Can.as_raw(), 4);
        let mut native = msg.encode::<u32>().unwrap();
        native.raw.data_length = 100;
        let decoded = Message::decode(&native).unwrap();
        assert_eq!(decoded.data.len(), 4);
    }

    #[test]
    fn test_decode_rejects_wide_native_values() {
        let mut native = device("wide").encode::<u64>().unwrap();
        native.device_connect_speed = u64::from(u32::MAX) + 1;
        assert!(Device::decode(&native).is_err());
    }

    #[test]
    fn test_write_into_caller_buffer() {
        let mut slot = Message::with_capacity(0, 8).encode::<u64>().unwrap();
        let frame = Message::new(ProtocolId::Can, &[0, 0, 7, 0xE8, 0x02]);
        unsafe { write_raw_message(&frame, slot.as_mut_ptr()).unwrap() };

        let decoded = Message::decode(&slot).unwrap();
        assert_eq!(decoded.data, frame.data);
        assert_eq!(decoded.data_buffer_size, 8);

        let big = Message::new(ProtocolId::Can, &[0; 9]);
        assert!(unsafe { write_raw_message(&big, slot.as_mut_ptr()) }.is_err());
    }

    #[test]
    fn test_message_batch_decodes_prefix() {
        let msgs = vec![
            Message::new(ProtocolId::Can, &[1]),
            Message::new(ProtocolId::Can, &[2, 2]),
            Message::new(ProtocolId::Can, &[3, 3, 3]),
        ];
        let batch = NativeMessages::<u32>::encode(&msgs).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.decode(2).unwrap(), msgs[..2].to_vec());
    }

    fn arb_device() -> impl Strategy<Value = Device> {
        (
            "[a-zA-Z0-9 _-]{0,79}",
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(name, a, b, c, d, e, f)| Device {
                name,
                availability: a,
                dll_fw_status: b,
                connect_media: c,
                connect_speed: d,
                signal_quality: e,
                signal_strength: f,
            })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            any::<[u32; 6]>(),
            proptest::collection::vec(any::<u8>(), 0..64),
            0u32..32,
        )
            .prop_map(|(fields, data, spare)| Message {
                protocol_id: fields[0],
                msg_handle: fields[1],
                rx_status: fields[2],
                tx_flags: fields[3],
                timestamp: fields[4],
                extra_data_index: fields[5],
                data_buffer_size: data.len() as u32 + spare,
                data,
            })
    }

    proptest! {
        #[test]
        fn prop_device_round_trip(device in arb_device()) {
            prop_assert_eq!(Device::decode(&device.encode::<u32>().unwrap()).unwrap(), device.clone());
            prop_assert_eq!(Device::decode(&device.encode::<u64>().unwrap()).unwrap(), device);
        }

        #[test]
        fn prop_resource_round_trip(connector in any::<u32>(), pins in proptest::collection::vec(any::<u32>(), 0..16)) {
            let resource = Resource { connector, resources: pins };
            prop_assert_eq!(Resource::decode(&resource.encode::<u32>().unwrap()).unwrap(), resource.clone());
            prop_assert_eq!(Resource::decode(&resource.encode::<u64>().unwrap()).unwrap(), resource);
        }

        #[test]
        fn prop_channel_set_round_trip(threshold in any::<u32>(), ids in proptest::collection::vec(any::<u32>(), 0..16)) {
            let set = ChannelSet::new(ids.into_iter().map(ChannelId).collect(), threshold);
            prop_assert_eq!(ChannelSet::decode(&set.encode::<u32>().unwrap()).unwrap(), set.clone());
            prop_assert_eq!(ChannelSet::decode(&set.encode::<u64>().unwrap()).unwrap(), set);
        }

        #[test]
        fn prop_message_round_trip(msg in arb_message()) {
            prop_assert_eq!(Message::decode(&msg.encode::<u32>().unwrap()).unwrap(), msg.clone());
            prop_assert_eq!(Message::decode(&msg.encode::<u64>().unwrap()).unwrap(), msg);
        }

        #[test]
        fn prop_config_list_round_trip(pairs in proptest::collection::vec(any::<(u32, u32)>(), 0..8)) {
            let params: Vec<ConfigParam> = pairs.into_iter().map(|(p, v)| ConfigParam::new(p, v)).collect();
            let native = NativeConfigList::<u64>::encode(&params).unwrap();
            prop_assert_eq!(native.decode().unwrap(), params);
        }

        #[test]
        fn prop_descriptor_round_trip(flags in any::<(u32, u32)>(), local in any::<[u8; 5]>(), remote in any::<[u8; 5]>()) {
            let descriptor = ChannelDescriptor {
                local_tx_flags: flags.0,
                remote_tx_flags: flags.1,
                local_address: local,
                remote_address: remote,
            };
            prop_assert_eq!(ChannelDescriptor::decode(&descriptor.encode::<u32>().unwrap()).unwrap(), descriptor);
        }
    }
}
