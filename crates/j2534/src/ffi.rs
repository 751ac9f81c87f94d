//! Native J2534 ABI
//!
//! `#[repr(C)]` mirrors of the vendor structures and the driver seam that
//! the client calls through. The vendor header declares every integer as
//! `unsigned long`, whose width depends on the platform, so each structure
//! is generic over [`NativeUlong`].

use libc::{c_char, c_long, c_void};
use std::fmt;

use crate::error::{PassThruError, Result};

/// Fixed width of `SDEVICE.DeviceName` and the version/error text buffers
pub const NAME_LEN: usize = 80;

/// Width of an address in `ISO15765_CHANNEL_DESCRIPTOR`
pub const ADDRESS_LEN: usize = 5;

/// The integer type standing in for the vendor's `unsigned long`
pub trait NativeUlong:
    Copy + Default + PartialEq + Eq + fmt::Debug + Send + Sync + 'static
{
    /// Width in bits
    const BITS: u32;

    /// Zero-extend a model value
    fn from_u32(value: u32) -> Self;

    fn to_u64(self) -> u64;

    /// Narrow back to a model value, failing if the native side wrote
    /// something wider than 32 bits
    fn to_u32(self, field: &'static str) -> Result<u32> {
        let wide = self.to_u64();
        u32::try_from(wide).map_err(|_| PassThruError::ValueTooLarge {
            field,
            max: u64::from(u32::MAX),
            actual: wide,
        })
    }
}

impl NativeUlong for u32 {
    const BITS: u32 = 32;

    fn from_u32(value: u32) -> Self {
        value
    }

    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

impl NativeUlong for u64 {
    const BITS: u32 = 64;

    fn from_u32(value: u32) -> Self {
        u64::from(value)
    }

    fn to_u64(self) -> u64 {
        self
    }
}

/// `SDEVICE`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SDevice<U> {
    pub device_name: [c_char; NAME_LEN],
    pub device_available: U,
    pub device_dll_fw_status: U,
    pub device_connect_media: U,
    pub device_connect_speed: U,
    pub device_signal_quality: U,
    pub device_signal_strength: U,
}

impl<U: NativeUlong> Default for SDevice<U> {
    fn default() -> Self {
        Self {
            device_name: [0; NAME_LEN],
            device_available: U::default(),
            device_dll_fw_status: U::default(),
            device_connect_media: U::default(),
            device_connect_speed: U::default(),
            device_signal_quality: U::default(),
            device_signal_strength: U::default(),
        }
    }
}

/// `RESOURCE_STRUCT`, passed by value to connect and programming voltage
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResourceStruct<U> {
    pub connector: U,
    pub num_of_resources: U,
    pub resource_list_ptr: *mut U,
}

/// `SCHANNELSET`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SChannelSet<U> {
    pub channel_count: U,
    pub channel_threshold: U,
    pub channel_list: *mut U,
}

/// `PASSTHRU_MSG`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PassThruMsg<U> {
    pub protocol_id: U,
    pub msg_handle: U,
    pub rx_status: U,
    pub tx_flags: U,
    pub timestamp: U,
    pub data_length: U,
    pub extra_data_index: U,
    pub data_buffer: *mut u8,
    pub data_buffer_size: U,
}

/// `SCONFIG`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SConfig<U> {
    pub parameter: U,
    pub value: U,
}

/// `SCONFIG_LIST`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SConfigList<U> {
    pub num_of_params: U,
    pub config_ptr: *mut SConfig<U>,
}

/// `SBYTE_ARRAY`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SByteArray<U> {
    pub num_of_bytes: U,
    pub byte_ptr: *mut u8,
}

/// `ISO15765_CHANNEL_DESCRIPTOR`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iso15765ChannelDescriptor<U> {
    pub local_tx_flags: U,
    pub remote_tx_flags: U,
    pub local_address: [u8; ADDRESS_LEN],
    pub remote_address: [u8; ADDRESS_LEN],
}

/// The J2534 function table.
///
/// Each method is one vendor entry point with the vendor's argument list and
/// returns the raw status. Implementations receive pointers exactly as the
/// native library would.
///
/// # Safety
///
/// Callers must pass pointers that are either null or valid for the access
/// the entry point performs, for the duration of the call.
pub trait PassThruDriver {
    /// `unsigned long` as seen by this driver
    type Ulong: NativeUlong;

    unsafe fn scan_for_devices(&self, device_count: *mut Self::Ulong) -> c_long;

    unsafe fn get_next_device(&self, device: *mut SDevice<Self::Ulong>) -> c_long;

    unsafe fn open(&self, name: *const c_char, device_id: *mut Self::Ulong) -> c_long;

    unsafe fn close(&self, device_id: Self::Ulong) -> c_long;

    unsafe fn connect(
        &self,
        device_id: Self::Ulong,
        protocol_id: Self::Ulong,
        flags: Self::Ulong,
        baud_rate: Self::Ulong,
        resource: ResourceStruct<Self::Ulong>,
        channel_id: *mut Self::Ulong,
    ) -> c_long;

    unsafe fn disconnect(&self, channel_id: Self::Ulong) -> c_long;

    unsafe fn logical_connect(
        &self,
        physical_channel_id: Self::Ulong,
        protocol_id: Self::Ulong,
        flags: Self::Ulong,
        channel_descriptor: *mut c_void,
        channel_id: *mut Self::Ulong,
    ) -> c_long;

    unsafe fn logical_disconnect(&self, channel_id: Self::Ulong) -> c_long;

    unsafe fn select(
        &self,
        channel_set: *mut SChannelSet<Self::Ulong>,
        select_type: Self::Ulong,
        timeout: Self::Ulong,
    ) -> c_long;

    unsafe fn read_msgs(
        &self,
        channel_id: Self::Ulong,
        msgs: *mut PassThruMsg<Self::Ulong>,
        num_msgs: *mut Self::Ulong,
        timeout: Self::Ulong,
    ) -> c_long;

    unsafe fn queue_msgs(
        &self,
        channel_id: Self::Ulong,
        msgs: *mut PassThruMsg<Self::Ulong>,
        num_msgs: *mut Self::Ulong,
    ) -> c_long;

    unsafe fn start_periodic_msg(
        &self,
        channel_id: Self::Ulong,
        msg: *mut PassThruMsg<Self::Ulong>,
        msg_id: *mut Self::Ulong,
        time_interval: Self::Ulong,
    ) -> c_long;

    unsafe fn stop_periodic_msg(&self, channel_id: Self::Ulong, msg_id: Self::Ulong) -> c_long;

    unsafe fn start_msg_filter(
        &self,
        channel_id: Self::Ulong,
        filter_type: Self::Ulong,
        mask_msg: *mut PassThruMsg<Self::Ulong>,
        pattern_msg: *mut PassThruMsg<Self::Ulong>,
        filter_id: *mut Self::Ulong,
    ) -> c_long;

    unsafe fn stop_msg_filter(&self, channel_id: Self::Ulong, filter_id: Self::Ulong) -> c_long;

    unsafe fn set_programming_voltage(
        &self,
        device_id: Self::Ulong,
        resource: ResourceStruct<Self::Ulong>,
        voltage: Self::Ulong,
    ) -> c_long;

    unsafe fn read_version(
        &self,
        device_id: Self::Ulong,
        firmware_version: *mut c_char,
        dll_version: *mut c_char,
        api_version: *mut c_char,
    ) -> c_long;

    unsafe fn get_last_error(&self, error_description: *mut c_char) -> c_long;

    unsafe fn ioctl(
        &self,
        control_target: Self::Ulong,
        ioctl_id: Self::Ulong,
        input: *mut c_void,
        output: *mut c_void,
    ) -> c_long;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_sdevice_layout() {
        assert_eq!(offset_of!(SDevice<u32>, device_available), 80);
        assert_eq!(offset_of!(SDevice<u32>, device_signal_strength), 100);
        assert_eq!(size_of::<SDevice<u32>>(), 104);

        assert_eq!(offset_of!(SDevice<u64>, device_available), 80);
        assert_eq!(offset_of!(SDevice<u64>, device_signal_strength), 120);
        assert_eq!(size_of::<SDevice<u64>>(), 128);
    }

    #[test]
    fn test_passthru_msg_layout() {
        assert_eq!(offset_of!(PassThruMsg<u64>, extra_data_index), 48);
        assert_eq!(offset_of!(PassThruMsg<u64>, data_buffer), 56);
        assert_eq!(offset_of!(PassThruMsg<u64>, data_buffer_size), 64);
        assert_eq!(offset_of!(PassThruMsg<u32>, extra_data_index), 24);
        assert_eq!(offset_of!(PassThruMsg<u32>, data_buffer), 28usize.next_multiple_of(align_of_ptr()));
    }

    #[test]
    fn test_descriptor_layout() {
        assert_eq!(offset_of!(Iso15765ChannelDescriptor<u32>, local_address), 8);
        assert_eq!(offset_of!(Iso15765ChannelDescriptor<u32>, remote_address), 13);
        assert_eq!(size_of::<Iso15765ChannelDescriptor<u32>>(), 20);
    }

    #[test]
    fn test_narrowing_wide_values() {
        assert_eq!(7u64.to_u32("field").unwrap(), 7);
        let err = (u64::from(u32::MAX) + 1).to_u32("timestamp").unwrap_err();
        assert!(matches!(err, PassThruError::ValueTooLarge { field: "timestamp", .. }));
    }

    fn align_of_ptr() -> usize {
        std::mem::align_of::<*mut u8>()
    }
}
