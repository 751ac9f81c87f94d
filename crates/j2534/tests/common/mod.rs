use libc::{c_char, c_long, c_void};

use j2534::ffi::{PassThruDriver, PassThruMsg, ResourceStruct, SChannelSet, SDevice};
use j2534::ErrorCode;

/// A 64-bit library that writes implausible counts into its out-parameters
///
/// `ScanForDevices` reports `u32::MAX` devices while `GetNextDevice` has none
/// to give. `ReadMsgs` fills `NumMsgs` with `u64::MAX` and fails with
/// `read_status`. Every other entry point answers `ERR_NOT_SUPPORTED`.
pub struct MisreportingDriver {
    pub read_status: ErrorCode,
}

fn unsupported() -> c_long {
    ErrorCode::NotSupported.as_status()
}

impl PassThruDriver for MisreportingDriver {
    type Ulong = u64;

    unsafe fn scan_for_devices(&self, device_count: *mut u64) -> c_long {
        *device_count = u64::from(u32::MAX);
        j2534::STATUS_NOERROR
    }

    unsafe fn get_next_device(&self, _device: *mut SDevice<u64>) -> c_long {
        ErrorCode::ExceededLimit.as_status()
    }

    unsafe fn open(&self, _name: *const c_char, _device_id: *mut u64) -> c_long {
        unsupported()
    }

    unsafe fn close(&self, _device_id: u64) -> c_long {
        unsupported()
    }

    unsafe fn connect(
        &self,
        _device_id: u64,
        _protocol_id: u64,
        _flags: u64,
        _baud_rate: u64,
        _resource: ResourceStruct<u64>,
        _channel_id: *mut u64,
    ) -> c_long {
        unsupported()
    }

    unsafe fn disconnect(&self, _channel_id: u64) -> c_long {
        unsupported()
    }

    unsafe fn logical_connect(
        &self,
        _physical_channel_id: u64,
        _protocol_id: u64,
        _flags: u64,
        _channel_descriptor: *mut c_void,
        _channel_id: *mut u64,
    ) -> c_long {
        unsupported()
    }

    unsafe fn logical_disconnect(&self, _channel_id: u64) -> c_long {
        unsupported()
    }

    unsafe fn select(&self, _channel_set: *mut SChannelSet<u64>, _select_type: u64, _timeout: u64) -> c_long {
        unsupported()
    }

    unsafe fn read_msgs(
        &self,
        _channel_id: u64,
        _msgs: *mut PassThruMsg<u64>,
        num_msgs: *mut u64,
        _timeout: u64,
    ) -> c_long {
        *num_msgs = u64::MAX;
        self.read_status.as_status()
    }

    unsafe fn queue_msgs(&self, _channel_id: u64, _msgs: *mut PassThruMsg<u64>, _num_msgs: *mut u64) -> c_long {
        unsupported()
    }

    unsafe fn start_periodic_msg(
        &self,
        _channel_id: u64,
        _msg: *mut PassThruMsg<u64>,
        _msg_id: *mut u64,
        _time_interval: u64,
    ) -> c_long {
        unsupported()
    }

    unsafe fn stop_periodic_msg(&self, _channel_id: u64, _msg_id: u64) -> c_long {
        unsupported()
    }

    unsafe fn start_msg_filter(
        &self,
        _channel_id: u64,
        _filter_type: u64,
        _mask_msg: *mut PassThruMsg<u64>,
        _pattern_msg: *mut PassThruMsg<u64>,
        _filter_id: *mut u64,
    ) -> c_long {
        unsupported()
    }

    unsafe fn stop_msg_filter(&self, _channel_id: u64, _filter_id: u64) -> c_long {
        unsupported()
    }

    unsafe fn set_programming_voltage(&self, _device_id: u64, _resource: ResourceStruct<u64>, _voltage: u64) -> c_long {
        unsupported()
    }

    unsafe fn read_version(
        &self,
        _device_id: u64,
        _firmware_version: *mut c_char,
        _dll_version: *mut c_char,
        _api_version: *mut c_char,
    ) -> c_long {
        unsupported()
    }

    unsafe fn get_last_error(&self, _error_description: *mut c_char) -> c_long {
        unsupported()
    }

    unsafe fn ioctl(&self, _control_target: u64, _ioctl_id: u64, _input: *mut c_void, _output: *mut c_void) -> c_long {
        unsupported()
    }
}
