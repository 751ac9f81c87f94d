//! Dynamically loaded vendor library
//!
//! Resolves the J2534 function table from a shared library once, at
//! construction. The library stays loaded for as long as the
//! [`NativeLibrary`] lives.

use libc::{c_char, c_long, c_ulong, c_void};
use libloading::Library;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ErrorCode, PassThruError, Result};
use crate::ffi::{PassThruDriver, PassThruMsg, ResourceStruct, SChannelSet, SDevice};

type ScanForDevicesFn = unsafe extern "system" fn(device_count: *mut c_ulong) -> c_long;
type GetNextDeviceFn = unsafe extern "system" fn(device: *mut SDevice<c_ulong>) -> c_long;
type OpenFn = unsafe extern "system" fn(name: *const c_char, device_id: *mut c_ulong) -> c_long;
type CloseFn = unsafe extern "system" fn(device_id: c_ulong) -> c_long;
type ConnectFn = unsafe extern "system" fn(
    device_id: c_ulong,
    protocol_id: c_ulong,
    flags: c_ulong,
    baud_rate: c_ulong,
    resource: ResourceStruct<c_ulong>,
    channel_id: *mut c_ulong,
) -> c_long;
type DisconnectFn = unsafe extern "system" fn(channel_id: c_ulong) -> c_long;
type LogicalConnectFn = unsafe extern "system" fn(
    physical_channel_id: c_ulong,
    protocol_id: c_ulong,
    flags: c_ulong,
    channel_descriptor: *mut c_void,
    channel_id: *mut c_ulong,
) -> c_long;
type LogicalDisconnectFn = unsafe extern "system" fn(channel_id: c_ulong) -> c_long;
type SelectFn = unsafe extern "system" fn(
    channel_set: *mut SChannelSet<c_ulong>,
    select_type: c_ulong,
    timeout: c_ulong,
) -> c_long;
type ReadMsgsFn = unsafe extern "system" fn(
    channel_id: c_ulong,
    msgs: *mut PassThruMsg<c_ulong>,
    num_msgs: *mut c_ulong,
    timeout: c_ulong,
) -> c_long;
type QueueMsgsFn = unsafe extern "system" fn(
    channel_id: c_ulong,
    msgs: *mut PassThruMsg<c_ulong>,
    num_msgs: *mut c_ulong,
) -> c_long;
type StartPeriodicMsgFn = unsafe extern "system" fn(
    channel_id: c_ulong,
    msg: *mut PassThruMsg<c_ulong>,
    msg_id: *mut c_ulong,
    time_interval: c_ulong,
) -> c_long;
type StopPeriodicMsgFn = unsafe extern "system" fn(channel_id: c_ulong, msg_id: c_ulong) -> c_long;
type StartMsgFilterFn = unsafe extern "system" fn(
    channel_id: c_ulong,
    filter_type: c_ulong,
    mask_msg: *mut PassThruMsg<c_ulong>,
    pattern_msg: *mut PassThruMsg<c_ulong>,
    filter_id: *mut c_ulong,
) -> c_long;
type StopMsgFilterFn = unsafe extern "system" fn(channel_id: c_ulong, filter_id: c_ulong) -> c_long;
type SetProgrammingVoltageFn = unsafe extern "system" fn(
    device_id: c_ulong,
    resource: ResourceStruct<c_ulong>,
    voltage: c_ulong,
) -> c_long;
type ReadVersionFn = unsafe extern "system" fn(
    device_id: c_ulong,
    firmware_version: *mut c_char,
    dll_version: *mut c_char,
    api_version: *mut c_char,
) -> c_long;
type GetLastErrorFn = unsafe extern "system" fn(error_description: *mut c_char) -> c_long;
type IoctlFn = unsafe extern "system" fn(
    control_target: c_ulong,
    ioctl_id: c_ulong,
    input: *mut c_void,
    output: *mut c_void,
) -> c_long;

/// Look up a required entry point and copy out the function pointer
///
/// # Safety
///
/// `F` must match the signature the library exports under `name`.
unsafe fn symbol<F: Copy>(library: &Library, name: &'static str) -> Result<F> {
    let mut key = name.as_bytes().to_vec();
    key.push(0);
    match library.get::<F>(&key) {
        Ok(sym) => Ok(*sym),
        Err(source) => Err(PassThruError::MissingSymbol {
            symbol: name,
            source,
        }),
    }
}

/// Like [`symbol`], for entry points older libraries do not export
unsafe fn optional_symbol<F: Copy>(library: &Library, name: &'static str) -> Option<F> {
    let found = symbol::<F>(library, name).ok();
    if found.is_none() {
        debug!(symbol = name, "Optional PassThru entry point not exported");
    }
    found
}

/// A vendor J2534 shared library
pub struct NativeLibrary {
    scan_for_devices: ScanForDevicesFn,
    get_next_device: GetNextDeviceFn,
    open: OpenFn,
    close: CloseFn,
    connect: ConnectFn,
    disconnect: DisconnectFn,
    logical_connect: Option<LogicalConnectFn>,
    logical_disconnect: Option<LogicalDisconnectFn>,
    select: SelectFn,
    read_msgs: ReadMsgsFn,
    queue_msgs: QueueMsgsFn,
    start_periodic_msg: StartPeriodicMsgFn,
    stop_periodic_msg: StopPeriodicMsgFn,
    start_msg_filter: StartMsgFilterFn,
    stop_msg_filter: StopMsgFilterFn,
    set_programming_voltage: SetProgrammingVoltageFn,
    read_version: ReadVersionFn,
    get_last_error: GetLastErrorFn,
    ioctl: IoctlFn,
    // Must outlive the function pointers above.
    _library: Library,
}

impl NativeLibrary {
    /// Load the library at `path` and resolve every entry point
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let library = unsafe { Library::new(path) }.map_err(|source| PassThruError::LibraryLoad {
            path: path.display().to_string(),
            source,
        })?;

        let native = unsafe {
            NativeLibrary {
                scan_for_devices: symbol(&library, "PassThruScanForDevices")?,
                get_next_device: symbol(&library, "PassThruGetNextDevice")?,
                open: symbol(&library, "PassThruOpen")?,
                close: symbol(&library, "PassThruClose")?,
                connect: symbol(&library, "PassThruConnect")?,
                disconnect: symbol(&library, "PassThruDisconnect")?,
                logical_connect: optional_symbol(&library, "PassThruLogicalConnect"),
                logical_disconnect: optional_symbol(&library, "PassThruLogicalDisconnect"),
                select: symbol(&library, "PassThruSelect")?,
                read_msgs: symbol(&library, "PassThruReadMsgs")?,
                queue_msgs: symbol(&library, "PassThruQueueMsgs")?,
                start_periodic_msg: symbol(&library, "PassThruStartPeriodicMsg")?,
                stop_periodic_msg: symbol(&library, "PassThruStopPeriodicMsg")?,
                start_msg_filter: symbol(&library, "PassThruStartMsgFilter")?,
                stop_msg_filter: symbol(&library, "PassThruStopMsgFilter")?,
                set_programming_voltage: symbol(&library, "PassThruSetProgrammingVoltage")?,
                read_version: symbol(&library, "PassThruReadVersion")?,
                get_last_error: symbol(&library, "PassThruGetLastError")?,
                ioctl: symbol(&library, "PassThruIoctl")?,
                _library: library,
            }
        };

        info!(
            path = %path.display(),
            logical_channels = native.logical_connect.is_some(),
            "Loaded PassThru library"
        );
        Ok(native)
    }

    /// Whether the library exports the logical channel entry points
    pub fn supports_logical_channels(&self) -> bool {
        self.logical_connect.is_some() && self.logical_disconnect.is_some()
    }
}

impl PassThruDriver for NativeLibrary {
    type Ulong = c_ulong;

    unsafe fn scan_for_devices(&self, device_count: *mut c_ulong) -> c_long {
        (self.scan_for_devices)(device_count)
    }

    unsafe fn get_next_device(&self, device: *mut SDevice<c_ulong>) -> c_long {
        (self.get_next_device)(device)
    }

    unsafe fn open(&self, name: *const c_char, device_id: *mut c_ulong) -> c_long {
        (self.open)(name, device_id)
    }

    unsafe fn close(&self, device_id: c_ulong) -> c_long {
        (self.close)(device_id)
    }

    unsafe fn connect(
        &self,
        device_id: c_ulong,
        protocol_id: c_ulong,
        flags: c_ulong,
        baud_rate: c_ulong,
        resource: ResourceStruct<c_ulong>,
        channel_id: *mut c_ulong,
    ) -> c_long {
        (self.connect)(device_id, protocol_id, flags, baud_rate, resource, channel_id)
    }

    unsafe fn disconnect(&self, channel_id: c_ulong) -> c_long {
        (self.disconnect)(channel_id)
    }

    unsafe fn logical_connect(
        &self,
        physical_channel_id: c_ulong,
        protocol_id: c_ulong,
        flags: c_ulong,
        channel_descriptor: *mut c_void,
        channel_id: *mut c_ulong,
    ) -> c_long {
        match self.logical_connect {
            Some(f) => f(physical_channel_id, protocol_id, flags, channel_descriptor, channel_id),
            None => ErrorCode::NotSupported.as_status(),
        }
    }

    unsafe fn logical_disconnect(&self, channel_id: c_ulong) -> c_long {
        match self.logical_disconnect {
            Some(f) => f(channel_id),
            None => ErrorCode::NotSupported.as_status(),
        }
    }

    unsafe fn select(
        &self,
        channel_set: *mut SChannelSet<c_ulong>,
        select_type: c_ulong,
        timeout: c_ulong,
    ) -> c_long {
        (self.select)(channel_set, select_type, timeout)
    }

    unsafe fn read_msgs(
        &self,
        channel_id: c_ulong,
        msgs: *mut PassThruMsg<c_ulong>,
        num_msgs: *mut c_ulong,
        timeout: c_ulong,
    ) -> c_long {
        (self.read_msgs)(channel_id, msgs, num_msgs, timeout)
    }

    unsafe fn queue_msgs(
        &self,
        channel_id: c_ulong,
        msgs: *mut PassThruMsg<c_ulong>,
        num_msgs: *mut c_ulong,
    ) -> c_long {
        (self.queue_msgs)(channel_id, msgs, num_msgs)
    }

    unsafe fn start_periodic_msg(
        &self,
        channel_id: c_ulong,
        msg: *mut PassThruMsg<c_ulong>,
        msg_id: *mut c_ulong,
        time_interval: c_ulong,
    ) -> c_long {
        (self.start_periodic_msg)(channel_id, msg, msg_id, time_interval)
    }

    unsafe fn stop_periodic_msg(&self, channel_id: c_ulong, msg_id: c_ulong) -> c_long {
        (self.stop_periodic_msg)(channel_id, msg_id)
    }

    unsafe fn start_msg_filter(
        &self,
        channel_id: c_ulong,
        filter_type: c_ulong,
        mask_msg: *mut PassThruMsg<c_ulong>,
        pattern_msg: *mut PassThruMsg<c_ulong>,
        filter_id: *mut c_ulong,
    ) -> c_long {
        (self.start_msg_filter)(channel_id, filter_type, mask_msg, pattern_msg, filter_id)
    }

    unsafe fn stop_msg_filter(&self, channel_id: c_ulong, filter_id: c_ulong) -> c_long {
        (self.stop_msg_filter)(channel_id, filter_id)
    }

    unsafe fn set_programming_voltage(
        &self,
        device_id: c_ulong,
        resource: ResourceStruct<c_ulong>,
        voltage: c_ulong,
    ) -> c_long {
        (self.set_programming_voltage)(device_id, resource, voltage)
    }

    unsafe fn read_version(
        &self,
        device_id: c_ulong,
        firmware_version: *mut c_char,
        dll_version: *mut c_char,
        api_version: *mut c_char,
    ) -> c_long {
        (self.read_version)(device_id, firmware_version, dll_version, api_version)
    }

    unsafe fn get_last_error(&self, error_description: *mut c_char) -> c_long {
        (self.get_last_error)(error_description)
    }

    unsafe fn ioctl(
        &self,
        control_target: c_ulong,
        ioctl_id: c_ulong,
        input: *mut c_void,
        output: *mut c_void,
    ) -> c_long {
        (self.ioctl)(control_target, ioctl_id, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_descriptive() {
        let err = match NativeLibrary::load("/nonexistent/libj2534-missing.so") {
            Ok(_) => panic!("loading a missing library should fail"),
            Err(e) => e,
        };
        match err {
            PassThruError::LibraryLoad { path, .. } => {
                assert_eq!(path, "/nonexistent/libj2534-missing.so")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
