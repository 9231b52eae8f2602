//! Binding to the native offline registry library (`offreg.dll`).
//!
//! Every call is forwarded unchanged; the adapter only converts strings to
//! NUL-terminated UTF-16 and maps the [`OutBuf`] protocol onto the native
//! in/out count parameters. The native library cannot report a name length
//! without a buffer, so name probes go through a scratch buffer large enough
//! for the longest legal name.

use super::{Engine, EngineResult, KeyInfo, OutBuf, RawHandle, Status};
use crate::types::{Disposition, FileTime, KeyOptions};
use std::ffi::c_void;
use std::iter;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

type OrHKey = *mut c_void;

/// Longest value name plus terminator; key names are shorter.
const MAX_NAME_UNITS: usize = 16_384;

const REG_CREATED_NEW_KEY: u32 = 1;

#[repr(C)]
#[derive(Default)]
struct NativeFileTime {
    low: u32,
    high: u32,
}

impl From<NativeFileTime> for FileTime {
    fn from(ft: NativeFileTime) -> Self {
        FileTime((u64::from(ft.high) << 32) | u64::from(ft.low))
    }
}

#[link(name = "offreg")]
extern "system" {
    fn ORCreateHive(root: *mut OrHKey) -> u32;
    fn OROpenHive(path: *const u16, root: *mut OrHKey) -> u32;
    fn ORCloseHive(root: OrHKey) -> u32;
    fn ORSaveHive(root: OrHKey, path: *const u16, major: u32, minor: u32) -> u32;
    fn OROpenKey(key: OrHKey, sub_key: *const u16, result: *mut OrHKey) -> u32;
    fn ORCreateKey(
        key: OrHKey,
        sub_key: *const u16,
        class: *const u16,
        options: u32,
        security: *const c_void,
        result: *mut OrHKey,
        disposition: *mut u32,
    ) -> u32;
    fn ORDeleteKey(key: OrHKey, sub_key: *const u16) -> u32;
    fn ORCloseKey(key: OrHKey) -> u32;
    fn ORQueryInfoKey(
        key: OrHKey,
        class: *mut u16,
        class_len: *mut u32,
        sub_keys: *mut u32,
        max_sub_key_len: *mut u32,
        max_class_len: *mut u32,
        values: *mut u32,
        max_value_name_len: *mut u32,
        max_value_len: *mut u32,
        security_descriptor_len: *mut u32,
        last_write_time: *mut NativeFileTime,
    ) -> u32;
    fn OREnumKey(
        key: OrHKey,
        index: u32,
        name: *mut u16,
        name_len: *mut u32,
        class: *mut u16,
        class_len: *mut u32,
        last_write_time: *mut NativeFileTime,
    ) -> u32;
    fn OREnumValue(
        key: OrHKey,
        index: u32,
        name: *mut u16,
        name_len: *mut u32,
        value_type: *mut u32,
        data: *mut u8,
        data_len: *mut u32,
    ) -> u32;
    fn ORGetValue(
        key: OrHKey,
        sub_key: *const u16,
        value: *const u16,
        value_type: *mut u32,
        data: *mut c_void,
        data_len: *mut u32,
    ) -> u32;
    fn ORSetValue(key: OrHKey, value: *const u16, value_type: u32, data: *const u8, data_len: u32) -> u32;
    fn ORDeleteValue(key: OrHKey, value: *const u16) -> u32;
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(iter::once(0)).collect()
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(iter::once(0)).collect()
}

fn to_native(handle: RawHandle) -> OrHKey {
    handle.0 as usize as OrHKey
}

fn from_native(handle: OrHKey) -> RawHandle {
    RawHandle(handle as usize as u64)
}

/// Pointer and capacity for an optional output slice.
fn out_parts<T>(out: &mut OutBuf<'_, T>) -> (*mut T, u32) {
    match out.buf.as_deref_mut() {
        Some(buf) => (buf.as_mut_ptr(), u32::try_from(buf.len()).unwrap_or(u32::MAX)),
        None => (ptr::null_mut(), 0),
    }
}

/// Engine backed by `offreg.dll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OffregEngine;

impl OffregEngine {
    /// Creates the binding.
    pub fn new() -> Self {
        Self
    }
}

impl Engine for OffregEngine {
    fn create_hive(&self) -> EngineResult<RawHandle> {
        let mut root: OrHKey = ptr::null_mut();
        // SAFETY: `root` is a valid out pointer for the duration of the call.
        Status::new(unsafe { ORCreateHive(&mut root) }).into_result()?;
        Ok(from_native(root))
    }

    fn open_hive(&self, path: &Path) -> EngineResult<RawHandle> {
        let path = wide_path(path);
        let mut root: OrHKey = ptr::null_mut();
        // SAFETY: `path` is NUL-terminated and outlives the call.
        Status::new(unsafe { OROpenHive(path.as_ptr(), &mut root) }).into_result()?;
        Ok(from_native(root))
    }

    fn close_hive(&self, hive: RawHandle) -> EngineResult<()> {
        // SAFETY: the handle came from `create_hive` or `open_hive`.
        Status::new(unsafe { ORCloseHive(to_native(hive)) }).into_result()
    }

    fn save_hive(&self, hive: RawHandle, path: &Path, major: u32, minor: u32) -> EngineResult<()> {
        let path = wide_path(path);
        // SAFETY: `path` is NUL-terminated and outlives the call.
        Status::new(unsafe { ORSaveHive(to_native(hive), path.as_ptr(), major, minor) }).into_result()
    }

    fn open_key(&self, parent: RawHandle, sub_key: &str) -> EngineResult<RawHandle> {
        let sub_key = wide(sub_key);
        let mut result: OrHKey = ptr::null_mut();
        // SAFETY: `sub_key` is NUL-terminated; `result` is a valid out pointer.
        Status::new(unsafe { OROpenKey(to_native(parent), sub_key.as_ptr(), &mut result) })
            .into_result()?;
        Ok(from_native(result))
    }

    fn create_key(
        &self,
        parent: RawHandle,
        sub_key: &str,
        class: Option<&str>,
        options: KeyOptions,
    ) -> EngineResult<(RawHandle, Disposition)> {
        let sub_key = wide(sub_key);
        let class = class.map(wide);
        let class_ptr = class.as_ref().map_or(ptr::null(), |c| c.as_ptr());
        let mut result: OrHKey = ptr::null_mut();
        let mut disposition = 0u32;
        // SAFETY: all strings are NUL-terminated and live until the call returns.
        let status = unsafe {
            ORCreateKey(
                to_native(parent),
                sub_key.as_ptr(),
                class_ptr,
                options.bits(),
                ptr::null(),
                &mut result,
                &mut disposition,
            )
        };
        Status::new(status).into_result()?;
        let disposition = if disposition == REG_CREATED_NEW_KEY {
            Disposition::CreatedNewKey
        } else {
            Disposition::OpenedExistingKey
        };
        Ok((from_native(result), disposition))
    }

    fn delete_key(&self, key: RawHandle, sub_key: Option<&str>) -> EngineResult<()> {
        let sub_key = sub_key.map(wide);
        let sub_key_ptr = sub_key.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        // SAFETY: `sub_key_ptr` is null or a NUL-terminated string still alive.
        Status::new(unsafe { ORDeleteKey(to_native(key), sub_key_ptr) }).into_result()
    }

    fn close_key(&self, key: RawHandle) -> EngineResult<()> {
        // SAFETY: the handle came from `open_key` or `create_key`.
        Status::new(unsafe { ORCloseKey(to_native(key)) }).into_result()
    }

    fn query_info_key(
        &self,
        key: RawHandle,
        class: &mut OutBuf<'_, u16>,
        info: &mut KeyInfo,
    ) -> EngineResult<()> {
        let (class_ptr, mut class_len) = out_parts(class);
        let mut last_write = NativeFileTime::default();
        // SAFETY: every out pointer refers to a live local or to `class`,
        // whose capacity is passed in `class_len`.
        let status = unsafe {
            ORQueryInfoKey(
                to_native(key),
                class_ptr,
                &mut class_len,
                &mut info.sub_key_count,
                &mut info.max_sub_key_len,
                &mut info.max_class_len,
                &mut info.value_count,
                &mut info.max_value_name_len,
                &mut info.max_value_len,
                &mut info.security_descriptor_len,
                &mut last_write,
            )
        };
        info.last_write_time = last_write.into();
        class.len = class_len;
        Status::new(status).into_result()
    }

    fn enum_key(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        class: Option<&mut OutBuf<'_, u16>>,
        last_write_time: Option<&mut FileTime>,
    ) -> EngineResult<()> {
        let mut scratch = Vec::new();
        let (name_ptr, mut name_len) = match name.buf.as_deref_mut() {
            Some(buf) => (buf.as_mut_ptr(), u32::try_from(buf.len()).unwrap_or(u32::MAX)),
            None => {
                scratch.resize(MAX_NAME_UNITS, 0u16);
                (scratch.as_mut_ptr(), MAX_NAME_UNITS as u32)
            }
        };
        let mut class = class;
        let (class_ptr, mut class_len) = class.as_deref_mut().map_or((ptr::null_mut(), 0), out_parts);
        let mut last_write = NativeFileTime::default();

        // SAFETY: name and class pointers come with their capacities; the
        // scratch buffer lives until the end of this function.
        let status = unsafe {
            OREnumKey(
                to_native(key),
                index,
                name_ptr,
                &mut name_len,
                class_ptr,
                if class_ptr.is_null() { ptr::null_mut() } else { &mut class_len as *mut u32 },
                &mut last_write,
            )
        };
        name.len = name_len;
        if let Some(class) = class {
            class.len = class_len;
        }
        if let Some(stamp) = last_write_time {
            *stamp = last_write.into();
        }
        Status::new(status).into_result()
    }

    fn enum_value(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        value_type: Option<&mut u32>,
        data: Option<&mut OutBuf<'_, u8>>,
    ) -> EngineResult<()> {
        let mut scratch = Vec::new();
        let (name_ptr, mut name_len) = match name.buf.as_deref_mut() {
            Some(buf) => (buf.as_mut_ptr(), u32::try_from(buf.len()).unwrap_or(u32::MAX)),
            None => {
                scratch.resize(MAX_NAME_UNITS, 0u16);
                (scratch.as_mut_ptr(), MAX_NAME_UNITS as u32)
            }
        };
        let mut data = data;
        let (data_ptr, mut data_len) = data.as_deref_mut().map_or((ptr::null_mut(), 0), out_parts);
        let type_ptr = value_type.map_or(ptr::null_mut(), |t| t as *mut u32);

        // SAFETY: see `enum_key`; `type_ptr` is null or a live `u32`.
        let status = unsafe {
            OREnumValue(
                to_native(key),
                index,
                name_ptr,
                &mut name_len,
                type_ptr,
                data_ptr,
                if data.is_some() { &mut data_len as *mut u32 } else { ptr::null_mut() },
            )
        };
        name.len = name_len;
        if let Some(data) = data {
            data.len = data_len;
        }
        Status::new(status).into_result()
    }

    fn get_value(
        &self,
        key: RawHandle,
        sub_key: Option<&str>,
        value: &str,
        value_type: Option<&mut u32>,
        data: &mut OutBuf<'_, u8>,
    ) -> EngineResult<()> {
        let sub_key = sub_key.map(wide);
        let sub_key_ptr = sub_key.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        let value = wide(value);
        let type_ptr = value_type.map_or(ptr::null_mut(), |t| t as *mut u32);
        let (data_ptr, mut data_len) = out_parts(data);

        // SAFETY: strings are NUL-terminated and alive; `data_len` holds the
        // capacity of `data_ptr`.
        let status = unsafe {
            ORGetValue(
                to_native(key),
                sub_key_ptr,
                value.as_ptr(),
                type_ptr,
                data_ptr.cast(),
                &mut data_len,
            )
        };
        data.len = data_len;
        Status::new(status).into_result()
    }

    fn set_value(&self, key: RawHandle, value: &str, value_type: u32, data: &[u8]) -> EngineResult<()> {
        let value = wide(value);
        let len = u32::try_from(data.len()).map_err(|_| Status::INVALID_PARAMETER)?;
        // SAFETY: `data` is valid for `len` bytes.
        Status::new(unsafe { ORSetValue(to_native(key), value.as_ptr(), value_type, data.as_ptr(), len) })
            .into_result()
    }

    fn delete_value(&self, key: RawHandle, value: &str) -> EngineResult<()> {
        let value = wide(value);
        // SAFETY: `value` is NUL-terminated and alive.
        Status::new(unsafe { ORDeleteValue(to_native(key), value.as_ptr()) }).into_result()
    }
}
