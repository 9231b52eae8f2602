//! Registry keys and their operations.

use crate::buffer::{fetch, SizeUnit};
use crate::engine::{Engine, OutBuf, RawHandle, Status};
use crate::error::{RegistryError, Result};
use crate::metadata::KeyMetadata;
use crate::types::{Disposition, FileTime, KeyOptions, ValueType};
use crate::utils::{join_path, leaf_name, units_to_string};
use crate::value::{decode, encode, Decoded, ValueData};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::fmt;
use tracing::{debug, instrument, warn};

/// Engine handle held by a [`Key`].
///
/// Only `Owned` handles are closed when the key is closed or dropped. The
/// root key borrows the hive's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHandle {
    /// Handle opened for this key; released with it.
    Owned(RawHandle),
    /// Handle owned by someone else; never released by the key.
    Borrowed(RawHandle),
}

impl KeyHandle {
    /// Returns the raw engine handle.
    pub fn raw(&self) -> RawHandle {
        match *self {
            KeyHandle::Owned(raw) | KeyHandle::Borrowed(raw) => raw,
        }
    }

    /// Returns true if the key releases this handle.
    pub fn is_owned(&self) -> bool {
        matches!(self, KeyHandle::Owned(_))
    }
}

/// A subkey entry returned by [`Key::enumerate_sub_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubKeyInfo {
    /// Subkey name.
    pub name: String,
    /// Class name, empty if none.
    pub class_name: String,
    /// Last modification.
    pub last_write_time: FileTime,
}

impl SubKeyInfo {
    /// Last modification as a UTC date-time.
    pub fn last_write_datetime(&self) -> Option<DateTime<Utc>> {
        self.last_write_time.to_datetime()
    }
}

/// A value entry returned by [`Key::enumerate_values`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    /// Value name; empty for the default value.
    pub name: String,
    /// Declared type.
    pub value_type: ValueType,
    /// Decoded data. Malformed data stays unparsed.
    pub data: Decoded,
}

/// An open registry key.
///
/// A key borrows the engine of its hive and, unless it is a root view, the
/// key it was opened from. The borrow keeps a hive from being closed while
/// keys are still open. Structural metadata is cached on the key and
/// refreshed after every mutation made through it.
pub struct Key<'a> {
    engine: &'a dyn Engine,
    handle: KeyHandle,
    parent: Option<&'a Key<'a>>,
    name: String,
    full_name: String,
    metadata: RefCell<KeyMetadata>,
    released: bool,
}

impl<'a> Key<'a> {
    /// Wraps an already open handle.
    ///
    /// A key built this way has no parent, so it cannot delete itself. With
    /// [`KeyHandle::Borrowed`] the handle is left open when the key goes away.
    ///
    /// # Errors
    ///
    /// Fails if the initial metadata query fails.
    pub fn from_raw(engine: &'a dyn Engine, handle: KeyHandle, full_name: &str) -> Result<Self> {
        Self::build(engine, handle, None, full_name.to_string())
    }

    fn build(
        engine: &'a dyn Engine,
        handle: KeyHandle,
        parent: Option<&'a Key<'a>>,
        full_name: String,
    ) -> Result<Self> {
        let key = Self {
            engine,
            handle,
            parent,
            name: leaf_name(&full_name).to_string(),
            full_name,
            metadata: RefCell::new(KeyMetadata::default()),
            released: false,
        };
        key.refresh()?;
        Ok(key)
    }

    fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    fn child_path(&self, name: &str) -> String {
        join_path(&self.full_name, name)
    }

    /// Re-reads the cached metadata from the engine.
    pub fn refresh(&self) -> Result<()> {
        let metadata = KeyMetadata::query(self.engine, self.raw(), &self.full_name)?;
        *self.metadata.borrow_mut() = metadata;
        Ok(())
    }

    /// Returns the leaf name. The root's name is empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path from the root, as it was when the key was opened.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Returns true for a key with no parent: a root view or a wrapped handle.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the engine handle.
    pub fn handle(&self) -> KeyHandle {
        self.handle
    }

    /// Returns a copy of the cached metadata.
    pub fn metadata(&self) -> KeyMetadata {
        self.metadata.borrow().clone()
    }

    /// Returns the cached number of subkeys.
    pub fn sub_key_count(&self) -> u32 {
        self.metadata.borrow().sub_key_count
    }

    /// Returns the cached number of values.
    pub fn value_count(&self) -> u32 {
        self.metadata.borrow().value_count
    }

    /// Returns the class name.
    pub fn class_name(&self) -> String {
        self.metadata.borrow().class_name.clone()
    }

    /// Returns the last modification time.
    pub fn last_write_time(&self) -> FileTime {
        self.metadata.borrow().last_write_time
    }

    /// Opens an existing subkey.
    ///
    /// `name` may be a `\`-separated path; the engine resolves it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the subkey does not exist.
    pub fn open_sub_key(&self, name: &str) -> Result<Key<'_>> {
        let path = self.child_path(name);
        let raw = self
            .engine
            .open_key(self.raw(), name)
            .map_err(|status| RegistryError::from_status(status, "open key", &path))?;
        debug!(key = %path, "Opened key");
        Key::build(self.engine, KeyHandle::Owned(raw), Some(self), path)
    }

    /// Opens a subkey, returning `None` if it does not exist.
    pub fn try_open_sub_key(&self, name: &str) -> Result<Option<Key<'_>>> {
        match self.open_sub_key(name) {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates a subkey, or opens it if it already exists.
    pub fn create_sub_key(&self, name: &str, options: KeyOptions) -> Result<Key<'_>> {
        self.create_sub_key_with(name, None, options).map(|(key, _)| key)
    }

    /// Creates a subkey with a class name and reports whether it was new.
    ///
    /// The class name only applies when the key is created.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidParameter`] when the engine rejects
    /// the name or the resulting depth.
    pub fn create_sub_key_with(
        &self,
        name: &str,
        class: Option<&str>,
        options: KeyOptions,
    ) -> Result<(Key<'_>, Disposition)> {
        let path = self.child_path(name);
        let (raw, disposition) = self
            .engine
            .create_key(self.raw(), name, class, options)
            .map_err(|status| RegistryError::from_status(status, "create key", &path))?;
        debug!(key = %path, ?disposition, "Created key");

        let child = Key::build(self.engine, KeyHandle::Owned(raw), Some(self), path)?;
        self.refresh()?;
        Ok((child, disposition))
    }

    /// Deletes this key.
    ///
    /// The handle stays open until the key is closed; any other call on it
    /// fails once the key is gone.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidState`] for a key without a parent,
    /// and [`RegistryError::KeyHasChildren`] if the key has subkeys.
    pub fn delete(&self) -> Result<()> {
        let parent = self.parent.ok_or_else(|| {
            RegistryError::InvalidState(format!("cannot delete root key '{}'", self.full_name))
        })?;
        self.engine
            .delete_key(self.raw(), None)
            .map_err(|status| RegistryError::from_status(status, "delete key", &self.full_name))?;
        debug!(key = %self.full_name, "Deleted key");
        parent.refresh()
    }

    /// Deletes a subkey that has no subkeys of its own.
    pub fn delete_sub_key(&self, name: &str) -> Result<()> {
        let path = self.child_path(name);
        self.engine
            .delete_key(self.raw(), Some(name))
            .map_err(|status| RegistryError::from_status(status, "delete key", &path))?;
        debug!(key = %path, "Deleted key");
        self.refresh()
    }

    /// Deletes a subkey and everything below it.
    ///
    /// Children are visited depth-first from a snapshot of their names. A
    /// child that has disappeared in the meantime is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `name` does not exist. Any
    /// other failure stops the traversal and is returned.
    #[instrument(skip(self), fields(key = %self.full_name))]
    pub fn delete_sub_key_tree(&self, name: &str) -> Result<()> {
        let child = self.open_sub_key(name)?;
        for grandchild in child.get_sub_key_names()? {
            match child.delete_sub_key_tree(&grandchild) {
                Err(e) if e.is_not_found() => {
                    debug!(key = %child.child_path(&grandchild), "Subkey vanished, skipping");
                }
                other => other?,
            }
        }
        child.close()?;
        self.delete_sub_key(name)
    }

    /// Returns the names of all subkeys.
    pub fn get_sub_key_names(&self) -> Result<Vec<String>> {
        let metadata = self.metadata();
        let mut names = Vec::with_capacity(metadata.sub_key_count as usize);

        for index in 0..metadata.sub_key_count {
            let units = fetch(SizeUnit::Chars, Some(metadata.max_sub_key_len), |out| {
                self.engine.enum_key(self.raw(), index, out, None, None)
            });
            match units {
                Ok(units) => names.push(units_to_string(&units)),
                Err(Status::NO_MORE_ITEMS) => break,
                Err(status) => {
                    return Err(RegistryError::from_status(status, "enumerate keys", &self.full_name))
                }
            }
        }

        Ok(names)
    }

    /// Returns name, class name and timestamp of all subkeys.
    pub fn enumerate_sub_keys(&self) -> Result<Vec<SubKeyInfo>> {
        let metadata = self.metadata();
        let mut entries = Vec::with_capacity(metadata.sub_key_count as usize);
        let mut class_buf = vec![0u16; metadata.max_class_len as usize];

        for index in 0..metadata.sub_key_count {
            let mut class_len = 0u32;
            let mut last_write_time = FileTime::default();
            let units = fetch(SizeUnit::Chars, Some(metadata.max_sub_key_len), |out| {
                let mut class = OutBuf::new(&mut class_buf);
                let result = self.engine.enum_key(
                    self.raw(),
                    index,
                    out,
                    Some(&mut class),
                    Some(&mut last_write_time),
                );
                class_len = class.len;
                result
            });
            let units = match units {
                Ok(units) => units,
                Err(Status::NO_MORE_ITEMS) => break,
                Err(status) => {
                    return Err(RegistryError::from_status(status, "enumerate keys", &self.full_name))
                }
            };

            let class_end = (class_len as usize).min(class_buf.len());
            entries.push(SubKeyInfo {
                name: units_to_string(&units),
                class_name: units_to_string(&class_buf[..class_end]),
                last_write_time,
            });
        }

        Ok(entries)
    }

    /// Returns the names of all values.
    pub fn get_value_names(&self) -> Result<Vec<String>> {
        let metadata = self.metadata();
        let mut names = Vec::with_capacity(metadata.value_count as usize);

        for index in 0..metadata.value_count {
            let units = fetch(SizeUnit::Chars, Some(metadata.max_value_name_len), |out| {
                self.engine.enum_value(self.raw(), index, out, None, None)
            });
            match units {
                Ok(units) => names.push(units_to_string(&units)),
                Err(Status::NO_MORE_ITEMS) => break,
                Err(status) => {
                    return Err(RegistryError::from_status(status, "enumerate values", &self.full_name))
                }
            }
        }

        Ok(names)
    }

    /// Returns name, type and decoded data of all values.
    ///
    /// One data buffer sized from the cached maximum is reused for every
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unsupported`] if any value has a resource
    /// type. Use [`Key::get_value_names`] and [`Key::get_value_bytes`] to
    /// read such keys.
    pub fn enumerate_values(&self) -> Result<Vec<ValueInfo>> {
        let metadata = self.metadata();
        let mut entries = Vec::with_capacity(metadata.value_count as usize);
        let mut data_buf = vec![0u8; metadata.max_value_len as usize];

        for index in 0..metadata.value_count {
            let mut raw_type = 0u32;
            let mut data_len = 0u32;
            let units = fetch(SizeUnit::Chars, Some(metadata.max_value_name_len), |out| {
                let mut data = OutBuf::new(&mut data_buf);
                let result =
                    self.engine
                        .enum_value(self.raw(), index, out, Some(&mut raw_type), Some(&mut data));
                data_len = data.len;
                result
            });
            let units = match units {
                Ok(units) => units,
                Err(Status::NO_MORE_ITEMS) => break,
                Err(status) => {
                    return Err(RegistryError::from_status(status, "enumerate values", &self.full_name))
                }
            };

            let value_type = ValueType::from_u32(raw_type)?;
            let bytes = data_buf[..(data_len as usize).min(data_buf.len())].to_vec();
            let data = decode(value_type, bytes)?;
            entries.push(ValueInfo {
                name: units_to_string(&units),
                value_type,
                data,
            });
        }

        Ok(entries)
    }

    /// Returns the type of a value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the value does not exist.
    pub fn get_value_kind(&self, name: &str) -> Result<ValueType> {
        let mut raw_type = 0u32;
        let mut probe = OutBuf::probe();
        self.engine
            .get_value(self.raw(), None, name, Some(&mut raw_type), &mut probe)
            .map_err(|status| RegistryError::from_status(status, "get value", name))?;
        ValueType::from_u32(raw_type)
    }

    /// Returns the raw bytes of a value, whatever its type.
    pub fn get_value_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.read_value(name).map(|(_, data)| data)
    }

    /// Reads type and bytes of a value in one round.
    fn read_value(&self, name: &str) -> Result<(ValueType, Vec<u8>)> {
        let mut raw_type = 0u32;
        let data = fetch(SizeUnit::Bytes, None, |out| {
            self.engine
                .get_value(self.raw(), None, name, Some(&mut raw_type), out)
        })
        .map_err(|status| RegistryError::from_status(status, "get value", name))?;
        Ok((ValueType::from_u32(raw_type)?, data))
    }

    /// Returns a decoded value.
    ///
    /// Data that does not decode for its declared type is returned as
    /// [`ValueData::Binary`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the value does not exist and
    /// [`RegistryError::Unsupported`] for the resource types.
    pub fn get_value(&self, name: &str) -> Result<ValueData> {
        let (value_type, data) = self.read_value(name)?;
        Ok(decode(value_type, data)?.into_value())
    }

    /// Returns a decoded value, or `None` if the data does not decode.
    pub fn try_get_value(&self, name: &str) -> Result<Option<ValueData>> {
        let (value_type, data) = self.read_value(name)?;
        Ok(decode(value_type, data)?.parsed())
    }

    /// Writes a value under the type its shape implies.
    ///
    /// # Examples
    ///
    /// ```
    /// use offreg::{Hive, ValueData};
    ///
    /// let hive = Hive::in_memory().unwrap();
    /// let root = hive.root().unwrap();
    /// root.set_value("Answer", 42i32).unwrap();
    /// assert_eq!(root.get_value("Answer").unwrap(), ValueData::Dword(42));
    /// ```
    pub fn set_value(&self, name: &str, value: impl Into<ValueData>) -> Result<()> {
        let value = value.into();
        let value_type = value.default_type();
        self.set_value_with_type(name, &value, value_type)
    }

    /// Writes a value under an explicit type tag.
    ///
    /// Any shape may be stored under any tag, including the resource types.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidInput`] if a string list contains an
    /// empty string.
    pub fn set_value_with_type(&self, name: &str, value: &ValueData, value_type: ValueType) -> Result<()> {
        let data = encode(value, value_type)?;
        self.engine
            .set_value(self.raw(), name, value_type.as_u32(), &data)
            .map_err(|status| RegistryError::from_status(status, "set value", name))?;
        debug!(key = %self.full_name, value = name, %value_type, len = data.len(), "Set value");
        self.refresh()
    }

    /// Deletes a value.
    pub fn delete_value(&self, name: &str) -> Result<()> {
        self.engine
            .delete_value(self.raw(), name)
            .map_err(|status| RegistryError::from_status(status, "delete value", name))?;
        debug!(key = %self.full_name, value = name, "Deleted value");
        self.refresh()
    }

    /// Returns true if a value with this name exists.
    pub fn value_exists(&self, name: &str) -> Result<bool> {
        let mut probe = OutBuf::probe();
        match self.engine.get_value(self.raw(), None, name, None, &mut probe) {
            Ok(()) | Err(Status::MORE_DATA) => Ok(true),
            Err(Status::FILE_NOT_FOUND) | Err(Status::PATH_NOT_FOUND) => Ok(false),
            Err(status) => Err(RegistryError::from_status(status, "get value", name)),
        }
    }

    /// Closes the key, releasing its handle if it owns one.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match self.handle {
            KeyHandle::Owned(raw) => self
                .engine
                .close_key(raw)
                .map_err(|status| RegistryError::from_status(status, "close key", &self.full_name)),
            KeyHandle::Borrowed(_) => Ok(()),
        }
    }
}

impl Drop for Key<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(key = %self.full_name, error = %e, "Failed to close key handle");
        }
    }
}

impl fmt::Debug for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("full_name", &self.full_name)
            .field("handle", &self.handle)
            .field("metadata", &self.metadata.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    fn root(engine: &MemoryEngine) -> Key<'_> {
        let hive = engine.create_hive().unwrap();
        Key::from_raw(engine, KeyHandle::Borrowed(hive), "").unwrap()
    }

    #[test]
    fn test_child_names() {
        let engine = MemoryEngine::new();
        let root = root(&engine);
        let a = root.create_sub_key("A", KeyOptions::default()).unwrap();
        let b = a.create_sub_key("B", KeyOptions::default()).unwrap();
        assert_eq!(a.name(), "A");
        assert_eq!(b.full_name(), "A\\B");
        assert!(root.is_root());
        assert!(!b.is_root());
        assert_eq!(root.name(), "");
    }

    #[test]
    fn test_handles_released_on_close_and_drop() {
        let engine = MemoryEngine::new();
        let root = root(&engine);
        let before = engine.open_handle_count();
        {
            let a = root.create_sub_key("A", KeyOptions::default()).unwrap();
            let _b = a.create_sub_key("B", KeyOptions::default()).unwrap();
            assert_eq!(engine.open_handle_count(), before + 2);
        }
        assert_eq!(engine.open_handle_count(), before);

        let a = root.open_sub_key("A").unwrap();
        a.close().unwrap();
        assert_eq!(engine.open_handle_count(), before);
    }

    #[test]
    fn test_borrowed_handle_is_not_closed() {
        let engine = MemoryEngine::new();
        let hive = engine.create_hive().unwrap();
        let view = Key::from_raw(&engine, KeyHandle::Borrowed(hive), "").unwrap();
        view.close().unwrap();
        assert_eq!(engine.open_handle_count(), 1);
        assert!(Key::from_raw(&engine, KeyHandle::Borrowed(hive), "").is_ok());
    }

    #[test]
    fn test_parent_metadata_refreshed_after_delete() {
        let engine = MemoryEngine::new();
        let root = root(&engine);
        let child = root.create_sub_key("Gone", KeyOptions::default()).unwrap();
        assert_eq!(root.sub_key_count(), 1);
        child.delete().unwrap();
        assert_eq!(root.sub_key_count(), 0);
    }

    #[test]
    fn test_other_views_stay_stale() {
        let engine = MemoryEngine::new();
        let first = root(&engine);
        let second = Key::from_raw(&engine, first.handle(), "").unwrap();
        first.create_sub_key("A", KeyOptions::default()).unwrap();
        assert_eq!(first.sub_key_count(), 1);
        assert_eq!(second.sub_key_count(), 0);
        second.refresh().unwrap();
        assert_eq!(second.sub_key_count(), 1);
    }

    #[test]
    fn test_value_kind_and_existence() {
        let engine = MemoryEngine::new();
        let root = root(&engine);
        root.set_value("n", 7i64).unwrap();
        assert_eq!(root.get_value_kind("n").unwrap(), ValueType::Qword);
        assert!(root.value_exists("N").unwrap());
        assert!(!root.value_exists("missing").unwrap());
        assert!(root.get_value_kind("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_resource_values_fail_enumeration() {
        let engine = MemoryEngine::new();
        let root = root(&engine);
        root.set_value("plain", 7i32).unwrap();
        let raw = ValueData::Binary(vec![1, 2, 3]);
        root.set_value_with_type("res", &raw, ValueType::ResourceList).unwrap();

        assert!(matches!(
            root.enumerate_values(),
            Err(RegistryError::Unsupported(ValueType::ResourceList))
        ));
        assert!(matches!(
            root.get_value("res"),
            Err(RegistryError::Unsupported(ValueType::ResourceList))
        ));
        assert_eq!(root.get_value_names().unwrap(), vec!["plain", "res"]);
        assert_eq!(root.get_value_bytes("res").unwrap(), vec![1, 2, 3]);
    }
}
