//! In-process engine that keeps hives in memory.
//!
//! Honours the [`Engine`] contract the way the native library does: name
//! matching is case-insensitive, paths are resolved segment by segment,
//! and name length and depth limits are enforced by the engine rather than
//! by callers. Saved hives are JSON snapshots of the key tree; this is the
//! engine's own storage and is not the registry's binary hive format.

use super::{Engine, EngineResult, KeyInfo, OutBuf, RawHandle, Status};
use crate::types::{Disposition, FileTime, KeyOptions};
use crate::utils::{split_path, utf16_len};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Marker written into every snapshot.
const SNAPSHOT_FORMAT: &str = "offreg-memory-hive";

/// Compatibility targets accepted by `save_hive`.
const SUPPORTED_VERSIONS: &[(u32, u32)] = &[(5, 1), (5, 2), (6, 0), (6, 1), (6, 2), (6, 3), (10, 0)];

/// Size limits enforced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Longest key name segment, in UTF-16 units.
    pub max_key_name_len: usize,

    /// Longest value name, in UTF-16 units.
    pub max_value_name_len: usize,

    /// Deepest key level below the root.
    pub max_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_key_name_len: 255,
            max_value_name_len: 16_383,
            max_depth: 512,
        }
    }
}

/// Slot index plus the generation the slot had when the key was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
struct StoredValue {
    name: String,
    value_type: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    class: String,
    last_write: FileTime,
    volatile: bool,
    depth: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    values: Vec<StoredValue>,
}

impl Node {
    fn new(name: &str, class: &str, depth: usize, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            class: class.to_string(),
            last_write: FileTime::now(),
            volatile: false,
            depth,
            parent,
            children: Vec::new(),
            values: Vec::new(),
        }
    }

    fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| same_name(&v.name, name))
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Key tree of one hive.
///
/// Deleting a key empties its slot and bumps the slot's generation; the slot
/// is then reused by the next insert. Handles carry the generation they were
/// opened with, so a stale handle keeps failing with `KEY_DELETED` even after
/// its slot holds another key.
#[derive(Debug, Default)]
struct HiveStore {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl HiveStore {
    const ROOT: NodeId = NodeId {
        index: 0,
        generation: 0,
    };

    fn new() -> Self {
        let mut store = Self::default();
        store.push(Node::new("", "", 0, None));
        store
    }

    fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(Status::KEY_DELETED)
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(Status::KEY_DELETED)
    }

    /// Stores `node` in a free slot, or a new one if none is free.
    fn push(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Number of slots allocated, live or free.
    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn child(&self, parent: NodeId, name: &str) -> EngineResult<Option<NodeId>> {
        let node = self.node(parent)?;
        for &child in &node.children {
            if same_name(&self.node(child)?.name, name) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Follows a `\`-separated path from `start`. An empty path is `start`.
    fn resolve(&self, start: NodeId, path: &str) -> EngineResult<NodeId> {
        self.node(start)?;
        if path.is_empty() {
            return Ok(start);
        }
        let mut current = start;
        for segment in split_path(path) {
            if segment.is_empty() {
                return Err(Status::INVALID_PARAMETER);
            }
            current = self
                .child(current, segment)?
                .ok_or(Status::FILE_NOT_FOUND)?;
        }
        Ok(current)
    }

    fn insert_child(&mut self, parent: NodeId, node: Node) -> EngineResult<NodeId> {
        self.node(parent)?;
        let key = sort_key(&node.name);
        let id = self.push(node);

        let position = {
            let siblings = &self.node(parent)?.children;
            let mut position = siblings.len();
            for (index, &sibling) in siblings.iter().enumerate() {
                if sort_key(&self.node(sibling)?.name).cmp(&key) == Ordering::Greater {
                    position = index;
                    break;
                }
            }
            position
        };

        let parent_node = self.node_mut(parent)?;
        parent_node.children.insert(position, id);
        parent_node.last_write = FileTime::now();
        Ok(id)
    }

    fn remove(&mut self, id: NodeId) -> EngineResult<()> {
        let node = self.node(id)?;
        let parent = node.parent.ok_or(Status::ACCESS_DENIED)?;
        if !node.children.is_empty() {
            return Err(Status::KEY_HAS_CHILDREN);
        }
        let parent_node = self.node_mut(parent)?;
        parent_node.children.retain(|&child| child != id);
        parent_node.last_write = FileTime::now();
        let slot = &mut self.slots[id.index];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    fn info(&self, id: NodeId) -> EngineResult<KeyInfo> {
        let node = self.node(id)?;
        let mut info = KeyInfo {
            sub_key_count: node.children.len() as u32,
            value_count: node.values.len() as u32,
            last_write_time: node.last_write,
            ..KeyInfo::default()
        };
        for &child in &node.children {
            let child = self.node(child)?;
            info.max_sub_key_len = info.max_sub_key_len.max(utf16_len(&child.name) as u32);
            info.max_class_len = info.max_class_len.max(utf16_len(&child.class) as u32);
        }
        for value in &node.values {
            info.max_value_name_len = info.max_value_name_len.max(utf16_len(&value.name) as u32);
            info.max_value_len = info.max_value_len.max(value.data.len() as u32);
        }
        Ok(info)
    }

    fn to_snapshot(&self, id: NodeId) -> EngineResult<SnapshotKey> {
        let node = self.node(id)?;
        let mut children = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            if !self.node(child)?.volatile {
                children.push(self.to_snapshot(child)?);
            }
        }
        Ok(SnapshotKey {
            name: node.name.clone(),
            class: node.class.clone(),
            last_write: node.last_write.0,
            values: node
                .values
                .iter()
                .map(|v| SnapshotValue {
                    name: v.name.clone(),
                    value_type: v.value_type,
                    data: v.data.clone(),
                })
                .collect(),
            children,
        })
    }

    fn from_snapshot(root: &SnapshotKey) -> Self {
        let mut store = Self::default();
        store.load(root, None, 0);
        store
    }

    fn load(&mut self, key: &SnapshotKey, parent: Option<NodeId>, depth: usize) -> NodeId {
        let mut node = Node::new(&key.name, &key.class, depth, parent);
        node.last_write = FileTime(key.last_write);
        node.values = key
            .values
            .iter()
            .map(|v| StoredValue {
                name: v.name.clone(),
                value_type: v.value_type,
                data: v.data.clone(),
            })
            .collect();
        let id = self.push(node);

        let mut children: Vec<&SnapshotKey> = key.children.iter().collect();
        children.sort_by_key(|child| sort_key(&child.name));
        let ids: Vec<NodeId> = children
            .into_iter()
            .map(|child| self.load(child, Some(id), depth + 1))
            .collect();
        if let Ok(node) = self.node_mut(id) {
            node.children = ids;
        }
        id
    }
}

/// Persisted form of a hive.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: String,
    major_version: u32,
    minor_version: u32,
    root: SnapshotKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotKey {
    name: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    last_write: u64,
    #[serde(default)]
    values: Vec<SnapshotValue>,
    #[serde(default)]
    children: Vec<SnapshotKey>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotValue {
    name: String,
    value_type: u32,
    #[serde(default)]
    data: Vec<u8>,
}

/// What a handle refers to.
#[derive(Debug, Clone, Copy)]
enum HandleKind {
    Hive,
    Key,
}

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    kind: HandleKind,
    hive: RawHandle,
    node: NodeId,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u64,
    hives: HashMap<RawHandle, HiveStore>,
    handles: HashMap<RawHandle, HandleEntry>,
}

impl State {
    fn allocate(&mut self, entry: HandleEntry) -> RawHandle {
        self.next_handle += 1;
        let handle = RawHandle(self.next_handle);
        self.handles.insert(handle, entry);
        handle
    }

    fn entry(&self, handle: RawHandle) -> EngineResult<HandleEntry> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or(Status::INVALID_HANDLE)
    }

    fn store(&self, hive: RawHandle) -> EngineResult<&HiveStore> {
        self.hives.get(&hive).ok_or(Status::INVALID_HANDLE)
    }

    fn store_mut(&mut self, hive: RawHandle) -> EngineResult<&mut HiveStore> {
        self.hives.get_mut(&hive).ok_or(Status::INVALID_HANDLE)
    }

    fn register_hive(&mut self, store: HiveStore) -> RawHandle {
        self.next_handle += 1;
        let handle = RawHandle(self.next_handle);
        self.hives.insert(handle, store);
        self.handles.insert(
            handle,
            HandleEntry {
                kind: HandleKind::Hive,
                hive: handle,
                node: HiveStore::ROOT,
            },
        );
        handle
    }
}

/// Engine keeping hives in process memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    limits: EngineLimits,
    state: RefCell<State>,
}

impl MemoryEngine {
    /// Creates an engine with the native engine's limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with custom limits.
    pub fn with_limits(limits: EngineLimits) -> Self {
        Self {
            limits,
            state: RefCell::new(State::default()),
        }
    }

    /// Returns the limits in force.
    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Number of handles currently open, hive handles included.
    pub fn open_handle_count(&self) -> usize {
        self.state.borrow().handles.len()
    }

    fn check_key_name(&self, name: &str) -> EngineResult<()> {
        if name.is_empty() || utf16_len(name) > self.limits.max_key_name_len {
            return Err(Status::INVALID_PARAMETER);
        }
        Ok(())
    }
}

impl Engine for MemoryEngine {
    fn create_hive(&self) -> EngineResult<RawHandle> {
        let handle = self.state.borrow_mut().register_hive(HiveStore::new());
        debug!(handle = handle.0, "Created in-memory hive");
        Ok(handle)
    }

    fn open_hive(&self, path: &Path) -> EngineResult<RawHandle> {
        let bytes = fs::read(path).map_err(|e| io_status(&e, Status::BADDB))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|_| Status::BADDB)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(Status::BADDB);
        }
        let store = HiveStore::from_snapshot(&snapshot.root);
        let handle = self.state.borrow_mut().register_hive(store);
        debug!(handle = handle.0, path = %path.display(), "Loaded hive snapshot");
        Ok(handle)
    }

    fn close_hive(&self, hive: RawHandle) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        match state.entry(hive)?.kind {
            HandleKind::Hive => {}
            HandleKind::Key => return Err(Status::INVALID_HANDLE),
        }
        state.hives.remove(&hive);
        state.handles.retain(|_, entry| entry.hive != hive);
        Ok(())
    }

    fn save_hive(&self, hive: RawHandle, path: &Path, major: u32, minor: u32) -> EngineResult<()> {
        if !SUPPORTED_VERSIONS.contains(&(major, minor)) {
            return Err(Status::INVALID_PARAMETER);
        }
        let snapshot = {
            let state = self.state.borrow();
            let entry = state.entry(hive)?;
            if !matches!(entry.kind, HandleKind::Hive) {
                return Err(Status::INVALID_HANDLE);
            }
            Snapshot {
                format: SNAPSHOT_FORMAT.to_string(),
                major_version: major,
                minor_version: minor,
                root: state.store(hive)?.to_snapshot(HiveStore::ROOT)?,
            }
        };

        let bytes = serde_json::to_vec(&snapshot).map_err(|_| Status::CANTWRITE)?;
        write_new_file(path, |file| {
            file.write_all(&bytes)?;
            file.sync_all()
        })?;
        debug!(hive = hive.0, path = %path.display(), bytes = bytes.len(), "Saved hive snapshot");
        Ok(())
    }

    fn open_key(&self, parent: RawHandle, sub_key: &str) -> EngineResult<RawHandle> {
        let mut state = self.state.borrow_mut();
        let entry = state.entry(parent)?;
        let node = state.store(entry.hive)?.resolve(entry.node, sub_key)?;
        let handle = state.allocate(HandleEntry {
            kind: HandleKind::Key,
            hive: entry.hive,
            node,
        });
        trace!(parent = parent.0, sub_key, handle = handle.0, "Opened key");
        Ok(handle)
    }

    fn create_key(
        &self,
        parent: RawHandle,
        sub_key: &str,
        class: Option<&str>,
        options: KeyOptions,
    ) -> EngineResult<(RawHandle, Disposition)> {
        let segments: Vec<&str> = split_path(sub_key).collect();
        for segment in &segments {
            self.check_key_name(segment)?;
        }

        let mut state = self.state.borrow_mut();
        let entry = state.entry(parent)?;
        let store = state.store_mut(entry.hive)?;

        let mut current = entry.node;
        let mut disposition = Disposition::OpenedExistingKey;
        for (index, segment) in segments.iter().enumerate() {
            if let Some(existing) = store.child(current, segment)? {
                current = existing;
                continue;
            }
            let depth = store.node(current)?.depth + 1;
            if depth > self.limits.max_depth {
                return Err(Status::INVALID_PARAMETER);
            }
            let is_last = index + 1 == segments.len();
            let mut node = Node::new(segment, if is_last { class.unwrap_or("") } else { "" }, depth, Some(current));
            node.volatile = options.is_volatile();
            current = store.insert_child(current, node)?;
            disposition = Disposition::CreatedNewKey;
        }

        let handle = state.allocate(HandleEntry {
            kind: HandleKind::Key,
            hive: entry.hive,
            node: current,
        });
        trace!(parent = parent.0, sub_key, ?disposition, "Created key");
        Ok((handle, disposition))
    }

    fn delete_key(&self, key: RawHandle, sub_key: Option<&str>) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.entry(key)?;
        let store = state.store_mut(entry.hive)?;
        let target = match sub_key {
            Some(path) => store.resolve(entry.node, path)?,
            None => entry.node,
        };
        store.remove(target)
    }

    fn close_key(&self, key: RawHandle) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        match state.entry(key)?.kind {
            HandleKind::Key => {}
            HandleKind::Hive => return Err(Status::INVALID_HANDLE),
        }
        state.handles.remove(&key);
        Ok(())
    }

    fn query_info_key(
        &self,
        key: RawHandle,
        class: &mut OutBuf<'_, u16>,
        info: &mut KeyInfo,
    ) -> EngineResult<()> {
        let state = self.state.borrow();
        let entry = state.entry(key)?;
        let store = state.store(entry.hive)?;
        *info = store.info(entry.node)?;
        write_name(class, &store.node(entry.node)?.class)
    }

    fn enum_key(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        class: Option<&mut OutBuf<'_, u16>>,
        last_write_time: Option<&mut FileTime>,
    ) -> EngineResult<()> {
        let state = self.state.borrow();
        let entry = state.entry(key)?;
        let store = state.store(entry.hive)?;
        let child = *store
            .node(entry.node)?
            .children
            .get(index as usize)
            .ok_or(Status::NO_MORE_ITEMS)?;
        let child = store.node(child)?;

        write_name(name, &child.name)?;
        if let Some(class) = class {
            write_name(class, &child.class)?;
        }
        if let Some(last_write_time) = last_write_time {
            *last_write_time = child.last_write;
        }
        Ok(())
    }

    fn enum_value(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        value_type: Option<&mut u32>,
        data: Option<&mut OutBuf<'_, u8>>,
    ) -> EngineResult<()> {
        let state = self.state.borrow();
        let entry = state.entry(key)?;
        let node = state.store(entry.hive)?.node(entry.node)?;
        let value = node.values.get(index as usize).ok_or(Status::NO_MORE_ITEMS)?;

        write_name(name, &value.name)?;
        if let Some(value_type) = value_type {
            *value_type = value.value_type;
        }
        if let Some(data) = data {
            write_data(data, &value.data)?;
        }
        Ok(())
    }

    fn get_value(
        &self,
        key: RawHandle,
        sub_key: Option<&str>,
        value: &str,
        value_type: Option<&mut u32>,
        data: &mut OutBuf<'_, u8>,
    ) -> EngineResult<()> {
        let state = self.state.borrow();
        let entry = state.entry(key)?;
        let store = state.store(entry.hive)?;
        let target = match sub_key {
            Some(path) => store.resolve(entry.node, path)?,
            None => entry.node,
        };
        let node = store.node(target)?;
        let stored = node
            .value_index(value)
            .map(|i| &node.values[i])
            .ok_or(Status::FILE_NOT_FOUND)?;

        if let Some(value_type) = value_type {
            *value_type = stored.value_type;
        }
        write_data(data, &stored.data)
    }

    fn set_value(&self, key: RawHandle, value: &str, value_type: u32, data: &[u8]) -> EngineResult<()> {
        if utf16_len(value) > self.limits.max_value_name_len {
            return Err(Status::INVALID_PARAMETER);
        }
        let mut state = self.state.borrow_mut();
        let entry = state.entry(key)?;
        let node = state.store_mut(entry.hive)?.node_mut(entry.node)?;

        let stored = StoredValue {
            name: value.to_string(),
            value_type,
            data: data.to_vec(),
        };
        match node.value_index(value) {
            Some(index) => node.values[index] = stored,
            None => node.values.push(stored),
        }
        node.last_write = FileTime::now();
        Ok(())
    }

    fn delete_value(&self, key: RawHandle, value: &str) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.entry(key)?;
        let node = state.store_mut(entry.hive)?.node_mut(entry.node)?;
        let index = node.value_index(value).ok_or(Status::FILE_NOT_FOUND)?;
        node.values.remove(index);
        node.last_write = FileTime::now();
        Ok(())
    }
}

/// Registry names compare case-insensitively.
fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_uppercase)
        .eq(b.chars().flat_map(char::to_uppercase))
}

fn sort_key(name: &str) -> String {
    name.to_uppercase()
}

/// Copies a name into `out` following the size protocol; needs room for a terminator.
fn write_name(out: &mut OutBuf<'_, u16>, text: &str) -> EngineResult<()> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let needed = units.len() as u32;
    out.len = needed;
    match out.buf.as_deref_mut() {
        None => Ok(()),
        Some(buf) if buf.len() <= units.len() => Err(Status::MORE_DATA),
        Some(buf) => {
            buf[..units.len()].copy_from_slice(&units);
            buf[units.len()] = 0;
            Ok(())
        }
    }
}

/// Copies value data into `out` following the size protocol.
fn write_data(out: &mut OutBuf<'_, u8>, data: &[u8]) -> EngineResult<()> {
    out.len = data.len() as u32;
    match out.buf.as_deref_mut() {
        None => Ok(()),
        Some(buf) if buf.len() < data.len() => Err(Status::MORE_DATA),
        Some(buf) => {
            buf[..data.len()].copy_from_slice(data);
            Ok(())
        }
    }
}

/// Creates `path`, which must not exist yet, and fills it with `write`.
///
/// A file that could not be written completely is removed again, so a
/// failed save never blocks the next one with `FILE_EXISTS`.
fn write_new_file<F>(path: &Path, write: F) -> EngineResult<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| io_status(&e, Status::CANTWRITE))?;
    if let Err(error) = write(&mut file) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "Failed to remove partial snapshot");
        }
        return Err(io_status(&error, Status::CANTWRITE));
    }
    Ok(())
}

/// Maps an I/O error to a status; kinds without a counterpart become
/// `fallback`.
fn io_status(error: &io::Error, fallback: Status) -> Status {
    match error.kind() {
        io::ErrorKind::NotFound => Status::FILE_NOT_FOUND,
        io::ErrorKind::AlreadyExists => Status::FILE_EXISTS,
        io::ErrorKind::PermissionDenied => Status::ACCESS_DENIED,
        _ => fallback,
    }
}
