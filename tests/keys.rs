//! Key tests: creation, lookup, deletion and enumeration.

use offreg::engine::EngineResult;
use offreg::{
    Disposition, Engine, FileTime, Hive, KeyInfo, KeyOptions, MemoryEngine, OutBuf, RawHandle,
    RegistryError, Status,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::Rc;

/// Engine that fails `open_key` for chosen names and delegates the rest.
///
/// Opening `vanishing` removes the key first and then reports it missing,
/// as if it had been deleted between enumeration and open.
struct FailingOpen {
    inner: MemoryEngine,
    vanishing: &'static str,
    denied: &'static str,
}

impl Engine for FailingOpen {
    fn create_hive(&self) -> EngineResult<RawHandle> {
        self.inner.create_hive()
    }

    fn open_hive(&self, path: &Path) -> EngineResult<RawHandle> {
        self.inner.open_hive(path)
    }

    fn close_hive(&self, hive: RawHandle) -> EngineResult<()> {
        self.inner.close_hive(hive)
    }

    fn save_hive(&self, hive: RawHandle, path: &Path, major: u32, minor: u32) -> EngineResult<()> {
        self.inner.save_hive(hive, path, major, minor)
    }

    fn open_key(&self, parent: RawHandle, sub_key: &str) -> EngineResult<RawHandle> {
        if sub_key.eq_ignore_ascii_case(self.vanishing) {
            self.inner.delete_key(parent, Some(sub_key))?;
            return Err(Status::FILE_NOT_FOUND);
        }
        if sub_key.eq_ignore_ascii_case(self.denied) {
            return Err(Status::ACCESS_DENIED);
        }
        self.inner.open_key(parent, sub_key)
    }

    fn create_key(
        &self,
        parent: RawHandle,
        sub_key: &str,
        class: Option<&str>,
        options: KeyOptions,
    ) -> EngineResult<(RawHandle, Disposition)> {
        self.inner.create_key(parent, sub_key, class, options)
    }

    fn delete_key(&self, key: RawHandle, sub_key: Option<&str>) -> EngineResult<()> {
        self.inner.delete_key(key, sub_key)
    }

    fn close_key(&self, key: RawHandle) -> EngineResult<()> {
        self.inner.close_key(key)
    }

    fn query_info_key(
        &self,
        key: RawHandle,
        class: &mut OutBuf<'_, u16>,
        info: &mut KeyInfo,
    ) -> EngineResult<()> {
        self.inner.query_info_key(key, class, info)
    }

    fn enum_key(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        class: Option<&mut OutBuf<'_, u16>>,
        last_write_time: Option<&mut FileTime>,
    ) -> EngineResult<()> {
        self.inner.enum_key(key, index, name, class, last_write_time)
    }

    fn enum_value(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        value_type: Option<&mut u32>,
        data: Option<&mut OutBuf<'_, u8>>,
    ) -> EngineResult<()> {
        self.inner.enum_value(key, index, name, value_type, data)
    }

    fn get_value(
        &self,
        key: RawHandle,
        sub_key: Option<&str>,
        value: &str,
        value_type: Option<&mut u32>,
        data: &mut OutBuf<'_, u8>,
    ) -> EngineResult<()> {
        self.inner.get_value(key, sub_key, value, value_type, data)
    }

    fn set_value(&self, key: RawHandle, value: &str, value_type: u32, data: &[u8]) -> EngineResult<()> {
        self.inner.set_value(key, value, value_type, data)
    }

    fn delete_value(&self, key: RawHandle, value: &str) -> EngineResult<()> {
        self.inner.delete_value(key, value)
    }
}

fn failing_hive() -> Hive {
    let engine = FailingOpen {
        inner: MemoryEngine::new(),
        vanishing: "ghost",
        denied: "locked",
    };
    Hive::create(Rc::new(engine)).unwrap()
}

#[test]
fn test_create_is_idempotent() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    let (_, first) = root
        .create_sub_key_with("Test", None, KeyOptions::default())
        .unwrap();
    let (again, second) = root
        .create_sub_key_with("Test", Some("ignored"), KeyOptions::default())
        .unwrap();

    assert_eq!(first, Disposition::CreatedNewKey);
    assert_eq!(second, Disposition::OpenedExistingKey);
    assert_eq!(again.class_name(), "");
    assert_eq!(root.sub_key_count(), 1);
}

#[test]
fn test_create_max_levels() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    let mut path = String::new();
    let mut created = 0;
    let error = loop {
        if !path.is_empty() {
            path.push('\\');
        }
        path.push('L');
        match root.create_sub_key(&path, KeyOptions::default()) {
            Ok(_) => created += 1,
            Err(e) => break e,
        }
        assert!(created <= 1000, "depth limit never enforced");
    };

    assert!(created >= 500, "only {} levels created", created);
    assert!(matches!(error, RegistryError::InvalidParameter { .. }), "{:?}", error);
}

#[test]
fn test_create_name_too_long() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    root.create_sub_key(&"N".repeat(255), KeyOptions::default()).unwrap();
    let result = root.create_sub_key(&"N".repeat(256), KeyOptions::default());

    assert!(matches!(result, Err(RegistryError::InvalidParameter { .. })));
    assert_eq!(root.sub_key_count(), 1);
}

#[test]
fn test_open_missing_key() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    let result = root.open_sub_key("Nope");
    assert!(matches!(result, Err(RegistryError::NotFound { .. })));
}

#[test]
fn test_try_open_multi_level() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    root.create_sub_key("Test\\Test2\\Test3", KeyOptions::default())
        .unwrap();

    let found = root.try_open_sub_key("Test\\Test2\\Test3").unwrap();
    let found = found.expect("multi-level path should resolve");
    assert_eq!(found.name(), "Test3");
    assert_eq!(found.full_name(), "Test\\Test2\\Test3");

    assert!(root
        .try_open_sub_key("Test\\NONEXISTENT\\Test3")
        .unwrap()
        .is_none());
}

#[test]
fn test_delete_missing_key() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    let result = root.delete_sub_key("Nope");
    assert!(matches!(result, Err(RegistryError::NotFound { .. })));
}

#[test]
fn test_delete_key_with_children() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    let parent = root.create_sub_key("Parent", KeyOptions::default()).unwrap();
    parent.create_sub_key("Child", KeyOptions::default()).unwrap();

    assert!(matches!(
        parent.delete(),
        Err(RegistryError::KeyHasChildren { .. })
    ));
    assert!(matches!(
        root.delete_sub_key("Parent"),
        Err(RegistryError::KeyHasChildren { .. })
    ));
    assert_eq!(root.sub_key_count(), 1);
}

#[test]
fn test_delete_self() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    let child = root.create_sub_key("Leaf", KeyOptions::default()).unwrap();
    assert_eq!(root.sub_key_count(), 1);

    child.delete().unwrap();
    assert_eq!(root.sub_key_count(), 0);

    // The handle outlives the key; only close is still meaningful.
    assert!(child.set_value("x", 1i32).is_err());
    child.close().unwrap();
}

#[test]
fn test_delete_sub_key_tree() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    root.create_sub_key("A\\B\\C", KeyOptions::default()).unwrap();
    root.create_sub_key("A\\B2", KeyOptions::default()).unwrap();
    root.create_sub_key("Keep", KeyOptions::default()).unwrap();
    assert_eq!(root.sub_key_count(), 2);

    root.delete_sub_key_tree("A").unwrap();

    assert_eq!(root.sub_key_count(), 1);
    assert_eq!(root.get_sub_key_names().unwrap(), vec!["Keep"]);
    assert!(root.try_open_sub_key("A\\B\\C").unwrap().is_none());
}

#[test]
fn test_delete_sub_key_tree_missing() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    let result = root.delete_sub_key_tree("Nope");
    assert!(matches!(result, Err(RegistryError::NotFound { .. })));
}

#[test]
fn test_delete_tree_from_last_level() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    root.create_sub_key("A\\B\\C", KeyOptions::default()).unwrap();

    let b = root.open_sub_key("A\\B").unwrap();
    b.delete_sub_key_tree("C").unwrap();
    assert_eq!(b.sub_key_count(), 0);
}

#[test]
fn test_delete_tree_skips_vanished_child() {
    let hive = failing_hive();
    let root = hive.root().unwrap();
    root.create_sub_key("X\\ghost", KeyOptions::default()).unwrap();
    root.create_sub_key("X\\kept\\leaf", KeyOptions::default()).unwrap();

    root.delete_sub_key_tree("X").unwrap();
    assert_eq!(root.sub_key_count(), 0);
    assert!(root.try_open_sub_key("X").unwrap().is_none());
}

#[test]
fn test_delete_tree_stops_on_other_errors() {
    let hive = failing_hive();
    let root = hive.root().unwrap();
    root.create_sub_key("X\\locked", KeyOptions::default()).unwrap();

    let result = root.delete_sub_key_tree("X");
    assert!(matches!(result, Err(RegistryError::Engine { code: 5, .. })));
    assert_eq!(root.sub_key_count(), 1);
    let x = root.open_sub_key("X").unwrap();
    assert_eq!(x.get_sub_key_names().unwrap(), vec!["locked"]);
}

#[test]
fn test_metadata_matches_enumeration() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    let names = ["alpha", "Beta", "gamma", "a-much-longer-subkey-name"];
    for name in names {
        root.create_sub_key_with(name, Some("cls"), KeyOptions::default())
            .unwrap();
    }

    let listed = root.get_sub_key_names().unwrap();
    let enumerated = root.enumerate_sub_keys().unwrap();

    assert_eq!(root.sub_key_count() as usize, names.len());
    assert_eq!(listed.len(), names.len());
    assert_eq!(enumerated.len(), names.len());

    let expected: BTreeSet<&str> = names.iter().copied().collect();
    let got: BTreeSet<&str> = listed.iter().map(String::as_str).collect();
    assert_eq!(expected, got);

    for entry in &enumerated {
        assert_eq!(entry.class_name, "cls");
        assert!(entry.last_write_datetime().is_some());
    }
}

#[test]
fn test_class_name_and_timestamp() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();
    let (key, _) = root
        .create_sub_key_with("Classy", Some("MyClass"), KeyOptions::default())
        .unwrap();

    assert_eq!(key.class_name(), "MyClass");
    let metadata = key.metadata();
    assert!(metadata.last_write_datetime().is_some());
    assert_eq!(metadata.class_name, "MyClass");
}

#[test]
fn test_key_counts_track_mutations() {
    let hive = Hive::in_memory().unwrap();
    let root = hive.root().unwrap();

    for i in 0..10 {
        root.create_sub_key(&format!("k{}", i), KeyOptions::default())
            .unwrap();
    }
    assert_eq!(root.sub_key_count(), 10);

    for i in 0..5 {
        root.delete_sub_key(&format!("K{}", i)).unwrap();
    }
    assert_eq!(root.sub_key_count(), 5);
    assert_eq!(root.get_sub_key_names().unwrap().len(), 5);
}
