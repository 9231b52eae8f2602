//! Hive container owning the engine handle.

use crate::engine::{Engine, MemoryEngine, RawHandle};
use crate::error::{RegistryError, Result};
use crate::key::{Key, KeyHandle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};

/// An open registry hive.
///
/// The hive owns its engine handle. Keys borrow the hive, so it cannot be
/// closed while any of them is still alive.
///
/// # Examples
///
/// ```
/// use offreg::{Hive, KeyOptions};
///
/// let hive = Hive::in_memory().unwrap();
/// let root = hive.root().unwrap();
/// let software = root.create_sub_key("Software", KeyOptions::default()).unwrap();
/// software.set_value("Installed", "yes").unwrap();
/// assert_eq!(root.sub_key_count(), 1);
/// ```
pub struct Hive {
    engine: Rc<dyn Engine>,
    handle: RawHandle,
    path: Option<PathBuf>,
    closed: bool,
}

impl Hive {
    /// Creates a new, empty hive.
    pub fn create(engine: Rc<dyn Engine>) -> Result<Self> {
        let handle = engine
            .create_hive()
            .map_err(|status| RegistryError::from_status(status, "create hive", ""))?;
        info!(handle = handle.0, "Created registry hive");
        Ok(Self {
            engine,
            handle,
            path: None,
            closed: false,
        })
    }

    /// Creates a new, empty hive on a fresh [`MemoryEngine`].
    pub fn in_memory() -> Result<Self> {
        Self::create(Rc::new(MemoryEngine::new()))
    }

    /// Opens a hive file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the file does not exist. Other
    /// engine failures (such as a corrupt file) come back as
    /// [`RegistryError::Engine`].
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(engine: Rc<dyn Engine>, path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening registry hive");
        let handle = engine
            .open_hive(path)
            .map_err(|status| RegistryError::from_status(status, "open hive", &path.display().to_string()))?;
        debug!(handle = handle.0, "Hive opened");
        Ok(Self {
            engine,
            handle,
            path: Some(path.to_path_buf()),
            closed: false,
        })
    }

    /// Returns a view of the root key.
    ///
    /// The view borrows the hive's handle and is refreshed on creation. Each
    /// call returns an independent view with its own metadata cache.
    pub fn root(&self) -> Result<Key<'_>> {
        Key::from_raw(self.engine.as_ref(), KeyHandle::Borrowed(self.handle), "")
    }

    /// Writes the hive to a new file.
    ///
    /// `major` and `minor` select the OS version the file must load on.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::FileExists`] if `path` already exists; the
    /// engine never overwrites.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn save<P: AsRef<Path>>(&self, path: P, major: u32, minor: u32) -> Result<()> {
        let path = path.as_ref();
        self.engine
            .save_hive(self.handle, path, major, minor)
            .map_err(|status| RegistryError::from_status(status, "save hive", &path.display().to_string()))?;
        info!(major, minor, "Saved registry hive");
        Ok(())
    }

    /// Closes the hive and releases its handle.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    /// Path the hive was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the engine handle of the hive.
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    /// Returns the engine the hive runs on.
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine
            .close_hive(self.handle)
            .map_err(|status| RegistryError::from_status(status, "close hive", ""))?;
        info!(handle = self.handle.0, "Closed registry hive");
        Ok(())
    }
}

impl Drop for Hive {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(handle = self.handle.0, error = %e, "Failed to close hive");
        }
    }
}

impl fmt::Debug for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hive")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .finish()
    }
}
