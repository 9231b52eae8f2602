//! # Offline Windows Registry Hives
//!
//! A typed management layer over an offline registry engine: create, open
//! and save hives, walk their keys, and read and write typed values without
//! touching the live registry.
//!
//! ## Features
//!
//! - **Engine seam**: all storage goes through the [`Engine`] trait. The
//!   in-process [`MemoryEngine`] works everywhere; the `offreg` feature adds a
//!   binding to the native `offreg.dll` on Windows
//! - **Cached metadata**: each [`Key`] caches its counts and maximum name
//!   and data sizes, and refreshes them after every change it makes
//! - **Value codec**: REG_SZ, REG_EXPAND_SZ, REG_LINK, REG_MULTI_SZ,
//!   REG_DWORD (both byte orders), REG_QWORD and REG_BINARY
//! - **Forgiving reads**: data that does not fit its declared type is still
//!   returned as raw bytes
//!
//! ## Architecture
//!
//! ```text
//! Hive ──owns──> engine handle
//!  └─ root() ──> Key ──> open / create / delete / enumerate
//!                 ├─ KeyMetadata  (query info, refreshed on mutation)
//!                 ├─ buffer::fetch (probe size, allocate, fill)
//!                 └─ value codec  (bytes <-> ValueData)
//! ```
//!
//! ## Examples
//!
//! ### Building a hive
//!
//! ```
//! use offreg::{Hive, KeyOptions, ValueData};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::in_memory()?;
//! let root = hive.root()?;
//!
//! let run = root.create_sub_key("Software\\Contoso\\Run", KeyOptions::default())?;
//! run.set_value("Path", "C:\\Contoso\\agent.exe")?;
//! run.set_value("Flags", vec!["fast".to_string(), "quiet".to_string()])?;
//!
//! assert_eq!(run.get_value("Path")?, ValueData::String("C:\\Contoso\\agent.exe".into()));
//! assert_eq!(run.value_count(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading values
//!
//! ```no_run
//! use offreg::{Hive, MemoryEngine, ValueData};
//! use std::rc::Rc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::open(Rc::new(MemoryEngine::new()), "settings.hive")?;
//! let root = hive.root()?;
//!
//! for value in root.enumerate_values()? {
//!     println!("{} ({}) = {}", value.name, value.value_type, value.data.clone().into_value());
//! }
//!
//! if let Some(ValueData::Dword(level)) = root.try_get_value("Level")? {
//!     println!("level {}", level);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod engine;
pub mod error;
pub mod hive;
pub mod key;
pub mod metadata;
pub mod types;
pub mod utils;
pub mod value;

// Re-export main types for convenience
pub use engine::{Engine, EngineLimits, KeyInfo, MemoryEngine, OutBuf, RawHandle, Status};
pub use error::{RegistryError, Result};
pub use hive::Hive;
pub use key::{Key, KeyHandle, SubKeyInfo, ValueInfo};
pub use metadata::KeyMetadata;
pub use types::{Disposition, FileTime, KeyOptions, ValueType};
pub use value::{Decoded, ValueData};

#[cfg(all(windows, feature = "offreg"))]
pub use engine::offreg::OffregEngine;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
