//! Two-call size query for engine output of unknown length.
//!
//! The engine is asked once for the required size, a scratch buffer of that
//! size is allocated, and the engine is asked again to fill it. When the
//! caller already knows an upper bound (usually from the key's cached
//! metadata) the probe is skipped; if the bound turns out to be short the
//! routine falls back to a probe and a second fill.

use crate::engine::{EngineResult, OutBuf, Status};
use crate::utils::name_capacity;

/// How the engine measures the requested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    /// Characters, excluding the terminator. Buffers get extra room.
    Chars,
    /// Exact byte count.
    Bytes,
}

impl SizeUnit {
    /// Buffer capacity needed for an item of `reported` size.
    fn capacity(self, reported: u32) -> u32 {
        match self {
            SizeUnit::Chars => name_capacity(reported),
            SizeUnit::Bytes => reported,
        }
    }
}

/// Runs the size query protocol and returns the filled buffer.
///
/// `call` performs one engine call against the `OutBuf` it is given. With
/// `hint = None` the first call is a probe; with `Some(capacity)` the fill
/// is attempted directly.
///
/// # Errors
///
/// Any status other than success, or `MORE_DATA` on the first call of a
/// round, is returned unchanged.
pub fn fetch<T, F>(unit: SizeUnit, hint: Option<u32>, mut call: F) -> EngineResult<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(&mut OutBuf<'_, T>) -> EngineResult<()>,
{
    let capacity = match hint {
        Some(capacity) => capacity,
        None => probe(unit, &mut call)?,
    };

    match fill(capacity, &mut call) {
        Err(Status::MORE_DATA) if hint.is_some() => {
            let capacity = probe(unit, &mut call)?;
            fill(capacity, &mut call)
        }
        other => other,
    }
}

/// Asks the engine for the size of the item.
fn probe<T, F>(unit: SizeUnit, call: &mut F) -> EngineResult<u32>
where
    F: FnMut(&mut OutBuf<'_, T>) -> EngineResult<()>,
{
    let mut out = OutBuf::probe();
    match call(&mut out) {
        Ok(()) | Err(Status::MORE_DATA) => Ok(unit.capacity(out.len)),
        Err(status) => Err(status),
    }
}

/// Allocates `capacity` elements and lets the engine fill them.
fn fill<T, F>(capacity: u32, call: &mut F) -> EngineResult<Vec<T>>
where
    T: Copy + Default,
    F: FnMut(&mut OutBuf<'_, T>) -> EngineResult<()>,
{
    let mut scratch = vec![T::default(); capacity as usize];
    let written = {
        let mut out = OutBuf::new(&mut scratch);
        call(&mut out)?;
        out.len as usize
    };
    scratch.truncate(written);
    Ok(scratch)
}
