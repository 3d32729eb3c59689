//! Control element store
//!
//! Elements are the atomic unit of card state: every switch, enum selector,
//! volume cell and name buffer is one element. An element is either backed
//! by a real hardware control (written through the [`ControlIo`] seam) or
//! simulated, meaning its state lives only in this application and is
//! persisted by the state store. Nothing outside the control factory may
//! assume which kind it is dealing with except by asking
//! [`Elem::is_simulated`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

use super::card::DeviceIdentity;

/// Errors reported by a hardware control backend
#[derive(Debug, Error)]
pub enum HwError {
    #[error("no control with numid {0}")]
    NoSuchControl(u32),

    #[error("control {0} is not writable")]
    NotWritable(u32),

    #[error("backend I/O error: {0}")]
    Io(String),
}

pub type HwResult<T> = std::result::Result<T, HwError>;

/// Stable identifier of a control element within one card.
///
/// Ids are dense indexes into the card's element collection and are never
/// reused or invalidated while the card lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElemId(pub u32);

impl ElemId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value class of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    Boolean,
    Enumerated,
    Integer,
    Bytes,
}

/// Typed value storage for an element.
///
/// Values are scalar; the mixer gain matrix is one element per cell, so no
/// operation in the core needs multi-value elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemPayload {
    Boolean { value: bool },
    Enumerated { value: u32, items: Vec<String> },
    Integer { value: i64, min: i64, max: i64 },
    Bytes { data: Vec<u8>, capacity: usize },
}

impl ElemPayload {
    pub fn kind(&self) -> ElemKind {
        match self {
            ElemPayload::Boolean { .. } => ElemKind::Boolean,
            ElemPayload::Enumerated { .. } => ElemKind::Enumerated,
            ElemPayload::Integer { .. } => ElemKind::Integer,
            ElemPayload::Bytes { .. } => ElemKind::Bytes,
        }
    }

    /// Current value widened to an integer; bytes payloads read as 0.
    pub fn int_value(&self) -> i64 {
        match self {
            ElemPayload::Boolean { value } => i64::from(*value),
            ElemPayload::Enumerated { value, .. } => i64::from(*value),
            ElemPayload::Integer { value, .. } => *value,
            ElemPayload::Bytes { .. } => 0,
        }
    }

    /// What `v` becomes once range-limited to this payload.
    pub fn clamp_int(&self, v: i64) -> i64 {
        match self {
            ElemPayload::Boolean { .. } => i64::from(v != 0),
            ElemPayload::Enumerated { items, .. } => {
                let last = items.len().saturating_sub(1) as i64;
                v.clamp(0, last)
            }
            ElemPayload::Integer { min, max, .. } => v.clamp(*min, *max),
            ElemPayload::Bytes { .. } => 0,
        }
    }

    /// Store `v`, returning whether the value actually changed.
    pub fn set_int(&mut self, v: i64) -> bool {
        let v = self.clamp_int(v);
        match self {
            ElemPayload::Boolean { value } => {
                let new = v != 0;
                let changed = *value != new;
                *value = new;
                changed
            }
            ElemPayload::Enumerated { value, .. } => {
                let new = v as u32;
                let changed = *value != new;
                *value = new;
                changed
            }
            ElemPayload::Integer { value, .. } => {
                let changed = *value != v;
                *value = v;
                changed
            }
            ElemPayload::Bytes { .. } => false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ElemPayload::Bytes { data, .. } => data,
            _ => &[],
        }
    }

    /// Store a byte buffer, truncated to capacity and padded with NULs.
    /// Returns whether the stored bytes changed.
    pub fn set_bytes(&mut self, new: &[u8]) -> bool {
        match self {
            ElemPayload::Bytes { data, capacity } => {
                let take = new.len().min(*capacity);
                let mut next = vec![0u8; *capacity];
                next[..take].copy_from_slice(&new[..take]);
                let changed = *data != next;
                *data = next;
                changed
            }
            _ => false,
        }
    }

    /// Fixed-capacity bytes payload, initially all NULs.
    pub fn bytes_with_capacity(capacity: usize) -> Self {
        ElemPayload::Bytes {
            data: vec![0u8; capacity],
            capacity,
        }
    }
}

/// Which side owns the element state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Backed by a real driver control; writes go through [`ControlIo`].
    Hardware { numid: u32 },
    /// Software-only state, persisted by the state store.
    Simulated,
}

/// One control element owned by a card
#[derive(Debug)]
pub struct Elem {
    pub id: ElemId,
    pub name: String,
    pub writable: bool,
    pub backing: Backing,
    pub payload: ElemPayload,
}

impl Elem {
    pub fn is_simulated(&self) -> bool {
        matches!(self.backing, Backing::Simulated)
    }
}

/// Description of one hardware control, as enumerated by a backend
#[derive(Debug, Clone)]
pub struct HwElemDesc {
    pub numid: u32,
    pub name: String,
    pub writable: bool,
    pub payload: ElemPayload,
}

/// Hardware control I/O as consumed by the core.
///
/// Implementations must share the element-store contract: a write that does
/// not change the stored value reports `Ok(false)` so the card can suppress
/// change notifications.
pub trait ControlIo {
    fn identity(&self) -> DeviceIdentity;

    fn enumerate(&mut self) -> HwResult<Vec<HwElemDesc>>;

    fn read(&mut self, numid: u32) -> HwResult<i64>;

    /// Returns whether the device-side value changed.
    fn write(&mut self, numid: u32, value: i64) -> HwResult<bool>;

    fn read_bytes(&mut self, numid: u32) -> HwResult<Vec<u8>>;

    fn write_bytes(&mut self, numid: u32, data: &[u8]) -> HwResult<bool>;

    /// Monitor-group source enum position to routing-source index table.
    ///
    /// Built from the device descriptor by the backend; empty when the
    /// device has no monitor groups.
    fn monitor_source_targets(&self) -> Vec<usize> {
        Vec::new()
    }
}

/// Arena of elements plus a name index.
#[derive(Default)]
pub struct ElemStore {
    elems: Vec<Elem>,
    by_name: HashMap<String, ElemId>,
}

impl ElemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Elem> {
        self.elems.iter()
    }

    pub fn add(
        &mut self,
        name: String,
        writable: bool,
        backing: Backing,
        payload: ElemPayload,
    ) -> ElemId {
        let id = ElemId(self.elems.len() as u32);
        trace!(name = %name, ?backing, "adding element");
        self.by_name.insert(name.clone(), id);
        self.elems.push(Elem {
            id,
            name,
            writable,
            backing,
            payload,
        });
        id
    }

    pub fn get(&self, id: ElemId) -> Option<&Elem> {
        self.elems.get(id.index())
    }

    pub fn get_mut(&mut self, id: ElemId) -> Option<&mut Elem> {
        self.elems.get_mut(id.index())
    }

    /// Exact name match.
    pub fn lookup(&self, name: &str) -> Option<ElemId> {
        self.by_name.get(name).copied()
    }

    /// First element (by id order) whose name starts with `prefix`.
    /// Used to probe driver capability before building dependent state.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<ElemId> {
        self.elems
            .iter()
            .find(|e| e.name.starts_with(prefix))
            .map(|e| e.id)
    }
}
