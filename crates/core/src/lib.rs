//! Core model for USB audio interface control panels.
//!
//! The crate is backend-agnostic: anything that can enumerate, read and
//! write named controls implements [`ControlIo`] and gets the full
//! treatment, including the stereo link engine, synthesized controls and
//! per-device state persistence.

pub mod domain;

pub use domain::card::{Card, CardError, DeviceIdentity, ElemCallback};
pub use domain::elem::{
    Backing, ControlIo, Elem, ElemId, ElemKind, ElemPayload, ElemStore, HwElemDesc, HwError,
    HwResult,
};
pub use domain::link::{pair_is_linked, set_pair_linked};
pub use domain::routing::{
    HwIoType, MonitorCtls, Node, PortCategory, PortMeta, RoutingSink, RoutingSource,
};
pub use domain::state::{StateStore, StoreError, DEBOUNCE};
