//! Card aggregate and change-notification bus
//!
//! A [`Card`] owns everything for one connected device: the element store,
//! per-element callback lists, the routing graph and the persistence
//! handle. All mutation goes through [`Card::set_value`] /
//! [`Card::set_bytes`] regardless of who triggers it, so engine-driven and
//! GUI-driven writes are indistinguishable to the invariant enforcement in
//! the link engine.
//!
//! Callbacks fire synchronously, in registration order, before the setter
//! returns. Callbacks may themselves set other elements, producing a
//! depth-first cascade; the only thing preventing unbounded recursion is
//! that a write which does not change the value fires nothing.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::elem::{Backing, ControlIo, Elem, ElemId, ElemPayload, ElemStore, HwError};
use super::routing::{RoutingSink, RoutingSource};
use super::state::StateStore;
use super::{controls, names, routing};

/// Identity of a device, used to key persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum CardError {
    #[error("hardware I/O: {0}")]
    Hw(#[from] HwError),
}

pub type Result<T> = std::result::Result<T, CardError>;

pub type ElemCallback = Rc<RefCell<Box<dyn FnMut(&mut Card, ElemId)>>>;

pub struct Card {
    pub identity: DeviceIdentity,
    io: Box<dyn ControlIo>,
    pub(crate) elems: ElemStore,
    /// Per-element callback lists, parallel to the element arena.
    callbacks: Vec<Vec<ElemCallback>>,
    /// Routing sources; index 0 is the reserved "Off" entry.
    pub sources: Vec<RoutingSource>,
    pub sinks: Vec<RoutingSink>,
    pub(crate) state: Rc<RefCell<StateStore>>,
    /// Monitor-group source enum position -> routing source index.
    pub(crate) monitor_src_targets: Vec<usize>,
    /// Whether first-run link defaulting was skipped (driver-managed or
    /// previously saved link state).
    pub link_init_skipped: bool,
}

impl Card {
    /// Open a device: enumerate its controls, build the routing graph,
    /// attach synthesized controls and bring link state into a consistent
    /// shape.
    pub fn open(mut io: Box<dyn ControlIo>, state: Rc<RefCell<StateStore>>) -> Result<Card> {
        let identity = io.identity();
        let monitor_src_targets = io.monitor_source_targets();
        debug!(
            serial = %identity.serial,
            model = %identity.model,
            "opening card"
        );

        let descs = io.enumerate()?;
        let mut card = Card {
            identity,
            io,
            elems: ElemStore::new(),
            callbacks: Vec::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            state,
            monitor_src_targets,
            link_init_skipped: false,
        };

        for desc in descs {
            card.elems
                .add(desc.name, desc.writable, Backing::Hardware { numid: desc.numid }, desc.payload);
            card.callbacks.push(Vec::new());
        }
        debug!(elems = card.elems.len(), "enumerated hardware controls");

        routing::build_graph(&mut card);
        controls::attach(&mut card);
        names::refresh_all(&mut card);
        Ok(card)
    }

    /// Allocate a simulated element and extend the card's collection.
    pub fn create_simulated(&mut self, name: &str, payload: ElemPayload) -> ElemId {
        let id = self
            .elems
            .add(name.to_string(), true, Backing::Simulated, payload);
        self.callbacks.push(Vec::new());
        trace!(name, id = id.0, "synthesized control element");
        id
    }

    pub fn elem(&self, id: ElemId) -> Option<&Elem> {
        self.elems.get(id)
    }

    pub fn lookup(&self, name: &str) -> Option<ElemId> {
        self.elems.lookup(name)
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Option<ElemId> {
        self.elems.find_by_prefix(prefix)
    }

    pub fn elems(&self) -> impl Iterator<Item = &Elem> {
        self.elems.iter()
    }

    pub(crate) fn state_handle(&self) -> Rc<RefCell<StateStore>> {
        Rc::clone(&self.state)
    }

    pub fn get_value(&self, id: ElemId) -> i64 {
        self.elems.get(id).map(|e| e.payload.int_value()).unwrap_or(0)
    }

    pub fn get_bool(&self, id: ElemId) -> bool {
        self.get_value(id) != 0
    }

    pub fn get_bytes(&self, id: ElemId) -> &[u8] {
        self.elems.get(id).map(|e| e.payload.bytes()).unwrap_or(&[])
    }

    /// Set an integer-like element value.
    ///
    /// Equal writes are suppressed and fire no callbacks. Hardware-backed
    /// elements are written through the backend first; on backend failure
    /// the operation is a logged no-op and the cached value is untouched.
    pub fn set_value(&mut self, id: ElemId, value: i64) {
        let Some(elem) = self.elems.get_mut(id) else {
            return;
        };
        if !elem.writable {
            warn!(name = %elem.name, "ignoring write to read-only element");
            return;
        }
        let target = elem.payload.clamp_int(value);
        if elem.payload.int_value() == target {
            return;
        }
        if let Backing::Hardware { numid } = elem.backing {
            if let Err(e) = self.io.write(numid, target) {
                warn!(numid, error = %e, "hardware write failed");
                return;
            }
        }
        elem.payload.set_int(target);
        trace!(name = %elem.name, value = target, "element changed");
        self.notify(id);
    }

    /// Set a bytes element. The store truncates to capacity and does not
    /// validate content; UTF-8 and printable-length handling is the
    /// caller's job.
    pub fn set_bytes(&mut self, id: ElemId, data: &[u8]) {
        let Some(elem) = self.elems.get_mut(id) else {
            return;
        };
        if !elem.writable {
            warn!(name = %elem.name, "ignoring write to read-only element");
            return;
        }
        let mut probe = elem.payload.clone();
        if !probe.set_bytes(data) {
            return;
        }
        if let Backing::Hardware { numid } = elem.backing {
            if let Err(e) = self.io.write_bytes(numid, probe.bytes()) {
                warn!(numid, error = %e, "hardware write failed");
                return;
            }
        }
        elem.payload = probe;
        self.notify(id);
    }

    /// Register a change callback for one element. Multiple callbacks per
    /// element are invoked in registration order.
    pub fn add_callback(&mut self, id: ElemId, f: impl FnMut(&mut Card, ElemId) + 'static) {
        if let Some(list) = self.callbacks.get_mut(id.index()) {
            list.push(Rc::new(RefCell::new(Box::new(f))));
        }
    }

    /// Re-fire callbacks for an element without changing its value.
    /// Used by the link engine after unlink so dependent state re-renders.
    pub fn renotify(&mut self, id: ElemId) {
        self.notify(id);
    }

    fn notify(&mut self, id: ElemId) {
        let cbs = match self.callbacks.get(id.index()) {
            Some(list) => list.clone(),
            None => return,
        };
        for cb in cbs {
            let mut f = cb.borrow_mut();
            (&mut **f)(self, id);
        }
    }
}
