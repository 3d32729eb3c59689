//! Synthesized control attachment
//!
//! Newer firmware exposes enable, custom-name and stereo-link controls as
//! real driver elements; older firmware does not. For every port the
//! factory first looks the canonical name up in the element store and only
//! synthesizes a simulated element when the driver has none. Synthesized
//! elements get a save-on-change callback so their state survives the
//! process; real elements are the driver's problem.
//!
//! Attachment order matters: persistence callbacks are registered before
//! link defaulting so downgrades are saved, and the link/name/routing sync
//! callbacks are registered last so that first-run defaulting and its
//! consistency pass never trigger interactive repair behavior.

use std::collections::BTreeMap;
use tracing::debug;

use super::card::Card;
use super::elem::{ElemId, ElemPayload};
use super::routing::{self, PortCategory};
use super::{link, names};

const NAME_CAPACITY: usize = 32;

type Saved = BTreeMap<String, String>;

pub(crate) fn attach(card: &mut Card) {
    let saved = {
        let state = card.state_handle();
        let map = state.borrow().load(&card.identity.serial, "controls");
        map
    };
    debug!(saved = saved.len(), "loaded saved control state");

    let mut saw_real_link = false;
    let mut saw_saved_link = false;

    for n in routing::all_nodes(card) {
        let meta = routing::port(card, n);
        if meta.category == PortCategory::Off {
            continue;
        }
        let name = meta.name.clone();
        let is_left = meta.is_left_channel();
        let partner = routing::partner_node(card, n);

        let enable = attach_bool(card, &format!("{name} Enable Switch"), true, &saved);
        routing::port_mut(card, n).enable_elem = Some(enable);

        let custom = attach_bytes(card, &format!("{name} Custom Name"), &saved);
        routing::port_mut(card, n).custom_name_elem = Some(custom);

        // the left member owns the pair-wide controls
        if is_left {
            if let Some(p) = partner {
                let right_name = routing::port(card, p).name.clone();
                let label = names::pair_label(&name, &right_name);

                let link_name = format!("{label} Stereo Link Switch");
                if let Some(id) = card.lookup(&link_name) {
                    saw_real_link = true;
                    routing::port_mut(card, n).link_elem = Some(id);
                } else {
                    if saved.contains_key(&link_name) {
                        saw_saved_link = true;
                    }
                    let id = attach_bool(card, &link_name, false, &saved);
                    routing::port_mut(card, n).link_elem = Some(id);
                }

                let pair_name = attach_bytes(card, &format!("{label} Pair Name"), &saved);
                routing::port_mut(card, n).pair_name_elem = Some(pair_name);
            }
        }
    }

    // defaulting, the consistency pass and the persist stand or fall
    // together: driver-managed or previously saved link state is taken
    // as-is and never rewritten at open
    let defaulted = !saw_real_link && !saw_saved_link;
    if defaulted {
        link::init_link_defaults(card);
        link::run_fixpoint(card);
        link::persist_links(card);
    } else {
        card.link_init_skipped = true;
        debug!(
            real = saw_real_link,
            saved = saw_saved_link,
            "link defaulting skipped"
        );
    }

    register_sync_callbacks(card);
}

/// Boolean control: real element if the driver has one, otherwise a
/// simulated element initialized from saved state.
fn attach_bool(card: &mut Card, name: &str, default: bool, saved: &Saved) -> ElemId {
    if let Some(id) = card.lookup(name) {
        return id;
    }
    let value = saved.get(name).map(|v| v == "1").unwrap_or(default);
    let id = card.create_simulated(name, ElemPayload::Boolean { value });
    add_persist_callback(card, id);
    id
}

/// Name-buffer control, same fallback rule as [`attach_bool`].
fn attach_bytes(card: &mut Card, name: &str, saved: &Saved) -> ElemId {
    if let Some(id) = card.lookup(name) {
        return id;
    }
    let mut payload = ElemPayload::bytes_with_capacity(NAME_CAPACITY);
    if let Some(v) = saved.get(name) {
        payload.set_bytes(v.as_bytes());
    }
    let id = card.create_simulated(name, payload);
    add_persist_callback(card, id);
    id
}

fn add_persist_callback(card: &mut Card, id: ElemId) {
    let state = card.state_handle();
    let identity = card.identity.clone();
    card.add_callback(id, move |card, id| {
        let Some(e) = card.elem(id) else { return };
        let value = match &e.payload {
            ElemPayload::Boolean { value } => if *value { "1" } else { "0" }.to_string(),
            ElemPayload::Bytes { .. } => {
                let b = e.payload.bytes();
                String::from_utf8_lossy(&b[..names::printable_len(b)]).into_owned()
            }
            other => other.int_value().to_string(),
        };
        let key = e.name.clone();
        state.borrow_mut().save(&identity, "controls", &key, &value);
    });
}

fn register_sync_callbacks(card: &mut Card) {
    for n in routing::all_nodes(card) {
        let meta = routing::port(card, n);
        let enable = meta.enable_elem;
        let custom = meta.custom_name_elem;
        let link_elem = meta.link_elem;
        let pair_name = meta.pair_name_elem;

        if let Some(id) = enable {
            card.add_callback(id, link::enable_changed);
        }
        if let Some(id) = custom {
            card.add_callback(id, names::name_changed);
        }
        if let Some(id) = link_elem {
            card.add_callback(id, link::link_changed);
        }
        if let Some(id) = pair_name {
            card.add_callback(id, names::name_changed);
        }
    }

    for i in 0..card.sinks.len() {
        let id = card.sinks[i].elem;
        card.add_callback(id, link::sink_routing_changed);
        if let Some(mon) = card.sinks[i].monitor.clone() {
            for sw in mon.switches {
                card.add_callback(sw, link::monitor_switch_changed);
            }
            if let Some(s) = mon.source {
                card.add_callback(s, link::monitor_source_changed);
            }
            if let Some(t) = mon.trim {
                card.add_callback(t, link::monitor_trim_changed);
            }
        }
    }
}
