//! Effective display names for routing ports
//!
//! Every port carries a cached `display_name`, recomputed whenever a custom
//! name, pair name or link switch changes. Resolution order: a linked pair
//! shows its pair name if one is set, otherwise "Left-N" built from the
//! members' individual names; an unlinked port shows its custom name if
//! set, otherwise the default name.
//!
//! Name buffers are fixed-capacity NUL-padded byte elements. Content is
//! read up to the first NUL, must be valid UTF-8 and is whitespace-trimmed;
//! anything that fails those checks falls back to the default name.

use tracing::trace;

use super::card::Card;
use super::elem::ElemId;
use super::routing::{self, Node, PortMeta};
use super::link;

/// Length of the used portion of a NUL-padded buffer.
pub fn printable_len(data: &[u8]) -> usize {
    data.iter().position(|&b| b == 0).unwrap_or(data.len())
}

/// Decode a name buffer into a usable custom name, or None when unset,
/// non-UTF-8 or blank.
pub fn custom_string(data: &[u8]) -> Option<String> {
    let used = &data[..printable_len(data)];
    let s = std::str::from_utf8(used).ok()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Combined label of a pair: the left name joined to the last token of the
/// right name, e.g. "Analogue 1" + "Analogue 2" -> "Analogue 1-2".
pub fn pair_label(left: &str, right: &str) -> String {
    let tail = right.rsplit(' ').next().unwrap_or(right);
    format!("{left}-{tail}")
}

fn individual_name(card: &Card, meta: &PortMeta) -> String {
    meta.custom_name_elem
        .and_then(|id| custom_string(card.get_bytes(id)))
        .unwrap_or_else(|| meta.name.clone())
}

/// Resolve what a port should currently be labelled.
pub fn effective_name(card: &Card, n: Node) -> String {
    if link::pair_is_linked(card, n) {
        let left = routing::left_of_pair(card, n);
        let lmeta = routing::port(card, left);
        if let Some(pn) = lmeta.pair_name_elem {
            if let Some(s) = custom_string(card.get_bytes(pn)) {
                return s;
            }
        }
        if let Some(right) = routing::partner_node(card, left) {
            return pair_label(
                &individual_name(card, lmeta),
                &individual_name(card, routing::port(card, right)),
            );
        }
    }
    individual_name(card, routing::port(card, n))
}

pub(crate) fn refresh_node(card: &mut Card, n: Node) {
    let resolved = effective_name(card, n);
    let meta = routing::port_mut(card, n);
    if meta.display_name != resolved {
        trace!(port = %meta.name, display = %resolved, "display name updated");
        meta.display_name = resolved;
    }
}

/// Refresh a port and its partner together; link state makes their labels
/// interdependent.
pub(crate) fn refresh_pair(card: &mut Card, n: Node) {
    refresh_node(card, n);
    if let Some(p) = routing::partner_node(card, n) {
        refresh_node(card, p);
    }
}

pub(crate) fn refresh_all(card: &mut Card) {
    for n in routing::all_nodes(card) {
        refresh_node(card, n);
    }
}

/// Change callback for custom-name and pair-name elements.
pub(crate) fn name_changed(card: &mut Card, id: ElemId) {
    let owner = routing::all_nodes(card).into_iter().find(|&n| {
        let meta = routing::port(card, n);
        meta.custom_name_elem == Some(id) || meta.pair_name_elem == Some(id)
    });
    if let Some(n) = owner {
        refresh_pair(card, n);
    }
}
