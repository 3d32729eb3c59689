//! Stereo link engine
//!
//! A linked pair must always be in one of three routing shapes: both
//! members Off, both members fed the same mono source, or the two members
//! fed the two halves of a linked source pair in order. The engine enforces
//! this from two directions:
//!
//! * on first run, right after defaulting, [`run_fixpoint`] repeatedly
//!   *unlinks* pairs whose routing contradicts their link flag. Downgrading
//!   is the only move, so the linked set shrinks monotonically and the loop
//!   terminates. Routing is never touched here; hardware state wins over
//!   the link flag. When the driver or a previous session already provides
//!   link state, nothing runs at all and that state is taken as-is.
//!
//! * after open, link-switch transitions *repair routing* instead: turning
//!   a link on clears incompatible routes (or promotes the source pair's
//!   own link when the routing is already pairwise), turning it off
//!   redistributes linked gain cells and releases dependent pairs. The two
//!   directions are deliberately different and must stay that way:
//!   open-time state is somebody else's saved truth, interactive changes
//!   are the user's intent.
//!
//! All writes go through `Card::set_value`, so every repair is itself
//! observed by the steady-state sync callbacks; equal-write suppression is
//! what keeps the resulting cascades finite.

use tracing::{debug, trace, warn};

use super::card::Card;
use super::elem::{ElemId, ElemPayload};
use super::names;
use super::routing::{self, HwIoType, Node, PortCategory};

/// Whether a pair's link switch is currently on. `n` may be either member;
/// unpaired ports are never linked.
pub fn pair_is_linked(card: &Card, n: Node) -> bool {
    let left = routing::left_of_pair(card, n);
    routing::port(card, left)
        .link_elem
        .map(|le| card.get_bool(le))
        .unwrap_or(false)
}

/// Flip a pair's link switch, addressing the pair through either member.
pub fn set_pair_linked(card: &mut Card, n: Node, linked: bool) {
    let left = routing::left_of_pair(card, n);
    if let Some(le) = routing::port(card, left).link_elem {
        card.set_value(le, i64::from(linked));
    }
}

/// First-run link default for a pair.
///
/// The first analogue input pair is usually two independent mono channels
/// (mic, instrument) and the first DSP pair serves the voice chain, so
/// those start unlinked; everything else is stereo by convention. The
/// analogue exception applies to sources only, output pairs feed stereo
/// monitors.
pub(crate) fn default_link(
    is_source: bool,
    category: PortCategory,
    hw_type: Option<HwIoType>,
    pair_index: u32,
) -> bool {
    match (category, hw_type) {
        (PortCategory::Dsp, _) => pair_index > 0,
        (PortCategory::Hardware, Some(HwIoType::Analogue)) if is_source => pair_index > 0,
        _ => true,
    }
}

/// Seed every pair's link switch with its model default. Only called when
/// neither the driver nor a previous session provides link state.
pub(crate) fn init_link_defaults(card: &mut Card) {
    for n in routing::all_nodes(card) {
        let is_source = matches!(n, Node::Source(_));
        let meta = routing::port(card, n);
        let Some(le) = meta.link_elem else { continue };
        let d = default_link(is_source, meta.category, meta.hw_type, meta.pair_index());
        card.set_value(le, i64::from(d));
    }
    debug!("seeded default link state");
}

/// Save every software link switch, including the ones still at their
/// defaults, so the next open can tell "defaulted before" from "first run".
pub(crate) fn persist_links(card: &mut Card) {
    let mut saves = Vec::new();
    for n in routing::all_nodes(card) {
        let Some(le) = routing::port(card, n).link_elem else {
            continue;
        };
        let Some(e) = card.elem(le) else { continue };
        if !e.is_simulated() {
            continue;
        }
        let v = if card.get_bool(le) { "1" } else { "0" };
        saves.push((e.name.clone(), v.to_string()));
    }
    let state = card.state_handle();
    let identity = card.identity.clone();
    let mut store = state.borrow_mut();
    for (key, value) in saves {
        store.save(&identity, "controls", &key, &value);
    }
}

/// How a sink pair's current routing relates to the link invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteCompat {
    BothOff,
    /// Both members fed the same (mono) source.
    SameSource,
    /// Members fed the two halves of a linked source pair. `straight` means
    /// left half to left member.
    LinkedPair { src_left: usize, straight: bool },
    /// Members fed the two halves of a source pair whose link is off.
    PairButUnlinked { src_left: usize, straight: bool },
    Incompatible,
}

fn sink_pair_routes(card: &Card, left_sink: usize) -> RouteCompat {
    let Some(right_sink) = card.sinks[left_sink].port.partner else {
        return RouteCompat::Incompatible;
    };
    let a = routing::sink_source(card, left_sink);
    let b = routing::sink_source(card, right_sink);
    if a == 0 && b == 0 {
        return RouteCompat::BothOff;
    }
    if a == b {
        return RouteCompat::SameSource;
    }
    let pa = card.sources.get(a).and_then(|s| s.port.partner);
    if pa == Some(b) {
        let a_is_left = card.sources[a].port.is_left_channel();
        let src_left = if a_is_left { a } else { b };
        let compat = if pair_is_linked(card, Node::Source(a)) {
            RouteCompat::LinkedPair {
                src_left,
                straight: a_is_left,
            }
        } else {
            RouteCompat::PairButUnlinked {
                src_left,
                straight: a_is_left,
            }
        };
        return compat;
    }
    RouteCompat::Incompatible
}

/// Downgrade link flags until every linked pair satisfies the invariant.
/// Runs on first open right after defaulting, before the transition
/// callbacks are registered, so no repair behavior fires from here.
/// Driver-managed and previously saved link state never passes through.
pub(crate) fn run_fixpoint(card: &mut Card) {
    let cap = card.sources.len() + card.sinks.len() + 1;
    for pass in 0..cap {
        let mut changed = false;
        changed |= sweep_sink_pairs(card);
        changed |= sweep_source_pairs(card);
        changed |= sweep_gain_crosstalk(card);
        if !changed {
            debug!(passes = pass + 1, "link state consistent");
            return;
        }
    }
    warn!("link consistency did not settle");
}

fn sweep_sink_pairs(card: &mut Card) -> bool {
    let mut changed = false;
    for i in 0..card.sinks.len() {
        if !card.sinks[i].port.is_left_channel() {
            continue;
        }
        let Some(le) = card.sinks[i].port.link_elem else {
            continue;
        };
        if !card.get_bool(le) {
            continue;
        }
        match sink_pair_routes(card, i) {
            RouteCompat::BothOff | RouteCompat::SameSource => {}
            RouteCompat::LinkedPair { straight: true, .. } => {}
            RouteCompat::LinkedPair {
                straight: false,
                src_left,
            } => {
                warn!(
                    sink = %card.sinks[i].port.name,
                    "crossed routing between linked pairs; unlinking both"
                );
                card.set_value(le, 0);
                if let Some(sle) = card.sources[src_left].port.link_elem {
                    card.set_value(sle, 0);
                }
                changed = true;
            }
            _ => {
                warn!(
                    sink = %card.sinks[i].port.name,
                    "routing contradicts sink link; unlinking"
                );
                card.set_value(le, 0);
                changed = true;
            }
        }
    }
    changed
}

fn sweep_source_pairs(card: &mut Card) -> bool {
    let mut changed = false;
    for s in 0..card.sources.len() {
        if !card.sources[s].port.is_left_channel() {
            continue;
        }
        let Some(le) = card.sources[s].port.link_elem else {
            continue;
        };
        let Some(r) = card.sources[s].port.partner else {
            continue;
        };
        if !card.get_bool(le) {
            continue;
        }
        let ok = (0..card.sinks.len()).all(|k| {
            let src = routing::sink_source(card, k);
            if src != s && src != r {
                return true;
            }
            let Some(kp) = card.sinks[k].port.partner else {
                return false;
            };
            if !pair_is_linked(card, Node::Sink(k)) {
                return false;
            }
            let (kl, kr) = if card.sinks[k].port.is_left_channel() {
                (k, kp)
            } else {
                (kp, k)
            };
            routing::sink_source(card, kl) == s && routing::sink_source(card, kr) == r
        });
        if !ok {
            warn!(
                source = %card.sources[s].port.name,
                "asymmetric consumers; unlinking source pair"
            );
            card.set_value(le, 0);
            changed = true;
        }
    }
    changed
}

/// A linked mix-row pair crossed with a linked input-column pair must have
/// its off-diagonal gain cells muted, otherwise the "stereo channel"
/// presented to the user is a lie.
fn sweep_gain_crosstalk(card: &mut Card) -> bool {
    let mut changed = false;
    let rows = linked_mix_row_pairs(card);
    let cols = linked_mixer_col_pairs(card);
    for &(si, m) in &rows {
        for &(ki, c) in &cols {
            let hot = [(m, c + 1), (m + 1, c)].iter().any(|&(rm, rc)| {
                routing::mix_gain_elem(card, rm, rc)
                    .map(|id| card.get_value(id) > gain_min(card, id))
                    .unwrap_or(false)
            });
            if hot {
                warn!(row = m, col = c, "crosstalk in linked mixer pairs; unlinking both");
                if let Some(le) = card.sources[si].port.link_elem {
                    card.set_value(le, 0);
                }
                if let Some(le) = card.sinks[ki].port.link_elem {
                    card.set_value(le, 0);
                }
                changed = true;
            }
        }
    }
    changed
}

fn linked_mix_row_pairs(card: &Card) -> Vec<(usize, u32)> {
    (0..card.sources.len())
        .filter(|&s| {
            let p = &card.sources[s].port;
            p.category == PortCategory::Mixer
                && p.is_left_channel()
                && p.partner.is_some()
                && pair_is_linked(card, Node::Source(s))
        })
        .map(|s| (s, card.sources[s].port.port_num))
        .collect()
}

fn linked_mixer_col_pairs(card: &Card) -> Vec<(usize, u32)> {
    (0..card.sinks.len())
        .filter(|&k| {
            let p = &card.sinks[k].port;
            p.category == PortCategory::Mixer
                && p.is_left_channel()
                && p.partner.is_some()
                && pair_is_linked(card, Node::Sink(k))
        })
        .map(|k| (k, card.sinks[k].port.port_num))
        .collect()
}

/// Change callback for link switches.
pub(crate) fn link_changed(card: &mut Card, id: ElemId) {
    let Some(n) = node_with_link_elem(card, id) else {
        return;
    };
    if card.get_bool(id) {
        debug!(port = %routing::port(card, n).name, "pair linked");
        handle_link(card, n);
    } else {
        debug!(port = %routing::port(card, n).name, "pair unlinked");
        handle_unlink(card, n);
    }
    names::refresh_pair(card, n);
}

fn handle_link(card: &mut Card, left: Node) {
    let Some(right) = routing::partner_node(card, left) else {
        return;
    };

    // channel enables collapse to the left value
    let l_en = routing::port(card, left).enable_elem;
    let r_en = routing::port(card, right).enable_elem;
    if let (Some(le), Some(re)) = (l_en, r_en) {
        let v = card.get_value(le);
        card.set_value(re, v);
    }

    match left {
        Node::Sink(i) => {
            match sink_pair_routes(card, i) {
                RouteCompat::BothOff | RouteCompat::SameSource => {}
                RouteCompat::LinkedPair { straight: true, .. } => {}
                RouteCompat::PairButUnlinked {
                    straight: true,
                    src_left,
                } => {
                    // routing already pairwise; pull the source pair along
                    if let Some(sle) = card.sources[src_left].port.link_elem {
                        card.set_value(sle, 1);
                    }
                }
                _ => {
                    trace!(sink = %card.sinks[i].port.name, "clearing incompatible routes");
                    let pi = card.sinks[i].port.partner;
                    card.set_value(card.sinks[i].elem, 0);
                    if let Some(pi) = pi {
                        card.set_value(card.sinks[pi].elem, 0);
                    }
                }
            }
            let cat = card.sinks[i].port.category;
            if cat == PortCategory::Mixer {
                let c = card.sinks[i].port.port_num;
                link_gain_cols(card, c);
            }
            if cat == PortCategory::Hardware
                && card.sinks[i].port.hw_type == Some(HwIoType::Analogue)
            {
                monitor_link_sync(card, i);
            }
        }
        Node::Source(s) => {
            let Some(r) = card.sources[s].port.partner else {
                return;
            };
            // sinks consuming either half must consume the pair in order
            for k in 0..card.sinks.len() {
                let src = routing::sink_source(card, k);
                if src != s && src != r {
                    continue;
                }
                let kpart = card.sinks[k].port.partner;
                let kleft = card.sinks[k].port.is_left_channel();
                let Some(kp) = kpart else {
                    card.set_value(card.sinks[k].elem, 0);
                    continue;
                };
                let (kl, kr) = if kleft { (k, kp) } else { (kp, k) };
                if routing::sink_source(card, kl) == s && routing::sink_source(card, kr) == r {
                    if k == kl {
                        if let Some(kle) = card.sinks[kl].port.link_elem {
                            card.set_value(kle, 1);
                        }
                    }
                } else {
                    card.set_value(card.sinks[k].elem, 0);
                }
            }
            if card.sources[s].port.category == PortCategory::Mixer {
                let m = card.sources[s].port.port_num;
                link_gain_rows(card, m);
            }
        }
    }
}

fn handle_unlink(card: &mut Card, left: Node) {
    match left {
        Node::Source(s) => {
            if card.sources[s].port.category == PortCategory::Mixer {
                let m = card.sources[s].port.port_num;
                unlink_gain_rows(card, m);
            }
            if card.sources[s].port.partner.is_some() {
                // consuming sink pairs cannot stay linked to half a pair
                for k in 0..card.sinks.len() {
                    if !card.sinks[k].port.is_left_channel() {
                        continue;
                    }
                    let Some(kle) = card.sinks[k].port.link_elem else {
                        continue;
                    };
                    if !card.get_bool(kle) {
                        continue;
                    }
                    if let RouteCompat::PairButUnlinked { src_left, .. } =
                        sink_pair_routes(card, k)
                    {
                        if src_left == s {
                            card.set_value(kle, 0);
                        }
                    }
                }
            }
        }
        Node::Sink(i) => {
            if card.sinks[i].port.category == PortCategory::Mixer {
                let c = card.sinks[i].port.port_num;
                unlink_gain_cols(card, c);
            }
            if let RouteCompat::LinkedPair { src_left, .. } = sink_pair_routes(card, i) {
                if let Some(sle) = card.sources[src_left].port.link_elem {
                    card.set_value(sle, 0);
                }
            }
        }
    }

    // the members are independent channels again; let dependents re-render
    let l_en = routing::port(card, left).enable_elem;
    let r_en =
        routing::partner_node(card, left).and_then(|p| routing::port(card, p).enable_elem);
    if let Some(e) = l_en {
        card.renotify(e);
    }
    if let Some(e) = r_en {
        card.renotify(e);
    }
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    /// Left index of a linked pair of rows or columns.
    Pair(u32),
    Mono(u32),
}

fn mixer_col_lanes(card: &Card) -> Vec<Lane> {
    let mut out = Vec::new();
    for k in 0..card.sinks.len() {
        let p = &card.sinks[k].port;
        if p.category != PortCategory::Mixer {
            continue;
        }
        if p.partner.is_some() && pair_is_linked(card, Node::Sink(k)) {
            if p.is_left_channel() {
                out.push(Lane::Pair(p.port_num));
            }
        } else {
            out.push(Lane::Mono(p.port_num));
        }
    }
    out
}

fn mixer_row_lanes(card: &Card) -> Vec<Lane> {
    let mut out = Vec::new();
    for s in 0..card.sources.len() {
        let p = &card.sources[s].port;
        if p.category != PortCategory::Mixer {
            continue;
        }
        if p.partner.is_some() && pair_is_linked(card, Node::Source(s)) {
            if p.is_left_channel() {
                out.push(Lane::Pair(p.port_num));
            }
        } else {
            out.push(Lane::Mono(p.port_num));
        }
    }
    out
}

fn gain_value(card: &Card, m: u32, c: u32) -> i64 {
    routing::mix_gain_elem(card, m, c)
        .map(|id| card.get_value(id))
        .unwrap_or(0)
}

fn gain_min(card: &Card, id: ElemId) -> i64 {
    match card.elem(id).map(|e| &e.payload) {
        Some(ElemPayload::Integer { min, .. }) => *min,
        _ => 0,
    }
}

fn set_gain(card: &mut Card, m: u32, c: u32, v: i64) {
    if let Some(id) = routing::mix_gain_elem(card, m, c) {
        card.set_value(id, v);
    }
}

fn mute_gain(card: &mut Card, m: u32, c: u32) {
    if let Some(id) = routing::mix_gain_elem(card, m, c) {
        let min = gain_min(card, id);
        card.set_value(id, min);
    }
}

/// Collapse rows `m`, `m+1` into one stereo row: averaged diagonals, muted
/// cross cells against linked columns, averaged values against mono
/// columns.
fn link_gain_rows(card: &mut Card, m: u32) {
    for lane in mixer_col_lanes(card) {
        match lane {
            Lane::Pair(c) => {
                let a = (gain_value(card, m, c) + gain_value(card, m + 1, c + 1)) / 2;
                set_gain(card, m, c, a);
                set_gain(card, m + 1, c + 1, a);
                mute_gain(card, m, c + 1);
                mute_gain(card, m + 1, c);
            }
            Lane::Mono(c) => {
                let a = (gain_value(card, m, c) + gain_value(card, m + 1, c)) / 2;
                set_gain(card, m, c, a);
                set_gain(card, m + 1, c, a);
            }
        }
    }
}

fn link_gain_cols(card: &mut Card, c: u32) {
    for lane in mixer_row_lanes(card) {
        match lane {
            Lane::Pair(m) => {
                let a = (gain_value(card, m, c) + gain_value(card, m + 1, c + 1)) / 2;
                set_gain(card, m, c, a);
                set_gain(card, m + 1, c + 1, a);
                mute_gain(card, m, c + 1);
                mute_gain(card, m + 1, c);
            }
            Lane::Mono(m) => {
                let a = (gain_value(card, m, c) + gain_value(card, m, c + 1)) / 2;
                set_gain(card, m, c, a);
                set_gain(card, m, c + 1, a);
            }
        }
    }
}

/// Split a stereo row back into two mono rows. The muted cross cells take
/// the diagonal values, so re-linking immediately reproduces the linked
/// state.
fn unlink_gain_rows(card: &mut Card, m: u32) {
    for lane in mixer_col_lanes(card) {
        if let Lane::Pair(c) = lane {
            let tl = gain_value(card, m, c);
            let br = gain_value(card, m + 1, c + 1);
            set_gain(card, m, c + 1, br);
            set_gain(card, m + 1, c, tl);
        }
    }
}

fn unlink_gain_cols(card: &mut Card, c: u32) {
    for lane in mixer_row_lanes(card) {
        if let Lane::Pair(m) = lane {
            let tl = gain_value(card, m, c);
            let br = gain_value(card, m + 1, c + 1);
            set_gain(card, m, c + 1, tl);
            set_gain(card, m + 1, c, br);
        }
    }
}

/// Map a monitor-source enum position onto the partner channel. Positions
/// resolve through the device's target table; when the target source has a
/// partner, the reverse scan finds its position.
fn mirror_monitor_source(card: &Card, pos: i64) -> i64 {
    let targets = &card.monitor_src_targets;
    let Some(&t) = targets.get(pos as usize) else {
        return pos;
    };
    let Some(p) = card.sources.get(t).and_then(|s| s.port.partner) else {
        return pos;
    };
    targets
        .iter()
        .rposition(|&x| x == p)
        .map(|q| q as i64)
        .unwrap_or(pos)
}

/// Bring the partner's monitor controls in line when an analogue output
/// pair links: switches copy from the left, sources mirror pairwise, trims
/// meet in the middle.
fn monitor_link_sync(card: &mut Card, left_sink: usize) {
    let Some(pi) = card.sinks[left_sink].port.partner else {
        return;
    };
    let (lmon, rmon) = match (&card.sinks[left_sink].monitor, &card.sinks[pi].monitor) {
        (Some(a), Some(b)) => (a.clone(), b.clone()),
        _ => return,
    };
    for (&ls, &rs) in lmon.switches.iter().zip(rmon.switches.iter()) {
        let v = card.get_value(ls);
        card.set_value(rs, v);
    }
    if let (Some(lsrc), Some(rsrc)) = (lmon.source, rmon.source) {
        let v = card.get_value(lsrc);
        let mirrored = mirror_monitor_source(card, v);
        card.set_value(rsrc, mirrored);
    }
    if let (Some(lt), Some(rt)) = (lmon.trim, rmon.trim) {
        let avg = (card.get_value(lt) + card.get_value(rt)) / 2;
        card.set_value(lt, avg);
        card.set_value(rt, avg);
    }
}

fn node_with_link_elem(card: &Card, id: ElemId) -> Option<Node> {
    routing::all_nodes(card)
        .into_iter()
        .find(|&n| routing::port(card, n).link_elem == Some(id))
}

fn node_with_enable_elem(card: &Card, id: ElemId) -> Option<Node> {
    routing::all_nodes(card)
        .into_iter()
        .find(|&n| routing::port(card, n).enable_elem == Some(id))
}

/// Change callback for enable switches: a linked partner follows.
pub(crate) fn enable_changed(card: &mut Card, id: ElemId) {
    let Some(n) = node_with_enable_elem(card, id) else {
        return;
    };
    if !pair_is_linked(card, n) {
        return;
    }
    let Some(p) = routing::partner_node(card, n) else {
        return;
    };
    let Some(pe) = routing::port(card, p).enable_elem else {
        return;
    };
    let v = card.get_value(id);
    card.set_value(pe, v);
}

/// Change callback for sink routing selectors: a linked partner mirrors.
/// Off mirrors to Off; a source with a linked partner mirrors to that
/// partner; anything else is shared verbatim.
pub(crate) fn sink_routing_changed(card: &mut Card, id: ElemId) {
    let Some(i) = card.sinks.iter().position(|s| s.elem == id) else {
        return;
    };
    if !pair_is_linked(card, Node::Sink(i)) {
        return;
    }
    let Some(pi) = card.sinks[i].port.partner else {
        return;
    };
    let src = routing::sink_source(card, i);
    let mirrored = if src == 0 {
        0
    } else {
        match card.sources[src].port.partner {
            Some(p) if pair_is_linked(card, Node::Source(src)) => p,
            _ => src,
        }
    };
    card.set_value(card.sinks[pi].elem, mirrored as i64);
}

fn sink_with_monitor_elem(
    card: &Card,
    pred: impl Fn(&super::routing::MonitorCtls) -> bool,
) -> Option<usize> {
    card.sinks
        .iter()
        .position(|s| s.monitor.as_ref().map(&pred).unwrap_or(false))
}

pub(crate) fn monitor_switch_changed(card: &mut Card, id: ElemId) {
    let found = card.sinks.iter().enumerate().find_map(|(i, s)| {
        s.monitor
            .as_ref()
            .and_then(|m| m.switches.iter().position(|&x| x == id))
            .map(|pos| (i, pos))
    });
    let Some((i, pos)) = found else { return };
    if !pair_is_linked(card, Node::Sink(i)) {
        return;
    }
    let Some(pi) = card.sinks[i].port.partner else {
        return;
    };
    let target = card.sinks[pi]
        .monitor
        .as_ref()
        .and_then(|m| m.switches.get(pos).copied());
    if let Some(t) = target {
        let v = card.get_value(id);
        card.set_value(t, v);
    }
}

pub(crate) fn monitor_source_changed(card: &mut Card, id: ElemId) {
    let Some(i) = sink_with_monitor_elem(card, |m| m.source == Some(id)) else {
        return;
    };
    if !pair_is_linked(card, Node::Sink(i)) {
        return;
    }
    let Some(pi) = card.sinks[i].port.partner else {
        return;
    };
    let Some(dst) = card.sinks[pi].monitor.as_ref().and_then(|m| m.source) else {
        return;
    };
    let v = card.get_value(id);
    let mirrored = mirror_monitor_source(card, v);
    card.set_value(dst, mirrored);
}

pub(crate) fn monitor_trim_changed(card: &mut Card, id: ElemId) {
    let Some(i) = sink_with_monitor_elem(card, |m| m.trim == Some(id)) else {
        return;
    };
    if !pair_is_linked(card, Node::Sink(i)) {
        return;
    }
    let Some(pi) = card.sinks[i].port.partner else {
        return;
    };
    let Some(dst) = card.sinks[pi].monitor.as_ref().and_then(|m| m.trim) else {
        return;
    };
    let v = card.get_value(id);
    card.set_value(dst, v);
}
