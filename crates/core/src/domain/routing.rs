//! Routing graph construction and lookup
//!
//! After the card's controls are enumerated, the routing model is built by
//! pattern-matching element names: every enumerated "routing select"
//! control becomes a sink, and the shared item list of those selectors
//! describes the sources (position 0 is always "Off"). The interesting
//! pairing logic lives in the link engine; this module only categorizes
//! ports and resolves partners.
//!
//! `lr_num % 2 == 1` is the single source of truth for "left channel", for
//! sources and sinks alike. The left member of a pair owns the shared link
//! and pair-name elements.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::card::Card;
use super::elem::{ElemId, ElemPayload};

/// Classification of a routing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortCategory {
    /// The reserved "not connected" source at index 0.
    Off,
    Hardware,
    Mixer,
    Dsp,
    Pcm,
}

/// Physical connector family for hardware ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HwIoType {
    Analogue,
    Spdif,
    Adat,
}

/// A routing node reference: which side plus index into that collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Source(usize),
    Sink(usize),
}

/// Metadata shared by sources and sinks.
#[derive(Debug, Clone)]
pub struct PortMeta {
    pub category: PortCategory,
    pub hw_type: Option<HwIoType>,
    /// 0-based position within the category (and hw_type).
    pub port_num: u32,
    /// 1-based channel number used for pairing; odd = left.
    pub lr_num: u32,
    /// Default display string, e.g. "Analogue 1" or "Mixer Input 3".
    pub name: String,
    pub enable_elem: Option<ElemId>,
    pub custom_name_elem: Option<ElemId>,
    /// Only set on the left member of a valid pair.
    pub link_elem: Option<ElemId>,
    /// Only set on the left member of a valid pair.
    pub pair_name_elem: Option<ElemId>,
    /// Memoized partner index within the same collection.
    pub partner: Option<usize>,
    /// Cached effective display name; see the names module.
    pub display_name: String,
}

impl PortMeta {
    fn new(
        category: PortCategory,
        hw_type: Option<HwIoType>,
        port_num: u32,
        lr_num: u32,
        name: String,
    ) -> Self {
        PortMeta {
            category,
            hw_type,
            port_num,
            lr_num,
            display_name: name.clone(),
            name,
            enable_elem: None,
            custom_name_elem: None,
            link_elem: None,
            pair_name_elem: None,
            partner: None,
        }
    }

    pub fn is_left_channel(&self) -> bool {
        self.lr_num % 2 == 1
    }

    /// 0-based index of the pair this channel belongs to.
    pub fn pair_index(&self) -> u32 {
        self.lr_num.saturating_sub(1) / 2
    }
}

/// A point audio can flow from.
#[derive(Debug)]
pub struct RoutingSource {
    pub port: PortMeta,
}

/// Monitor-group (Main/Alt) sub-controls of an analogue output.
#[derive(Debug, Clone)]
pub struct MonitorCtls {
    pub switches: Vec<ElemId>,
    pub source: Option<ElemId>,
    pub trim: Option<ElemId>,
}

/// A point audio can flow to. `elem` is the enumerated routing selector
/// whose value is the currently connected source index (0 = Off).
#[derive(Debug)]
pub struct RoutingSink {
    pub port: PortMeta,
    pub elem: ElemId,
    pub monitor: Option<MonitorCtls>,
}

fn category_rank(c: PortCategory) -> u8 {
    match c {
        PortCategory::Off => 0,
        PortCategory::Hardware => 1,
        PortCategory::Mixer => 2,
        PortCategory::Dsp => 3,
        PortCategory::Pcm => 4,
    }
}

fn hw_rank(h: Option<HwIoType>) -> u8 {
    match h {
        None => 0,
        Some(HwIoType::Analogue) => 1,
        Some(HwIoType::Spdif) => 2,
        Some(HwIoType::Adat) => 3,
    }
}

fn parse_num(s: &str) -> Option<u32> {
    s.parse().ok().filter(|&n| n > 0)
}

/// Recognize a routing-select element name.
fn parse_sink_name(name: &str) -> Option<(PortCategory, Option<HwIoType>, u32)> {
    if let Some(rest) = name.strip_prefix("Mixer Input ") {
        let n = parse_num(rest.strip_suffix(" Capture Enum")?)?;
        return Some((PortCategory::Mixer, None, n));
    }
    if let Some(rest) = name.strip_prefix("DSP Input ") {
        let n = parse_num(rest.strip_suffix(" Capture Enum")?)?;
        return Some((PortCategory::Dsp, None, n));
    }
    if let Some(rest) = name.strip_prefix("PCM ") {
        let n = parse_num(rest.strip_suffix(" Capture Enum")?)?;
        return Some((PortCategory::Pcm, None, n));
    }
    if let Some(rest) = name.strip_prefix("Analogue Output ") {
        let n = parse_num(rest.strip_suffix(" Playback Enum")?)?;
        return Some((PortCategory::Hardware, Some(HwIoType::Analogue), n));
    }
    if let Some(rest) = name.strip_prefix("S/PDIF Output ") {
        let n = parse_num(rest.strip_suffix(" Playback Enum")?)?;
        return Some((PortCategory::Hardware, Some(HwIoType::Spdif), n));
    }
    if let Some(rest) = name.strip_prefix("ADAT Output ") {
        let n = parse_num(rest.strip_suffix(" Playback Enum")?)?;
        return Some((PortCategory::Hardware, Some(HwIoType::Adat), n));
    }
    None
}

/// Recognize one entry of a routing selector's item list.
fn parse_source_item(item: &str) -> Option<(PortCategory, Option<HwIoType>, u32)> {
    if item == "Off" {
        return Some((PortCategory::Off, None, 0));
    }
    if let Some(rest) = item.strip_prefix("Analogue ") {
        return Some((PortCategory::Hardware, Some(HwIoType::Analogue), parse_num(rest)?));
    }
    if let Some(rest) = item.strip_prefix("S/PDIF ") {
        return Some((PortCategory::Hardware, Some(HwIoType::Spdif), parse_num(rest)?));
    }
    if let Some(rest) = item.strip_prefix("ADAT ") {
        return Some((PortCategory::Hardware, Some(HwIoType::Adat), parse_num(rest)?));
    }
    if let Some(rest) = item.strip_prefix("PCM ") {
        return Some((PortCategory::Pcm, None, parse_num(rest)?));
    }
    if let Some(rest) = item.strip_prefix("DSP ") {
        return Some((PortCategory::Dsp, None, parse_num(rest)?));
    }
    if let Some(rest) = item.strip_prefix("Mix ") {
        let mut chars = rest.chars();
        let letter = chars.next()?;
        if chars.next().is_none() && letter.is_ascii_uppercase() {
            return Some((PortCategory::Mixer, None, letter as u32 - 'A' as u32 + 1));
        }
    }
    None
}

fn default_sink_name(category: PortCategory, hw_type: Option<HwIoType>, n: u32) -> String {
    match (category, hw_type) {
        (PortCategory::Mixer, _) => format!("Mixer Input {n}"),
        (PortCategory::Dsp, _) => format!("DSP Input {n}"),
        // "PCM {n}" is taken by the source side; capture sinks get their
        // own namespace so synthesized control names never collide
        (PortCategory::Pcm, _) => format!("PCM Capture {n}"),
        (PortCategory::Hardware, Some(HwIoType::Spdif)) => format!("S/PDIF Output {n}"),
        (PortCategory::Hardware, Some(HwIoType::Adat)) => format!("ADAT Output {n}"),
        (PortCategory::Hardware, _) => format!("Analogue Output {n}"),
        (PortCategory::Off, _) => "Off".to_string(),
    }
}

fn partner_indexes(keys: &[(PortCategory, Option<HwIoType>, u32)]) -> Vec<Option<usize>> {
    keys.iter()
        .map(|&(cat, hw, lr)| {
            if cat == PortCategory::Off || lr == 0 {
                return None;
            }
            let want = if lr % 2 == 1 { lr + 1 } else { lr - 1 };
            keys.iter()
                .position(|&(c, h, l)| c == cat && h == hw && l == want)
        })
        .collect()
}

/// Build the routing model from the enumerated element set.
pub(crate) fn build_graph(card: &mut Card) {
    let mut sink_specs: Vec<(ElemId, PortCategory, Option<HwIoType>, u32, Vec<String>)> =
        Vec::new();
    for e in card.elems() {
        if let ElemPayload::Enumerated { items, .. } = &e.payload {
            if let Some((cat, hw, n)) = parse_sink_name(&e.name) {
                sink_specs.push((e.id, cat, hw, n, items.clone()));
            }
        }
    }
    sink_specs.sort_by_key(|&(_, cat, hw, n, _)| (category_rank(cat), hw_rank(hw), n));

    if sink_specs.is_empty() {
        debug!("device exposes no routing selectors; routing model left empty");
        return;
    }

    let items = sink_specs[0].4.clone();
    for (id, _, _, _, other) in &sink_specs {
        if *other != items {
            warn!(elem = id.0, "routing selector item list disagrees; using the first");
        }
    }

    card.sources.clear();
    for (idx, item) in items.iter().enumerate() {
        let meta = match parse_source_item(item) {
            Some((cat, hw, n)) if idx > 0 || cat == PortCategory::Off => {
                PortMeta::new(cat, hw, n.saturating_sub(1), n, item.clone())
            }
            _ => {
                if idx > 0 {
                    warn!(item = %item, "unrecognized routing source name");
                }
                PortMeta::new(PortCategory::Off, None, 0, 0, item.clone())
            }
        };
        card.sources.push(RoutingSource { port: meta });
    }

    card.sinks.clear();
    for (elem, cat, hw, n, _) in sink_specs {
        let name = default_sink_name(cat, hw, n);
        card.sinks.push(RoutingSink {
            port: PortMeta::new(cat, hw, n - 1, n, name),
            elem,
            monitor: None,
        });
    }

    for i in 0..card.sinks.len() {
        let v = card.get_value(card.sinks[i].elem);
        if v as usize >= card.sources.len() {
            warn!(
                sink = %card.sinks[i].port.name,
                value = v,
                "routing value outside the source list; resolves to Off"
            );
        }
    }

    let src_keys: Vec<_> = card
        .sources
        .iter()
        .map(|s| (s.port.category, s.port.hw_type, s.port.lr_num))
        .collect();
    for (i, p) in partner_indexes(&src_keys).into_iter().enumerate() {
        card.sources[i].port.partner = p;
    }

    let sink_keys: Vec<_> = card
        .sinks
        .iter()
        .map(|s| (s.port.category, s.port.hw_type, s.port.lr_num))
        .collect();
    for (i, p) in partner_indexes(&sink_keys).into_iter().enumerate() {
        card.sinks[i].port.partner = p;
    }

    discover_monitor_ctls(card);

    debug!(
        sources = card.sources.len(),
        sinks = card.sinks.len(),
        "routing model built"
    );
}

/// Find the Main/Alt monitor-group sub-controls of analogue outputs.
/// Capability is probed by name prefix; devices without monitor groups
/// simply have none of these controls.
fn discover_monitor_ctls(card: &mut Card) {
    if card.find_by_prefix("Monitor Output").is_none() {
        return;
    }
    for i in 0..card.sinks.len() {
        let port = &card.sinks[i].port;
        if port.category != PortCategory::Hardware || port.hw_type != Some(HwIoType::Analogue) {
            continue;
        }
        let n = port.lr_num;
        let mut switches = Vec::new();
        for group in ["Main", "Alt"] {
            if let Some(id) = card.lookup(&format!("Monitor Output {n} {group} Switch")) {
                switches.push(id);
            }
        }
        let source = card.lookup(&format!("Monitor Output {n} Source Playback Enum"));
        let trim = card.lookup(&format!("Monitor Output {n} Trim Volume"));
        if !switches.is_empty() || source.is_some() || trim.is_some() {
            card.sinks[i].monitor = Some(MonitorCtls {
                switches,
                source,
                trim,
            });
        }
    }
}

pub fn port(card: &Card, n: Node) -> &PortMeta {
    match n {
        Node::Source(i) => &card.sources[i].port,
        Node::Sink(i) => &card.sinks[i].port,
    }
}

pub(crate) fn port_mut(card: &mut Card, n: Node) -> &mut PortMeta {
    match n {
        Node::Source(i) => &mut card.sources[i].port,
        Node::Sink(i) => &mut card.sinks[i].port,
    }
}

/// Partner node on the same side, if this channel belongs to a pair.
pub fn partner_node(card: &Card, n: Node) -> Option<Node> {
    let p = port(card, n).partner?;
    Some(match n {
        Node::Source(_) => Node::Source(p),
        Node::Sink(_) => Node::Sink(p),
    })
}

/// Left member of the pair `n` belongs to; `n` itself when unpaired.
pub fn left_of_pair(card: &Card, n: Node) -> Node {
    if port(card, n).is_left_channel() {
        n
    } else {
        partner_node(card, n).unwrap_or(n)
    }
}

/// Effective connected source of a sink: the selector value, resolved to
/// Off when out of range.
pub fn sink_source(card: &Card, sink_idx: usize) -> usize {
    let v = card.get_value(card.sinks[sink_idx].elem) as usize;
    if v < card.sources.len() {
        v
    } else {
        0
    }
}

pub fn source_by_name(card: &Card, name: &str) -> Option<usize> {
    card.sources.iter().position(|s| s.port.name == name)
}

pub fn sink_by_name(card: &Card, name: &str) -> Option<usize> {
    card.sinks.iter().position(|s| s.port.name == name)
}

/// All routing nodes, sources first (including the Off entry).
pub fn all_nodes(card: &Card) -> Vec<Node> {
    (0..card.sources.len())
        .map(Node::Source)
        .chain((0..card.sinks.len()).map(Node::Sink))
        .collect()
}

pub fn mix_letter(port_num: u32) -> char {
    char::from(b'A' + (port_num % 26) as u8)
}

/// Gain-matrix cell for mixer output row `mix_port` and input column
/// `input_port` (both 0-based), if the device has one.
pub fn mix_gain_elem(card: &Card, mix_port: u32, input_port: u32) -> Option<ElemId> {
    card.lookup(&format!(
        "Mix {} Input {:02} Playback Volume",
        mix_letter(mix_port),
        input_port + 1
    ))
}
