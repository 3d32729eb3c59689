//! Link engine transitions on the emulated 4-in/4-out device.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use carmine_core::domain::routing::{self, Node};
use carmine_core::{pair_is_linked, set_pair_linked, Card, StateStore};
use carmine_infra::profiles;
use tempfile::TempDir;

fn open_card() -> (Card, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = Rc::new(RefCell::new(StateStore::with_debounce(
        tmp.path().to_path_buf(),
        Duration::from_secs(3600),
    )));
    let card = Card::open(Box::new(profiles::gen4_4i4()), store).unwrap();
    (card, tmp)
}

fn sink(card: &Card, name: &str) -> usize {
    routing::sink_by_name(card, name).unwrap()
}

fn source(card: &Card, name: &str) -> usize {
    routing::source_by_name(card, name).unwrap()
}

fn route(card: &mut Card, sink_name: &str, source_name: &str) {
    let k = sink(card, sink_name);
    let s = source(card, source_name);
    card.set_value(card.sinks[k].elem, s as i64);
}

fn gain(card: &Card, m: u32, c: u32) -> i64 {
    let id = routing::mix_gain_elem(card, m, c).unwrap();
    card.get_value(id)
}

fn set_gain(card: &mut Card, m: u32, c: u32, v: i64) {
    let id = routing::mix_gain_elem(card, m, c).unwrap();
    card.set_value(id, v);
}

#[test]
fn test_defaults_are_consistent_after_open() {
    let (card, _tmp) = open_card();
    assert!(!card.link_init_skipped);

    // the mono-by-default exception covers analogue sources, not outputs
    let out1 = sink(&card, "Analogue Output 1");
    let out3 = sink(&card, "Analogue Output 3");
    assert!(pair_is_linked(&card, Node::Sink(out1)));
    assert!(pair_is_linked(&card, Node::Sink(out3)));

    let an1 = source(&card, "Analogue 1");
    let pcm1 = source(&card, "PCM 1");
    assert!(!pair_is_linked(&card, Node::Source(an1)));
    assert!(pair_is_linked(&card, Node::Source(pcm1)));

    let mix_in1 = sink(&card, "Mixer Input 1");
    let dsp1 = sink(&card, "DSP Input 1");
    assert!(pair_is_linked(&card, Node::Sink(mix_in1)));
    assert!(!pair_is_linked(&card, Node::Sink(dsp1)));
}

#[test]
fn test_linking_clears_incompatible_routes() {
    let (mut card, _tmp) = open_card();
    let out1 = sink(&card, "Analogue Output 1");
    set_pair_linked(&mut card, Node::Sink(out1), false);
    route(&mut card, "Analogue Output 1", "Analogue 1");
    route(&mut card, "Analogue Output 2", "PCM 2");

    set_pair_linked(&mut card, Node::Sink(out1), true);

    // the link sticks, the routes do not
    assert!(pair_is_linked(&card, Node::Sink(out1)));
    assert_eq!(routing::sink_source(&card, out1), 0);
    let out2 = sink(&card, "Analogue Output 2");
    assert_eq!(routing::sink_source(&card, out2), 0);
}

#[test]
fn test_linking_promotes_pairwise_source_routing() {
    let (mut card, _tmp) = open_card();
    let out1 = sink(&card, "Analogue Output 1");
    set_pair_linked(&mut card, Node::Sink(out1), false);
    let pcm1 = source(&card, "PCM 1");
    set_pair_linked(&mut card, Node::Source(pcm1), false);

    route(&mut card, "Analogue Output 1", "PCM 1");
    route(&mut card, "Analogue Output 2", "PCM 2");

    set_pair_linked(&mut card, Node::Sink(out1), true);

    assert!(pair_is_linked(&card, Node::Sink(out1)));
    assert!(pair_is_linked(&card, Node::Source(pcm1)));
    assert_eq!(routing::sink_source(&card, out1), pcm1);
}

#[test]
fn test_linked_sink_mirrors_routing() {
    let (mut card, _tmp) = open_card();
    let out3 = sink(&card, "Analogue Output 3");
    let out4 = sink(&card, "Analogue Output 4");
    assert!(pair_is_linked(&card, Node::Sink(out3)));

    route(&mut card, "Analogue Output 3", "PCM 1");
    assert_eq!(routing::sink_source(&card, out4), source(&card, "PCM 2"));

    route(&mut card, "Analogue Output 3", "Off");
    assert_eq!(routing::sink_source(&card, out4), 0);

    // a mono source is shared instead of mirrored
    route(&mut card, "Analogue Output 3", "Analogue 1");
    assert_eq!(routing::sink_source(&card, out4), source(&card, "Analogue 1"));
}

#[test]
fn test_enable_follows_only_when_linked() {
    let (mut card, _tmp) = open_card();
    let out3 = sink(&card, "Analogue Output 3");
    let out4 = sink(&card, "Analogue Output 4");
    let e3 = card.sinks[out3].port.enable_elem.unwrap();
    let e4 = card.sinks[out4].port.enable_elem.unwrap();
    card.set_value(e3, 0);
    assert!(!card.get_bool(e4));

    let dsp1 = sink(&card, "DSP Input 1");
    let dsp2 = sink(&card, "DSP Input 2");
    assert!(!pair_is_linked(&card, Node::Sink(dsp1)));
    let e1 = card.sinks[dsp1].port.enable_elem.unwrap();
    let e2 = card.sinks[dsp2].port.enable_elem.unwrap();
    card.set_value(e1, 0);
    assert!(card.get_bool(e2));
}

#[test]
fn test_gain_link_unlink_round_trip() {
    let (mut card, _tmp) = open_card();
    let mix_a = source(&card, "Mix A");
    let in1 = sink(&card, "Mixer Input 1");

    set_pair_linked(&mut card, Node::Sink(in1), false);
    set_pair_linked(&mut card, Node::Source(mix_a), false);

    set_gain(&mut card, 0, 0, 100);
    set_gain(&mut card, 0, 1, 80);
    set_gain(&mut card, 1, 0, 60);
    set_gain(&mut card, 1, 1, 40);

    // mono columns: linking the rows averages each column
    set_pair_linked(&mut card, Node::Source(mix_a), true);
    assert_eq!(gain(&card, 0, 0), 80);
    assert_eq!(gain(&card, 1, 0), 80);
    assert_eq!(gain(&card, 0, 1), 60);
    assert_eq!(gain(&card, 1, 1), 60);

    // linked rows and columns: averaged diagonal, muted cross
    set_pair_linked(&mut card, Node::Sink(in1), true);
    assert_eq!(gain(&card, 0, 0), 70);
    assert_eq!(gain(&card, 1, 1), 70);
    assert_eq!(gain(&card, 0, 1), 0);
    assert_eq!(gain(&card, 1, 0), 0);

    // unlink spreads the diagonal into the cross cells
    set_pair_linked(&mut card, Node::Sink(in1), false);
    assert_eq!(gain(&card, 0, 0), 70);
    assert_eq!(gain(&card, 0, 1), 70);
    assert_eq!(gain(&card, 1, 0), 70);
    assert_eq!(gain(&card, 1, 1), 70);

    // relink reproduces the linked state
    set_pair_linked(&mut card, Node::Sink(in1), true);
    assert_eq!(gain(&card, 0, 0), 70);
    assert_eq!(gain(&card, 1, 1), 70);
    assert_eq!(gain(&card, 0, 1), 0);
    assert_eq!(gain(&card, 1, 0), 0);
}

#[test]
fn test_unlinking_sink_releases_source_pair() {
    let (mut card, _tmp) = open_card();
    let out3 = sink(&card, "Analogue Output 3");
    let mix_c = source(&card, "Mix C");
    assert_eq!(routing::sink_source(&card, out3), mix_c);
    assert!(pair_is_linked(&card, Node::Source(mix_c)));

    set_pair_linked(&mut card, Node::Sink(out3), false);
    assert!(!pair_is_linked(&card, Node::Source(mix_c)));

    // and the release cascades to the other consumers of Mix C-D
    let pcm_cap3 = sink(&card, "PCM Capture 3");
    assert!(!pair_is_linked(&card, Node::Sink(pcm_cap3)));
}

#[test]
fn test_monitor_controls_follow_linked_pair() {
    let (mut card, _tmp) = open_card();
    let out3 = sink(&card, "Analogue Output 3");
    let out4 = sink(&card, "Analogue Output 4");
    let m3 = card.sinks[out3].monitor.clone().unwrap();
    let m4 = card.sinks[out4].monitor.clone().unwrap();

    card.set_value(m3.switches[0], 1);
    assert!(card.get_bool(m4.switches[0]));

    // position 0 targets Mix A; the partner lands on Mix B
    card.set_value(m3.source.unwrap(), 0);
    assert_eq!(card.get_value(m4.source.unwrap()), 1);

    card.set_value(m3.trim.unwrap(), -6);
    assert_eq!(card.get_value(m4.trim.unwrap()), -6);
}
