//! Property tests: arbitrary interaction sequences keep linked pairs
//! consistent, and gain link/unlink is stable after one round trip.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use carmine_core::domain::routing::{self, Node};
use carmine_core::{pair_is_linked, set_pair_linked, Card, StateStore};
use carmine_infra::profiles;
use proptest::prelude::*;

fn open_gen4(dir: &std::path::Path) -> Card {
    let store = Rc::new(RefCell::new(StateStore::with_debounce(
        dir.to_path_buf(),
        Duration::from_secs(3600),
    )));
    Card::open(Box::new(profiles::gen4_4i4()), store).unwrap()
}

fn assert_sink_pairs_consistent(card: &Card) {
    for i in 0..card.sinks.len() {
        let p = &card.sinks[i].port;
        if !p.is_left_channel() {
            continue;
        }
        let Some(r) = p.partner else { continue };
        if !pair_is_linked(card, Node::Sink(i)) {
            continue;
        }
        let a = routing::sink_source(card, i);
        let b = routing::sink_source(card, r);
        let ok = (a == 0 && b == 0)
            || a == b
            || (card.sources[a].port.partner == Some(b)
                && pair_is_linked(card, Node::Source(a)));
        assert!(ok, "linked sink pair {} has routes {a}/{b}", p.name);
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    LinkSink(usize, bool),
    LinkSource(usize, bool),
    Route(usize, usize),
    Enable(usize, bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..20, any::<bool>()).prop_map(|(i, on)| Op::LinkSink(i, on)),
        (0usize..17, any::<bool>()).prop_map(|(i, on)| Op::LinkSource(i, on)),
        (0usize..20, 0usize..17).prop_map(|(k, s)| Op::Route(k, s)),
        (0usize..20, any::<bool>()).prop_map(|(i, on)| Op::Enable(i, on)),
    ]
}

fn apply(card: &mut Card, op: Op) {
    match op {
        Op::LinkSink(i, on) => {
            let i = i % card.sinks.len();
            set_pair_linked(card, Node::Sink(i), on);
        }
        Op::LinkSource(i, on) => {
            let i = i % card.sources.len();
            set_pair_linked(card, Node::Source(i), on);
        }
        Op::Route(k, s) => {
            let k = k % card.sinks.len();
            let s = s % card.sources.len();
            card.set_value(card.sinks[k].elem, s as i64);
        }
        Op::Enable(i, on) => {
            let i = i % card.sinks.len();
            if let Some(e) = card.sinks[i].port.enable_elem {
                card.set_value(e, i64::from(on));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_ops_keep_linked_pairs_consistent(
        ops in proptest::collection::vec(op_strategy(), 0..40)
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = open_gen4(tmp.path());
        for op in ops {
            apply(&mut card, op);
            assert_sink_pairs_consistent(&card);
        }
    }

    #[test]
    fn enabled_state_stays_mirrored_while_linked(
        ops in proptest::collection::vec(op_strategy(), 0..40)
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = open_gen4(tmp.path());
        for op in ops {
            apply(&mut card, op);
        }
        for i in 0..card.sinks.len() {
            let Some(r) = card.sinks[i].port.partner else { continue };
            if !pair_is_linked(&card, Node::Sink(i)) {
                continue;
            }
            let a = card.sinks[i].port.enable_elem.map(|e| card.get_bool(e));
            let b = card.sinks[r].port.enable_elem.map(|e| card.get_bool(e));
            prop_assert_eq!(a, b, "linked pair {} disagrees on enable", i);
        }
    }

    #[test]
    fn gain_link_round_trip_is_stable(
        g in proptest::collection::vec(0i64..=350, 4)
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = open_gen4(tmp.path());

        let mix_a = routing::source_by_name(&card, "Mix A").unwrap();
        let in1 = routing::sink_by_name(&card, "Mixer Input 1").unwrap();
        set_pair_linked(&mut card, Node::Sink(in1), false);
        set_pair_linked(&mut card, Node::Source(mix_a), false);

        let cells = [(0u32, 0u32), (0, 1), (1, 0), (1, 1)];
        for (&(m, c), &v) in cells.iter().zip(g.iter()) {
            let id = routing::mix_gain_elem(&card, m, c).unwrap();
            card.set_value(id, v);
        }

        set_pair_linked(&mut card, Node::Source(mix_a), true);
        set_pair_linked(&mut card, Node::Sink(in1), true);
        let linked: Vec<i64> = cells
            .iter()
            .map(|&(m, c)| {
                let id = routing::mix_gain_elem(&card, m, c).unwrap();
                card.get_value(id)
            })
            .collect();

        set_pair_linked(&mut card, Node::Sink(in1), false);
        set_pair_linked(&mut card, Node::Sink(in1), true);
        let relinked: Vec<i64> = cells
            .iter()
            .map(|&(m, c)| {
                let id = routing::mix_gain_elem(&card, m, c).unwrap();
                card.get_value(id)
            })
            .collect();

        prop_assert_eq!(linked, relinked);
    }
}
