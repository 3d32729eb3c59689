//! Synthesized-control factory: fallback to driver elements, persistence
//! wiring and reopen behavior.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use carmine_core::domain::routing::{self, Node};
use carmine_core::{pair_is_linked, set_pair_linked, Backing, Card, StateStore};
use carmine_infra::profiles;

fn store_in(dir: &std::path::Path) -> Rc<RefCell<StateStore>> {
    Rc::new(RefCell::new(StateStore::with_debounce(
        dir.to_path_buf(),
        Duration::ZERO,
    )))
}

fn open_gen4(dir: &std::path::Path) -> (Card, Rc<RefCell<StateStore>>) {
    let store = store_in(dir);
    let card = Card::open(Box::new(profiles::gen4_4i4()), Rc::clone(&store)).unwrap();
    (card, store)
}

#[test]
fn test_every_port_gets_enable_and_name_controls() {
    let tmp = tempfile::tempdir().unwrap();
    let (card, _store) = open_gen4(tmp.path());

    assert!(card.lookup("Analogue 1 Enable Switch").is_some());
    assert!(card.lookup("Analogue 1 Custom Name").is_some());
    assert!(card.lookup("Analogue Output 1 Enable Switch").is_some());
    assert!(card.lookup("Mixer Input 1-2 Stereo Link Switch").is_some());
    assert!(card.lookup("Mixer Input 1-2 Pair Name").is_some());
    // the Off pseudo-source gets nothing
    assert!(card.lookup("Off Enable Switch").is_none());
    // right members own no pair controls
    assert!(card.lookup("Analogue 2-1 Stereo Link Switch").is_none());
}

#[test]
fn test_synthesized_controls_are_simulated() {
    let tmp = tempfile::tempdir().unwrap();
    let (card, _store) = open_gen4(tmp.path());
    let id = card.lookup("Analogue 1 Enable Switch").unwrap();
    let e = card.elem(id).unwrap();
    assert!(matches!(e.backing, Backing::Simulated));
    assert!(e.writable);
}

#[test]
fn test_state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let (mut card, store) = open_gen4(tmp.path());
        assert!(!card.link_init_skipped, "first open must run defaulting");
        let name = card.lookup("Analogue 1 Custom Name").unwrap();
        card.set_bytes(name, b"Vox");
        let out1 = routing::sink_by_name(&card, "Analogue Output 1").unwrap();
        set_pair_linked(&mut card, Node::Sink(out1), false);
        store.borrow_mut().flush_due(Instant::now());
    }

    let (card, _store) = open_gen4(tmp.path());
    assert!(card.link_init_skipped, "saved link state must skip defaulting");
    let name = card.lookup("Analogue 1 Custom Name").unwrap();
    assert_eq!(&card.get_bytes(name)[..3], b"Vox");
    let out1 = routing::sink_by_name(&card, "Analogue Output 1").unwrap();
    assert!(!pair_is_linked(&card, Node::Sink(out1)));
}

#[test]
fn test_driver_link_controls_preempt_synthesis() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    let card = Card::open(Box::new(profiles::gen3_solo()), store).unwrap();

    assert!(card.link_init_skipped);
    let id = card.lookup("Analogue Output 1-2 Stereo Link Switch").unwrap();
    let e = card.elem(id).unwrap();
    assert!(matches!(e.backing, Backing::Hardware { .. }));
}
