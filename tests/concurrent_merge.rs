use anyhow::Result;
use sessiongraph::{
    Atom, CanonicalEngine, HistoryEngine, Identifiers, SessionEngine, StructuralEngine,
};
use std::sync::Arc;
use std::thread;

fn single(atom: &str) -> Identifiers {
    let atom = Atom::from(atom);
    Identifiers::new().with(atom.type_tag(), atom.value())
}

const THREADS: usize = 8;
const ATOMS_PER_THREAD: usize = 8;

/// Eight threads each link a disjoint chain to a shared hub; afterwards
/// every atom must agree on one key and the component must contain every
/// inserted atom exactly once.
fn merge_from_all_threads<E: SessionEngine + 'static>(engine: E) {
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let base = t * ATOMS_PER_THREAD;
            engine.link("uid:hub", &format!("custom:n{base}"));
            for i in 0..ATOMS_PER_THREAD - 1 {
                engine.link(
                    &format!("custom:n{}", base + i),
                    &format!("custom:n{}", base + i + 1),
                );
            }
        }));
    }
    for handle in handles {
        handle.join().expect("linker thread panicked");
    }

    let expected = engine.get_session_key(&single("uid:hub"));
    for n in 0..THREADS * ATOMS_PER_THREAD {
        let atom = format!("custom:n{n}");
        assert_eq!(engine.get_session_key(&single(&atom)), expected, "{atom}");
        assert!(engine.are_linked("uid:hub", &atom));
    }
    assert_eq!(
        engine.session_size("uid:hub"),
        THREADS * ATOMS_PER_THREAD + 1
    );
}

#[test]
fn concurrent_merge_on_the_canonical_engine() -> Result<()> {
    merge_from_all_threads(CanonicalEngine::new(10_000)?);
    Ok(())
}

#[test]
fn concurrent_merge_on_the_structural_engine() -> Result<()> {
    merge_from_all_threads(StructuralEngine::new(10_000)?);
    Ok(())
}

#[test]
fn concurrent_lookups_and_links_stay_consistent() -> Result<()> {
    let engine = Arc::new(CanonicalEngine::new(10_000)?);

    let mut handles = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let cookie = format!("cookie:c{t}_{i}");
                engine.link(&cookie, "uid:shared");
                engine.get_session_key(&single(&cookie));
                engine.get_session_key(&single("uid:shared"));
                engine.are_linked(&cookie, "uid:shared");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    // Quiescent point: one component, every member agrees.
    let expected = engine.get_session_key(&single("uid:shared"));
    for t in 0..4 {
        for i in 0..50 {
            let cookie = format!("cookie:c{t}_{i}");
            assert_eq!(engine.get_session_key(&single(&cookie)), expected);
        }
    }
    assert_eq!(engine.session_size("uid:shared"), 4 * 50 + 1);
    Ok(())
}

#[test]
fn concurrent_history_tracking_converges() -> Result<()> {
    let engine = Arc::new(HistoryEngine::new(CanonicalEngine::new(10_000)?));

    let mut handles = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..20 {
                let device = format!("device:d{t}_{i}");
                engine.get_session_key(&single(&device));
                engine.link(&device, "uid:owner");
                engine.get_session_key(&single(&device));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("history thread panicked");
    }

    let live = engine.get_session_key(&single("uid:owner"));
    // Every device's original singleton key must resolve to the live key.
    for t in 0..4 {
        for i in 0..20 {
            let old = sessiongraph::SessionKey::derive(&format!("device:d{t}_{i}"));
            assert!(engine.all_keys_for(&old).contains(&live));
        }
    }
    Ok(())
}
