use std::sync::{Arc, Once};
use std::thread;

use crange::{CRange, SearchMode};
use crange::pass_buck::Ptb;
use crange::threading;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        threading::init(threading::Config::default());
    });
}

#[test]
fn two_writer_race() {
    setup();

    let map = Arc::new(CRange::<&str>::new(4));

    let first_map = map.clone();
    let first = thread::spawn(move || {
        let _attach = threading::attach_scoped();
        first_map.add(10, 5, "A");
    });

    let second_map = map.clone();
    let second = thread::spawn(move || {
        let _attach = threading::attach_scoped();
        second_map.add(20, 5, "B");
    });

    first.join().unwrap();
    second.join().unwrap();

    let _attach = threading::attach_scoped();
    let entries: Vec<_> = map
        .iter()
        .map(|entry| (entry.key(), entry.size(), *entry.value()))
        .collect();
    assert_eq!(vec![(10, 5, "A"), (20, 5, "B")], entries);
}

#[test]
fn removed_entry_stays_readable_while_held() {
    setup();
    let _attach = threading::attach_scoped();

    let map = Arc::new(CRange::<String>::new(4));
    map.add(50, 10, String::from("payload"));

    let held = map
        .search(50, 1, SearchMode::Lookup)
        .expect("the Range covers 50");

    let del_map = map.clone();
    let deleter = thread::spawn(move || {
        let _attach = threading::attach_scoped();
        del_map.del(50, 10);
    });
    deleter.join().unwrap();

    // the Range is gone from the Map, but our Guard keeps the Node alive
    assert!(map.search(50, 1, SearchMode::Lookup).is_none());
    assert_eq!(50, held.key());
    assert_eq!(10, held.size());
    assert_eq!("payload", held.value().as_str());

    drop(held);
}

#[test]
fn concurrent_readers_and_writers() {
    setup();

    let map = Arc::new(CRange::<u64>::new(8));

    {
        let _attach = threading::attach_scoped();
        for i in 0..100 {
            map.add(i * 20, 10, i);
        }
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let c_map = map.clone();
            thread::spawn(move || {
                let _attach = threading::attach_scoped();
                for round in 0..2000_u64 {
                    let k = (round * 7) % 2000;
                    if let Some(found) = c_map.search(k, 1, SearchMode::Lookup) {
                        // whatever is found has to actually intersect
                        assert!(found.key() <= k);
                        assert!(found.key() + found.size() > k);
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..2)
        .map(|writer| {
            let c_map = map.clone();
            thread::spawn(move || {
                let _attach = threading::attach_scoped();
                for round in 0..500_u64 {
                    let slot = (round * 2 + writer) % 100;
                    c_map.del(slot * 20, 10);
                    c_map.add(slot * 20, 10, round);
                }
            })
        })
        .collect();

    for handle in readers {
        handle.join().unwrap();
    }
    for handle in writers {
        handle.join().unwrap();
    }

    // the Intervals never overlap, no matter how the Writers interleaved
    let _attach = threading::attach_scoped();
    let entries: Vec<_> = map
        .iter()
        .map(|entry| (entry.key(), entry.size()))
        .collect();
    for window in entries.windows(2) {
        assert!(window[0].0 + window[0].1 <= window[1].0);
    }
}

#[test]
fn concurrent_overlapping_writers_keep_order() {
    setup();

    let map = Arc::new(CRange::<u64>::new(6));

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let c_map = map.clone();
            thread::spawn(move || {
                let _attach = threading::attach_scoped();
                for round in 0..300_u64 {
                    // deliberately overlapping Intervals across the Writers
                    let k = (round * 13 + writer * 5) % 500;
                    c_map.add(k, 8, writer);
                    if round % 3 == 0 {
                        c_map.del(k, 4);
                    }
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }

    let _attach = threading::attach_scoped();
    let entries: Vec<_> = map
        .iter()
        .map(|entry| (entry.key(), entry.size()))
        .collect();

    for window in entries.windows(2) {
        // strictly increasing and overlap-free
        assert!(window[0].0 < window[1].0);
        assert!(window[0].0 + window[0].1 <= window[1].0);
    }
}

#[test]
fn pass_buck_backed_map() {
    setup();

    let map = Arc::new(CRange::<u64, Ptb>::new(4));

    let handles: Vec<_> = (0..3)
        .map(|writer| {
            let c_map = map.clone();
            thread::spawn(move || {
                let _attach = threading::attach_scoped();
                for round in 0..200_u64 {
                    let k = (writer * 100 + round) % 300;
                    c_map.add(k * 10, 5, k);
                    c_map.del(k * 10, 5);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let _attach = threading::attach_scoped();
    map.add(10, 5, 1);
    assert!(map.search(10, 1, SearchMode::Lookup).is_some());
}
