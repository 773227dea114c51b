use std::sync::Arc;
use std::thread;

use shaledb::ExtendibleHashTable;

#[test]
fn test_insert_then_find() {
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
    table.insert(10, 100);
    assert_eq!(table.find(&10), Some(100));
    assert_eq!(table.find(&11), None);
}

#[test]
fn test_remove_round_trip() {
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
    table.insert(1, 10);
    assert!(table.remove(&1));
    assert_eq!(table.find(&1), None);
    assert!(!table.remove(&1));
}

#[test]
fn test_split_keeps_all_mappings() {
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);
    for i in 0..200 {
        table.insert(i, format!("value-{}", i));
    }
    assert_eq!(table.size(), 200);
    for i in 0..200 {
        assert_eq!(table.find(&i), Some(format!("value-{}", i)));
    }
    // The directory must have doubled at least once under this load.
    assert!(table.global_depth() >= 1);
}

#[test]
fn test_directory_invariants_after_growth() {
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(1);
    for i in 0..64 {
        table.insert(i, i);
    }
    let global = table.global_depth();
    let slots = 1usize << global;
    for slot in 0..slots {
        assert!(table.local_depth(slot) <= global);
    }
    assert!(table.num_buckets() <= slots);
}

#[test]
fn test_overwrite_does_not_grow() {
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
    for _ in 0..100 {
        table.insert(1, 1);
        table.insert(2, 2);
    }
    assert_eq!(table.size(), 2);
}

#[test]
fn test_concurrent_mixed_workload() {
    let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(4));

    let mut handles = Vec::new();
    for t in 0..8 {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            let base = t * 1000;
            for i in 0..200 {
                table.insert(base + i, i);
            }
            for i in 0..200 {
                assert_eq!(table.find(&(base + i)), Some(i));
            }
            for i in (0..200).step_by(2) {
                assert!(table.remove(&(base + i)));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..8 {
        let base = t * 1000;
        for i in 0..200 {
            let expected = if i % 2 == 0 { None } else { Some(i) };
            assert_eq!(table.find(&(base + i)), expected);
        }
    }
}
