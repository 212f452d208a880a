//! Tests for Stats
//!
//! Counter bookkeeping under sequential and concurrent recording.

use std::sync::Arc;
use std::thread;

use mapkv::stats::{OperationStats, Stats};
use mapkv::{ErrorCode, Operation};

#[test]
fn test_seeded_total_items() {
    let stats = Stats::new(42);
    assert_eq!(stats.total_items(), 42);
    assert_eq!(stats.snapshot().total_items, 42);
}

#[test]
fn test_successful_insert_and_delete_move_total() {
    let stats = Stats::new(0);

    stats.record(Operation::Insert, ErrorCode::None);
    stats.record(Operation::Insert, ErrorCode::None);
    stats.record(Operation::Delete, ErrorCode::None);
    assert_eq!(stats.total_items(), 1);

    // Failures and non-mutating operations leave the total alone
    stats.record(Operation::Insert, ErrorCode::InsertKeyAlreadyExists);
    stats.record(Operation::Delete, ErrorCode::DeleteKeyNotFound);
    stats.record(Operation::Update, ErrorCode::None);
    stats.record(Operation::Get, ErrorCode::None);
    assert_eq!(stats.total_items(), 1);

    let snapshot = stats.snapshot();
    assert_eq!(
        snapshot.operation(Operation::Insert),
        OperationStats {
            successful: 2,
            failed: 1
        }
    );
    assert_eq!(
        snapshot.operation(Operation::Delete),
        OperationStats {
            successful: 1,
            failed: 1
        }
    );
    assert_eq!(snapshot.operation(Operation::Update).successful, 1);
    assert_eq!(snapshot.operation(Operation::Get).successful, 1);
}

#[test]
fn test_total_never_underflows() {
    let stats = Stats::new(0);
    stats.record(Operation::Delete, ErrorCode::None);
    assert_eq!(stats.total_items(), 0);
}

#[test]
fn test_invalid_length_counts_as_failed() {
    let stats = Stats::new(0);
    stats.record(Operation::Insert, ErrorCode::InvalidKeyLength);
    stats.record(Operation::Update, ErrorCode::InvalidValueLength);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.operation(Operation::Insert).failed, 1);
    assert_eq!(snapshot.operation(Operation::Update).failed, 1);
    assert_eq!(snapshot.total_items, 0);
}

#[test]
fn test_concurrent_recording() {
    let stats = Arc::new(Stats::new(0));
    let threads = 8;
    let per_thread = 1000;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let error = if (t + i) % 2 == 0 {
                        ErrorCode::None
                    } else {
                        ErrorCode::GetKeyNotFound
                    };
                    stats.record(Operation::Get, error);
                    stats.record(Operation::Insert, ErrorCode::None);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = stats.snapshot();
    let get = snapshot.operation(Operation::Get);
    assert_eq!(get.successful + get.failed, (threads * per_thread) as u64);
    assert_eq!(get.successful, (threads * per_thread / 2) as u64);
    assert_eq!(snapshot.total_items, (threads * per_thread) as u64);
}
