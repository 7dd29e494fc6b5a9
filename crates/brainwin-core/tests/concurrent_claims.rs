use brainwin::idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, LedgerRecord, SqliteIdempotencyStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn race(store: Arc<dyn IdempotencyStore>, contenders: usize) -> usize {
    let winners = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let store = store.clone();
            let winners = winners.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                if store
                    .try_claim(LedgerRecord::new("cs_race", "acc-1", "wins-pack"))
                    .unwrap()
                {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    winners.load(Ordering::SeqCst)
}

#[test]
fn exactly_one_in_memory_claim_wins() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    assert_eq!(race(store.clone(), 16), 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn exactly_one_sqlite_claim_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let store = Arc::new(SqliteIdempotencyStore::open(path.to_str().unwrap()).unwrap());
    assert_eq!(race(store.clone(), 16), 1);
    assert_eq!(store.list_for_account("acc-1").unwrap().len(), 1);
}
