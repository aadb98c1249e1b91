use epoch_stm::{Context, TCell};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
#[cfg_attr(miri, ignore)]
fn test_single_writer_counter() {
    let ctx = Arc::new(Context::new());
    let cell = Arc::new(TCell::new(0u64));

    let increments = 100_000u64;

    let writer = {
        let ctx = ctx.clone();
        let cell = cell.clone();
        thread::spawn(move || {
            for _ in 0..increments {
                ctx.write_tx(|| cell.update(|v| v + 1));
            }
        })
    };
    writer.join().unwrap();

    assert_eq!(ctx.read_tx(|| cell.get()), increments);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_multi_writer_counter() {
    let ctx = Arc::new(Context::new());
    let cell = Arc::new(TCell::new(0u64));

    let threads = 4u64;
    let increments = 25_000u64;

    let mut handles = vec![];
    for _ in 0..threads {
        let ctx = ctx.clone();
        let cell = cell.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..increments {
                ctx.write_tx(|| cell.update(|v| v + 1));
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ctx.read_tx(|| cell.get()), threads * increments);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_paired_field_consistency() {
    let ctx = Arc::new(Context::new());
    let x = Arc::new(TCell::new(0i64));
    let y = Arc::new(TCell::new(0i64));
    let done = Arc::new(AtomicBool::new(false));

    let iterations = 20_000i64;

    let writer = {
        let ctx = ctx.clone();
        let x = x.clone();
        let y = y.clone();
        let done = done.clone();
        thread::spawn(move || {
            for i in 0..iterations {
                ctx.write_tx(|| {
                    x.set(i);
                    y.set(i);
                    Ok(())
                });
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let reader = {
        let ctx = ctx.clone();
        let x = x.clone();
        let y = y.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut reads = 0u64;
            while !done.load(Ordering::SeqCst) {
                let (a, b) = ctx.read_tx(|| Ok((x.get()?, y.get()?)));
                assert_eq!(a, b, "torn snapshot: x={}, y={}", a, b);
                reads += 1;
            }
            reads
        })
    };

    writer.join().unwrap();
    let reads = reader.join().unwrap();

    // A read transaction falls back at most once.
    assert!(ctx.read_retries() <= reads);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_forced_conflict_ping_pong() {
    let ctx = Arc::new(Context::new());
    let x = Arc::new(TCell::new(0u64));
    let y = Arc::new(TCell::new(0u64));

    let threads = 2u64;
    let iterations = 1_000u64;

    let mut handles = vec![];
    for _ in 0..threads {
        let ctx = ctx.clone();
        let x = x.clone();
        let y = y.clone();
        handles.push(thread::spawn(move || {
            // Every iteration reads and writes both cells, so concurrent
            // iterations always overlap.
            for _ in 0..iterations {
                ctx.write_tx(|| {
                    let a = x.get()?;
                    let b = y.get()?;
                    x.set(a + 1);
                    y.set(b + 1);
                    Ok(())
                });
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let (a, b) = ctx.read_tx(|| Ok((x.get()?, y.get()?)));
    assert_eq!(a, threads * iterations);
    assert_eq!(b, threads * iterations);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_bank_transfer_conserves_total() {
    let ctx = Arc::new(Context::new());
    let num_accounts = 10usize;
    let accounts: Arc<Vec<TCell<i64>>> =
        Arc::new((0..num_accounts).map(|_| TCell::new(1_000)).collect());

    let threads = 4;
    let transfers = 2_000;

    let mut handles = vec![];
    for _ in 0..threads {
        let ctx = ctx.clone();
        let accounts = accounts.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for _ in 0..transfers {
                let from = rng.random_range(0..num_accounts);
                let to = rng.random_range(0..num_accounts);
                let amount = rng.random_range(1..=100);

                ctx.write_tx(|| {
                    let from_bal = accounts[from].get()?;
                    let to_bal = accounts[to].get()?;
                    if from != to && from_bal >= amount {
                        accounts[from].set(from_bal - amount);
                        accounts[to].set(to_bal + amount);
                    }
                    Ok(())
                });
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let total: i64 = ctx.read_tx(|| {
        let mut sum = 0;
        for acc in accounts.iter() {
            sum += acc.get()?;
        }
        Ok(sum)
    });

    assert_eq!(
        total,
        num_accounts as i64 * 1_000,
        "money not conserved: total = {}",
        total
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_readers_never_block_each_other() {
    let ctx = Arc::new(Context::new());
    let cell = Arc::new(TCell::new(42u64));
    let observed = Arc::new(AtomicU64::new(0));

    let mut handles = vec![];
    for _ in 0..8 {
        let ctx = ctx.clone();
        let cell = cell.clone();
        let observed = observed.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..10_000 {
                let v = ctx.read_tx(|| cell.get());
                assert_eq!(v, 42);
                observed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(observed.load(Ordering::Relaxed), 8 * 10_000);
    assert_eq!(ctx.read_retries(), 0);
}
