//! Simple example demonstrating the transactional API

use epoch_stm::{Context, TCell};
use std::sync::Arc;
use std::thread;

fn main() {
    let ctx = Arc::new(Context::new());

    // Two cells that must always be updated together.
    let debit = Arc::new(TCell::new(0i64));
    let credit = Arc::new(TCell::new(0i64));

    // A writer moves both cells forward in lockstep.
    let writer = {
        let ctx = ctx.clone();
        let debit = debit.clone();
        let credit = credit.clone();
        thread::spawn(move || {
            for amount in 1..=10_000 {
                ctx.write_tx(|| {
                    debit.set(amount);
                    credit.set(amount);
                    Ok(())
                });
            }
        })
    };

    // Readers always observe the two cells in agreement, no matter how
    // the writer's commits interleave.
    let reader = {
        let ctx = ctx.clone();
        let debit = debit.clone();
        let credit = credit.clone();
        thread::spawn(move || {
            for _ in 0..10_000 {
                let (d, c) = ctx.read_tx(|| Ok((debit.get()?, credit.get()?)));
                assert_eq!(d, c);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    let (d, c) = ctx.read_tx(|| Ok((debit.get()?, credit.get()?)));
    println!("final state: debit = {}, credit = {}", d, c);
    println!(
        "read retries: {}, write retries: {}",
        ctx.read_retries(),
        ctx.write_retries()
    );

    println!("Example completed successfully!");
}
