//! Spawns three fibers that sleep for different durations and prints the
//! order they wake up in (always shortest deadline first, regardless
//! of spawn order).

use std::time::{Duration, Instant};

use skein::{join, sleep, spawn, Result};

async fn sleeper(label: &'static str, seconds: u64, start: Instant) -> Result<()> {
    sleep(Duration::from_secs(seconds)).await?;
    println!("{label} woke after {:?}", start.elapsed());
    Ok(())
}

fn main() -> Result<()> {
    skein::dev_tracing::init_tracing();

    skein::run(async move {
        let start = Instant::now();
        let long = spawn(sleeper("long (3s)", 3, start)).await?;
        let short = spawn(sleeper("short (0s)", 0, start)).await?;
        let medium = spawn(sleeper("medium (1s)", 1, start)).await?;

        // Order joined here is irrelevant to the order they print in;
        // the scheduler wakes `short` before `medium` before `long`
        // regardless of spawn or join order.
        join(medium).await?;
        join(long).await?;
        join(short).await?;
        Ok(())
    })
}
