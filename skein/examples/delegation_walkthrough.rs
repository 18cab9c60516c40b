//! Walks through the difference between `delegate` (the caller is
//! resumed with the child's terminal value) and `spawn` (fire-and-forget;
//! an unhandled failure surfaces at the root instead of at the spawner).

use skein::{delegate, end, null, Result, SchedulerError};

async fn worker() -> Result<()> {
    null().await?;
    null().await?;
    end(42i64).await
}

async fn failing_worker() -> Result<()> {
    null().await?;
    Err(SchedulerError::from(std::io::Error::new(
        std::io::ErrorKind::Other,
        "x",
    )))
}

fn main() -> Result<()> {
    skein::dev_tracing::init_tracing();

    skein::run(async move {
        let answer = delegate::<i64, _>(worker()).await?;
        println!("delegated worker returned {answer}");
        assert_eq!(*answer, 42);

        match delegate::<(), _>(failing_worker()).await {
            Ok(_) => unreachable!("failing_worker always fails"),
            Err(e) => println!("caught delegated failure: {e}"),
        }
        Ok(())
    })
}
