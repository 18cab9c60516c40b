//! S4: a child that raises after a `null()` is seen by a delegating
//! parent at the `delegate` yield point; the same failure from a
//! *spawned* (non-delegated), unhandled child instead surfaces through
//! `run` at the root.

use skein::{delegate, null, spawn, Result, SchedulerError};

fn boom() -> SchedulerError {
    SchedulerError::from(std::io::Error::new(std::io::ErrorKind::Other, "x"))
}

async fn failing_child() -> Result<()> {
    null().await?;
    Err(boom())
}

#[test]
fn a_delegating_parent_sees_the_childs_failure_at_the_yield_point() {
    let result = skein::run(async move {
        match delegate::<(), _>(failing_child()).await {
            Ok(_) => panic!("failing_child always fails"),
            Err(e) => {
                assert_eq!(e.root_cause().to_string(), "I/O error: x");
                Ok(())
            }
        }
    });

    assert!(result.is_ok(), "run() failed: {result:?}");
}

#[test]
fn an_unhandled_spawned_childs_failure_propagates_out_of_run() {
    let result = skein::run(async move {
        spawn(failing_child()).await?;
        // Give the spawned child a chance to run and fail before the
        // root itself would otherwise terminate successfully.
        skein::sleep(std::time::Duration::from_millis(20)).await?;
        Ok(())
    });

    match result {
        Err(SchedulerError::FiberFailure(inner)) => {
            assert_eq!(inner.root_cause().to_string(), "I/O error: x");
        }
        other => panic!("expected run() to propagate the spawned failure, got {other:?}"),
    }
}
