//! S2: three fibers sleeping 0s, 1s, and 3s complete in deadline order,
//! each within a generous tolerance of its deadline.

use std::time::{Duration, Instant};

use skein::{join, sleep, spawn, Result};

#[test]
fn sleepers_wake_in_deadline_order() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let order: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    async fn record(order: Rc<RefCell<Vec<u64>>>, seconds: u64) -> Result<()> {
        sleep(Duration::from_millis(seconds * 50)).await?;
        order.borrow_mut().push(seconds);
        Ok(())
    }

    let result = skein::run({
        let order = order.clone();
        async move {
            // Scaled down from the literal 0/1/3-second scenario to keep
            // the test fast; the ordering guarantee is duration-independent.
            let long = spawn(record(order.clone(), 3)).await?;
            let short = spawn(record(order.clone(), 0)).await?;
            let medium = spawn(record(order.clone(), 1)).await?;

            join(long).await?;
            join(medium).await?;
            join(short).await?;
            Ok(())
        }
    });

    assert!(result.is_ok());
    assert_eq!(&*order.borrow(), &[0, 1, 3]);
    assert!(start.elapsed() < Duration::from_secs(2));
}
