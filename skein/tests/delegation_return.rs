//! S3: a parent's `yield child` (here, `delegate`) resumes with the
//! child's explicit terminal value once it `null()`s a couple of times
//! and then calls `end(42)`.

use skein::{delegate, end, null};

#[test]
fn delegate_resumes_with_the_childs_end_value() {
    let result = skein::run(async move {
        let value = delegate::<i64, _>(async move {
            null().await?;
            null().await?;
            end(42i64).await
        })
        .await?;
        assert_eq!(*value, 42);
        Ok(())
    });

    assert!(result.is_ok(), "run() failed: {result:?}");
}
