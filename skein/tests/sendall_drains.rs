//! S6: `sendall` retries partial writes internally and only resumes the
//! sender once every byte has been accepted by the kernel, even against
//! a peer that doesn't start draining its socket for a while.

use std::time::Duration;

use bytes::Bytes;
use skein::{connect, null, server, sleep, spawn, Connection, Result};

const TOTAL: usize = 2_000_000;

#[test]
fn sendall_resumes_only_once_every_byte_is_accepted_by_the_kernel() {
    let port = portpicker::pick_unused_port().expect("no free port");

    let result = skein::run(async move {
        spawn(server("127.0.0.1", port, |conn: Connection| async move {
            let payload = Bytes::from(vec![b'A'; TOTAL]);
            conn.sendall(payload).await?;
            Ok(())
        }))
        .await?;

        null().await?;
        let conn = connect("127.0.0.1", port).await?;

        // Let the server's `sendall` start filling (and exceeding) the
        // kernel's send buffer before this side starts draining it, to
        // force at least one internal partial-write retry.
        sleep(Duration::from_millis(100)).await?;

        let mut total = 0usize;
        while total < TOTAL {
            let chunk = conn.recv(65536).await?;
            if chunk.is_empty() {
                break;
            }
            total += chunk.len();
        }

        assert_eq!(total, TOTAL, "sendall must deliver every byte, not just the first write");
        conn.close();
        Ok(())
    });

    assert!(result.is_ok(), "run() failed: {result:?}");
}
