//! S1: a server spawned with `server(...)` echoes back whatever a
//! client sends, then is cancelled with `kill` and the loop exits
//! cleanly.

use bytes::Bytes;
use skein::{connect, kill, null, server, spawn, Connection, Result};

async fn echoer(conn: Connection) -> Result<()> {
    let data = conn.recv(1024).await?;
    conn.sendall(data).await?;
    Ok(())
}

#[test]
fn echo_server_round_trips_and_shuts_down_cleanly() {
    let port = portpicker::pick_unused_port().expect("no free port");

    let result = skein::run(async move {
        let server_fiber = spawn(server("127.0.0.1", port, |conn| async move {
            echoer(conn).await
        }))
        .await?;

        // Let the server reach its `accept()` suspension point first.
        null().await?;

        let conn = connect("127.0.0.1", port).await?;
        conn.sendall(Bytes::from_static(b"hello\n")).await?;
        let reply = conn.recv(6).await?;
        assert_eq!(&reply[..], b"hello\n");
        conn.close();

        kill(server_fiber).await?;
        Ok(())
    });

    assert!(result.is_ok(), "run() failed: {result:?}");
}
