//! Starts an echo server, connects a single client fiber to it, and
//! kills the server once the round trip is done.
//!
//! Run with `RUST_LOG=debug cargo run --example echo_server` to see the
//! scheduler's turn-by-turn tracing.

use bytes::Bytes;
use skein::{connect, kill, null, server, spawn, Connection, Result};

async fn echoer(conn: Connection) -> Result<()> {
    loop {
        let data = conn.recv(1024).await?;
        if data.is_empty() {
            return Ok(());
        }
        conn.sendall(data).await?;
    }
}

async fn client(port: u16) -> Result<()> {
    // Give the server a turn to reach its `accept()` suspension point
    // before we dial.
    null().await?;
    let conn = connect("127.0.0.1", port).await?;
    conn.sendall(Bytes::from_static(b"hello\n")).await?;
    let reply = conn.recv(1024).await?;
    assert_eq!(&reply[..], b"hello\n");
    println!("echo server returned: {:?}", String::from_utf8_lossy(&reply));
    conn.close();
    Ok(())
}

fn main() -> Result<()> {
    skein::dev_tracing::init_tracing();
    let port = portpicker::pick_unused_port().expect("no free port");

    skein::run(async move {
        let server_fiber = spawn(server(
            "127.0.0.1",
            port,
            |conn| async move { echoer(conn).await },
        ))
        .await?;

        client(port).await?;
        kill(server_fiber).await?;
        Ok(())
    })
}
