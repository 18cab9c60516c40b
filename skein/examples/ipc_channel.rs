//! Two fibers talking over a loopback TCP pair, as a stand-in for a
//! same-host IPC channel: no message pickling, just length-prefixed
//! frames over `Connection::sendall`/`recv`. One fiber is `delegate`d
//! to and hands its reply back as a terminal value via `end`.

use bytes::{Bytes, BytesMut};
use skein::{connect, delegate, end, server, Connection, FiberId, Result};

async fn send_frame(conn: &Connection, payload: &[u8]) -> Result<()> {
    let mut framed = BytesMut::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    conn.sendall(framed.freeze()).await
}

async fn recv_frame(conn: &Connection) -> Result<Bytes> {
    let header = conn.recv(4).await?;
    let len = u32::from_be_bytes(header[..4].try_into().unwrap()) as usize;
    conn.recv(len).await
}

async fn responder(conn: Connection) -> Result<()> {
    let request = recv_frame(&conn).await?;
    let mut reply = b"echo: ".to_vec();
    reply.extend_from_slice(&request);
    send_frame(&conn, &reply).await?;
    conn.close();
    Ok(())
}

async fn requester(port: u16) -> Result<()> {
    let conn = connect("127.0.0.1", port).await?;
    send_frame(&conn, b"ping").await?;
    let reply = recv_frame(&conn).await?;
    conn.close();
    end(reply).await
}

fn main() -> Result<()> {
    skein::dev_tracing::init_tracing();
    let port = portpicker::pick_unused_port().expect("no free port");

    skein::run(async move {
        let server_fiber: FiberId = skein::spawn(server(
            "127.0.0.1",
            port,
            |conn| async move { responder(conn).await },
        ))
        .await?;

        skein::null().await?; // let the server reach accept() first
        let reply = delegate::<Bytes, _>(requester(port)).await?;
        println!("ipc reply: {}", String::from_utf8_lossy(&reply));
        assert_eq!(&reply[..], b"echo: ping");

        skein::kill(server_fiber).await?;
        Ok(())
    })
}
