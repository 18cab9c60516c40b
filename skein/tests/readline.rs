//! S5: `readline` splits a stream of CRLF-delimited lines without
//! losing bytes across partial reads, leaving over-read bytes for the
//! next call.

use bytes::Bytes;
use skein::{connect, null, server, Connection, Result};

#[test]
fn readline_splits_an_http_style_request_without_losing_bytes() {
    let port = portpicker::pick_unused_port().expect("no free port");

    let result = skein::run(async move {
        skein::spawn(server("127.0.0.1", port, |conn: Connection| async move {
            // Feed the whole request in one shot; the reader below
            // still has to split it into three lines via `readline`.
            conn.sendall(Bytes::from_static(
                b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            ))
            .await?;
            Ok(())
        }))
        .await?;

        null().await?;
        let conn = connect("127.0.0.1", port).await?;

        let first = conn.readline(b"\r\n").await?;
        let second = conn.readline(b"\r\n").await?;
        let third = conn.readline(b"\r\n").await?;

        assert_eq!(&first[..], b"GET / HTTP/1.1\r\n");
        assert_eq!(&second[..], b"Host: x\r\n");
        assert_eq!(&third[..], b"\r\n");

        conn.close();
        Ok(())
    });

    assert!(result.is_ok(), "run() failed: {result:?}");
}
