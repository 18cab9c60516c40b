//! A deliberately minimal line-oriented HTTP/1.1 server: it reads the
//! request line and headers with `readline`, ignores everything but the
//! path, and answers every request with an HTML directory listing of
//! the current working directory.
//!
//! This is application-level request parsing, explicitly out of the
//! scheduler's own scope; it exists only to show `readline` handling
//! CRLF-delimited text a line at a time without losing any bytes.

use bytes::Bytes;
use skein::{server, Connection, Result};

const CRLF: &[u8] = b"\r\n";

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn handle(conn: Connection) -> Result<()> {
    let request_line = conn.readline(CRLF).await?;
    let request_line = String::from_utf8_lossy(&request_line).trim().to_string();

    // Drain headers until the blank line that ends them; we don't parse
    // any of them, but the bytes still have to come off the socket.
    loop {
        let line = conn.readline(CRLF).await?;
        if line.is_empty() || line.as_ref() == CRLF {
            break;
        }
    }

    let mut body = format!("<html><body><h1>{}</h1><ul>\n", escape_html(&request_line));
    match std::fs::read_dir(".") {
        Ok(entries) => {
            for entry in entries.flatten() {
                body.push_str(&format!(
                    "<li>{}</li>\n",
                    escape_html(&entry.file_name().to_string_lossy())
                ));
            }
        }
        Err(e) => body.push_str(&format!("<li>directory listing failed: {}</li>\n", escape_html(&e.to_string()))),
    }
    body.push_str("</ul></body></html>");

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    conn.sendall(Bytes::from(response)).await?;
    conn.close();
    Ok(())
}

fn main() -> Result<()> {
    skein::dev_tracing::init_tracing();
    let port = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    println!("listing server on http://127.0.0.1:{port}/ (Ctrl-C to stop)");
    skein::run(server("127.0.0.1", port, |conn| async move { handle(conn).await }))
}
