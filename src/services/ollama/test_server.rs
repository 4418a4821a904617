//! Bare HTTP/1.1 server for tests that need to watch the connection itself.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// What the client did with the connection after the first record went out.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Afterwards {
    Closed,
    StillOpen,
}

/// Accepts one request and answers it with a chunked NDJSON body holding only
/// `record`, then sends nothing more. The handle resolves once the client closes
/// the connection, or with `StillOpen` after `wait`.
pub(crate) async fn stalled_stream(record: &'static str, wait: Duration) -> (String, JoinHandle<Afterwards>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let line = format!("{record}\n");
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{line}\r\n",
            line.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        let mut buf = [0u8; 64];
        match tokio::time::timeout(wait, socket.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => Afterwards::Closed,
            Ok(Ok(_)) | Err(_) => Afterwards::StillOpen,
        }
    });
    (uri, handle)
}

/// Reads the request head and as much body as `content-length` announces.
async fn read_request(socket: &mut TcpStream) {
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        seen.extend_from_slice(&buf[..n]);
        if let Some(end) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&seen[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if seen.len() >= end + 4 + body_len {
                return;
            }
        }
        if n == 0 {
            return;
        }
    }
}
