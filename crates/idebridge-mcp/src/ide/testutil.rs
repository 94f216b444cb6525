//! Canned-response TCP stubs that stand in for the IDE plugin during tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One scripted HTTP response.
#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl StubResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Handle to a running stub server. Aborts the accept loop on drop.
pub struct StubIde {
    pub port: u16,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl StubIde {
    /// Number of connections accepted so far.
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Stop accepting connections, releasing the port.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for StubIde {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a stub IDE on an ephemeral port serving the scripted responses in
/// order; the last entry repeats for any further connections.
pub async fn spawn_stub(script: Vec<StubResponse>) -> StubIde {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    spawn_stub_on(listener, script)
}

/// Serve the script from an already-bound listener.
pub fn spawn_stub_on(listener: TcpListener, script: Vec<StubResponse>) -> StubIde {
    let port = listener.local_addr().expect("stub addr").port();
    let hits = Arc::new(AtomicUsize::new(0));
    let handle = {
        let hits = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let turn = hits.fetch_add(1, Ordering::SeqCst);
                let response = script.get(turn).or_else(|| script.last()).cloned();
                tokio::spawn(async move {
                    let Some(response) = response else { return };
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    if !response.delay.is_zero() {
                        tokio::time::sleep(response.delay).await;
                    }
                    let status_line = match response.status {
                        200 => "200 OK",
                        404 => "404 Not Found",
                        500 => "500 Internal Server Error",
                        _ => "400 Bad Request",
                    };
                    let raw = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        response.body.len(),
                        response.body
                    );
                    let _ = socket.write_all(raw.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        })
    };
    StubIde { port, hits, handle }
}

/// A TCP port with no listener behind it.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind free port");
    listener.local_addr().expect("free port addr").port()
}

/// Reserve three consecutive ports, returning their listeners lowest-first.
/// Retries until the neighbors of an ephemeral port happen to be free.
pub async fn bind_three_consecutive() -> (TcpListener, TcpListener, TcpListener) {
    for _ in 0..32 {
        let first = TcpListener::bind("127.0.0.1:0").await.expect("bind anchor");
        let base = first.local_addr().expect("anchor addr").port();
        if base >= u16::MAX - 2 {
            continue;
        }
        let Ok(second) = TcpListener::bind(("127.0.0.1", base + 1)).await else {
            continue;
        };
        let Ok(third) = TcpListener::bind(("127.0.0.1", base + 2)).await else {
            continue;
        };
        return (first, second, third);
    }
    panic!("could not reserve three consecutive ports");
}
