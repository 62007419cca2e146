//! demos/mock_proxy.rs
//! Run: cargo run --example mock_proxy -- <port> [name]
//!
//! A routing proxy stand-in speaking the newline-delimited JSON protocol of
//! `TcpConnector`. Env knobs: BASE_DELAY_MS, JITTER_MS, FAIL_PCT,
//! SILENT_EVERY_SECS (toggle between answering and going silent).

use proxy_topology::transport::Request;
use proxy_topology::{CommandReply, ProbeReply};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct Knobs {
    base_delay_ms: u64,
    jitter_ms: u64,
    fail_pct: f64,
    silent_every: Option<Duration>,
}

impl Knobs {
    fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.parse().ok()
        }

        Self {
            base_delay_ms: var("BASE_DELAY_MS").unwrap_or(0),
            jitter_ms: var("JITTER_MS").unwrap_or(0),
            fail_pct: var::<f64>("FAIL_PCT").unwrap_or(0.0).clamp(0.0, 100.0),
            silent_every: var("SILENT_EVERY_SECS").map(Duration::from_secs),
        }
    }

    fn delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.base_delay_ms + jitter)
    }

    fn should_fail(&self) -> bool {
        self.fail_pct > 0.0 && rand::thread_rng().gen_bool(self.fail_pct / 100.0)
    }
}

struct MockProxy {
    name: String,
    knobs: Knobs,
    served: AtomicU64,
    silent: AtomicBool,
}

impl MockProxy {
    async fn answer(&self, request: Request) -> serde_json::Result<String> {
        let delay = self.knobs.delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        match request {
            Request::Probe => serde_json::to_string(&ProbeReply::router()),
            Request::Command(command) => {
                let seq = self.served.fetch_add(1, Ordering::Relaxed) + 1;
                if self.knobs.should_fail() {
                    warn!(proxy = %self.name, seq, "Injecting command failure");
                    return serde_json::to_string(&CommandReply::failure("injected failure"));
                }
                info!(proxy = %self.name, seq, command = %command.name, ns = %command.namespace, "Served");
                serde_json::to_string(&CommandReply::success(command.documents.len() as u64))
            }
        }
    }

    async fn serve(self: Arc<Self>, stream: TcpStream) -> anyhow::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        while let Some(line) = lines.next_line().await? {
            // Silent: keep reading, never answer.
            if self.silent.load(Ordering::SeqCst) {
                continue;
            }
            let request: Request = serde_json::from_str(&line)?;
            let mut reply = self.answer(request).await?;
            reply.push('\n');
            write.write_all(reply.as_bytes()).await?;
        }
        Ok(())
    }

    async fn toggle_silence(self: Arc<Self>, every: Duration) {
        loop {
            sleep(every).await;
            let was_silent = self.silent.fetch_xor(true, Ordering::SeqCst);
            info!(proxy = %self.name, silent = !was_silent, "Toggled silence");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mock_proxy=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().as_deref().unwrap_or("52000").parse()?;
    let name = args.next().unwrap_or_else(|| format!("proxy-{port}"));
    let knobs = Knobs::from_env();

    let proxy = Arc::new(MockProxy {
        name,
        knobs,
        served: AtomicU64::new(0),
        silent: AtomicBool::new(false),
    });

    if let Some(every) = knobs.silent_every {
        tokio::spawn(proxy.clone().toggle_silence(every));
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!(proxy = %proxy.name, %addr, ?knobs, "Mock proxy listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.serve(stream).await {
                warn!(%peer, error = %e, "Client dropped");
            }
        });
    }
}
