use anyhow::Context;
use netsim::metrics::{start_metrics_server, MetricsConfig};
use netsim::{Buffer, BufferSink, FilterConfig, FlowResult, NetSimFilter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Counts what reaches the end of the pipeline
#[derive(Default)]
struct CountingSink {
    buffers: AtomicU64,
    bytes: AtomicU64,
    /// Buffers whose timestamp is older than one already seen
    reordered: AtomicU64,
    latest_pts_ms: AtomicU64,
}

impl BufferSink for CountingSink {
    fn push(&self, buffer: Buffer) -> FlowResult {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        if let Some(pts) = buffer.pts() {
            let pts_ms = pts.as_millis() as u64;
            if self.latest_pts_ms.fetch_max(pts_ms, Ordering::Relaxed) > pts_ms {
                self.reordered.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("netsim - network simulation filter");
    println!("==================================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) if path != "-" => FilterConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        _ => FilterConfig {
            drop_probability: 0.1,
            delay_probability: 0.2,
            ..Default::default()
        },
    };
    let buffer_count: u64 = match args.get(2) {
        Some(count) => count.parse().context("Invalid buffer count")?,
        None => 1000,
    };
    if let Some(addr) = args.get(3) {
        let addr: SocketAddr = addr.parse().context("Invalid metrics address")?;
        start_metrics_server(MetricsConfig::with_addr(addr))?;
        println!("Metrics:      http://{addr}/metrics");
    }

    println!(
        "Delay:        {}-{}ms ({}, p={})",
        config.min_delay, config.max_delay, config.delay_distribution, config.delay_probability
    );
    println!(
        "Drop:         p={}, next {} buffers",
        config.drop_probability, config.drop_packets
    );
    println!("Duplicate:    p={}", config.duplicate_probability);
    println!(
        "Rate limit:   {} kbps, bucket {} Kb\n",
        config.max_kbps, config.max_bucket_size
    );

    let max_delay = config.min_delay.max(config.max_delay).max(0) as u64;
    let sink = Arc::new(CountingSink::default());
    let filter = NetSimFilter::new(config, sink.clone());
    filter.activate()?;

    for seq in 0..buffer_count {
        let payload = vec![(seq % 256) as u8; 1200];
        let buffer = Buffer::new(payload).with_pts(Duration::from_millis(seq));
        if let Err(e) = filter.chain(buffer) {
            tracing::warn!("Downstream refused buffer {}: {}", seq, e);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Let in-flight deliveries land; a normal distribution can exceed max-delay
    tokio::time::sleep(Duration::from_millis(max_delay * 2 + 50)).await;
    filter.deactivate();

    println!("{}", filter.stats().summary());
    println!(
        "Sink received {} buffers ({} bytes)",
        sink.buffers.load(Ordering::Relaxed),
        sink.bytes.load(Ordering::Relaxed)
    );
    println!(
        "Out of order: {} buffers",
        sink.reordered.load(Ordering::Relaxed)
    );

    Ok(())
}
