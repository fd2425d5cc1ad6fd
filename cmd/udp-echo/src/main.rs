//! UDP Echo Server
//!
//! Receives on `address:port` and echoes every datagram back to its sender
//! from a second socket bound to `address:port+1`. Each worker thread owns
//! one context and keeps `--receives` asynchronous receives in flight.
//!
//! Usage:
//!     cargo build --release -p udp-echo
//!     ./target/release/udp-echo -t 4 -r 128
//!
//! Test with:
//!     echo hello | nc -u -w1 127.0.0.1 8192

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use ioq_net::options::{ReceiveBufferSize, SendBufferSize};
use ioq_net::{BasicSocket, DatagramSocket, IoContext, IoService, MessageFlags};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "udp-echo", about = "UDP echo server", args_override_self = true)]
struct Args {
    /// UDP echo server IPv4 address
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    address: Ipv4Addr,

    /// Listening port; replies leave from port + 1
    #[arg(short, long, default_value_t = 8192)]
    port: u16,

    /// Number of threads
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Number of asynchronous receives per thread
    #[arg(short, long, default_value_t = 64)]
    receives: usize,

    /// Multiply send/receive buffer size (0 to disable buffering)
    #[arg(short, long, default_value_t = 1)]
    buffer: usize,
}

// ── Stats ──

#[derive(Default)]
struct ThreadStats {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl ThreadStats {
    fn record(&self, bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn take(&self) -> (u64, u64) {
        (self.packets.swap(0, Ordering::Relaxed), self.bytes.swap(0, Ordering::Relaxed))
    }
}

/// Stats line with byte counts scaled to k/M/G.
fn format_stats(active_threads: usize, packets: u64, mut bytes: u64) -> String {
    const UNITS: [&str; 4] = ["", "k", "M", "G"];
    let mut bps = 8 * bytes;
    let mut unit = 0;
    while bytes >= 1024 && unit < UNITS.len() - 1 {
        bytes /= 1024;
        bps /= 1000;
        unit += 1;
    }
    let unit = UNITS[unit];
    format!("threads: {active_threads}; packets: {packets}; {unit}bps={bps}; {unit}Bps={bytes}")
}

// ── Setup ──

fn scale_buffers(recv: &DatagramSocket, send: &DatagramSocket, factor: usize) -> Result<()> {
    let ReceiveBufferSize(before) = recv.get_option()?;
    recv.set_option(ReceiveBufferSize(before * factor))?;
    let ReceiveBufferSize(after) = recv.get_option()?;
    println!("receive buffer {before} -> {after}bytes");

    let SendBufferSize(before) = send.get_option()?;
    send.set_option(SendBufferSize(before * factor))?;
    let SendBufferSize(after) = send.get_option()?;
    println!("send buffer {before} -> {after}bytes");
    Ok(())
}

fn open(service: &IoService, endpoint: SocketAddr) -> Result<DatagramSocket> {
    let mut socket =
        DatagramSocket::bound(&endpoint).with_context(|| format!("bind {endpoint}"))?;
    service.associate(&mut socket)?;
    Ok(socket)
}

// ── Worker ──

fn worker(
    ctx: IoContext,
    recv: &DatagramSocket,
    send: &DatagramSocket,
    receives: usize,
    stats: &ThreadStats,
) -> Result<()> {
    for _ in 0..receives {
        recv.async_receive_from(ctx.make_buf()?, MessageFlags::NONE);
    }

    while let Some(mut buf) = ctx.get(Duration::MAX)? {
        match DatagramSocket::async_receive_from_result(&buf) {
            Some(Ok(received)) => {
                stats.record(received.transferred);
                buf.resize(received.transferred);
                send.async_send_to(buf, &received.endpoint, MessageFlags::NONE);
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "receive failed");
                buf.reset();
                recv.async_receive_from(buf, MessageFlags::NONE);
            }
            // Echo sent; reuse the buffer for the next receive.
            None => {
                buf.reset();
                recv.async_receive_from(buf, MessageFlags::NONE);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let service = IoService::with_config(ioq_net::ServiceConfig::from_env());

    let recv_endpoint = SocketAddr::from((args.address, args.port));
    let recv = open(&service, recv_endpoint)?;
    let send_port = args.port.checked_add(1).context("port + 1 out of range")?;
    let send = open(&service, SocketAddr::from((args.address, send_port)))?;
    if args.buffer != 1 {
        scale_buffers(&recv, &send, args.buffer)?;
    }

    tracing::info!(
        listen = %recv_endpoint,
        threads = args.threads,
        receives = args.receives,
        "udp-echo started"
    );

    let stats: Vec<ThreadStats> = (0..args.threads).map(|_| ThreadStats::default()).collect();
    thread::scope(|s| -> Result<()> {
        for (index, stats) in stats.iter().enumerate() {
            let ctx = service.make_context(args.receives)?;
            tracing::debug!(index, facility = ctx.facility(), "worker starting");
            let (recv, send) = (&recv, &send);
            let receives = args.receives;
            s.spawn(move || {
                if let Err(e) = worker(ctx, recv, send, receives, stats) {
                    tracing::error!(index, error = %e, "worker stopped");
                }
            });
        }

        let mut last = String::new();
        loop {
            thread::sleep(Duration::from_secs(1));
            let (mut packets, mut bytes, mut active) = (0, 0, 0);
            for (p, b) in stats.iter().map(ThreadStats::take) {
                packets += p;
                bytes += b;
                if p > 0 {
                    active += 1;
                }
            }
            let line = format_stats(active, packets, bytes);
            if line != last {
                println!("{line}");
                last = line;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stats_units() {
        assert_eq!(format_stats(0, 0, 0), "threads: 0; packets: 0; bps=0; Bps=0");
        assert_eq!(format_stats(2, 10, 2048), "threads: 2; packets: 10; kbps=16; kBps=2");
        assert_eq!(
            format_stats(1, 1, 3 * 1024 * 1024),
            "threads: 1; packets: 1; Mbps=25; MBps=3"
        );
    }

    #[test]
    fn test_thread_stats_take_resets() {
        let stats = ThreadStats::default();
        stats.record(100);
        stats.record(50);
        assert_eq!(stats.take(), (2, 150));
        assert_eq!(stats.take(), (0, 0));
    }
}
