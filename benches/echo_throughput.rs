//! Echo throughput benchmark suite.
//!
//! Runs an in-process echo server and measures round trips at different
//! scales:
//! - Concurrent clients: 1, 16, 64
//! - Payload sizes: 64 B, 4 KiB
//!
//! Run with: cargo bench --bench echo_throughput
//! Results saved to: target/criterion/

use std::net::SocketAddr;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use duplex_socket::{BytesCodec, CancellationToken, Connection, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CLIENT_COUNTS: &[usize] = &[1, 16, 64];
const PAYLOAD_SIZES: &[usize] = &[64, 4096];
const ROUND_TRIPS: usize = 32;

// ============================================================================
// Benchmark: Round Trips
// ============================================================================

fn bench_round_trips(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let (addr, server) = rt.block_on(start_echo_server());

    let mut group = c.benchmark_group("echo_round_trips");
    group.sample_size(20);

    for &clients in CLIENT_COUNTS {
        for &size in PAYLOAD_SIZES {
            let bytes = (clients * size * ROUND_TRIPS) as u64;
            group.throughput(Throughput::Bytes(bytes));
            group.bench_with_input(
                BenchmarkId::new(format!("{clients}c"), size),
                &(clients, size),
                |b, &(clients, size)| {
                    b.to_async(&rt).iter(|| run_clients(addr, clients, size));
                },
            );
        }
    }

    group.finish();
    server.close();
}

// ============================================================================
// Benchmark: Queue Write
// ============================================================================

fn bench_queue_write(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let (addr, server) = rt.block_on(start_echo_server());

    // A connection that is never run: writes only encode and enqueue.
    let (connection, _client) = rt.block_on(async {
        let client = TcpStream::connect(addr).await.expect("connect");
        let local = TcpStream::connect(addr).await.expect("connect");
        let connection = Connection::builder()
            .codec(BytesCodec)
            .outbound_capacity(1)
            .on_message(|_, _| Ok(()))
            .build(local)
            .expect("build");
        (connection, client)
    });

    let payload = bytes::Bytes::from(vec![0u8; 64]);
    c.bench_function("write_backpressure", |b| {
        b.iter(|| {
            let _ = connection.write(payload.clone());
        });
    });

    server.close();
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn start_echo_server() -> (SocketAddr, Arc<Server>) {
    let server = Arc::new(Server::bind("127.0.0.1:0").await.expect("bind"));
    let addr = server.local_addr();

    tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            let _ = server
                .serve(|stream: TcpStream| async move {
                    let connection = Connection::builder()
                        .codec(BytesCodec)
                        .outbound_capacity(1024)
                        .on_message(|message, writer| {
                            writer.write(message)?;
                            Ok(())
                        })
                        .build(stream);
                    if let Ok(connection) = connection {
                        let _ = connection.run(CancellationToken::new()).await;
                    }
                })
                .await;
        }
    });

    (addr, server)
}

async fn run_clients(addr: SocketAddr, clients: usize, size: usize) {
    let sessions: Vec<_> = (0..clients).map(|_| client_session(addr, size)).collect();
    futures_util::future::join_all(sessions).await;
}

async fn client_session(addr: SocketAddr, size: usize) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.set_nodelay(true).expect("nodelay");

    let payload = vec![7u8; size];
    let mut echoed = vec![0u8; size];

    for _ in 0..ROUND_TRIPS {
        stream.write_all(&payload).await.expect("send");
        stream.read_exact(&mut echoed).await.expect("echo");
    }
}

criterion_group!(benches, bench_round_trips, bench_queue_write);
criterion_main!(benches);
