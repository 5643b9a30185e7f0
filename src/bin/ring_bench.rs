//! Ring queue throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::time::Instant;

use hermes::mpmc;
use hermes::spsc;

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: usize = 1 << 24;

type Payload = u64;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_spsc_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        for expected in 0..ITERATIONS as Payload {
            loop {
                if let Some(value) = consumer.pop() {
                    assert_eq!(value, expected, "data corruption");
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS as Payload {
        while producer.push(i).is_err() {
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("spsc: {} ops/ms", ops_per_ms);
}

fn bench_spsc_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (q1_tx, q1_rx) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();
    let (q2_tx, q2_rx) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let responder = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        for _ in 0..ITERATIONS {
            loop {
                if let Some(value) = q1_rx.pop() {
                    while q2_tx.push(value).is_err() {
                        hint::spin_loop();
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS as Payload {
        while q1_tx.push(i).is_err() {
            hint::spin_loop();
        }
        loop {
            if q2_rx.pop().is_some() {
                break;
            }
            hint::spin_loop();
        }
    }

    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / ITERATIONS as u128;
    println!("spsc: {} ns RTT", rtt_ns);
}

fn bench_mpmc_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let ring = Arc::new(mpmc::Ring::<Payload>::new(QUEUE_SIZE).unwrap());

    let consumer_ring = Arc::clone(&ring);
    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        let mut received = 0;
        let mut sum = 0u64;
        while received < ITERATIONS {
            if let Some(value) = consumer_ring.pop() {
                sum = sum.wrapping_add(value);
                received += 1;
            } else {
                hint::spin_loop();
            }
        }
        sum
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS as Payload {
        while ring.push(i).is_err() {
            hint::spin_loop();
        }
    }

    let sum = consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let n = ITERATIONS as u64;
    assert_eq!(sum, n * (n - 1) / 2, "data corruption");

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("mpmc: {} ops/ms (1p/1c)", ops_per_ms);
}

fn main() {
    hermes::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!(
        "hermes rings (size={}, iters={}):",
        QUEUE_SIZE, ITERATIONS
    );
    bench_spsc_throughput(producer_cpu, consumer_cpu);
    bench_spsc_rtt(producer_cpu, consumer_cpu);
    bench_mpmc_throughput(producer_cpu, consumer_cpu);
}
