use hft_publication::frame::{FRAME_ALIGNMENT, align, frame_length_volatile};
use hft_publication::log_buffer::{PARTITION_COUNT, set_connected};
use hft_publication::{
    AtomicPosition, BufferClaim, ConcurrentPublication, Conductor, Error, ExclusivePublication,
    LatencySamples, LatencySummary, LogBufferConfig, LogBuffers, Publication, PublicationStatus,
    Registration, Result, channel_endpoint_status, error_string,
};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing_subscriber::EnvFilter;

/// Returns timestamp in CPU cycles
#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn timestamp() -> u64 {
    let low: u32;
    let high: u32;
    unsafe {
        core::arch::asm!(
            "rdtscp",
            out("eax") low,
            out("edx") high,
            out("ecx") _,
            options(nomem, nostack, preserves_flags),
        );
    }
    ((high as u64) << 32) | (low as u64)
}

/// Returns timestamp in ns
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn timestamp() -> u64 {
    hft_publication::mono_time_ns()
}

const PAYLOAD_SIZE: usize = 200;
const MESSAGES: usize = 100_000;

/// Conductor for a log that lives in this process and has no channel.
#[derive(Debug)]
struct LocalConductor;

impl Conductor for LocalConductor {
    fn remove_publication(&self, registration_id: i64) -> Result<()> {
        tracing::info!(registration_id, "publication removed");
        Ok(())
    }

    fn add_destination(&self, _: i64, _: &str) -> Result<()> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn remove_destination(&self, _: i64, _: &str) -> Result<()> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn remove_destination_by_id(&self, _: i64, _: i64) -> Result<()> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn async_add_destination(&self, _: i64, _: &str) -> Result<i64> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn async_remove_destination(&self, _: i64, _: &str) -> Result<i64> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn async_remove_destination_by_id(&self, _: i64, _: i64) -> Result<i64> {
        Err(Error::Conductor("in-process log has no destinations".into()))
    }

    fn channel_status(&self, _: i32) -> i64 {
        channel_endpoint_status::ACTIVE
    }

    fn local_socket_addresses(&self, _: i64, _: i32) -> Vec<String> {
        Vec::new()
    }
}

/// Stands in for the driver: consumes frames in order, zeroes them so the
/// term can be reused, and keeps the position limit half a term ahead.
fn drain(log: &LogBuffers, limit: &AtomicPosition, stop: &AtomicBool) -> i64 {
    let term_length = log.term_length() as i64;
    let window = term_length / 2;
    let mut position = 0i64;
    limit.set_ordered(window);

    loop {
        let index = ((position / term_length) % PARTITION_COUNT as i64) as usize;
        let term = log.term_buffers()[index];
        let offset = (position % term_length) as usize;
        let length = frame_length_volatile(&term, offset);

        if length > 0 {
            let aligned = align(length, FRAME_ALIGNMENT);
            term.set_memory(offset, aligned as usize, 0);
            position += aligned as i64;
            limit.set_ordered(position + window);
        } else if stop.load(Ordering::Acquire) {
            return position;
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Offers `MESSAGES` messages, retrying on transient statuses, and records
/// the latency of each successful call.
fn offer_loop(publication: &dyn Publication, name: String) -> Result<LatencySamples> {
    let mut samples = LatencySamples::with_capacity(name, MESSAGES);
    let mut payload = [0u8; PAYLOAD_SIZE];
    let mut retries = 0u64;

    for _ in 0..MESSAGES {
        loop {
            let ts0 = timestamp();
            payload[..8].copy_from_slice(&ts0.to_le_bytes());
            let position = publication.offer(&payload)?;
            let ts1 = timestamp();
            if position >= 0 {
                samples.record(ts1 - ts0);
                break;
            }
            match PublicationStatus::from_position(position) {
                Some(status) if status.is_retryable() => {
                    retries += 1;
                    std::hint::spin_loop();
                }
                _ => {
                    return Err(Error::Conductor(format!(
                        "offer failed: {}",
                        error_string(position)
                    )));
                }
            }
        }
    }

    tracing::debug!(retries, "writer finished");
    Ok(samples)
}

/// Claims, fills and commits `MESSAGES` frames.
fn claim_loop(publication: &dyn Publication, name: String) -> Result<LatencySamples> {
    let mut samples = LatencySamples::with_capacity(name, MESSAGES);
    let mut claim = BufferClaim::new();

    for _ in 0..MESSAGES {
        loop {
            let ts0 = timestamp();
            let position = publication.try_claim(PAYLOAD_SIZE as i32, &mut claim)?;
            if position >= 0 {
                claim.payload_mut()[..8].copy_from_slice(&ts0.to_le_bytes());
                claim.commit()?;
                samples.record(timestamp() - ts0);
                break;
            }
            if !PublicationStatus::from_position(position).is_some_and(PublicationStatus::is_retryable) {
                return Err(Error::Conductor(format!(
                    "claim failed: {}",
                    error_string(position)
                )));
            }
            std::hint::spin_loop();
        }
    }
    Ok(samples)
}

fn registration(registration_id: i64) -> Registration {
    Registration {
        channel: "aeron:ipc".to_string(),
        stream_id: 1001,
        session_id: 1,
        registration_id,
        original_registration_id: registration_id,
        channel_status_id: 0,
    }
}

fn print_summaries(series: Vec<LatencySamples>) {
    println!("{}", LatencySummary::csv_header());
    for mut samples in series {
        if let Some(summary) = samples.summary() {
            println!("{}", summary.csv_row());
        }
    }
}

fn exclusive(log: Arc<LogBuffers>, limit: Arc<AtomicPosition>) -> Result<Vec<LatencySamples>> {
    let publication = ExclusivePublication::new(Arc::new(LocalConductor), registration(1), log, limit)?;
    tracing::info!(%publication, "exclusive writer");

    let offers = offer_loop(&publication, "exclusive-offer".into())?;
    let claims = claim_loop(&publication, "exclusive-claim".into())?;
    publication.close()?;
    Ok(vec![offers, claims])
}

fn concurrent(log: Arc<LogBuffers>, limit: Arc<AtomicPosition>, writers: usize) -> Result<Vec<LatencySamples>> {
    let publication = Arc::new(ConcurrentPublication::new(
        Arc::new(LocalConductor),
        registration(2),
        log,
        limit,
    )?);
    tracing::info!(%publication, writers, "concurrent writers");

    let handles: Vec<_> = (0..writers)
        .map(|writer| {
            let publication = Arc::clone(&publication);
            thread::spawn(move || offer_loop(&*publication, format!("concurrent-offer-{}", writer)))
        })
        .collect();

    let mut series = Vec::with_capacity(writers);
    for handle in handles {
        let samples = handle
            .join()
            .map_err(|_| Error::Conductor("writer thread panicked".into()))??;
        series.push(samples);
    }
    publication.close()?;
    Ok(series)
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} exclusive|concurrent [WRITERS]", program);
    std::process::exit(1);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }

    let log = LogBuffers::in_memory(&LogBufferConfig::default().with_stream_id(1001).with_session_id(1))?;
    set_connected(log.meta_data_buffer(), true);
    let limit = AtomicPosition::new(0, 0);
    let stop = Arc::new(AtomicBool::new(false));

    let drainer = {
        let (log, limit, stop) = (Arc::clone(&log), Arc::clone(&limit), Arc::clone(&stop));
        thread::spawn(move || drain(&log, &limit, &stop))
    };

    let series = match args[1].as_str() {
        "exclusive" => exclusive(Arc::clone(&log), Arc::clone(&limit)),
        "concurrent" => {
            let writers = match args.get(2).map(|n| n.parse::<usize>()) {
                None => 2,
                Some(Ok(n)) if n > 0 => n,
                _ => usage(&args[0]),
            };
            concurrent(Arc::clone(&log), Arc::clone(&limit), writers)
        }
        _ => usage(&args[0]),
    };

    stop.store(true, Ordering::Release);
    let drained = drainer
        .join()
        .map_err(|_| Error::Conductor("drainer thread panicked".into()))?;
    tracing::info!(drained, "log drained");

    print_summaries(series?);
    Ok(())
}
