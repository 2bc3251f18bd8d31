//! BulkIO loopback - Main Entry Point
//!
//! Connects a float output port to a float input port through a channel
//! transport, writes a tone through an output stream and reads it back,
//! then logs what each side saw. An optional config file path may be
//! passed as the first argument.

use anyhow::Context;
use bulkio_rs::{
    config::BulkioConfig,
    local::ChannelTransport,
    types::{InFloatPort, OutFloatPort},
    PrecisionTime, ReadResult, Wait,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SAMPLE_RATE: f64 = 48_000.0;
const TONE_HZ: f64 = 1_000.0;
const BLOCKS: usize = 20;
const READ_SIZE: usize = 4096;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => BulkioConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => BulkioConfig::default(),
    };

    // Initialize logging
    let (file_layer, _guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bulkio-loopback.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting BulkIO loopback");

    let input = InFloatPort::with_config("dataFloat_in", &config.input);
    let output = OutFloatPort::with_config("dataFloat_out", &config.output);

    let (transport, delivery) = ChannelTransport::spawn(input.clone(), 64)?;
    output.connect_port(Box::new(transport.with_blocking(true)), "loopback")?;

    let stream = output.create_stream("tone");
    stream.set_xdelta(1.0 / SAMPLE_RATE);
    stream.set_keyword("TONE_HZ", TONE_HZ);

    let block_len = (SAMPLE_RATE / 10.0) as usize;
    let start = PrecisionTime::now();
    for block in 0..BLOCKS {
        let first = block * block_len;
        let samples: Vec<f32> = (first..first + block_len)
            .map(|n| (2.0 * std::f64::consts::PI * TONE_HZ * n as f64 / SAMPLE_RATE).sin() as f32)
            .collect();
        stream.write(samples, start.add_sample_offset(first, stream.xdelta()));
    }
    stream.close();

    let reader = input
        .current_stream(Wait::Timeout(Duration::from_secs(2)))
        .context("no stream arrived on the input port")?;
    tracing::info!("Reading stream '{}'", reader.stream_id());

    let mut total = 0usize;
    let mut peak = 0.0f32;
    loop {
        match reader.read_count(READ_SIZE) {
            ReadResult::Data(block) => {
                if block.sri_changed() {
                    tracing::debug!("SRI changed: {:?}", block.sri_change_flags());
                }
                total += block.size();
                peak = block.samples().iter().fold(peak, |acc, s| acc.max(s.abs()));
            }
            ReadResult::Empty => {
                tracing::warn!("Input port stopped before end of stream");
                break;
            }
            ReadResult::EndOfStream => break,
        }
    }
    tracing::info!("Read {} samples (peak {:.3}) before end of stream", total, peak);

    let delivered = delivery.stop();
    tracing::info!("Delivery worker forwarded {} packets", delivered);

    let in_stats = input.statistics();
    tracing::info!(
        "{}: {:.0} elements/s, average queue depth {:.2}",
        in_stats.port_name,
        in_stats.elements_per_second,
        in_stats.average_queue_depth
    );
    for (connection, stats) in output.statistics() {
        tracing::info!(
            "{} -> {}: {:.0} elements/s, {:.1} calls/s",
            output.name(),
            connection,
            stats.elements_per_second,
            stats.calls_per_second
        );
    }

    Ok(())
}
