//! Integration tests for input ports and streams
//!
//! These tests validate the reader-side workflow:
//! - Demultiplexing interleaved streams from one queue
//! - End-of-stream reporting and stream replacement
//! - Exact-count, overlapping and complex reads
//! - Queue flushes and segment breaks

mod common;

use bulkio_rs::sri::SriFields;
use bulkio_rs::types::{InBitPort, InFloatPort};
use bulkio_rs::{BitBuffer, EosState, ReadResult, Wait};
use common::builders::{epoch_time, SriBuilder};
use common::{assert_float_eq, delivery_timeout, ramp};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn data(result: ReadResult<Vec<f32>>) -> Vec<f32> {
    match result {
        ReadResult::Data(block) => block.into_data(),
        other => panic!("expected data, got {:?}", other),
    }
}

#[test]
fn test_interleaved_streams_demultiplex() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("a").build());
    port.push_sri(SriBuilder::new("b").build());

    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "a");
    port.push_packet(ramp(100, 4), epoch_time(0.0), false, "b");
    port.push_packet(ramp(4, 4), epoch_time(4.0), false, "a");

    let a = port.get_stream("a").unwrap();
    let b = port.get_stream("b").unwrap();

    // Reading "a" skips over "b"'s packet in the shared queue
    assert_eq!(data(a.try_read_count(8)), ramp(0, 8));
    assert_eq!(port.current_queue_depth(), 1);
    assert_eq!(data(b.try_read()), ramp(100, 4));
    assert_eq!(port.current_queue_depth(), 0);
}

#[test]
fn test_stream_ids_listed_in_order() {
    let port = InFloatPort::new("dataFloat_in");
    for id in ["charlie", "alpha", "bravo"] {
        port.push_sri(SriBuilder::new(id).build());
    }
    let ids: Vec<String> = port
        .get_streams()
        .iter()
        .map(|s| s.stream_id().to_string())
        .collect();
    assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
}

#[test]
fn test_eos_reported_after_last_data() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "s");
    port.push_packet(Vec::new(), epoch_time(0.0), true, "s");

    let stream = port.get_stream("s").unwrap();
    assert_eq!(stream.eos_state(), EosState::None);
    assert_eq!(data(stream.try_read_count(2)), vec![0.0, 1.0]);

    // The end-of-stream limits this read instead of making it wait
    assert_eq!(data(stream.try_read_count(4)), vec![2.0, 3.0]);
    assert_eq!(stream.eos_state(), EosState::Reached);
    assert!(port.get_stream("s").is_some());

    assert!(stream.try_read().is_eos());
    assert_eq!(stream.eos_state(), EosState::Reported);
    assert!(port.get_stream("s").is_none());

    // Reported only once; later reads keep saying so without side effects
    assert!(stream.try_read_count(1).is_eos());
    assert!(stream.eos());
}

#[test]
fn test_eos_packet_with_data() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(vec![1.0, 2.0], epoch_time(0.0), true, "s");
    assert!(port.active_sris().is_empty());

    let stream = port.current_stream(Wait::NonBlocking).unwrap();
    assert!(!stream.eos());
    assert_eq!(data(stream.read()), vec![1.0, 2.0]);
    assert!(stream.eos());
    assert!(stream.read().is_eos());
}

#[test]
fn test_stream_id_reused_after_eos() {
    let port = InFloatPort::new("dataFloat_in");
    let added = Arc::new(AtomicUsize::new(0));
    let counter = added.clone();
    port.add_stream_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(ramp(0, 2), epoch_time(0.0), true, "s");
    port.push_sri(SriBuilder::new("s").xdelta(0.25).build());
    port.push_packet(ramp(10, 2), epoch_time(1.0), false, "s");
    assert_eq!(added.load(Ordering::SeqCst), 1);

    let first = port.get_stream("s").unwrap();
    assert_eq!(data(first.read()), vec![0.0, 1.0]);
    assert!(first.read().is_eos());
    // The waiting stream became active when the first one ended
    assert_eq!(added.load(Ordering::SeqCst), 2);

    let second = port.get_stream("s").unwrap();
    assert_ne!(first, second);
    let block = second.read().into_block().unwrap();
    assert_eq!(block.samples(), &[10.0, 11.0]);
    assert_eq!(block.xdelta(), 0.25);
}

#[test]
fn test_complex_counts_in_samples() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("cx").complex().build());
    port.push_packet(ramp(0, 8), epoch_time(0.0), false, "cx");

    let stream = port.get_stream("cx").unwrap();
    assert_eq!(stream.samples_available(), 4);

    let block = stream.try_read_count(3).into_block().unwrap();
    assert!(block.complex());
    assert_eq!(block.size(), 6);
    assert_eq!(block.cxsize(), 3);
    assert_eq!(
        block.complex_samples().collect::<Vec<_>>(),
        vec![(0.0, 1.0), (2.0, 3.0), (4.0, 5.0)]
    );
    assert_eq!(stream.samples_available(), 1);
}

#[test]
fn test_overlapping_reads() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").xdelta(0.5).build());
    port.push_packet(ramp(0, 10), epoch_time(0.0), false, "s");

    let stream = port.get_stream("s").unwrap();
    let first = stream.try_read_with_consume(6, 4).unwrap();
    assert_eq!(data(first), ramp(0, 6));

    let second = stream.try_read_count(4).into_block().unwrap();
    assert_eq!(second.samples(), ramp(4, 4).as_slice());
    // Four samples in at 0.5s each
    let start = second.start_time().unwrap();
    assert_float_eq(start - epoch_time(0.0), 2.0, 1e-9);
    assert!(second.timestamps()[0].synthetic);

    let err = stream.try_read_with_consume(2, 3).unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_short_non_blocking_read_waits_for_more() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(ramp(0, 3), epoch_time(0.0), false, "s");

    let stream = port.get_stream("s").unwrap();
    assert!(stream.try_read_count(5).is_empty());
    assert_eq!(stream.samples_available(), 3);

    port.push_packet(ramp(3, 3), epoch_time(3.0), false, "s");
    let block = stream.try_read_count(5).into_block().unwrap();
    assert_eq!(block.samples(), ramp(0, 5).as_slice());
    // One timestamp per source packet, the second landing at offset 3
    assert_eq!(block.timestamps().len(), 2);
    assert_eq!(block.timestamps()[1].offset, 3);
    assert!(!block.timestamps()[1].synthetic);
}

#[test]
fn test_sri_change_breaks_read() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").xdelta(1.0).build());
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "s");
    port.push_sri(SriBuilder::new("s").xdelta(0.5).build());
    port.push_packet(ramp(4, 4), epoch_time(4.0), false, "s");

    let stream = port.get_stream("s").unwrap();
    let first = stream.try_read_count(8).into_block().unwrap();
    assert_eq!(first.samples(), ramp(0, 4).as_slice());
    assert_eq!(first.sri_change_flags(), SriFields::all());

    let second = stream.try_read_count(4).into_block().unwrap();
    assert_eq!(second.samples(), ramp(4, 4).as_slice());
    assert_eq!(second.sri_change_flags(), SriFields::XDELTA);
    assert_eq!(stream.sri().xdelta, 0.5);
}

#[test]
fn test_queue_flush_marks_next_read() {
    let port = InFloatPort::new("dataFloat_in");
    port.set_max_queue_depth(3);
    port.push_sri(SriBuilder::new("s").build());
    for n in 0..3 {
        port.push_packet(ramp(n * 4, 4), epoch_time(0.0), false, "s");
    }
    // Full: the queue is emptied before this packet goes in
    port.push_packet(ramp(100, 4), epoch_time(0.0), false, "s");
    assert_eq!(port.current_queue_depth(), 1);

    let stream = port.get_stream("s").unwrap();
    let block = stream.try_read().into_block().unwrap();
    assert_eq!(block.samples(), ramp(100, 4).as_slice());
    assert!(block.input_queue_flushed());
    assert!(block.sri_changed());

    let stats = port.statistics();
    assert!(stats.keyword("timeSinceLastFlush").is_some());
}

#[test]
fn test_queue_flush_keeps_end_of_stream() {
    let port = InFloatPort::new("dataFloat_in");
    port.set_max_queue_depth(2);
    port.push_sri(SriBuilder::new("a").build());
    port.push_sri(SriBuilder::new("b").build());
    port.push_packet(ramp(0, 4), epoch_time(0.0), true, "a");
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "b");
    port.push_packet(vec![9.0], epoch_time(0.0), false, "b");
    assert_eq!(port.current_queue_depth(), 2);

    // "a" lost its data but still ends
    let a = port.get_stream("a").unwrap();
    assert!(a.try_read().is_eos());

    let b = port.get_stream("b").unwrap();
    assert_eq!(data(b.try_read()), vec![9.0]);
}

#[test]
fn test_disable_discards_and_enable_resumes() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "s");

    let stream = port.get_stream("s").unwrap();
    stream.disable();
    assert!(!stream.enabled());
    assert_eq!(port.current_queue_depth(), 0);
    assert!(stream.try_read().is_empty());

    stream.enable();
    port.push_packet(ramp(4, 4), epoch_time(4.0), false, "s");
    assert_eq!(data(stream.try_read()), ramp(4, 4));
}

#[test]
fn test_skip_consumes_samples() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("s").build());
    port.push_packet(ramp(0, 6), epoch_time(0.0), false, "s");

    let stream = port.get_stream("s").unwrap();
    assert_eq!(stream.skip(4), 4);
    assert_eq!(data(stream.try_read()), vec![4.0, 5.0]);
}

#[test]
fn test_skip_counts_complex_samples() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("cx").complex().build());
    port.push_packet(ramp(0, 12), epoch_time(0.0), false, "cx");

    let stream = port.get_stream("cx").unwrap();
    assert_eq!(stream.skip(3), 3);
    assert_eq!(stream.samples_available(), 3);
    assert_eq!(data(stream.try_read_count(2)), vec![6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_bit_reads_span_packets() {
    let port = InBitPort::new("dataBit_in");
    port.push_sri(SriBuilder::new("bits").build());
    port.push_packet(BitBuffer::parse("10110").unwrap(), epoch_time(0.0), false, "bits");
    port.push_packet(BitBuffer::parse("0111001").unwrap(), epoch_time(5.0), false, "bits");

    let stream = port.get_stream("bits").unwrap();
    assert_eq!(stream.samples_available(), 12);

    let block = stream.try_read_count(9).into_block().unwrap();
    assert_eq!(block.samples().to_string(), "101100111");
    assert_eq!(block.timestamps().len(), 2);
    assert_eq!(block.timestamps()[0].offset, 0);
    assert_eq!(block.timestamps()[1].offset, 5);
    assert!(!block.timestamps()[1].synthetic);
    assert_float_eq(block.timestamps()[1].time - epoch_time(0.0), 5.0, 1e-9);

    let rest = stream.try_read().into_block().unwrap();
    assert_eq!(rest.samples(), &BitBuffer::parse("001").unwrap());
    // Picking up 4 bits into the second packet
    assert!(rest.timestamps()[0].synthetic);
}

#[test]
fn test_disable_releases_blocked_read() {
    let port = InFloatPort::new("dataFloat_in");
    port.push_sri(SriBuilder::new("a").build());
    let stream = port.get_stream("a").unwrap();

    let reader = {
        let stream = stream.clone();
        thread::spawn(move || stream.read_count(10))
    };
    thread::sleep(Duration::from_millis(50));

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    {
        let stream = stream.clone();
        thread::spawn(move || {
            stream.disable();
            let _ = done_tx.send(());
        });
    }
    done_rx
        .recv_timeout(delivery_timeout())
        .expect("disable should not wait for the blocked read");
    assert!(reader.join().unwrap().is_empty());
    assert!(!stream.enabled());

    // The disabled stream swallows its data and its end retires it
    port.push_packet(vec![1.0; 4], epoch_time(0.0), false, "a");
    port.push_packet(Vec::new(), epoch_time(0.0), true, "a");
    assert_eq!(port.current_queue_depth(), 0);
    assert!(port.get_stream("a").is_none());
    assert!(stream.try_read().is_eos());
}

#[test]
fn test_flushed_end_of_stream_only_seen_in_statistics() {
    let port = InFloatPort::new("dataFloat_in");
    port.set_max_queue_depth(2);
    port.push_sri(SriBuilder::new("a").build());
    port.push_sri(SriBuilder::new("b").build());
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "a");
    let a = port.get_stream("a").unwrap();
    assert_eq!(data(a.try_read()), ramp(0, 4));

    port.push_packet(ramp(4, 4), epoch_time(4.0), true, "a");
    port.push_packet(ramp(0, 4), epoch_time(0.0), false, "b");
    port.push_packet(ramp(4, 4), epoch_time(4.0), false, "b");

    // Only the stripped end-of-stream is left for "a"
    assert!(a.try_read().is_eos());
    assert!(port.statistics().keyword("timeSinceLastFlush").is_some());
}

#[test]
fn test_current_stream_times_out() {
    let port = InFloatPort::new("dataFloat_in");
    let started = std::time::Instant::now();
    assert!(port
        .current_stream(Wait::Timeout(common::test_timeout()))
        .is_none());
    assert!(started.elapsed() >= common::test_timeout());
}
