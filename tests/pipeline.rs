//! End-to-end pipeline test: a producer thread feeding a FASTQ parser
//! feeding multiple metric accumulators in sequence, the shape a real
//! caller drives the engine in (spec.md §2, §5).

use readstat::metrics::{AdapterCounter, BaseQualityTable, InsertSizeMetrics};
use readstat::parser::{FastqParser, Parser};
use readstat::ProducerSource;
use std::io::Cursor;

fn synthetic_fastq(n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..n {
        out.extend_from_slice(format!("@read{i}\nACGTACGTACGTACGTACGTACGTACGTACGT\n+\n").as_bytes());
        out.extend_from_slice(&vec![b'I'; 32]);
        out.push(b'\n');
    }
    out
}

#[test]
fn producer_fed_parser_drives_multiple_metrics() {
    let data = synthetic_fastq(500);
    let source = ProducerSource::spawn(Cursor::new(data));
    let mut parser = FastqParser::new(source);

    let mut quality = BaseQualityTable::new();
    let mut adapters = AdapterCounter::new(vec![b"ACGTACGT".to_vec()]).unwrap();

    while let Some(batch) = parser.next_batch() {
        let mut batch = batch.unwrap();
        quality.add(&mut batch).unwrap();
        adapters.add(&batch).unwrap();
    }

    assert_eq!(quality.number_of_reads(), 500);
    let (_, counts) = adapters.get_counts()[0];
    assert_eq!(counts[0], 500); // every read starts with the adapter sequence
}

#[test]
fn insert_size_metrics_over_a_batch_of_pairs() {
    let mut metrics = InsertSizeMetrics::default_config().unwrap();
    let core = b"ACGTACGTACGTACGTACGTACGTACGTACGT";
    let rc: Vec<u8> = core.iter().rev().map(|&b| match b {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        other => other,
    }).collect();

    for _ in 0..10 {
        metrics.add_pair(core, &rc);
    }

    assert!(metrics.insert_sizes().iter().skip(1).any(|&c| c == 10));
}
