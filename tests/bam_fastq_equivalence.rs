//! Property 2: a BAM record decodes to the same name/sequence/quality
//! fields as the equivalent FASTQ record.

use readstat::parser::bam::DEFAULT_BUFFER_SIZE;
use readstat::{BamParser, FastqParser, Parser, SliceSource};

const MAGIC: &[u8; 4] = b"BAM\x01";

fn nibble_of(b: u8) -> u8 {
    match b {
        b'A' => 1,
        b'C' => 2,
        b'G' => 4,
        b'T' => 8,
        _ => 15,
    }
}

fn pack_seq(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < seq.len() {
        let hi = nibble_of(seq[i]);
        let lo = if i + 1 < seq.len() { nibble_of(seq[i + 1]) } else { 0 };
        out.push((hi << 4) | lo);
        i += 2;
    }
    out
}

fn build_bam(name: &str, seq: &[u8], quals_phred0: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());

    let mut rec = Vec::new();
    rec.extend_from_slice(&0i32.to_le_bytes());
    rec.extend_from_slice(&0i32.to_le_bytes());
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    rec.push(name_bytes.len() as u8);
    rec.push(0);
    rec.extend_from_slice(&0u16.to_le_bytes());
    rec.extend_from_slice(&0u16.to_le_bytes());
    rec.extend_from_slice(&0u16.to_le_bytes());
    rec.extend_from_slice(&(seq.len() as u32).to_le_bytes());
    rec.extend_from_slice(&0i32.to_le_bytes());
    rec.extend_from_slice(&0i32.to_le_bytes());
    rec.extend_from_slice(&0i32.to_le_bytes());
    rec.extend_from_slice(&name_bytes);
    rec.extend_from_slice(&pack_seq(seq));
    rec.extend_from_slice(quals_phred0);

    buf.extend_from_slice(&(rec.len() as u32).to_le_bytes());
    buf.extend_from_slice(&rec);
    buf
}

#[test]
fn bam_record_matches_its_fastq_equivalent() {
    let name = "r1";
    let seq = b"ACGTACGT";
    let quals0 = [30u8, 31, 32, 33, 34, 35, 36, 37]; // Phred+0

    let bam_bytes = build_bam(name, seq, &quals0);
    let mut bam_parser = BamParser::with_capacity(SliceSource::new(&bam_bytes), DEFAULT_BUFFER_SIZE).unwrap();
    let bam_batch = bam_parser.next_batch().unwrap().unwrap();
    let bam_rec = bam_batch.get(0).unwrap();

    let quals33: Vec<u8> = quals0.iter().map(|&q| q + 33).collect();
    let fastq = format!(
        "@{name}\n{}\n+\n{}\n",
        std::str::from_utf8(seq).unwrap(),
        std::str::from_utf8(&quals33).unwrap()
    );
    let mut fastq_parser = FastqParser::new(SliceSource::new(fastq.as_bytes()));
    let fastq_batch = fastq_parser.next_batch().unwrap().unwrap();
    let fastq_rec = fastq_batch.get(0).unwrap();

    assert_eq!(bam_rec.name(), fastq_rec.name());
    assert_eq!(bam_rec.sequence(), fastq_rec.sequence());
    assert_eq!(bam_rec.qualities(), fastq_rec.qualities());
}
