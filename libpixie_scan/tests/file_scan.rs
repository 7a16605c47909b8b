use std::fs::File;
use std::io::{BufReader, Cursor, Write};
use std::sync::mpsc;

use byteorder::{LittleEndian, WriteBytesExt};

use libpixie_scan::analyzer::EventTally;
use libpixie_scan::buffer::{read_buffer, write_buffer, BufferType, Framing};
use libpixie_scan::channel_hit::ChannelHit;
use libpixie_scan::config::{Config, FileFormat, InputFormat};
use libpixie_scan::constants::*;
use libpixie_scan::ldf::{DirBuffer, LdfHeader};
use libpixie_scan::output_file::OutputFile;
use libpixie_scan::process::process_file;
use libpixie_scan::spill::{encode_spill, SpillReader, SpillVerdict};
use libpixie_scan::transport::{FileTransport, Transport, TransportEvent};
use libpixie_scan::word_decoder::{encode, encode_stats_block};

fn hit(slot: u8, channel: u8, time: u64, energy: u32) -> ChannelHit {
    ChannelHit {
        module: slot as u32 - DEFAULT_FIRST_SLOT as u32,
        slot,
        channel,
        coarse_time: time,
        energy,
        ..Default::default()
    }
}

/// A spill with two modules; module 1 hits trail module 0 by a few ticks
fn make_spill(start: u64) -> Vec<u32> {
    let mut module_0 = Vec::new();
    let mut module_1 = Vec::new();
    for n in 0..10 {
        let time = start + n * 1000;
        module_0.extend(encode(&hit(2, 0, time, 100 + n as u32)).unwrap());
        module_1.extend(encode(&hit(3, 4, time + 5, 200)).unwrap());
    }
    encode_spill(&[(0, module_0), (1, module_1)])
}

fn collect_spills<T: Transport>(transport: &mut T) -> Vec<Vec<u32>> {
    let mut spills = Vec::new();
    loop {
        match transport.next_spill().unwrap() {
            TransportEvent::Spill(words) => spills.push(words),
            TransportEvent::Exhausted => break,
            other => panic!("unexpected transport event {other:?}"),
        }
    }
    spills
}

#[test]
fn written_files_read_back_through_the_transport() {
    let dir = tempfile::tempdir().unwrap();
    let spills: Vec<Vec<u32>> = (0..30).map(|n| make_spill(n * 1_000_000)).collect();

    for (format, name) in [(FileFormat::Ldf, "run.ldf"), (FileFormat::Pld, "run.pld")] {
        let path = dir.path().join(name);
        let mut output = OutputFile::create(&path, format, "round trip", 17).unwrap();
        for spill in spills.iter() {
            output.write_spill(spill).unwrap();
        }
        output.close().unwrap();

        let mut transport = FileTransport::open(&path, None).unwrap();
        assert_eq!(transport.format(), format);
        assert_eq!(collect_spills(&mut transport), spills);
        assert_eq!(transport.run_number(), Some(17));
        assert_eq!(transport.progress(), Some(1.0));
    }

    // DIR count covers every buffer in the legacy file
    let path = dir.path().join("run.ldf");
    let size = std::fs::metadata(&path).unwrap().len();
    let mut reader = BufReader::new(File::open(&path).unwrap());
    let buffer = read_buffer(&mut reader, BufferType::Dir, Framing::Fixed).unwrap();
    let dir_buffer = DirBuffer::from_payload(&buffer.payload).unwrap();
    assert_eq!(
        dir_buffer.number_of_buffers as u64,
        size / (LDF_BUFFER_WORDS as u64 * 4)
    );
    assert_eq!(dir_buffer.run_number, 17);
}

#[test]
fn batch_scan_counts_spills_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.pld");
    let mut output = OutputFile::create(&path, FileFormat::Pld, "scan", 3).unwrap();
    for n in 0..5 {
        output.write_spill(&make_spill(n * 1_000_000)).unwrap();
    }
    output.close().unwrap();

    let config = Config {
        input_path: Some(path),
        input_format: InputFormat::Pld,
        output_path: Some(dir.path().join("copy.ldf")),
        carry_tail: true,
        ..Default::default()
    };
    config.validate().unwrap();
    let (tx, rx) = mpsc::channel();
    let snapshot = process_file(&config, Box::new(EventTally::new()), &tx).unwrap();
    assert_eq!(snapshot.spills, 5);
    assert_eq!(snapshot.bad_spills, 0);
    assert_eq!(snapshot.hits, 100);
    // Each pair of hits 5 ticks apart is one event
    assert_eq!(snapshot.events, 50);
    assert_eq!(snapshot.module_hits.get(&1), Some(&50));

    let statuses: Vec<_> = rx.try_iter().collect();
    assert!(statuses.last().is_some_and(|s| s.is_finished() && s.spills == 5));

    let mut copy = FileTransport::open(&dir.path().join("copy.ldf"), None).unwrap();
    assert_eq!(collect_spills(&mut copy).len(), 5);
}

/// Build one legacy DATA buffer by hand: a single chunk holding the whole spill
fn raw_data_buffer(spill: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.write_u32::<LittleEndian>(DATA_TAG).unwrap();
    bytes.write_u32::<LittleEndian>(LDF_PAYLOAD_WORDS as u32).unwrap();
    bytes
        .write_u32::<LittleEndian>(((spill.len() + LDF_CHUNK_HEADER_WORDS) * 4) as u32)
        .unwrap();
    bytes.write_u32::<LittleEndian>(1).unwrap();
    bytes.write_u32::<LittleEndian>(1).unwrap();
    for word in spill {
        bytes.write_u32::<LittleEndian>(*word).unwrap();
    }
    while bytes.len() < LDF_BUFFER_WORDS * 4 {
        bytes.write_u32::<LittleEndian>(BUFFER_FILLER).unwrap();
    }
    bytes
}

fn eof_buffer() -> Vec<u8> {
    let mut stream = Cursor::new(Vec::new());
    write_buffer(&mut stream, BufferType::Eof, &[], Framing::Fixed).unwrap();
    stream.into_inner()
}

#[test]
fn legacy_buffer_trailer_decides_the_verdict() {
    let good = make_spill(0);
    let mut bad = good.clone();
    let last = bad.len() - 1;
    bad[last] = 0x00000001;

    let mut bytes = Vec::new();
    write_buffer(&mut bytes, BufferType::Dir, &DirBuffer::new(1).to_words(), Framing::Fixed)
        .unwrap();
    bytes.extend(raw_data_buffer(&good));
    bytes.extend(raw_data_buffer(&bad));
    bytes.extend(eof_buffer());
    bytes.extend(eof_buffer());
    assert_eq!(bytes.len(), 5 * LDF_BUFFER_WORDS * 4);

    let total = bytes.len() as u64;
    let mut transport = FileTransport::from_reader(Cursor::new(bytes), None, total).unwrap();
    let spills = collect_spills(&mut transport);
    assert_eq!(spills.len(), 2);

    let mut reader = SpillReader::default();
    let mut hits = Vec::new();
    assert!(matches!(
        reader.read_spill(&spills[0], &mut hits),
        SpillVerdict::Full(summary) if summary.hits == 20
    ));
    assert!(matches!(
        reader.read_spill(&spills[1], &mut hits),
        SpillVerdict::Bad(_)
    ));
    assert_eq!(hits.len(), 20);
    assert_eq!((reader.full_spills(), reader.bad_spills()), (1, 1));
}

#[test]
fn single_eof_separates_runs_and_double_eof_ends_the_file() {
    let mut bytes = Vec::new();
    for run in [1, 2] {
        write_buffer(&mut bytes, BufferType::Dir, &DirBuffer::new(run).to_words(), Framing::Fixed)
            .unwrap();
        write_buffer(
            &mut bytes,
            BufferType::Head,
            &LdfHeader::new("multi run", run).to_words(),
            Framing::Fixed,
        )
        .unwrap();
        bytes.extend(raw_data_buffer(&make_spill(run as u64)));
        bytes.extend(eof_buffer());
    }
    bytes.extend(eof_buffer());
    // Anything after the double EOF is never read
    bytes.extend(raw_data_buffer(&make_spill(99)));

    let mut transport = FileTransport::from_reader(Cursor::new(bytes), None, 0).unwrap();
    assert_eq!(collect_spills(&mut transport).len(), 2);
    assert_eq!(transport.run_number(), Some(2));
}

#[test]
fn statistics_blocks_are_skipped() {
    let mut words = encode_stats_block(&[0xABCD; 6]).unwrap();
    words.extend(encode(&hit(2, 1, 50, 10)).unwrap());
    words.extend(encode_stats_block(&[]).unwrap());
    let spill = encode_spill(&[(0, words)]);

    let mut reader = SpillReader::default();
    let mut hits = Vec::new();
    match reader.read_spill(&spill, &mut hits) {
        SpillVerdict::Full(summary) => {
            assert_eq!(summary.hits, 1);
            assert_eq!(summary.decode_errors, 0);
        }
        other => panic!("expected a full spill, got {other:?}"),
    }
    assert_eq!(hits, vec![hit(2, 1, 50, 10)]);
}

#[test]
fn truncated_pld_file_keeps_complete_spills() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.pld");
    let mut output = OutputFile::create(&path, FileFormat::Pld, "cut", 1).unwrap();
    output.write_spill(&make_spill(0)).unwrap();
    output.write_spill(&make_spill(10_000)).unwrap();
    output.close().unwrap();

    // Drop the EOF buffer and half of the last spill
    let mut bytes = std::fs::read(&path).unwrap();
    let cut = bytes.len() - 8 - make_spill(0).len() * 2;
    bytes.truncate(cut);
    File::create(&path).unwrap().write_all(&bytes).unwrap();

    let mut transport = FileTransport::open(&path, Some(FileFormat::Pld)).unwrap();
    assert_eq!(collect_spills(&mut transport), vec![make_spill(0)]);
}

#[test]
fn truncated_legacy_file_keeps_complete_spills() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.ldf");
    let spills: Vec<Vec<u32>> = (0..200).map(|n| make_spill(n * 1_000_000)).collect();
    let mut output = OutputFile::create(&path, FileFormat::Ldf, "cut", 8).unwrap();
    for spill in spills.iter() {
        output.write_spill(spill).unwrap();
    }
    output.close().unwrap();

    // Drop the EOF pair and the end of the last DATA buffer
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 2 * LDF_BUFFER_WORDS * 4 - 100);
    File::create(&path).unwrap().write_all(&bytes).unwrap();

    let mut transport = FileTransport::open(&path, None).unwrap();
    let kept = collect_spills(&mut transport);
    assert!(!kept.is_empty() && kept.len() < spills.len());
    assert_eq!(kept[..], spills[..kept.len()]);

    let config = Config {
        input_path: Some(path),
        carry_tail: true,
        ..Default::default()
    };
    let (tx, _rx) = mpsc::channel();
    let snapshot = process_file(&config, Box::new(EventTally::new()), &tx).unwrap();
    assert_eq!(snapshot.spills, kept.len() as u64);
    assert_eq!(snapshot.bad_spills, 0);
    assert_eq!(snapshot.events, 10 * kept.len() as u64);
}

#[test]
fn unreachable_statistics_collector_does_not_stop_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.pld");
    let mut output = OutputFile::create(&path, FileFormat::Pld, "stats", 2).unwrap();
    for n in 0..20 {
        output.write_spill(&make_spill(n * 1_000_000)).unwrap();
    }
    output.close().unwrap();

    let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = closed.local_addr().unwrap().to_string();
    drop(closed);

    let config = Config {
        input_path: Some(path),
        stats_address: Some(address),
        stats_interval_s: 0,
        ..Default::default()
    };
    let (tx, _rx) = mpsc::channel();
    let snapshot = process_file(&config, Box::new(EventTally::new()), &tx).unwrap();
    assert_eq!(snapshot.spills, 20);
    assert_eq!(snapshot.hits, 400);
}
