//! # pixie_scan
//!
//! pixie_scan is the acquisition-side data pipeline for XIA Pixie16 digital pulse
//! processing modules, written in Rust. It takes spills of list-mode data, either from
//! legacy .ldf files, .pld files, or live over UDP from the acquisition, and rebuilds them
//! into time-correlated raw events that are handed to an analyzer.
//!
//! ## Installation
//!
//! Currently the only method of install is from source. If you have not used Rust before,
//! you will most likely need to install the Rust tool chain. See the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./pixie_scan_cli` from the top
//! level repository. The binary will be installed to your cargo install location
//! (typically something like `~/.cargo/bin/`).
//!
//! ## Data flow
//!
//! ```text
//! Transport (file or UDP) -> SpillReader -> WordDecoder -> EventCorrelator -> Analyzer
//! ```
//!
//! - [transport] hands out whole spills. Files are read buffer by buffer; UDP datagrams
//! are reassembled from numbered chunk trains by the [chunk_assembler].
//! - [spill] checks the end-of-spill trailer, splits the spill into module blocks, and
//! feeds each block to the [word_decoder]. A spill with bad framing is dropped whole.
//! - [event_correlator] merges hits from all channels into time order and groups them in
//! fixed windows anchored at the earliest hit.
//! - [analyzer] is the boundary. Anything implementing [analyzer::Analyzer] can be attached.
//!
//! ## Configuration
//!
//! Configurations are YAML files. Any field left out takes its default:
//!
//! ```yml
//! input_path: run_0012.ldf
//! input_format: Auto
//! output_path: null
//! output_format: Ldf
//! run_title: pixie_scan
//! run_number: 0
//! event_width: 100
//! carry_tail: false
//! first_slot: 2
//! saturation_energy: 32767
//! shm_port: 5555
//! receive_timeout_ms: 500
//! stats_address: null
//! stats_interval_s: 3
//! dry_run: false
//! debug: false
//! ```
//!
//! `input_format` is one of `Auto`, `Ldf`, `Pld`, or `Shm` (live UDP). `event_width` is in
//! clock ticks of the 100 MHz timestamp clock. With `carry_tail` unset, hits left in the
//! open correlation window when a spill ends are discarded.
//!
//! ## Output
//!
//! Spills that pass the framing checks can be copied to an output file in either format.
//! A log file (`pixie_scan.log`) records the detailed status of the run; bad spills,
//! decode errors and lost chunk trains are reported there.
pub mod analyzer;
pub mod buffer;
pub mod channel_hit;
pub mod chunk_assembler;
pub mod config;
pub mod constants;
pub mod error;
pub mod event_correlator;
pub mod ldf;
pub mod output_file;
pub mod pld;
pub mod process;
pub mod run_control;
pub mod spill;
pub mod stats;
pub mod transport;
pub mod word_cursor;
pub mod word_decoder;
pub mod worker_status;
