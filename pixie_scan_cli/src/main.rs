//! # pixie_scan_cli
//!
//! Part of the pixie_scan crate family.
//!
//! Scan Pixie16 list-mode data from a file, or live from the acquisition over UDP.
//!
//! ```bash
//! pixie_scan_cli run_0012.ldf
//! pixie_scan_cli -c config.yml --shm --port 5555
//! pixie_scan_cli new -c config.yml
//! ```
//!
//! In live mode the terminal accepts the commands `start`, `stop`, `status` and `quit`.
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use libpixie_scan::analyzer::EventTally;
use libpixie_scan::config::{Config, FileFormat, InputFormat};
use libpixie_scan::process::{create_stats, process, Pipeline};
use libpixie_scan::run_control::RunControl;
use libpixie_scan::transport::UdpTransport;
use libpixie_scan::worker_status::BarColor;

const LOG_FILE: &str = "./pixie_scan.log";

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Could not write template config: {e}"),
    }
}

fn cli() -> Command {
    Command::new("pixie_scan_cli")
        .about("Scan Pixie16 list-mode data into correlated events")
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .required(true)
                        .help("Path to write the template to"),
                ),
        )
        .arg(Arg::new("input").help("Input .ldf or .pld file"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a configuration file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Copy good spills to this file"),
        )
        .arg(Arg::new("ldf").long("ldf").action(ArgAction::SetTrue).help("Input is legacy .ldf"))
        .arg(Arg::new("pld").long("pld").action(ArgAction::SetTrue).help("Input is .pld"))
        .arg(
            Arg::new("shm")
                .long("shm")
                .action(ArgAction::SetTrue)
                .help("Receive spills live over UDP"),
        )
        .group(ArgGroup::new("format").args(["ldf", "pld", "shm"]))
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Verbose logging"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Decode and correlate without analyzing events"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_parser(clap::value_parser!(u64))
                .help("Event width in clock ticks"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(clap::value_parser!(u16))
                .help("UDP port for live data"),
        )
}

/// Command line flags override the configuration file
fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(input) = matches.get_one::<String>("input") {
        config.input_path = Some(PathBuf::from(input));
    }
    if let Some(output) = matches.get_one::<String>("output") {
        let output = PathBuf::from(output);
        if output.extension().is_some_and(|e| e == "pld") {
            config.output_format = FileFormat::Pld;
        }
        config.output_path = Some(output);
    }
    if matches.get_flag("ldf") {
        config.input_format = InputFormat::Ldf;
    } else if matches.get_flag("pld") {
        config.input_format = InputFormat::Pld;
    } else if matches.get_flag("shm") {
        config.input_format = InputFormat::Shm;
    }
    if matches.get_flag("debug") {
        config.debug = true;
    }
    if matches.get_flag("dry-run") {
        config.dry_run = true;
    }
    if let Some(width) = matches.get_one::<u64>("width") {
        config.event_width = *width;
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.shm_port = *port;
    }
}

/// Detailed logs go to a file through spdlog
fn init_file_logger(debug: bool) {
    let file_sink = spdlog::sink::FileSink::builder()
        .path(PathBuf::from(LOG_FILE))
        .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
            spdlog::formatter::pattern!(
                "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
            ),
        )))
        .truncate(true)
        .build();
    let file_sink = match file_sink {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::error!("Could not open log file {LOG_FILE}: {e}");
            return;
        }
    };
    let level = if debug {
        spdlog::LevelFilter::All
    } else {
        spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Info)
    };
    match spdlog::Logger::builder()
        .level_filter(level)
        .flush_level_filter(spdlog::LevelFilter::All)
        .sink(file_sink)
        .build()
    {
        Ok(logger) => spdlog::set_default_logger(Arc::new(logger)),
        Err(e) => log::error!("Could not create file logger: {e}"),
    }
}

fn run_batch(config: Config, pb_manager: &MultiProgress) {
    let pb = pb_manager.add(ProgressBar::new(100));
    let set_color = |color: &BarColor| {
        let template = format!("{{bar:40.{}/blue}} {{pos:>3}}% {{msg}}", color.as_str());
        if let Ok(style) = ProgressStyle::with_template(&template) {
            pb.set_style(style);
        }
    };
    set_color(&BarColor::default());
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || process(config, tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(status) => {
                if status.is_finished() {
                    set_color(&status.color);
                }
                pb.set_position((status.progress * 100.0) as u64);
                pb.set_message(format!("run {} - {} spills", status.run_number, status.spills));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(snapshot)) => log::info!("Scan complete: {}", snapshot.summary()),
        Ok(Err(e)) => log::error!("Scan failed with error: {e}. Check {LOG_FILE}"),
        Err(_) => log::error!("Failed to join scan task!"),
    }
}

fn run_live(config: Config) {
    let transport = match UdpTransport::bind(config.shm_port, config.receive_timeout()) {
        Ok(t) => t,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let pipeline = match create_stats(&config)
        .and_then(|stats| Pipeline::new(&config, Box::new(EventTally::new()), stats))
    {
        Ok(p) => p,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let control = RunControl::spawn(Box::new(transport), pipeline);
    log::info!("Listening on port {}. Commands: start, stop, status, quit", config.shm_port);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if control.has_exited() {
            log::info!("Run control has exited.");
            break;
        }
        match line.trim() {
            "start" => control.start(),
            "stop" => control.stop(),
            "status" => match control.snapshot() {
                Ok(snapshot) => log::info!(
                    "[{}] {}",
                    if control.is_acquiring() { "running" } else { "stopped" },
                    snapshot.summary()
                ),
                Err(e) => log::error!("{e}"),
            },
            "quit" | "exit" => break,
            "" => (),
            other => log::warn!("Unknown command '{other}'. Commands: start, stop, status, quit"),
        }
    }

    log::info!("Shutting down...");
    if let Err(e) = control.shutdown(config.receive_timeout() * 4 + Duration::from_secs(1)) {
        log::error!("Run control ended with error: {e}");
    }
}

fn main() {
    let matches = cli().get_matches();

    // Initialize feedback
    let debug = matches.get_flag("debug");
    let logger = simplelog::TermLogger::new(
        if debug {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let pb_manager = MultiProgress::new();
    if LogWrapper::new(pb_manager.clone(), logger).try_init().is_err() {
        eprintln!("Could not create logging/progress!");
        return;
    }

    if let Some(("new", sub)) = matches.subcommand() {
        if let Some(path) = sub.get_one::<String>("config") {
            log::info!("Making a template config at {path}...");
            make_template_config(Path::new(path));
        }
        return;
    }

    // Load our config
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            log::info!("Loading config from {path}...");
            match Config::read_config_file(Path::new(path)) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("{e}");
                    return;
                }
            }
        }
        None => Config::default(),
    };
    apply_overrides(&mut config, &matches);
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    init_file_logger(config.debug);
    spdlog::info!("Starting pixie_scan with {config:?}");

    log::info!("Input: {:?} ({:?})", config.input_path, config.input_format);
    log::info!("Output: {:?}", config.output_path);
    log::info!("Event width: {} ticks", config.event_width);

    if config.is_live() {
        run_live(config);
    } else {
        run_batch(config, &pb_manager);
    }
    log::info!("Done.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_config() {
        let matches = cli().get_matches_from([
            "pixie_scan_cli",
            "data.pld",
            "--pld",
            "--width",
            "250",
            "-o",
            "copy.pld",
            "--dry-run",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &matches);
        assert_eq!(config.input_path, Some(PathBuf::from("data.pld")));
        assert_eq!(config.input_format, InputFormat::Pld);
        assert_eq!(config.output_format, FileFormat::Pld);
        assert_eq!(config.event_width, 250);
        assert!(config.dry_run);
        assert!(!config.debug);
    }

    #[test]
    fn format_flags_conflict() {
        assert!(cli()
            .try_get_matches_from(["pixie_scan_cli", "--ldf", "--shm"])
            .is_err());
    }
}
