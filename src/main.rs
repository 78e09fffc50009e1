//! scam-shield CLI: offline scam-risk scoring for text and audio.

use std::io::{BufRead, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use scam_shield::config::ShieldConfig;
use scam_shield::error::ShieldError;
use scam_shield::pipeline::{DropFolder, ScanReport, StopSignal, ledger};
use scam_shield::record::{RecordError, ResultRecord};
use scam_shield::shield::Shield;
use scam_shield::timeline;

#[derive(Parser)]
#[command(
    name = "scam-shield",
    version,
    about = "Offline scam-risk scoring with per-source escalation tracking"
)]
struct Cli {
    /// Configuration file (TOML). Defaults to $XDG_CONFIG_HOME/scam-shield/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Custom phrase bank (TOML) replacing the built-in one.
    #[arg(long, global = true)]
    phrase_bank: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score text given as an argument or on stdin.
    Score {
        /// Text to score. Read from stdin when omitted.
        text: Option<String>,

        /// Source id the text belongs to (caller, chat, session).
        #[arg(long)]
        source: Option<String>,

        /// Print JSON instead of a report.
        #[arg(long)]
        json: bool,

        /// Score every stdin line as a separate event of the same source.
        #[arg(long, conflicts_with = "text")]
        stream: bool,
    },

    /// Transcribe and score one audio file.
    Transcribe {
        file: PathBuf,

        /// Backend to use instead of the configured default / fallback order.
        #[arg(long)]
        backend: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Process the inbox once and exit.
    Inbox {
        #[arg(long)]
        inbox: Option<PathBuf>,

        #[arg(long)]
        outbox: Option<PathBuf>,
    },

    /// Watch the inbox until interrupted (SIGINT / SIGTERM).
    Watch {
        #[arg(long)]
        inbox: Option<PathBuf>,

        #[arg(long)]
        outbox: Option<PathBuf>,

        /// Seconds between scans.
        #[arg(long)]
        poll: Option<u64>,
    },

    /// List speech-to-text backends and whether they are installed.
    Backends,

    /// Show the phrase bank in use.
    Phrases {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ShieldConfig::load(cli.config.as_deref())?;
    if let Some(bank) = cli.phrase_bank {
        config.phrase_bank = Some(bank);
    }

    match cli.command {
        Commands::Score {
            text,
            source,
            json,
            stream,
        } => {
            let mut shield = Shield::from_config(&config)?;
            let source = timeline::source_or_default(source.as_deref()).to_string();

            if stream {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let line = line.into_diagnostic()?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record = shield.assess(&line, Some(&source));
                    emit(&record, json)?;
                }
                return Ok(());
            }

            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).into_diagnostic()?;
                    buf
                }
            };
            let record = shield.assess(&text, Some(&source));
            emit(&record, json)?;
        }

        Commands::Transcribe {
            file,
            backend,
            source,
            json,
        } => {
            let mut shield = Shield::from_config(&config)?;
            let source = timeline::source_or_default(source.as_deref()).to_string();
            let fingerprint = ledger::fingerprint(&file)?;

            match shield.analyze_audio(&file, &source, backend.as_deref()) {
                Ok(assessment) => {
                    let record = ResultRecord::for_audio(&file, &fingerprint, &assessment);
                    emit(&record, json)?;
                }
                Err(e) => {
                    let record = ResultRecord::failed_file(
                        &file,
                        &fingerprint,
                        &source,
                        RecordError::from_stt(&e, 1),
                    );
                    emit(&record, json)?;
                    return Err(ShieldError::from(e).into());
                }
            }
        }

        Commands::Inbox { inbox, outbox } => {
            apply_dirs(&mut config, inbox, outbox);
            let mut shield = Shield::from_config(&config)?;
            let mut drop_folder = DropFolder::new(&mut shield, config.pipeline.clone())?;
            let report = drop_folder.run_once()?;
            print_report(&report);
        }

        Commands::Watch {
            inbox,
            outbox,
            poll,
        } => {
            apply_dirs(&mut config, inbox, outbox);
            if let Some(poll) = poll {
                config.pipeline.poll_secs = poll;
            }
            let mut shield = Shield::from_config(&config)?;

            let stop = StopSignal::new();
            stop.register_os_signals().into_diagnostic()?;

            std::fs::create_dir_all(&config.pipeline.inbox).into_diagnostic()?;
            let mut drop_folder = DropFolder::new(&mut shield, config.pipeline.clone())?;
            let report = drop_folder.watch(&stop);
            print_report(&report);
        }

        Commands::Backends => {
            config.validate()?;
            let gateway = scam_shield::stt::SttGateway::from_config(&config.stt);
            let default = config.stt.backend.as_deref();
            for status in gateway.statuses() {
                let marker = if Some(status.name) == default { " (default)" } else { "" };
                let state = if status.available { "available" } else { "not installed" };
                println!("{:<10} {state}{marker}", status.name);
            }
            match gateway.decoder() {
                Some(path) => println!("{:<10} {}", "ffmpeg", path.display()),
                None => println!("{:<10} not installed (only 16 kHz mono WAV accepted)", "ffmpeg"),
            }
        }

        Commands::Phrases { json } => {
            let shield = Shield::from_config(&config)?;
            let bank = shield.scorer().bank();
            if json {
                let out = serde_json::to_string_pretty(bank.categories()).into_diagnostic()?;
                println!("{out}");
            } else {
                println!(
                    "Phrase bank: {} categories, {} patterns",
                    bank.categories().len(),
                    bank.len()
                );
                for cat in bank.categories() {
                    let cap = cat.cap.map(|c| format!(", cap {c}")).unwrap_or_default();
                    println!(
                        "\n{} (weight {}{cap}) {}",
                        cat.name, cat.weight, cat.description
                    );
                    for phrase in &cat.phrases {
                        println!("  \"{phrase}\"");
                    }
                    for regex in &cat.regexes {
                        println!("  /{regex}/");
                    }
                }
            }
        }
    }

    Ok(())
}

fn apply_dirs(config: &mut ShieldConfig, inbox: Option<PathBuf>, outbox: Option<PathBuf>) {
    if let Some(inbox) = inbox {
        config.pipeline.inbox = inbox;
    }
    if let Some(outbox) = outbox {
        config.pipeline.outbox = outbox;
    }
}

fn emit(record: &ResultRecord, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string(record).into_diagnostic()?;
        println!("{out}");
    } else {
        println!("{}", record.render_text());
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("{report}");
}
