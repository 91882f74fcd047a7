use std::io::Read;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use liftlog::app::{self, App, AppError};
use liftlog::cli::{Cli, Commands};
use liftlog::config::SyncConfig;
use liftlog::scheduler::SaveEventKind;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LIFTLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(debounce_ms) = cli.debounce_ms {
        config.debounce_ms = debounce_ms;
    }
    let app = App::open(&cli.db, config, &cli.account)?;

    match cli.command {
        Commands::Init => {
            println!(
                "liftlog init completed (schema v{}) at {}",
                app.schema_version()?,
                cli.db.display()
            );
        }
        Commands::Save(args) => {
            let key = app.key(&args.slot.program, args.slot.week, args.slot.day)?;
            let exercises = app::parse_exercises(&read_input(&args.exercises)?, &args.exercises)?;
            let runtime = build_runtime()?;
            match runtime.block_on(app.save(key.clone(), exercises, args.finished))? {
                Some(receipt) if args.json => print_json(&receipt),
                Some(receipt) => println!(
                    "saved {} as {} ({:?}, {} attempt(s){})",
                    receipt.key,
                    receipt.log_id,
                    receipt.mode,
                    receipt.attempts,
                    if receipt.degraded { ", unconfirmed id" } else { "" }
                ),
                None if args.json => print_json(&serde_json::json!({
                    "key": key,
                    "status": "skipped",
                })),
                None => println!("nothing to save for {key}"),
            }
        }
        Commands::Show(args) => {
            let key = app.key(&args.slot.program, args.slot.week, args.slot.day)?;
            let record = app.show(&key)?;
            if args.json {
                print_json(&record);
            } else {
                println!("{} {}", record.id, record.name);
                println!(
                    "finished: {}  updated: {}  completed: {}",
                    record.is_finished,
                    record.updated_at,
                    record.completed_at.as_deref().unwrap_or("-")
                );
                for exercise in &record.exercises {
                    println!(
                        "  {}: {}/{} sets done, reps {:?}",
                        exercise.exercise_id,
                        exercise.completed_sets(),
                        exercise.sets,
                        exercise.reps
                    );
                }
            }
        }
        Commands::Replay(args) => {
            let edits = app::parse_replay(&std::fs::read_to_string(&args.file)?)?;
            let runtime = build_runtime()?;
            let report = runtime.block_on(app.replay(edits))?;
            for event in &report.events {
                if args.json {
                    println!(
                        "{}",
                        serde_json::to_string(event).expect("json serialization should work")
                    );
                    continue;
                }
                match &event.kind {
                    SaveEventKind::Saved(receipt) => {
                        println!("saved {} -> {} ({:?})", event.key, receipt.log_id, receipt.mode)
                    }
                    SaveEventKind::Skipped => println!("skipped {} (empty batch)", event.key),
                    SaveEventKind::Failed { class, message, .. } => {
                        println!("failed {} [{class}]: {message}", event.key)
                    }
                }
            }
            if !args.json {
                println!(
                    "{} saved, {} failed, {} unsaved",
                    report.saved(),
                    report.failed(),
                    report.abandoned
                );
            }
            if report.failed() > 0 {
                return Err(AppError::InvalidArgument(format!(
                    "{} save(s) failed during replay",
                    report.failed()
                )));
            }
        }
    }
    Ok(())
}

fn read_input(source: &str) -> Result<String, AppError> {
    if source == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        return Ok(raw);
    }
    Ok(std::fs::read_to_string(source)?)
}

fn build_runtime() -> Result<tokio::runtime::Runtime, AppError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?)
}
