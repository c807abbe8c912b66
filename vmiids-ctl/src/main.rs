// src/main.rs

//! `vmiids-ctl`: administrative client for a running daemon.
//!
//! Exit status: 0 when the daemon accepted the request, 1 when it answered
//! with a failure, 2 when it could not be reached.

use std::{process::ExitCode, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use shared::{
    ClientError, ControlClient, Fault,
    constants::{DEFAULT_CONTROL_ADDR, DEFAULT_RPC_TIMEOUT},
    control::{ModuleListing, StatusReply},
};

#[derive(Debug, Parser)]
#[command(name = "vmiids-ctl", version, about = "Control a running vmiids daemon")]
struct Cli {
    /// Control-plane address of the daemon.
    #[arg(short, long, default_value = DEFAULT_CONTROL_ADDR)]
    server: String,

    /// Per-call timeout, e.g. `10s` or `1m`.
    #[arg(short, long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Activate a detection module.
    Enqueue { name: String },
    /// Deactivate a detection module.
    Dequeue { name: String },
    /// Run one detection module now and print its output.
    Run { name: String },
    /// Stop the daemon.
    Stop {
        #[arg(long, default_value_t = 0)]
        signal: i32,
    },
    /// Load a module library on the daemon host.
    Load { path: String },
    /// Show known modules and loaded libraries.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Report whether the guest is running.
    Status,
}

enum Outcome {
    Accepted,
    Rejected,
}

fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}] {}",
                chrono::Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                msg
            ))
        })
        .level(LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn status(reply: StatusReply) -> Outcome {
    if reply.success {
        println!("{}", reply.message);
        Outcome::Accepted
    } else {
        eprintln!("error [{}]: {}", fault_name(reply.fault), reply.message);
        Outcome::Rejected
    }
}

fn fault_name(raw: i32) -> &'static str {
    Fault::try_from(raw).unwrap_or(Fault::Unspecified).as_str()
}

fn print_listing(listing: &ModuleListing, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "collecting": listing.collecting,
            "modules": listing.modules.iter().map(|m| serde_json::json!({
                "kind": m.kind,
                "name": m.name,
                "origin": m.origin,
                "active": m.active,
            })).collect::<Vec<_>>(),
            "libraries": listing.libraries.iter().map(|l| serde_json::json!({
                "path": l.path,
                "sha256": l.sha256,
                "modules": l.modules,
                "loaded_at": l.loaded_at.as_ref().map(|t| t.seconds),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("collection loop: {}", if listing.collecting { "running" } else { "idle" });
    for m in &listing.modules {
        println!(
            "{:<12} {:<32} {:<8} {}",
            m.kind,
            m.name,
            if m.active { "active" } else { "-" },
            m.origin
        );
    }
    for l in &listing.libraries {
        println!("library {} sha256={} [{}]", l.path, l.sha256, l.modules.join(", "));
    }
    Ok(())
}

fn execute(client: &mut ControlClient, command: Command) -> Result<Outcome> {
    Ok(match command {
        Command::Enqueue { name } => status(client.enqueue_detection_module(&name)?),
        Command::Dequeue { name } => status(client.dequeue_detection_module(&name)?),
        Command::Stop { signal } => status(client.stop_ids(signal)?),
        Command::Load { path } => status(client.load_shared_object(&path)?),
        Command::Run { name } => {
            let reply = client.run_single_detection_module(&name)?;
            if reply.success {
                println!("{}", reply.output);
                Outcome::Accepted
            } else {
                eprintln!("error [{}]: {}", fault_name(reply.fault), reply.message);
                Outcome::Rejected
            }
        }
        Command::List { json } => {
            print_listing(&client.list_modules()?, json)?;
            Outcome::Accepted
        }
        Command::Status => {
            let reply = client.vm_status()?;
            if reply.success {
                println!("{}", if reply.running { "running" } else { "paused" });
                Outcome::Accepted
            } else {
                eprintln!("error [{}]: {}", fault_name(reply.fault), reply.message);
                Outcome::Rejected
            }
        }
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_logging() {
        eprintln!("logging setup failed: {e}");
    }

    let timeout = cli.timeout.unwrap_or(DEFAULT_RPC_TIMEOUT);
    let result = ControlClient::connect_with_timeout(&cli.server, timeout)
        .map_err(anyhow::Error::from)
        .and_then(|mut client| execute(&mut client, cli.command));

    match result {
        Ok(Outcome::Accepted) => ExitCode::SUCCESS,
        Ok(Outcome::Rejected) => ExitCode::from(1),
        Err(e) => {
            eprintln!("vmiids-ctl: {e:#}");
            match e.downcast_ref::<ClientError>() {
                Some(ce) if ce.is_transport() => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}
