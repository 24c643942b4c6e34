//! CLI entrypoint for `channel-cli`: an interactive shell for driving
//! objectives end to end, plus one-shot replay/status commands against a
//! persistent event log.

use std::path::PathBuf;
use std::sync::Arc;

use channel_cli::ChannelEngine;
use channel_core::persist::PersistentEventStore;
use channel_core::EventStore;
use channel_crypto::Identity;
use channel_spec::{Address, AllocationKind, FixedPart};
use channel_transport::{InVmQueue, Transport};
use clap::{Parser, Subcommand};
use rand_core::OsRng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_DATA_DIR: &str = "./channel-data";

#[derive(Parser, Debug)]
#[command(author, version, about = "State channel objective client", long_about = None)]
struct Cli {
    /// Increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Directory holding the persistent event log.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch an interactive shell: propose, approve, reject, send, status.
    Shell,
    /// Fold the entire event log and print a per-domain summary.
    Replay,
    /// Print the current log length and per-domain event counts.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store: Arc<dyn EventStore> = Arc::new(PersistentEventStore::open(&cli.data_dir)?);

    match cli.command {
        Commands::Shell => {
            let identity = Identity::generate(&mut OsRng);
            let transport: Arc<dyn Transport> = Arc::new(InVmQueue::with_store(store.clone()));
            let engine = ChannelEngine::new(transport, store, identity);
            run_shell(engine).await?
        }
        Commands::Replay => {
            let summary = fold_summary(store.as_ref());
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status => {
            println!("log length: {}", store.len());
            let summary = fold_summary(store.as_ref());
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn fold_summary(store: &dyn EventStore) -> channel_cli::LogSummary {
    use channel_core::reconstruct::Projection;
    let len = store.len();
    let mut summary = channel_cli::LogSummary::default();
    for event in store.read(0, len as usize) {
        summary.apply(&event);
    }
    summary
}

async fn run_shell(engine: ChannelEngine) -> anyhow::Result<()> {
    println!("channel-cli shell ready. Type :help for commands.");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":help" {
            println!(
                "Commands: :help, :quit, propose, approve <objective-id>, \
                 reject <objective-id> <reason>, send <to-hex> <payload>, status, replay"
            );
            continue;
        }
        if line == ":quit" {
            break;
        }
        if line == "propose" {
            match propose_demo_objective(&engine).await {
                Ok(id) => println!("proposed {id}"),
                Err(err) => println!("propose failed: {err}"),
            }
            continue;
        }
        if let Some(id) = line.strip_prefix("approve ") {
            match engine.approve(id.trim()).await {
                Ok(waiting_for) => println!("approved {id}, now waiting on {waiting_for:?}"),
                Err(err) => println!("approve failed: {err}"),
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("reject ") {
            if let Some((id, reason)) = rest.split_once(' ') {
                match engine.reject(id, reason.to_string()).await {
                    Ok(()) => println!("rejected {id}"),
                    Err(err) => println!("reject failed: {err}"),
                }
            } else {
                println!("usage: reject <objective-id> <reason>");
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("send ") {
            if let Some((to_hex, payload)) = rest.split_once(' ') {
                match parse_address(to_hex) {
                    Ok(to) => match engine.send_message(to, None, payload).await {
                        Ok(()) => println!("sent"),
                        Err(err) => println!("send failed: {err}"),
                    },
                    Err(err) => println!("invalid address: {err}"),
                }
            } else {
                println!("usage: send <to-hex> <payload>");
            }
            continue;
        }
        if line == "status" {
            println!("log length: {}", engine.log_len());
            for (id, waiting_for) in engine.objective_statuses() {
                println!("  {id}: {waiting_for:?}");
            }
            continue;
        }
        if line == "replay" {
            let summary = engine.replay().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            continue;
        }
        println!("unrecognized input, try :help");
    }
    Ok(())
}

async fn propose_demo_objective(engine: &ChannelEngine) -> anyhow::Result<String> {
    let me = engine.address();
    let peer = Address::new([0x42; 20]);
    let fixed_part = FixedPart::new(
        vec![me, peer],
        rand_nonce(),
        Address::new([0u8; 20]),
        86_400,
    )?;
    let outcome = demo_outcome(&fixed_part)?;
    engine.propose_direct_fund(fixed_part, 0, outcome).await
}

fn demo_outcome(fixed_part: &FixedPart) -> anyhow::Result<channel_spec::Outcome> {
    let allocations = fixed_part
        .participants
        .iter()
        .map(|p| {
            let mut destination = [0u8; 32];
            destination[12..].copy_from_slice(&p.0);
            channel_spec::Allocation::new(
                channel_spec::Hash32::new(destination),
                "1000000000000000000".to_string(),
                AllocationKind::Simple,
                Vec::new(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(channel_spec::Outcome(vec![channel_spec::AssetOutcome {
        asset: Address::new([0u8; 20]),
        allocations,
    }]))
}

fn rand_nonce() -> u64 {
    use rand_core::RngCore;
    OsRng.next_u64()
}

fn parse_address(hex_str: &str) -> anyhow::Result<Address> {
    let trimmed = hex_str.trim_start_matches("0x");
    let bytes = hex::decode(trimmed)?;
    let array: [u8; 20] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("address must be exactly 20 bytes"))?;
    Ok(Address::new(array))
}
