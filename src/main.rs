use anyhow::{Context, Result};
use bytes::Bytes;
use callcore::CallState;
use chrono::Local;
use clap::Parser;
use log::{error, info};
use peercall::config::CallConfig;
use peercall::conversation::Conversation;
use peercall::driver::{Command, ConversationDriver};
use peercall::relay::{MemoryRelay, forward_events};
use peercall::stack::FakeNetwork;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// Two peers in one process, linked by the fake media stack and an
// in-memory relay: alice says hi, calls bob, optionally sends him a file,
// puts the call on hold, resumes and hangs up.
//
// Usage:
//   cargo run                                  # audio call, no file
//   cargo run -- --video --file Cargo.toml     # video call and a transfer
//   cargo run -- -f notes.txt --chunk-size 64  # small chunks

#[derive(Parser, Debug)]
#[command(name = "peercall", version, about = "Two in-process peers: chat, a call and a file transfer")]
struct Args {
    /// File alice sends to bob during the call
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Bytes per file chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Place a video call instead of an audio call
    #[arg(long)]
    video: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CallConfig::from_json_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => CallConfig::default(),
    };
    if let Some(chunk_size) = args.chunk_size {
        config.file_chunk_size = chunk_size;
    }
    config.force_fake_media = true;
    config.validate()?;
    info!("Using {config:?}");

    let file = match &args.file {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            Some((name, Bytes::from(data)))
        }
        None => None,
    };

    let relay = MemoryRelay::new();
    let (alice_stack, bob_stack) = FakeNetwork::pair();
    let (alice, alice_native) = Conversation::new("alice", "bob", config.clone(), alice_stack);
    let (bob, bob_native) = Conversation::new("bob", "alice", config, bob_stack);

    let (alice_relay, alice_inbox) = relay.register("alice");
    let (bob_relay, bob_inbox) = relay.register("bob");
    let alice_forward = forward_events(alice.call_events(), alice.events(), Arc::new(alice_relay));
    let bob_forward = forward_events(bob.call_events(), bob.events(), Arc::new(bob_relay));

    let mut alice_calls = alice.call_events().state_changed.subscribe();
    let mut bob_calls = bob.call_events().state_changed.subscribe();
    let mut bob_chat = bob.events().chat_message.subscribe();
    let mut bob_files = bob.events().transfer_complete.subscribe();

    let (alice_driver, alice_handle) = ConversationDriver::new(alice, alice_native, alice_inbox);
    let (bob_driver, bob_handle) = ConversationDriver::new(bob, bob_native, bob_inbox);
    let alice_task = tokio::spawn(alice_driver.run());
    let bob_task = tokio::spawn(bob_driver.run());

    alice_handle.send(Command::SendMessage("Hi Bob!".into()))?;
    let message = wait_for(&mut bob_chat, |_| true).await?;
    info!("bob received \"{}\" from {}", message.text, message.sender);

    alice_handle.send(Command::StartCall {
        video: args.video,
        audio: true,
    })?;
    wait_for(&mut bob_calls, |change| change.to == CallState::Incoming).await?;
    bob_handle.send(Command::Accept)?;
    wait_for(&mut alice_calls, |change| change.to == CallState::Ongoing).await?;
    info!("Call between alice and bob is up");

    if let Some((filename, data)) = file {
        alice_handle.send(Command::SendFile { filename, data })?;
        let done = wait_for(&mut bob_files, |_| true).await?;
        info!(
            "bob received {} ({} bytes)",
            done.summary.filename,
            done.data.len()
        );
    }

    alice_handle.send(Command::Hold)?;
    alice_handle.send(Command::Resume { video: args.video })?;
    alice_handle.send(Command::Hangup)?;
    wait_for(&mut bob_calls, |change| change.to == CallState::Terminated).await?;
    info!("Call ended");

    alice_handle.send(Command::Shutdown)?;
    bob_handle.send(Command::Shutdown)?;
    let alice = alice_task.await?;
    let bob = bob_task.await?;
    alice_forward.abort();
    bob_forward.abort();

    for conversation in [&alice, &bob] {
        info!(
            "{}: {} messages, {} transfers still open",
            conversation.user(),
            conversation.history().len(),
            conversation.transfers().len()
        );
    }
    Ok(())
}

async fn wait_for<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    matches: impl Fn(&T) -> bool,
) -> Result<T> {
    let value = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let value = rx.recv().await?;
            if matches(&value) {
                return Ok::<T, broadcast::error::RecvError>(value);
            }
        }
    })
    .await
    .context("timed out waiting for the peer")??;
    Ok(value)
}
