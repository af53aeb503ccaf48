//! tally - CLI for the local event-telemetry queue
//!
//! This tool provides commands for:
//! - Showing dispatch configuration and queue status
//! - Tracking events and flushing them to the collector
//! - Fetching the remote configure document
//! - Inspecting and purging the pending queue
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue: $XDG_DATA_HOME/tally/<app>.queue.db (~/.local/share/tally/)
//! - Config: $XDG_CONFIG_HOME/tally/config.toml (~/.config/tally/config.toml)
//! - Logs: $XDG_STATE_HOME/tally/ (~/.local/state/tally/)

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tally_core::collector::ResultSink;
use tally_core::{codec, AppContext, Config, Dispatcher, Event, Registry, Table};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Queue analytics events locally and ship them to a collector")]
#[command(version)]
struct Args {
    /// Verbose output (writes logs to the XDG state directory)
    #[arg(short, long)]
    verbose: bool,

    /// Application whose queue to operate on
    #[arg(long, default_value = "default")]
    app: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show dispatch configuration and queue status
    Status,

    /// Queue one event given as a JSON object
    Track {
        /// Event body, e.g. '{"event":"signup"}'
        json: String,

        /// Flush right after queueing
        #[arg(long)]
        flush: bool,
    },

    /// Send every pending event now
    Flush,

    /// Fetch the configure document and print its event bindings
    Configure,

    /// Show the oldest pending batch
    Inspect {
        /// Maximum rows to show (default: configured batch size)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Wipe the queue and stop the dispatcher
    Purge,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(tally_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let context = AppContext::new(&args.app);
    let dispatcher = Registry::global()
        .get_instance(&context, &config)
        .context("failed to start dispatcher")?;
    tracing::debug!(app = dispatcher.name(), "Dispatcher ready");

    match args.command {
        Command::Status => cmd_status(&config, &context, &dispatcher),
        Command::Track { json, flush } => cmd_track(&dispatcher, &json, flush),
        Command::Flush => cmd_flush(&dispatcher),
        Command::Configure => cmd_configure(&dispatcher),
        Command::Inspect { limit } => cmd_inspect(&dispatcher, limit),
        Command::Purge => cmd_purge(&dispatcher),
    }
}

/// How long to wait for the worker: one full request plus slack
fn settle_timeout(dispatcher: &Dispatcher) -> Duration {
    Duration::from_secs(dispatcher.config().timeout_secs.saturating_mul(2) + 5)
}

fn wait_idle(dispatcher: &Dispatcher) -> Result<()> {
    if !dispatcher.wait_idle(settle_timeout(dispatcher)) {
        bail!(
            "dispatcher for '{}' did not finish (lifecycle: {:?})",
            dispatcher.name(),
            dispatcher.lifecycle()
        );
    }
    Ok(())
}

fn pending(dispatcher: &Dispatcher) -> Result<usize> {
    dispatcher
        .store()
        .count(Table::Events)
        .context("failed to count pending events")
}

fn cmd_status(config: &Config, context: &AppContext, dispatcher: &Dispatcher) -> Result<()> {
    let dispatch = &config.dispatch;

    println!("Tally Dispatch Configuration");
    println!("============================");
    println!();
    println!("Application:     {}", dispatcher.name());
    println!(
        "Server URL:      {}",
        dispatch.server_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Configure URL:   {}",
        dispatch.configure_url.as_deref().unwrap_or("<not set>")
    );
    println!("Debug Mode:      {:?}", dispatch.debug_mode);
    println!("Error Policy:    {:?}", dispatch.error_policy);
    println!("Batch Size:      {}", dispatch.effective_batch_size());
    println!("Max Queue Rows:  {}", dispatch.max_queue_rows);
    println!("Flush Interval:  {}ms", dispatch.flush_interval_ms);
    println!("Timeout:         {}s", dispatch.timeout_secs);

    println!();
    println!("Queue:           {}", context.queue_path()?.display());
    println!("Pending Events:  {}", pending(dispatcher)?);
    println!("Wi-Fi:           {}", dispatcher.is_wifi_connected());
    println!("Cellular:        {}", dispatcher.is_cellular_data_connected());

    println!();
    if dispatch.server_url.is_some() {
        println!("Status: Ready to flush");
    } else {
        println!("Status: Not ready (dispatch.server_url is not set)");
        println!();
        println!("Set it in {}:", Config::config_path().display());
        println!();
        println!("  [dispatch]");
        println!("  server_url = \"https://collector.example.com/sa\"");
    }

    Ok(())
}

fn cmd_track(dispatcher: &Dispatcher, json: &str, flush: bool) -> Result<()> {
    let event = Event::from_json(json).context("event is not valid JSON")?;
    if !event.body().is_object() {
        bail!("event must be a JSON object");
    }

    dispatcher.submit_event(event);
    if flush {
        dispatcher.submit_flush(Duration::ZERO);
    }
    wait_idle(dispatcher)?;

    println!("Queued 1 event ({} pending)", pending(dispatcher)?);
    Ok(())
}

fn cmd_flush(dispatcher: &Dispatcher) -> Result<()> {
    let before = pending(dispatcher)?;
    if before == 0 {
        println!("No pending events");
        return Ok(());
    }

    if dispatcher.config().server_url.is_none() {
        println!("dispatch.server_url is not set; nothing was sent. Run 'status' for details.");
        return Ok(());
    }

    let started = Instant::now();
    dispatcher.submit_flush(Duration::ZERO);
    wait_idle(dispatcher)?;
    let after = pending(dispatcher)?;

    println!(
        "Sent {} events in {:.1}s ({} pending)",
        before.saturating_sub(after),
        started.elapsed().as_secs_f64(),
        after
    );
    if after > 0 {
        println!("Some events were not delivered; run with -v and check the log for details");
    }
    Ok(())
}

fn cmd_configure(dispatcher: &Dispatcher) -> Result<()> {
    if dispatcher.config().configure_url.is_none() {
        println!("dispatch.configure_url is not set. Run 'status' for details.");
        return Ok(());
    }

    let received: Arc<Mutex<Option<Vec<Value>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&received);
    let sink: Arc<dyn ResultSink> = Arc::new(move |events: Vec<Value>| {
        if let Ok(mut slot) = slot.lock() {
            *slot = Some(events);
        }
    });

    dispatcher.submit_check_configure(sink);
    wait_idle(dispatcher)?;

    let bindings = received
        .lock()
        .map_err(|_| anyhow::anyhow!("event binding sink poisoned"))?
        .take();
    match bindings {
        Some(events) => {
            println!("Event bindings: {}", events.len());
            for event in &events {
                println!("{}", serde_json::to_string_pretty(event)?);
            }
        }
        None => println!("No event bindings received"),
    }
    Ok(())
}

fn cmd_inspect(dispatcher: &Dispatcher, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or_else(|| dispatcher.config().effective_batch_size());
    if limit == 0 {
        bail!("--limit must be at least 1");
    }

    let total = pending(dispatcher)?;
    let Some(batch) = dispatcher
        .store()
        .read_oldest(Table::Events, limit)
        .context("failed to read queue")?
    else {
        println!("No pending events");
        return Ok(());
    };

    let encoded = codec::encode(&batch.payload).context("failed to encode batch")?;
    let wire = codec::decode(&encoded).context("failed to decode encoded batch")?;
    if wire != batch.payload {
        bail!("encoded batch does not decode to the queued payload");
    }

    println!("Pending Events:  {}", total);
    println!("Batch Rows:      {}", batch.len);
    println!("Last Row ID:     {}", batch.max_id);
    println!("Payload Bytes:   {}", batch.payload.len());
    println!("Encoded Bytes:   {}", encoded.len());
    println!();

    let events: Vec<Value> =
        serde_json::from_str(&wire).context("queued payload is not a JSON array")?;
    for event in &events {
        println!("{}", event);
    }
    Ok(())
}

fn cmd_purge(dispatcher: &Dispatcher) -> Result<()> {
    let before = pending(dispatcher)?;
    dispatcher.hard_kill();

    let deadline = Instant::now() + settle_timeout(dispatcher);
    while !dispatcher.is_dead() {
        if Instant::now() >= deadline {
            bail!("dispatcher for '{}' did not stop", dispatcher.name());
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    println!("Purged {} events", before);
    Ok(())
}
