//! Terminal client for devbox containers.
//!
//! Usage:
//!   console-cli shell <container>    open a new shell in a container
//!   console-cli attach <container>   attach to the container's main process
//!   console-cli watch                print container job notifications
//!
//! The access token is read from `DEVBOX_TOKEN`; endpoints from
//! `DEVBOX_API_ORIGIN` and friends. Press Ctrl+] to leave a console.

mod keys;
mod surface;

use std::{io, sync::Arc, thread};

use anyhow::{Context, bail};
use crossterm::event::{self, Event};
use devbox_console::{ConsoleEvent, ConsoleSession, ConsoleTarget};
use devbox_core::{ClientConfig, LayoutEvent, StaticToken, TracingNotices};
use devbox_notify::{NotificationBus, NotificationHandler};
use devbox_transport::{ConsoleAction, WebSocketConnector};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    keys::KeyAction,
    surface::{LocalTerminal, RawMode},
};

const USAGE: &str = "usage: console-cli <shell|attach> <container> | console-cli watch";

enum Command {
    Console(ConsoleTarget),
    Watch,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    match args.next().as_deref() {
        Some("watch") => Ok(Command::Watch),
        Some(action) => {
            let action: ConsoleAction = action.parse().context(USAGE)?;
            let Some(container_id) = args.next() else {
                bail!(USAGE);
            };
            Ok(Command::Console(ConsoleTarget::new(container_id, action)))
        }
        None => bail!(USAGE),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with console output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    match parse_args(std::env::args().skip(1))? {
        Command::Console(target) => run_console(&config, target).await,
        Command::Watch => run_watch(&config).await,
    }
}

enum Input {
    Key(KeyAction),
    Failed(io::Error),
}

/// Read terminal events on a blocking thread.
///
/// Resizes go to the surface's layout stream, keys to `input`.
fn spawn_event_reader(
    input: mpsc::UnboundedSender<Input>,
    layout: mpsc::UnboundedSender<LayoutEvent>,
) {
    thread::spawn(move || {
        loop {
            let sent = match event::read() {
                Ok(Event::Key(key)) => match keys::translate(&key) {
                    Some(action) => input.send(Input::Key(action)).is_ok(),
                    None => true,
                },
                Ok(Event::Resize(..)) => layout.send(LayoutEvent::WindowResized).is_ok(),
                Ok(_) => true,
                Err(e) => {
                    let _ = input.send(Input::Failed(e));
                    false
                }
            };
            if !sent {
                break;
            }
        }
    });
}

async fn run_console(config: &ClientConfig, target: ConsoleTarget) -> anyhow::Result<()> {
    let token = StaticToken::new(std::env::var("DEVBOX_TOKEN").unwrap_or_default());
    let (layout_tx, layout_rx) = mpsc::unbounded_channel();
    let terminal = Arc::new(LocalTerminal::new(layout_rx));

    let (session, mut events) = ConsoleSession::open(
        Arc::new(WebSocketConnector::new()),
        config,
        target,
        &token,
        terminal.clone(),
    )?;

    let _raw = RawMode::enable().context("failed to enable raw mode")?;
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    spawn_event_reader(input_tx, layout_tx);

    let mut result: anyhow::Result<()> = Ok(());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConsoleEvent::StateChanged(state)) => {
                    tracing::info!(session_id = %session.id(), %state, "Console state changed");
                }
                Some(ConsoleEvent::Failed(failure)) => {
                    eprint!("\r\n{failure} Press Ctrl+] to exit.\r\n");
                }
                None => break,
            },
            input = input_rx.recv() => match input {
                Some(Input::Key(KeyAction::Send(bytes))) => {
                    if !terminal.is_read_only() {
                        session.send_input(&bytes);
                    }
                }
                Some(Input::Key(KeyAction::Quit)) | None => break,
                Some(Input::Failed(e)) => {
                    result = Err(anyhow::Error::new(e).context("failed to read terminal input"));
                    break;
                }
            },
        }
    }

    session.close().await;
    result
}

/// Prints notifications as they arrive.
struct PrintHandler;

impl NotificationHandler for PrintHandler {
    fn on_refetch(&self) {
        println!("container list changed");
    }

    fn on_waiting(&self, container_id: &str) {
        println!("waiting on {container_id}");
    }

    fn on_done(&self) {
        println!("job finished");
    }
}

async fn run_watch(config: &ClientConfig) -> anyhow::Result<()> {
    let handler: Arc<dyn NotificationHandler> = Arc::new(PrintHandler);
    let bus = NotificationBus::subscribe(
        Arc::new(WebSocketConnector::new()),
        config,
        Arc::new(TracingNotices),
        &handler,
    )?;
    let mut status = bus.watch_status();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                println!(
                    "notifications {} (attempt {})",
                    current.state, current.reconnect_attempt
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bus.close().await;
    Ok(())
}
