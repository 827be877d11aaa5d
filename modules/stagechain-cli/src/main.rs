use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stagechain::{narrowed, start, stop_next_when, stop_when, Config, Narrow, Options, Stage};

/// One user action read from stdin.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Key(char),
    /// `:back` leaves edit mode, along with anything open inside it.
    Back,
    /// `:quit` or end of input.
    Quit,
}

impl Narrow<char> for Input {
    fn narrow(self) -> Option<char> {
        match self {
            Input::Key(ch) => Some(ch),
            Input::Back | Input::Quit => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stagechain=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_summary();

    println!("Type characters and press enter.");
    println!("  e: edit mode (leave with '.')   s: select mode inside edit (leave with ',')");
    println!("  :back leaves edit mode (and select inside it), :quit exits");

    let (tx, rx) = mpsc::channel(16);
    let reader = tokio::spawn(read_stdin(tx, config.prompt.clone()));

    let handled = Arc::new(AtomicUsize::new(0));
    let options = Options::from_config(&config)
        .with_interrupt(stop_when(|e: &Input| *e == Input::Quit))
        .with_interrupt(stop_next_when(|e: &Input| *e == Input::Back))
        .with_event_ended({
            let handled = handled.clone();
            move |_| {
                handled.fetch_add(1, Ordering::Relaxed);
            }
        });

    let strict = config.strict;
    start(
        rx,
        options,
        narrowed::<_, char>(move |stage: Stage<Input>, ch: char| async move {
            match ch {
                'e' => edit_mode(stage, strict).await,
                ch => println!("[main] {ch}"),
            }
        }),
    )
    .await?;

    reader.abort();
    info!(handled = handled.load(Ordering::Relaxed), "Session finished");
    Ok(())
}

async fn edit_mode(stage: Stage<Input>, strict: bool) {
    println!("[edit] entered");
    let options = Options::new()
        .strict(strict)
        .with_interrupt(stop_when(|e: &Input| *e == Input::Key('.')));

    let outcome = stage
        .transfer(
            narrowed::<_, char>(move |stage: Stage<Input>, ch: char| async move {
                match ch {
                    's' => select_mode(stage, strict).await,
                    ch => println!("[edit] {ch}"),
                }
            }),
            options,
        )
        .await;
    if let Err(err) = outcome {
        warn!(error = %err, "Edit mode failed to open");
    }
    println!("[edit] left");
}

async fn select_mode(stage: Stage<Input>, strict: bool) {
    println!("[select] entered");
    let options = Options::new()
        .strict(strict)
        .with_interrupt(stop_when(|e: &Input| *e == Input::Key(',')));

    let outcome = stage
        .transfer(
            narrowed::<_, char>(|_: Stage<Input>, ch: char| async move { println!("[select] {ch}") }),
            options,
        )
        .await;
    if let Err(err) = outcome {
        warn!(error = %err, "Select mode failed to open");
    }
    println!("[select] left");
}

/// Read stdin line by line and turn each line into events.
async fn read_stdin(tx: mpsc::Sender<Input>, prompt: String) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{prompt}");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            let _ = tx.send(Input::Quit).await;
            return Ok(());
        };
        let events = match line.trim() {
            ":quit" => vec![Input::Quit],
            ":back" => vec![Input::Back],
            line => line.chars().map(Input::Key).collect(),
        };
        for event in events {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}
