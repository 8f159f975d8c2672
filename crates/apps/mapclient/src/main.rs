use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use foundation::CaseId;
use geodata::{FilterState, MapScreen, TimelineState};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod realtime;
mod rest;

use config::Args;
use console::{render_timeline, render_update, Command};
use realtime::RealtimeClient;
use rest::SupabaseRest;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON-lines protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.geodata_config()?;
    info!(?config, "starting map client");

    let rest = Arc::new(SupabaseRest::new(&args.supabase_url, &args.anon_key));
    let realtime = Arc::new(
        RealtimeClient::new(&args.supabase_url, &args.anon_key)
            .context("building realtime socket url")?,
    );
    let mut screen = MapScreen::new(config, rest, realtime)
        .with_filters(FilterState::with_poi_types(args.poi.iter().copied()));

    let (timeline_tx, mut timeline_rx) = mpsc::unbounded_channel::<Value>();
    let mut watched = BTreeSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        for out in apply(&mut screen, command, &mut watched, &timeline_tx) {
                            emit(&out);
                        }
                    }
                    Err(err) => emit(&json!({ "error": err.to_string() })),
                }
            }
            update = screen.next_update() => emit(&render_update(&update)),
            Some(out) = timeline_rx.recv() => emit(&out),
        }
    }

    screen.close();
    info!("map client stopped");
    Ok(())
}

fn apply(
    screen: &mut MapScreen,
    command: Command,
    watched: &mut BTreeSet<CaseId>,
    timeline_tx: &mpsc::UnboundedSender<Value>,
) -> Vec<Value> {
    let updates = match command {
        Command::Pan { bounds, zoom } => screen.on_viewport_change(bounds, zoom),
        Command::Filter(toggle) => screen.on_filter_toggle(toggle),
        Command::Reset => screen.on_filter_reset(),
        Command::Search(text) => screen.on_search_text_change(&text),
        Command::Open(case_id) => {
            let rx = screen.get_timeline(case_id);
            let current = render_timeline(&rx.borrow());
            if watched.insert(case_id) {
                tokio::spawn(forward_timeline(rx, timeline_tx.clone()));
            }
            return vec![current];
        }
        Command::Close(case_id) => {
            watched.remove(&case_id);
            let closed = screen.close_timeline(case_id);
            return vec![json!({ "timeline": case_id, "closed": closed })];
        }
        Command::Quit => Vec::new(),
    };
    updates.iter().map(render_update).collect()
}

/// Renders every state change until the timeline's task ends.
async fn forward_timeline(
    mut rx: watch::Receiver<TimelineState>,
    out: mpsc::UnboundedSender<Value>,
) {
    while rx.changed().await.is_ok() {
        let rendered = render_timeline(&rx.borrow_and_update());
        if out.send(rendered).is_err() {
            warn!("output closed, stopping timeline forwarder");
            return;
        }
    }
}

fn emit(value: &Value) {
    println!("{value}");
}
