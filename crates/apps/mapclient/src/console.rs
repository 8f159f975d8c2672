//! Line-oriented command input and JSON-lines output.

use std::fmt;
use std::str::FromStr;

use foundation::{CaseId, GeoBounds};
use geodata::{Category, Delivery, FilterToggle, Origin, PoiType, ScreenUpdate, Status, TimelineState};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pan { bounds: GeoBounds, zoom: f64 },
    Filter(FilterToggle),
    Reset,
    Search(String),
    Open(CaseId),
    Close(CaseId),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError(String);

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CommandError {}

fn arg<T: FromStr>(value: Option<&str>, what: &str) -> Result<T, CommandError>
where
    T::Err: fmt::Display,
{
    let value = value.ok_or_else(|| CommandError(format!("missing {what}")))?;
    value
        .parse()
        .map_err(|e| CommandError(format!("bad {what} {value:?}: {e}")))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let mut words = rest.split_whitespace();
        let command = match verb {
            "pan" => {
                let west = arg(words.next(), "west")?;
                let south = arg(words.next(), "south")?;
                let east = arg(words.next(), "east")?;
                let north = arg(words.next(), "north")?;
                let zoom = arg(words.next(), "zoom")?;
                Command::Pan {
                    bounds: GeoBounds::new(west, south, east, north),
                    zoom,
                }
            }
            "category" => Command::Filter(match words.next() {
                Some("all") => FilterToggle::AllCategories,
                value => FilterToggle::Category(arg::<Category>(value, "category")?),
            }),
            "status" => Command::Filter(match words.next() {
                Some("all") => FilterToggle::AllStatuses,
                value => FilterToggle::Status(arg::<Status>(value, "status")?),
            }),
            "poi" => Command::Filter(FilterToggle::PoiType(arg::<PoiType>(words.next(), "poi type")?)),
            "reset" => Command::Reset,
            // Everything after the verb, so blank text clears the search.
            "search" => return Ok(Command::Search(rest.trim().to_string())),
            "open" => Command::Open(arg(words.next(), "case id")?),
            "close" => Command::Close(arg(words.next(), "case id")?),
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError(format!("unknown command {other:?}"))),
        };
        if let Some(extra) = words.next() {
            return Err(CommandError(format!("unexpected argument {extra:?}")));
        }
        Ok(command)
    }
}

fn render_delivery<T: Serialize>(layer: &str, delivery: &Delivery<T>) -> Value {
    match delivery {
        Delivery::Ready { value, origin } => json!({
            "layer": layer,
            "status": "ready",
            "origin": match origin {
                Origin::Cache => "cache",
                Origin::Network => "network",
            },
            "data": value,
        }),
        Delivery::Empty => json!({ "layer": layer, "status": "empty" }),
        Delivery::Failed(err) => json!({
            "layer": layer,
            "status": "error",
            "error": err.to_string(),
        }),
    }
}

pub fn render_update(update: &ScreenUpdate) -> Value {
    match update {
        ScreenUpdate::Jurisdictions(d) => render_delivery("jurisdictions", d),
        ScreenUpdate::Pois(d) => render_delivery("pois", d),
        ScreenUpdate::Search(d) => render_delivery("search", d),
    }
}

pub fn render_timeline(state: &TimelineState) -> Value {
    json!({
        "timeline": state.case_id(),
        "loading": state.is_loading(),
        "live": state.live_status(),
        "error": state.snapshot_error().map(|e| e.to_string()),
        "events": state.events(),
    })
}
