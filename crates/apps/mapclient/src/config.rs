use std::env;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use geodata::{GeodataConfig, PoiType};

#[derive(Parser, Debug)]
#[command(author, version, about = "Console client for the case map screen")]
pub struct Args {
    /// Project base URL, e.g. https://xyz.supabase.co
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: String,

    /// Anonymous API key, sent as `apikey` and bearer token
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub anon_key: String,

    /// Optional JSON file with fetcher and timeline settings
    #[arg(long, env = "MAPCLIENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// POI layers enabled at start (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub poi: Vec<PoiType>,
}

impl Args {
    /// File settings first, then numeric environment overrides.
    pub fn geodata_config(&self) -> anyhow::Result<GeodataConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                GeodataConfig::from_json(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => GeodataConfig::default(),
        };
        cfg.quiet_period_ms = env_var_u64("MAPCLIENT_QUIET_PERIOD_MS", cfg.quiet_period_ms);
        cfg.cache_max_entries = env_var_usize("MAPCLIENT_CACHE_MAX_ENTRIES", cfg.cache_max_entries);
        Ok(cfg)
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
