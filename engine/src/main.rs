use anyhow::Context;
use chatsync_engine::replay::{self, Transcript};
use chatsync_engine::{init_tracing, EngineConfig};
use std::fs;
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .context("usage: chatsync-replay <transcript.json>")?;
    let config = EngineConfig::from_env()?;

    let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let transcript: Transcript =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    info!(%path, steps = transcript.steps.len(), "replaying transcript");

    let report = replay::run(transcript, &config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
