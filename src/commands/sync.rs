use std::path::Path;

use anyhow::Result;
use calmirror_core::PassKind;

use super::{build_scheduler, load_config};

pub async fn run(config_path: &Path, quick: bool) -> Result<()> {
    let config = load_config(config_path)?;
    if !config.is_configured() {
        anyhow::bail!(
            "No feed_url configured.\n\
            Add feed_url to {} or set CALMIRROR_FEED_URL",
            config_path.display()
        );
    }

    let scheduler = build_scheduler(config, config_path).await?;
    let kind = if quick { PassKind::Quick } else { PassKind::Full };
    let report = scheduler.trigger(kind).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(failure) = report.failure {
        anyhow::bail!("{} pass failed: {}", kind, failure);
    }
    Ok(())
}
