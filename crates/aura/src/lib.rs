//! Aura - multi-opinion trading signal workflow
//!
//! Runs independent opinion producers against a market snapshot, synthesizes
//! one calibrated signal with trade levels, holds it open for a human rating
//! and archives the finished run.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use aura::models::TriggerMetadata;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = aura::load_config("config/aura.toml")?;
//! let coordinator = aura::build_coordinator(&config)?;
//! let record = coordinator
//!     .run_to_completion("SPY", TriggerMetadata::manual())
//!     .await?;
//! println!("{:?}", record.synthesis_result());
//! # Ok(())
//! # }
//! ```

pub use aura_agents as agents;
pub use aura_models as models;
pub use aura_store as store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use aura_agents::{ClaudeCli, ClaudeCliConfig, Coordinator, LlmProducer, OpinionProducer, SnapshotSource};
use aura_models::AuraConfig;
use aura_store::ArchiveStore;

/// Read, parse and validate a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<AuraConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: AuraConfig =
        toml::from_str(&raw).with_context(|| format!("Failed to parse config: {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Build a Coordinator backed by the SQLite archive, the snapshot market
/// source and one Claude-backed producer per enabled producer id.
pub fn build_coordinator(config: &AuraConfig) -> anyhow::Result<Coordinator> {
    let archive = ArchiveStore::from_config(&config.store)
        .with_context(|| format!("Failed to open archive: {}", config.store.sqlite_path))?;
    let market = SnapshotSource::new(&config.data.snapshot_dir);

    let timeout = Duration::from_secs(config.agents.producer_timeout_seconds);
    let producers: Vec<Arc<dyn OpinionProducer>> = config
        .agents
        .enabled_producers()
        .into_iter()
        .map(|id| {
            let backend = ClaudeCli::new(ClaudeCliConfig {
                model: config.agents.model_for(id).to_string(),
                timeout,
            });
            Arc::new(LlmProducer::new(id, Arc::new(backend))) as Arc<dyn OpinionProducer>
        })
        .collect();

    let coordinator = Coordinator::new(config.clone(), producers, Arc::new(market), Arc::new(archive))?;
    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_models::ProducerId;

    fn example_config_path() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/aura.toml")
    }

    #[test]
    fn example_config_loads() {
        let config = load_config(example_config_path()).unwrap();
        assert_eq!(config.agents.enabled_producers(), ProducerId::ALL.to_vec());
        assert_eq!(config.workflow.feedback_timeout_seconds, 300);
    }

    #[test]
    fn missing_config_is_reported() {
        let err = load_config("/nonexistent/aura.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aura.toml");
        std::fs::write(
            &path,
            "[synthesis]\nstaleness_discount = \"0.8\"\n\n[synthesis.thresholds]\nstrong_signal = \"0.5\"\nmoderate_signal = \"0.6\"\nweak_signal = \"0.4\"\nhold_threshold = \"0.5\"\n",
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn coordinator_builds_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AuraConfig::default();
        config.store.sqlite_path = dir.path().join("archive.db").display().to_string();
        config.data.snapshot_dir = dir.path().display().to_string();

        let coordinator = build_coordinator(&config).unwrap();
        assert_eq!(coordinator.producer_ids(), ProducerId::ALL.to_vec());
        assert_eq!(coordinator.active_runs(), 0);
    }
}
