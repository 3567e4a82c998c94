use anyhow::Context;
use sequencer_core::config::{ConfigWarning, WarnLevel};
use sequencer_core::{EngineConfig, NodeRegistry, PersistenceCodec, SequenceRootContainer};
use std::path::Path;
use tracing::warn;

/// Engine configuration plus the node registry built from it.
pub struct Session {
    pub config: EngineConfig,
    pub registry: NodeRegistry,
}

impl Session {
    /// Loads the config at `path` (missing file = defaults) and registers the
    /// built-in node types.
    ///
    /// Config warnings are logged; config errors abort.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        check(&config.validate())?;
        let registry = NodeRegistry::with_builtins(&config)
            .context("failed to register built-in node types")?;
        Ok(Session { config, registry })
    }

    pub fn codec(&self) -> PersistenceCodec<'_> {
        PersistenceCodec::new(&self.registry)
    }

    pub fn open(&self, file: &Path) -> anyhow::Result<SequenceRootContainer> {
        self.codec()
            .load(file)
            .with_context(|| format!("failed to load {}", file.display()))
    }
}

fn check(warnings: &[ConfigWarning]) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for w in warnings {
        match w.level {
            WarnLevel::Warning => warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message.as_str()),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config: {}", errors.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let session = Session::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(session.config, EngineConfig::default());
        assert!(session.registry.contains("instruction.wait"));
    }

    #[test]
    fn config_errors_abort() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequencer.yaml");
        std::fs::write(&path, "defaults:\n  attempts: 0\n").unwrap();
        let err = Session::load(&path).err().unwrap();
        assert!(format!("{err:#}").contains("attempts"));
    }

    #[test]
    fn config_warnings_do_not_abort() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequencer.yaml");
        std::fs::write(&path, "version: 2\n").unwrap();
        let session = Session::load(&path).unwrap();
        assert_eq!(session.config.version, 2);
    }
}
