//! Engine components built once from the loaded configuration.

use adaptive_core::{
    AbilityUpdater, EngineConfig, ItemSelector, RefitJob, RetentionScheduler, TopicScheduler, ValidationError,
};

#[derive(Debug, Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub updater: AbilityUpdater,
    pub selector: ItemSelector,
    pub topics: TopicScheduler,
    pub retention: RetentionScheduler,
    pub refit: RefitJob,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            updater: AbilityUpdater::new(&config)?,
            selector: ItemSelector::new(&config),
            topics: TopicScheduler::new(&config.topics),
            retention: RetentionScheduler::new(&config),
            refit: RefitJob::new(&config)?,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.ability.quadrature_points = 1;
        assert!(Engine::new(config).is_err());
    }
}
