use crate::config::{Config, PageRegeneration};

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub page_regeneration: PageRegeneration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_regeneration: config.pipeline.page_regeneration,
        }
    }
}
