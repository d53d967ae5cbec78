pub mod loader;
pub mod schema;

pub use loader::{database_path, default_config_path, load_config, load_config_from_str};
pub use schema::{
    CollaboratorMode, CollaboratorSettings, Config, PageRegeneration, PipelineSettings,
    StorageSettings, WorkerSettings,
};
