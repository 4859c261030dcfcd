use std::sync::Arc;

use shared_config::AppConfig;
use shared_models::SymptomModel;

use crate::sqlite::Database;

/// Shared state handed to every router. The symptom-model strategy is picked
/// once at startup from configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub symptom_model: Arc<dyn SymptomModel>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, symptom_model: Arc<dyn SymptomModel>) -> Self {
        Self {
            config,
            db,
            symptom_model,
        }
    }
}
