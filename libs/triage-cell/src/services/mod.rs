pub mod model_client;
pub mod scorer;

pub use model_client::{RemoteSymptomModel, RulesEngine};
pub use scorer::{compute_triage, TriageService};
