pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export all models and services for external use
pub use models::*;
pub use services::*;

// Specifically re-export the types other cells reach for
pub use models::{
    AbsenceKind, DayOfWeek, DoctorAbsence, DoctorAvailability, DoctorError, ResolvedVisitType,
    UserAccount, VisitTypeSelector,
};
