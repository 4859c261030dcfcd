pub mod absence;
pub mod availability;
pub mod doctor;
pub mod visit_types;

pub use absence::AbsenceService;
pub use availability::AvailabilityService;
pub use doctor::DoctorService;
pub use visit_types::{VisitTypeService, MAX_APPOINTMENT_MINUTES};
