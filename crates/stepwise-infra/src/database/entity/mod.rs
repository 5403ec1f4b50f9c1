//! SeaORM entities. Tables are managed outside this service.

pub mod admission_event;
pub mod assignment;
pub mod checklist_step;
