//! Table-backed services.
//!
//! Each service owns exactly one table (the directory owns three) and is the only writer of
//! it. Cross-service effects go through explicit calls, usually from [`crate::Clinic`].

pub mod appointments;
pub mod directory;
pub mod medical_records;
pub mod medications;
pub(crate) mod shared;
