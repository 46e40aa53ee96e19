//! The feed-to-row reconciliation engine.
//!
//! Takes one decoded, partially populated realtime feed plus the static
//! timetable and produces consistent row sets: trip updates with their
//! full per-stop sequences, or a replacement alert snapshot.

pub mod alerts;
pub mod trip_updates;

pub use alerts::reconcile_alerts;
pub use trip_updates::TripUpdateReconciler;
