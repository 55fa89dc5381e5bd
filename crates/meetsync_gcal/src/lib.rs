// --- File: crates/meetsync_gcal/src/lib.rs ---

pub mod mapping; // MeetSync <-> Google resource conversions
pub mod models; // Calendar v3 wire types
pub mod service; // CalendarIntegration implementation


pub use mapping::event_id_for_meeting;
pub use service::GoogleCalendarIntegration;
