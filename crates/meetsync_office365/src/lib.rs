// --- File: crates/meetsync_office365/src/lib.rs ---
// Microsoft Graph (Office 365) calendar adapter

pub mod mapping;
pub mod models;
pub mod recurrence;
pub mod service;


pub use service::Office365CalendarIntegration;
