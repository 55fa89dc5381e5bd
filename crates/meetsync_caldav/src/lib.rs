//! CalDAV / iCloud calendar adapter.

pub mod dav;
pub mod ics;
pub mod mapping;
pub mod service;

#[cfg(test)]
mod dav_test;
#[cfg(test)]
mod mapping_test;

pub use service::CalDavCalendarIntegration;
