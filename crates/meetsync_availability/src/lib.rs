pub mod aggregate;
pub mod collect;
pub mod interval;
#[cfg(test)]
mod interval_proptest;
#[cfg(test)]
mod interval_test;
pub mod schedule;
#[cfg(test)]
mod schedule_test;
pub mod slots;

pub use aggregate::{
    compute_free_time, month_window, AvailabilityOverrides, ParticipantAvailability,
    ParticipantAvailabilityInput,
};
pub use collect::{collect_busy_events, collect_busy_times, BusySource};
pub use interval::{clip, intersect, merge, subtract, total_duration, Interval, TimeSlot};
pub use schedule::{DayRange, WeeklyRange, WeeklySchedule};
pub use slots::{common_free_time, find_available_slots, find_common_slots};
