pub mod time;

pub use time::{now_utc, TimeFormatter, TimezoneConfig};
