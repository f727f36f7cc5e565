// Time helpers shared by the controller, nodes, and the wire codec

use chrono::{DateTime, Utc};

use crate::TIME_DISPLAY_FORMAT;

/// Current wall-clock time in UTC
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp the way nodes and the controller print received time
pub fn format_utc(time: &DateTime<Utc>) -> String {
    time.format(TIME_DISPLAY_FORMAT).to_string()
}
