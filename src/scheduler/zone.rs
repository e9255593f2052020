//! Civil-date to UTC conversion in a user's time zone.

use chrono::{DateTime, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Zone actually used for a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedZone {
    /// The requested IANA zone resolved.
    Named(Tz),
    /// The requested name was unknown; UTC was used instead.
    FallbackUtc { requested: String },
}

impl ResolvedZone {
    /// Resolve an IANA zone name, degrading to UTC when it is unknown.
    pub fn resolve(name: &str) -> Self {
        match name.trim().parse::<Tz>() {
            Ok(tz) => Self::Named(tz),
            Err(e) => {
                warn!(timezone = name, "unknown time zone, planning in UTC: {e}");
                Self::FallbackUtc {
                    requested: name.to_owned(),
                }
            }
        }
    }

    /// Returns `true` when planning fell back to UTC.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackUtc { .. })
    }

    /// Seconds east of UTC observed by this zone at `instant`.
    pub fn offset_secs_at(&self, instant: DateTime<Utc>) -> i32 {
        match self {
            Self::Named(tz) => tz
                .offset_from_utc_datetime(&instant.naive_utc())
                .fix()
                .local_minus_utc(),
            Self::FallbackUtc { .. } => 0,
        }
    }
}

/// Last second of a civil day as wall-clock time.
fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// The instant at which `date` ends on the wall clocks of `zone`.
///
/// The zone's offset is taken at the UTC end-of-day anchor and applied to
/// that anchor. If the zone changes offset between the anchor and the
/// shifted instant (a DST transition inside the window), the offset
/// observed at the shifted instant wins.
pub fn end_of_day_instant(date: NaiveDate, zone: &ResolvedZone) -> DateTime<Utc> {
    let anchor = Utc.from_utc_datetime(&date.and_time(end_of_day()));

    let first = zone.offset_secs_at(anchor);
    let candidate = anchor - chrono::Duration::seconds(i64::from(first));

    let second = zone.offset_secs_at(candidate);
    if second == first {
        candidate
    } else {
        anchor - chrono::Duration::seconds(i64::from(second))
    }
}
