//! Properties of reminder planning that must hold for every input.

use chrono::Duration;
use trialwatch::scheduler::{OffsetPolicy, PolicyPreset, compute_reminder_plan};

use crate::helpers::utc;

const ZONES: [&str; 7] = [
    "UTC",
    "America/Los_Angeles",
    "America/St_Johns",
    "Europe/London",
    "Asia/Kolkata",
    "Australia/Lord_Howe",
    "Pacific/Chatham",
];

/// End dates around both DST transitions of 2025 in both hemispheres.
const END_DATES: [&str; 5] = [
    "2025-03-09",
    "2025-03-30",
    "2025-04-06",
    "2025-10-05",
    "2025-11-02",
];

fn policies() -> Vec<OffsetPolicy> {
    vec![
        OffsetPolicy::default(),
        OffsetPolicy::preset(PolicyPreset::Fixed),
        OffsetPolicy::preset(PolicyPreset::Daily),
    ]
}

#[test]
fn every_entry_is_after_the_margin_and_before_the_end() {
    let margin = Duration::minutes(5);
    for policy in policies() {
        for zone in ZONES {
            for end_date in END_DATES {
                let mut now = utc(&format!("{end_date}T00:00:00Z")) - Duration::days(6);
                let stop = now + Duration::days(8);
                while now < stop {
                    let plan = compute_reminder_plan(end_date, now, zone, &policy, margin).unwrap();
                    for entry in &plan.entries {
                        assert!(entry.fire_at > now + margin, "{zone} {end_date} {now}");
                        assert!(entry.fire_at < plan.end_instant);
                        assert_eq!(entry.fire_at + entry.kind.offset(), plan.end_instant);
                    }
                    assert!(
                        plan.entries.windows(2).all(|w| w[0].fire_at < w[1].fire_at),
                        "entries sorted for {zone} {end_date} {now}"
                    );
                    now += Duration::minutes(97);
                }
            }
        }
    }
}

#[test]
fn reminder_count_never_grows_as_the_end_approaches() {
    let margin = Duration::minutes(5);
    let policy = OffsetPolicy::default();
    for zone in ZONES {
        for end_date in END_DATES {
            let mut now = utc(&format!("{end_date}T00:00:00Z")) - Duration::days(7);
            let stop = now + Duration::days(9);
            let mut previous = usize::MAX;
            while now < stop {
                let count = compute_reminder_plan(end_date, now, zone, &policy, margin)
                    .unwrap()
                    .entries
                    .len();
                assert!(count <= previous, "{zone} {end_date} {now}: {count} > {previous}");
                previous = count;
                now += Duration::minutes(13);
            }
            assert_eq!(previous, 0, "plan is empty once the trial is over");
        }
    }
}

#[test]
fn local_end_of_day_is_one_second_before_local_midnight() {
    for zone in ZONES {
        for end_date in END_DATES {
            let plan = compute_reminder_plan(
                end_date,
                utc("2025-01-01T00:00:00Z"),
                zone,
                &OffsetPolicy::default(),
                Duration::zero(),
            )
            .unwrap();
            let tz: chrono_tz::Tz = zone.parse().unwrap();
            let local = plan.end_instant.with_timezone(&tz);
            assert_eq!(local.format("%Y-%m-%d %H:%M:%S").to_string(), format!("{end_date} 23:59:59"));
        }
    }
}
