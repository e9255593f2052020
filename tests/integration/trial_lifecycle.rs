//! Register, dispatch, cancel and reschedule through the public API.

use std::sync::Arc;

use chrono::Duration;
use trialwatch::storage::ReminderStore;
use trialwatch::types::{ReminderKind, ReminderStatus, TrialStatus};
use trialwatch::{NewTrial, ReminderDispatcher, SqliteReminderStore, TrialService, TrialwatchError};

use crate::helpers::{CountingSender, GatedStore, temp_store, user, utc};

fn netflix(user_id: &str, end_date: &str) -> NewTrial {
    NewTrial {
        user_id: user_id.into(),
        service_name: "Netflix".to_owned(),
        end_date: end_date.to_owned(),
        cancel_url: Some("https://netflix.example/cancel".to_owned()),
    }
}

#[tokio::test]
async fn reminders_fire_in_order_and_only_once() {
    let (store, _dir) = temp_store();
    store.upsert_user(&user("usr_1", "UTC")).await.unwrap();
    let service = TrialService::new(store.clone());
    let reg = service
        .register_trial(netflix("usr_1", "2025-06-10"), utc("2025-06-01T00:00:00Z"))
        .await
        .unwrap();

    let fire_times: Vec<_> = reg.reminders.iter().map(|r| r.remind_at).collect();
    assert_eq!(
        fire_times,
        vec![utc("2025-06-07T23:59:59Z"), utc("2025-06-09T23:59:59Z")]
    );

    let sender = Arc::new(CountingSender::default());
    let dispatcher = ReminderDispatcher::new(store.clone(), sender.clone());

    let before = dispatcher
        .process_due_reminders(utc("2025-06-07T23:59:58Z"))
        .await
        .unwrap();
    assert_eq!(before.considered, 0);

    let first = dispatcher
        .process_due_reminders(utc("2025-06-07T23:59:59Z"))
        .await
        .unwrap();
    assert_eq!(first.sent, 1);

    let repeat = dispatcher
        .process_due_reminders(utc("2025-06-08T12:00:00Z"))
        .await
        .unwrap();
    assert_eq!(repeat.considered, 0);

    let second = dispatcher
        .process_due_reminders(utc("2025-06-10T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(second.sent, 1);

    assert_eq!(
        sender.sent(),
        vec![
            ("Netflix".to_owned(), ReminderKind::ThreeDays),
            ("Netflix".to_owned(), ReminderKind::OneDay),
        ]
    );
    let stored = store.reminders_for_trial(&reg.trial.id).await.unwrap();
    assert!(stored.iter().all(|r| r.status == ReminderStatus::Sent));
    assert_eq!(stored[0].sent_at, Some(utc("2025-06-07T23:59:59Z")));
}

#[tokio::test]
async fn cancellation_stops_all_later_sends() {
    let (store, _dir) = temp_store();
    store.upsert_user(&user("usr_1", "UTC")).await.unwrap();
    let service = TrialService::new(store.clone());
    let reg = service
        .register_trial(netflix("usr_1", "2025-06-10"), utc("2025-06-01T00:00:00Z"))
        .await
        .unwrap();

    let sender = Arc::new(CountingSender::default());
    let dispatcher = ReminderDispatcher::new(store.clone(), sender.clone());
    dispatcher
        .process_due_reminders(utc("2025-06-08T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(sender.calls(), 1);

    let report = service
        .cancel_trial(&reg.trial.id, utc("2025-06-08T01:00:00Z"))
        .await
        .unwrap();
    assert!(report.newly_canceled);
    assert_eq!(report.skipped, 1);

    // Long after every fire time: nothing else goes out.
    let later = dispatcher
        .process_due_reminders(utc("2025-07-01T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(later.considered, 0);
    assert_eq!(sender.calls(), 1);

    let statuses: Vec<_> = store
        .reminders_for_trial(&reg.trial.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(statuses, vec![ReminderStatus::Sent, ReminderStatus::Skipped]);
}

#[tokio::test]
async fn user_zone_moves_fire_times() {
    let (store, _dir) = temp_store();
    store
        .upsert_user(&user("usr_tokyo", "Asia/Tokyo"))
        .await
        .unwrap();
    store
        .upsert_user(&user("usr_bad_zone", "Mars/Olympus_Mons"))
        .await
        .unwrap();
    let service = TrialService::new(store.clone());
    let now = utc("2025-06-01T00:00:00Z");

    let tokyo = service
        .register_trial(netflix("usr_tokyo", "2025-06-10"), now)
        .await
        .unwrap();
    // 23:59:59 JST is 14:59:59Z.
    assert_eq!(tokyo.plan.end_instant, utc("2025-06-10T14:59:59Z"));
    assert_eq!(
        tokyo.reminders[0].remind_at,
        utc("2025-06-10T14:59:59Z") - Duration::hours(72)
    );

    let fallback = service
        .register_trial(netflix("usr_bad_zone", "2025-06-10"), now)
        .await
        .unwrap();
    assert!(fallback.plan.zone.is_fallback());
    assert_eq!(fallback.plan.end_instant, utc("2025-06-10T23:59:59Z"));
}

#[tokio::test]
async fn rescheduled_trial_sends_on_the_new_plan_only() {
    let (store, _dir) = temp_store();
    store.upsert_user(&user("usr_1", "UTC")).await.unwrap();
    let service = TrialService::new(store.clone());
    let reg = service
        .register_trial(netflix("usr_1", "2025-06-10"), utc("2025-06-01T00:00:00Z"))
        .await
        .unwrap();

    // Ends in about 30.5 hours from here: the medium tier.
    let moved = service
        .reschedule_trial(&reg.trial.id, "2025-06-03", utc("2025-06-02T17:30:00Z"))
        .await
        .unwrap();
    assert_eq!(moved.plan.tier.as_deref(), Some("medium"));

    let sender = Arc::new(CountingSender::default());
    let dispatcher = ReminderDispatcher::new(store.clone(), sender.clone());
    dispatcher
        .process_due_reminders(utc("2025-06-20T00:00:00Z"))
        .await
        .unwrap();

    let kinds: Vec<_> = sender.sent().into_iter().map(|(_, kind)| kind).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&ReminderKind::OneDay));
    assert!(kinds.contains(&ReminderKind::TwoHours));
    assert!(!kinds.contains(&ReminderKind::ThreeDays));
}

#[tokio::test]
async fn cancel_during_reschedule_leaves_nothing_pending() {
    let (store, _dir) = temp_store();
    store.upsert_user(&user("usr_1", "UTC")).await.unwrap();
    let reg = TrialService::new(store.clone())
        .register_trial(netflix("usr_1", "2025-06-10"), utc("2025-06-01T00:00:00Z"))
        .await
        .unwrap();

    // The cancel lands after the reschedule has read the trial as active.
    let racing = TrialService::new(Arc::new(GatedStore::canceling_on_user_lookup(
        store.clone(),
        reg.trial.id.clone(),
    )));
    let err = racing
        .reschedule_trial(&reg.trial.id, "2025-06-20", utc("2025-06-02T00:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrialwatchError::InvalidTrial(_)), "{err}");

    let trial = store.get_trial(&reg.trial.id).await.unwrap().unwrap();
    assert_eq!(trial.status, TrialStatus::Canceled);
    assert_eq!(trial.end_date, reg.trial.end_date);
    let reminders = store.reminders_for_trial(&reg.trial.id).await.unwrap();
    assert_eq!(reminders.len(), reg.reminders.len());
    assert!(reminders.iter().all(|r| r.status == ReminderStatus::Skipped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reschedule_and_cancel_never_strand_pending_reminders() {
    let (store, dir) = temp_store();
    store.upsert_user(&user("usr_1", "UTC")).await.unwrap();
    let other = Arc::new(SqliteReminderStore::open(&dir.path().join("trialwatch.db")).unwrap());
    let rescheduler = TrialService::new(store.clone());
    let canceler = TrialService::new(other);
    let now = utc("2025-06-01T00:00:00Z");

    for _ in 0..20 {
        let reg = rescheduler
            .register_trial(netflix("usr_1", "2025-06-10"), now)
            .await
            .unwrap();
        let (moved, canceled) = tokio::join!(
            rescheduler.reschedule_trial(&reg.trial.id, "2025-06-20", now),
            canceler.cancel_trial(&reg.trial.id, now)
        );
        canceled.unwrap();
        if let Err(e) = moved {
            assert!(matches!(e, TrialwatchError::InvalidTrial(_)), "{e}");
        }

        let reminders = store.reminders_for_trial(&reg.trial.id).await.unwrap();
        assert!(
            reminders.iter().all(|r| r.status != ReminderStatus::Pending),
            "canceled trial {} kept pending reminders",
            reg.trial.id
        );
    }
}
