//! Cron trigger endpoint over real HTTP.

use std::sync::Arc;

use chrono::{Duration, Utc};
use trialwatch::notify::LogSender;
use trialwatch::storage::ReminderStore;
use trialwatch::trigger::{SECRET_HEADER, TriggerServer};
use trialwatch::types::{Reminder, ReminderKind, Trial, TrialId, TrialStatus};
use trialwatch::{DispatchSummary, ReminderDispatcher, SqliteReminderStore};

use crate::helpers::{temp_store, user};

async fn seed_due(store: &SqliteReminderStore) {
    let owner = user("usr_cron", "UTC");
    store.upsert_user(&owner).await.unwrap();
    let trial = Trial {
        id: TrialId::generate(),
        user_id: owner.id.clone(),
        service_name: "Spotify".to_owned(),
        end_date: (Utc::now() + Duration::days(1)).date_naive(),
        status: TrialStatus::Active,
        cancel_url: None,
        created_at: Utc::now() - Duration::days(6),
        canceled_at: None,
    };
    let reminder = Reminder::pending(
        &trial,
        Utc::now() - Duration::minutes(1),
        ReminderKind::OneDay,
        trial.created_at,
    );
    store
        .insert_trial(&trial, std::slice::from_ref(&reminder))
        .await
        .unwrap();
}

async fn start(store: Arc<SqliteReminderStore>, secret: &str) -> TriggerServer {
    let dispatcher = Arc::new(ReminderDispatcher::new(
        store,
        Arc::new(LogSender::new("https://trialwatch.app")),
    ));
    TriggerServer::start(dispatcher, "127.0.0.1:0", secret)
        .await
        .unwrap()
}

fn url(server: &TriggerServer) -> String {
    format!("http://{}/cron/reminders", server.addr())
}

#[tokio::test]
async fn correct_secret_runs_a_sweep() {
    let (store, _dir) = temp_store();
    seed_due(&store).await;
    let server = start(store, "s3cret").await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(&server))
        .header(SECRET_HEADER, "s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let summary: DispatchSummary = response.json().await.unwrap();
    assert_eq!(summary.considered, 1);
    assert_eq!(summary.sent, 1);

    let again: DispatchSummary = client
        .post(url(&server))
        .header(SECRET_HEADER, "s3cret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again, DispatchSummary::default());
}

#[tokio::test]
async fn wrong_or_missing_secret_is_unauthorized() {
    let (store, _dir) = temp_store();
    seed_due(&store).await;
    let server = start(store.clone(), "s3cret").await;
    let client = reqwest::Client::new();

    let missing = client.post(url(&server)).send().await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = client
        .post(url(&server))
        .header(SECRET_HEADER, "guess")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Nothing was sent.
    let due = store.fetch_due(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn empty_secret_disables_the_route() {
    let (store, _dir) = temp_store();
    let server = start(store, "").await;

    let response = reqwest::Client::new()
        .post(url(&server))
        .header(SECRET_HEADER, "")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn only_post_is_routed() {
    let (store, _dir) = temp_store();
    let server = start(store, "s3cret").await;

    let response = reqwest::get(url(&server)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}
