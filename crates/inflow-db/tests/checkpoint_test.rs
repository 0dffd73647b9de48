//! Checkpoint persistence and monotonicity tests.

use chrono::{Duration, Utc};

use inflow_core::{Checkpoint, CheckpointRepository, Source};
use inflow_db::test_fixtures::test_db;

#[tokio::test]
async fn test_checkpoint_set_and_get() {
    let db = test_db().await;
    let now = Utc::now();

    db.checkpoints
        .set(&Checkpoint {
            source: Source::Craft,
            last_event_time: now,
            last_cursor: Some("cur-1".to_string()),
        })
        .await
        .unwrap();

    let loaded = db.checkpoints.get(Source::Craft).await.unwrap().unwrap();
    // Timestamps round-trip at microsecond precision through Postgres.
    assert!((loaded.last_event_time - now).num_milliseconds().abs() < 5);
    assert_eq!(loaded.last_cursor.as_deref(), Some("cur-1"));
}

#[tokio::test]
async fn test_checkpoint_never_moves_backward() {
    let db = test_db().await;
    let ahead = Utc::now() + Duration::hours(1);
    let behind = Utc::now() - Duration::hours(1);

    db.checkpoints
        .set(&Checkpoint {
            source: Source::Teamwork,
            last_event_time: ahead,
            last_cursor: None,
        })
        .await
        .unwrap();

    // A slow cycle finishing late must not regress the mark.
    db.checkpoints
        .set(&Checkpoint {
            source: Source::Teamwork,
            last_event_time: behind,
            last_cursor: Some("late-cursor".to_string()),
        })
        .await
        .unwrap();

    let loaded = db.checkpoints.get(Source::Teamwork).await.unwrap().unwrap();
    assert!(loaded.last_event_time >= ahead - Duration::milliseconds(5));
    // The cursor still follows the most recent write.
    assert_eq!(loaded.last_cursor.as_deref(), Some("late-cursor"));
}

#[tokio::test]
async fn test_missing_checkpoint_is_none() {
    let db = test_db().await;

    sqlx::query("DELETE FROM checkpoints WHERE source = 'missive'")
        .execute(&db.pool)
        .await
        .unwrap();

    assert!(db.checkpoints.get(Source::Missive).await.unwrap().is_none());

    db.checkpoints
        .set(&Checkpoint {
            source: Source::Missive,
            last_event_time: Utc::now(),
            last_cursor: None,
        })
        .await
        .unwrap();
    assert!(db.checkpoints.get(Source::Missive).await.unwrap().is_some());
}
