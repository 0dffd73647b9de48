//! Sink transaction tests: merge-upserts, soft deletes, atomic retirement.

use std::time::Duration;

use inflow_core::{
    EmailRecord, EnvelopeKind, EnvelopeState, NewEnvelope, QueueRepository, RecordBatch,
    RecordSink, Source, TaskRecord,
};
use inflow_db::test_fixtures::{test_db, unique_id};

fn task(task_id: &str) -> TaskRecord {
    TaskRecord {
        task_id: task_id.to_string(),
        title: Some("Review Q3 invoices".to_string()),
        status: Some("new".to_string()),
        tag_ids: vec!["9".to_string()],
        tag_names: vec!["finance".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_upsert_merge_leaves_absent_fields_untouched() {
    let db = test_db().await;
    let id = unique_id("merge");

    let mut batch = RecordBatch::default();
    batch.tasks.push(task(&id));
    db.sink.commit(&batch, &[]).await.unwrap();

    // Second upsert carries only a status change; title and tags survive.
    let mut update = RecordBatch::default();
    update.tasks.push(TaskRecord {
        task_id: id.clone(),
        status: Some("completed".to_string()),
        ..Default::default()
    });
    db.sink.commit(&update, &[]).await.unwrap();

    let stored = db.tasks.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_deref(), Some("completed"));
    assert_eq!(stored.title.as_deref(), Some("Review Q3 invoices"));
    assert_eq!(stored.tag_names, vec!["finance"]);
    assert!(!stored.deleted);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let db = test_db().await;
    let id = unique_id("idem");

    let mut batch = RecordBatch::default();
    batch.tasks.push(task(&id));

    // Replaying the same batch any number of times converges to one row
    // with identical contents.
    for _ in 0..3 {
        db.sink.commit(&batch, &[]).await.unwrap();
    }

    let stored = db.tasks.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.title.as_deref(), Some("Review Q3 invoices"));
}

#[tokio::test]
async fn test_soft_delete_creates_tombstone_and_sticks() {
    let db = test_db().await;
    let id = unique_id("tomb");

    // Deletion for a task we never stored still leaves a visible tombstone.
    let mut batch = RecordBatch::default();
    batch.deletions.push((Source::Teamwork, id.clone()));
    db.sink.commit(&batch, &[]).await.unwrap();

    let stored = db.tasks.get(&id).await.unwrap().unwrap();
    assert!(stored.deleted);
    let first_deleted_at = stored.deleted_at.unwrap();

    // A second deletion keeps the original timestamp.
    db.sink.commit(&batch, &[]).await.unwrap();
    let stored = db.tasks.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.deleted_at.unwrap(), first_deleted_at);
}

#[tokio::test]
async fn test_commit_retires_envelopes_with_the_writes() {
    let db = test_db().await;
    let id = unique_id("retire");

    db.queue
        .enqueue(
            NewEnvelope::new(Source::Teamwork, EnvelopeKind::CreateOrUpdate, id.as_str())
                .with_payload(serde_json::json!({})),
        )
        .await
        .unwrap();
    let leased = db
        .queue
        .lease(Source::Teamwork, 1000, Duration::from_secs(300))
        .await
        .unwrap();
    let envelope = leased.iter().find(|e| e.external_id == id).unwrap();

    let mut batch = RecordBatch::default();
    batch.tasks.push(task(&id));
    db.sink.commit(&batch, &[envelope.id]).await.unwrap();

    assert!(db.tasks.get(&id).await.unwrap().is_some());
    let completed = db
        .queue
        .list(EnvelopeState::Completed, Some(Source::Teamwork), 1000)
        .await
        .unwrap();
    assert!(completed.iter().any(|e| e.id == envelope.id));
}

#[tokio::test]
async fn test_email_upsert_with_attachments() {
    let db = test_db().await;
    let id = unique_id("mail");

    let mut batch = RecordBatch::default();
    batch.emails.push(EmailRecord {
        email_id: id.clone(),
        thread_id: Some(unique_id("thread")),
        subject: Some("Freight quote".to_string()),
        from_address: Some("ops@example.com".to_string()),
        to_addresses: vec!["desk@example.com".to_string()],
        attachments: vec![inflow_core::Attachment {
            filename: "quote.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            byte_size: 48_213,
            source_url: "https://files.example.com/quote.pdf".to_string(),
        }],
        ..Default::default()
    });
    db.sink.commit(&batch, &[]).await.unwrap();

    let stored = db.emails.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.subject.as_deref(), Some("Freight quote"));
    assert_eq!(stored.attachments.len(), 1);
    assert_eq!(stored.attachments[0].filename, "quote.pdf");

    // Replay keeps exactly one attachment row.
    db.sink.commit(&batch, &[]).await.unwrap();
    let stored = db.emails.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.attachments.len(), 1);
}

#[tokio::test]
async fn test_sink_does_not_require_attachment_bytes() {
    let db = test_db().await;
    assert!(!db.sink.requires_attachment_bytes());
}
