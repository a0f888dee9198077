//! Event log integration tests: ordering, cursors, filters, push stream.

use staffx_core::prelude::*;
use tokio_stream::StreamExt;
use uuid::Uuid;

fn core() -> Core {
    Core::in_memory()
}

async fn publish_n(core: &Core, org: Uuid, aggregate: Uuid, n: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 0..n {
        let event = core
            .events
            .publish(
                NewEvent::new(EventType::RunProgress, "run", aggregate, org)
                    .with_payload(serde_json::json!({ "seq": i })),
            )
            .await
            .unwrap();
        ids.push(event.id);
    }
    ids
}

#[tokio::test]
async fn test_events_are_totally_ordered() {
    let core = core();
    let org = Uuid::new_v4();
    let ids = publish_n(&core, org, Uuid::new_v4(), 10).await;

    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            ..Default::default()
        })
        .await
        .unwrap();

    let seen: Vec<i64> = page.events.iter().map(|e| e.id).collect();
    assert_eq!(seen, ids);
    assert!(page
        .events
        .windows(2)
        .all(|w| (w[0].occurred_at, w[0].id) < (w[1].occurred_at, w[1].id)));
}

#[tokio::test]
async fn test_cursor_pagination_no_dupes_no_gaps() {
    let core = core();
    let org = Uuid::new_v4();
    let ids = publish_n(&core, org, Uuid::new_v4(), 25).await;

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = core
            .events
            .query(EventQuery {
                org_id: Some(org),
                since: cursor.clone(),
                limit: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();

        pages += 1;
        seen.extend(page.events.iter().map(|e| e.id));

        match page.next_cursor {
            Some(next) => {
                assert_eq!(page.events.len(), 7, "full page whenever a cursor is emitted");
                cursor = Some(next);
            }
            None => break,
        }
    }

    // 25 events at 7 per page: 7+7+7+4.
    assert_eq!(pages, 4);
    assert_eq!(seen, ids, "no duplicates, no gaps, in order");

    // Resuming from the final position yields an empty page and no cursor.
    let last = EventCursor::new(
        core.events
            .query(EventQuery {
                org_id: Some(org),
                ..Default::default()
            })
            .await
            .unwrap()
            .events
            .last()
            .unwrap()
            .occurred_at,
        *ids.last().unwrap(),
    )
    .encode()
    .unwrap();
    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            since: Some(last),
            limit: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(page.events.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_cursor_exact_page_boundary_emits_no_dangling_cursor() {
    let core = core();
    let org = Uuid::new_v4();
    publish_n(&core, org, Uuid::new_v4(), 14).await;

    let first = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            limit: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.events.len(), 7);
    let second = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            since: first.next_cursor.clone(),
            limit: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second.events.len(), 7);
    // Exactly consumed: the second page must not advertise more.
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn test_pagination_survives_interleaved_publishers() {
    let core = core();
    let org = Uuid::new_v4();
    let aggregate = Uuid::new_v4();
    let mut expected = publish_n(&core, org, aggregate, 5).await;

    let first = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            limit: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut seen: Vec<i64> = first.events.iter().map(|e| e.id).collect();

    // New events land while the consumer holds a cursor.
    expected.extend(publish_n(&core, org, aggregate, 4).await);

    let mut cursor = first.next_cursor;
    while let Some(next) = cursor {
        let page = core
            .events
            .query(EventQuery {
                org_id: Some(org),
                since: Some(next),
                limit: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        seen.extend(page.events.iter().map(|e| e.id));
        cursor = page.next_cursor;
    }

    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_filters_are_conjunctive() {
    let core = core();
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let run = Uuid::new_v4();

    publish_n(&core, org_a, run, 3).await;
    publish_n(&core, org_b, Uuid::new_v4(), 2).await;
    core.events
        .publish(NewEvent::new(
            EventType::ThreadCreated,
            "thread",
            Uuid::new_v4(),
            org_a,
        ))
        .await
        .unwrap();

    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org_a),
            aggregate_type: Some("run".into()),
            aggregate_id: Some(run),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.events.len(), 3);
    assert!(page
        .events
        .iter()
        .all(|e| e.org_id == org_a && e.aggregate_id == run));

    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org_b),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.events.len(), 2);
}

#[tokio::test]
async fn test_since_accepts_raw_timestamp() {
    let core = core();
    let org = Uuid::new_v4();

    publish_n(&core, org, Uuid::new_v4(), 2).await;
    let all = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            ..Default::default()
        })
        .await
        .unwrap();
    let split = all.events.last().unwrap().occurred_at;

    // Raw timestamp is an exclusive bound on occurred_at only.
    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            since: Some(split.to_rfc3339()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(page.events.iter().all(|e| e.occurred_at > split));
}

#[tokio::test]
async fn test_since_rejects_garbage() {
    let core = core();
    let err = core
        .events
        .query(EventQuery {
            since: Some("not-a-cursor".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidCursor);
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_push_stream_delivers_published_events() {
    let core = core();
    let org = Uuid::new_v4();
    let mut stream = core.events.subscribe();

    let published = core
        .events
        .publish(
            NewEvent::new(EventType::RunStarted, "run", Uuid::new_v4(), org)
                .with_payload(serde_json::json!({ "live": true })),
        )
        .await
        .unwrap();

    let received = stream.next().await.unwrap().unwrap();
    assert_eq!(received.id, published.id);
    assert_eq!(received.event_type, EventType::RunStarted);

    // The pushed copy is also durably queryable (polling fallback).
    let page = core
        .events
        .query(EventQuery {
            org_id: Some(org),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].id, published.id);
}
