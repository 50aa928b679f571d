//! Media stage against a wiremock file server: validation, readiness and
//! resumable cancellation.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use newsdesk::monitor::{MediaOutcome, PipelineEvent, RecordingSink};
use newsdesk::pipeline::{ready_payloads, CancelFlag};
use newsdesk::storage::{
    Database, MediaFileStatus, MediaStatus, MediaType, NewMediaFile, ParsedContent,
};

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png")
                .set_body_bytes(body),
        )
        .mount(server)
        .await;
}

/// Seed a parsed article referencing `routes` on `server`, one placeholder each.
async fn parsed_article(db: &Database, server: &MockServer, slug: &str, routes: &[&str]) -> String {
    let id = seed_article(db, &format!("https://wire.example.com/{slug}"), 1_700_000_000).await;
    let mut content = "Body text.".to_string();
    for n in 1..=routes.len() {
        content.push_str(&format!("\n\n[IMAGE_{n}]"));
    }
    let media = routes
        .iter()
        .map(|route| NewMediaFile {
            url: format!("{}{route}", server.uri()),
            media_type: MediaType::Image,
            alt_text: None,
            caption: None,
        })
        .collect();
    let parsed = ParsedContent {
        content,
        resolved_url: None,
        media,
    };
    assert!(db.mark_parsed(&id, &parsed).await.unwrap());
    id
}

fn statuses(media: &[newsdesk::storage::MediaFile]) -> Vec<MediaFileStatus> {
    media.iter().map(|m| m.status).collect()
}

#[tokio::test]
async fn test_scenario_c_oversized_file_fails_article_still_ready() {
    let server = MockServer::start().await;
    serve(&server, "/a.png", png(300, 300)).await;
    serve(&server, "/huge.png", vec![0u8; 600 * 1024]).await;
    serve(&server, "/c.png", png(320, 280)).await;

    let db = test_db().await;
    let dir = TempDir::new().unwrap();
    let id = parsed_article(&db, &server, "gallery", &["/a.png", "/huge.png", "/c.png"]).await;
    assert_eq!(
        db.get_article(&id).await.unwrap().unwrap().media_status,
        MediaStatus::Processing
    );

    let sink = Arc::new(RecordingSink::new());
    let stats = media_stage(&db, dir.path(), sink.clone())
        .run(&CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.articles_ready, 1);

    let media = db.media_for_article(&id).await.unwrap();
    assert_eq!(
        statuses(&media),
        vec![
            MediaFileStatus::Completed,
            MediaFileStatus::Failed,
            MediaFileStatus::Completed
        ]
    );
    assert!(media[1].error.as_deref().unwrap().contains("too large"));
    assert_eq!(media[1].local_path, None);
    assert_eq!(media[0].width, Some(300));
    for done in [&media[0], &media[2]] {
        let path = done.local_path.as_deref().unwrap();
        assert!(std::path::Path::new(path).starts_with(dir.path()));
        assert!(std::path::Path::new(path).exists());
    }
    assert_eq!(
        db.get_article(&id).await.unwrap().unwrap().media_status,
        MediaStatus::Ready
    );

    let failures = sink
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::MediaProcessed {
                    outcome: MediaOutcome::Failed { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(failures, 1);

    // The failed image's placeholder is dropped; the others keep their numbers.
    let payloads = ready_payloads(&db, 10).await.unwrap();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert!(payload.content.contains("[IMAGE_1]"));
    assert!(!payload.content.contains("[IMAGE_2]"));
    assert!(payload.content.contains("[IMAGE_3]"));
    let orders: Vec<i64> = payload.media.iter().map(|m| m.order).collect();
    assert_eq!(orders, vec![1, 3]);
}

#[tokio::test]
async fn test_scenario_d_cancelled_run_resumes() {
    let server = MockServer::start().await;
    let routes = ["/1.png", "/2.png", "/3.png", "/4.png", "/5.png"];
    for route in routes {
        serve(&server, route, png(300, 300)).await;
    }

    let db = test_db().await;
    let dir = TempDir::new().unwrap();
    let id = parsed_article(&db, &server, "five", &routes).await;

    let cancel = CancelFlag::new();
    let sink = Arc::new(CancelAfterMedia::new(cancel.clone(), 2));
    let stats = media_stage(&db, dir.path(), sink.clone())
        .run(&cancel)
        .await
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.completed, 2);
    let media = db.media_for_article(&id).await.unwrap();
    assert_eq!(
        statuses(&media),
        vec![
            MediaFileStatus::Completed,
            MediaFileStatus::Completed,
            MediaFileStatus::Pending,
            MediaFileStatus::Pending,
            MediaFileStatus::Pending
        ]
    );
    assert!(media[2..].iter().all(|m| m.download_attempts == 0));
    assert_eq!(
        db.get_article(&id).await.unwrap().unwrap().media_status,
        MediaStatus::Processing
    );

    let stats = media_stage(&db, dir.path(), Arc::new(RecordingSink::new()))
        .run(&CancelFlag::new())
        .await
        .unwrap();
    assert!(!stats.cancelled);
    assert_eq!(stats.completed, 3);
    let media = db.media_for_article(&id).await.unwrap();
    assert!(media.iter().all(|m| m.status == MediaFileStatus::Completed));
    assert!(media.iter().all(|m| m.download_attempts == 1));
    assert_eq!(
        db.get_article(&id).await.unwrap().unwrap().media_status,
        MediaStatus::Ready
    );
}

#[tokio::test]
async fn test_article_not_ready_while_any_file_pending() {
    let server = MockServer::start().await;
    for route in ["/ok.png", "/ok2.png", "/ok3.png"] {
        serve(&server, route, png(300, 300)).await;
    }

    let db = test_db().await;
    let dir = TempDir::new().unwrap();
    let first = parsed_article(&db, &server, "first", &["/ok.png"]).await;
    let second = parsed_article(&db, &server, "second", &["/ok2.png", "/ok3.png"]).await;

    // Stop after the first file; the second article still has pending media.
    let cancel = CancelFlag::new();
    let sink = Arc::new(CancelAfterMedia::new(cancel.clone(), 1));
    media_stage(&db, dir.path(), sink).run(&cancel).await.unwrap();

    for id in [&first, &second] {
        let article = db.get_article(id).await.unwrap().unwrap();
        let pending = db.count_pending_media(id).await.unwrap();
        assert_eq!(article.media_status == MediaStatus::Ready, pending == 0);
    }
    assert!(ready_payloads(&db, 10)
        .await
        .unwrap()
        .iter()
        .all(|p| p.article_id != second));
}

#[tokio::test]
async fn test_small_images_and_missing_files_fail() {
    let server = MockServer::start().await;
    serve(&server, "/thumb.png", png(100, 100)).await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let db = test_db().await;
    let dir = TempDir::new().unwrap();
    let id = parsed_article(&db, &server, "thumbs", &["/thumb.png", "/gone.png"]).await;

    let stats = media_stage(&db, dir.path(), Arc::new(RecordingSink::new()))
        .run(&CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(stats.failed, 2);
    let media = db.media_for_article(&id).await.unwrap();
    assert!(media.iter().all(|m| m.status == MediaFileStatus::Failed));
    assert!(media.iter().all(|m| m.local_path.is_none()));
    // Nothing partial left behind.
    assert_eq!(walk_files(dir.path()), 0);
    assert_eq!(
        db.get_article(&id).await.unwrap().unwrap().media_status,
        MediaStatus::Ready
    );
}

fn walk_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                walk_files(&entry.path())
            } else {
                1
            }
        })
        .sum()
}
