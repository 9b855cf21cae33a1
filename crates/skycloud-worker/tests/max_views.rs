use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use skycloud_core::models::NewFileRecord;
use skycloud_core::FilesConfig;
use skycloud_db::{FileRepository, InMemoryFileRepository};
use skycloud_processing::parse_upload_headers;
use skycloud_storage::{LocalStorage, Storage};
use skycloud_worker::{LifecycleContext, LifecycleScheduler, MaxViewsSweep, TaskHandler, TaskState, TickOutcome};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn file_is_removed_after_reaching_max_views() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
    let repo = Arc::new(InMemoryFileRepository::new());

    let mut headers = HeaderMap::new();
    headers.insert("x-skycloud-max-views", HeaderValue::from_static("3"));
    let options = parse_upload_headers(&headers, &FilesConfig::default()).unwrap();
    assert_eq!(options.max_views, Some(3));

    storage
        .put("limited.txt", Bytes::from_static(b"read me thrice"), Some("text/plain"))
        .await
        .unwrap();
    let file = repo
        .create_file_record(NewFileRecord {
            name: "limited.txt".to_string(),
            original_name: None,
            mimetype: "text/plain".to_string(),
            size: 14,
            deletes_at: options.deletes_at,
            max_views: options.max_views,
            password: None,
            folder_id: None,
        })
        .await
        .unwrap();

    let sweep = MaxViewsSweep::new(LifecycleContext::new(storage.clone(), repo.clone()));

    for _ in 0..2 {
        repo.increment_view_count(file.id).await.unwrap();
    }
    sweep.run().await.unwrap();
    assert!(storage.get("limited.txt").await.unwrap().is_some());

    repo.increment_view_count(file.id).await.unwrap();
    sweep.run().await.unwrap();

    assert!(storage.get("limited.txt").await.unwrap().is_none());
    assert!(repo.get_by_name("limited.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn scheduled_sweep_runs_through_the_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
    let repo = Arc::new(InMemoryFileRepository::new());

    storage
        .put("once.txt", Bytes::from_static(b"x"), None)
        .await
        .unwrap();
    let file = repo
        .create_file_record(NewFileRecord {
            name: "once.txt".to_string(),
            original_name: None,
            mimetype: "text/plain".to_string(),
            size: 1,
            deletes_at: None,
            max_views: Some(1),
            password: None,
            folder_id: None,
        })
        .await
        .unwrap();
    repo.increment_view_count(file.id).await.unwrap();

    let mut scheduler = LifecycleScheduler::new();
    scheduler.register(
        "max-views",
        Duration::from_secs(60),
        Arc::new(MaxViewsSweep::new(LifecycleContext::new(storage.clone(), repo.clone()))),
    );
    assert_eq!(scheduler.trigger("max-views"), TickOutcome::Started);

    for _ in 0..200 {
        let stats = scheduler.stats("max-views").unwrap();
        if stats.state == TaskState::Idle && stats.runs == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(storage.get("once.txt").await.unwrap().is_none());
    assert!(repo.is_empty().await);
}
