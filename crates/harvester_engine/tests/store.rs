use harvester_core::{BatchId, Job, JobId, JobStatus, ResultPayload, UrlResult};
use harvester_engine::{JobStore, MemoryStore, RonFileStore, StoreError};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn running_job(id: &str, urls: &[&str]) -> Job {
    let mut job = Job::new(JobId::new(id), JobStatus::Running);
    job.urls = urls.iter().map(|u| u.to_string()).collect();
    job.total_urls = job.urls.len();
    job
}

#[tokio::test]
async fn ron_store_survives_a_reopen() {
    harvest_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state").join("jobs.ron");
    let job = running_job("j1", &["https://a.test/p/1", "https://a.test/p/2"]);

    {
        let store = RonFileStore::open(&path).unwrap();
        store.put_job(&job).await.unwrap();
        store
            .update_batch(&job.id, Some(BatchId::new("b1")))
            .await
            .unwrap();
        store
            .append_result(UrlResult::success(
                job.id.clone(),
                "https://a.test/p/1",
                json!({"title": "One"}),
            ))
            .await
            .unwrap();
    }

    let reopened = RonFileStore::open(&path).unwrap();
    let stored = reopened.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.batch, Some(BatchId::new("b1")));
    assert_eq!(stored.urls, job.urls);
    assert_eq!(reopened.list_results(&job.id).await.unwrap().len(), 1);
    assert_eq!(
        reopened.pending_urls(&job.id).await.unwrap(),
        vec!["https://a.test/p/2".to_string()]
    );
}

#[tokio::test]
async fn invalid_rows_are_rejected_and_not_written() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("jobs.ron");
    let store = RonFileStore::open(&path).unwrap();

    let mut broken = running_job("j1", &["https://a.test/p/1"]);
    broken.total_urls = 5;
    assert!(matches!(
        store.put_job(&broken).await,
        Err(StoreError::Invalid(_))
    ));
    assert!(!path.exists());

    let orphan = UrlResult::failed(JobId::new("nobody"), "https://a.test/p/1", "x");
    assert!(matches!(
        store.append_result(orphan).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_cascades_to_results() {
    let store = MemoryStore::new();
    let job = running_job("j1", &["https://a.test/p/1"]);
    store.put_job(&job).await.unwrap();
    store
        .append_result(UrlResult::failed(job.id.clone(), "https://a.test/p/1", "x"))
        .await
        .unwrap();

    assert!(store.delete_job(&job.id).await.unwrap());
    assert!(store.get_job(&job.id).await.unwrap().is_none());
    assert!(store.list_results(&job.id).await.unwrap().is_empty());
    assert!(!store.delete_job(&job.id).await.unwrap());
}

#[tokio::test]
async fn jobs_are_listed_by_status() {
    let store = MemoryStore::new();
    store.put_job(&running_job("run", &["https://a.test/1"])).await.unwrap();
    store.put_job(&Job::pending(JobId::new("wait"))).await.unwrap();
    let mut done = running_job("done", &[]);
    done.status = JobStatus::Completed;
    store.put_job(&done).await.unwrap();

    let active: Vec<String> = store
        .list_jobs_by_status(&JobStatus::ACTIVE)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id.to_string())
        .collect();
    assert_eq!(active, vec!["run".to_string(), "wait".to_string()]);

    store.update_status(&JobId::new("run"), JobStatus::Paused).await.unwrap();
    assert_eq!(
        store.job_status(&JobId::new("run")).await.unwrap(),
        Some(JobStatus::Paused)
    );
    assert!(matches!(
        store.update_status(&JobId::new("missing"), JobStatus::Paused).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn ron_store_appends_results_without_rewriting_the_snapshot() {
    harvest_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("jobs.ron");
    let store = RonFileStore::open(&path).unwrap();
    let keep = running_job("keep", &["https://a.test/p/1", "https://a.test/p/2"]);
    let gone = running_job("gone", &["https://b.test/p/1"]);
    store.put_job(&keep).await.unwrap();
    store.put_job(&gone).await.unwrap();
    let snapshot = std::fs::read_to_string(&path).unwrap();

    for url in &keep.urls {
        store
            .append_result(UrlResult::success(keep.id.clone(), url, json!({"url": url})))
            .await
            .unwrap();
    }
    store
        .append_result(UrlResult::failed(gone.id.clone(), "https://b.test/p/1", "x"))
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), snapshot);
    let log = std::fs::read_to_string(store.results_path()).unwrap();
    assert_eq!(log.lines().count(), 3);

    assert!(store.delete_job(&gone.id).await.unwrap());
    let log = std::fs::read_to_string(store.results_path()).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(!log.contains("b.test"));

    let reopened = RonFileStore::open(&path).unwrap();
    let results = reopened.list_results(&keep.id).await.unwrap();
    assert_eq!(results[1].payload, ResultPayload::Record(json!({"url": "https://a.test/p/2"})));
    assert!(reopened.get_job(&gone.id).await.unwrap().is_none());
    assert!(reopened.pending_urls(&keep.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn torn_last_result_line_is_ignored_on_open() {
    harvest_logging::initialize_for_tests();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("jobs.ron");
    let job = running_job("j1", &["https://a.test/p/1", "https://a.test/p/2"]);
    let log_path = {
        let store = RonFileStore::open(&path).unwrap();
        store.put_job(&job).await.unwrap();
        store
            .append_result(UrlResult::failed(job.id.clone(), "https://a.test/p/1", "x"))
            .await
            .unwrap();
        store.results_path().to_path_buf()
    };
    let mut log = std::fs::read_to_string(&log_path).unwrap();
    log.push_str("{\"job_id\":\"j1\",\"url\":\"https://a.te");
    std::fs::write(&log_path, log).unwrap();

    let reopened = RonFileStore::open(&path).unwrap();
    assert_eq!(
        reopened.pending_urls(&job.id).await.unwrap(),
        vec!["https://a.test/p/2".to_string()]
    );
}
