//! Bucket-to-table mirror.
//!
//! A run seeds the pool with one list task for the empty marker. Each list
//! task fetches a page, enqueues one upsert task per object, and then
//! either enqueues the list task for the next page or (in inline mode)
//! fetches it itself once the backlog has shrunk to `max_backlog` tasks.
//! The run ends when the pool drains.
//!
//! Failures go through [`ErrorPolicy`]: `abort` stops the pool with the
//! error, `skip` logs it, counts the item and lets the run continue. A
//! skipped page also skips everything after it, since its continuation
//! marker is unknown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ErrorPolicy, MirrorConfig, PaginationMode};
use crate::errors::SyncError;
use crate::listing::lister::{ListPage, ListedObject, ObjectLister};
use crate::metadata::store::{MetadataStore, ObjectRecord, UpsertOutcome, LAST_MODIFIED_FORMAT};
use crate::metrics::{ERRORS_TOTAL, OBJECTS_UPSERTED_TOTAL, PAGES_FETCHED_TOTAL};
use crate::pool::{Task, TaskQueue, WorkerPool};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub workers: usize,
    pub on_error: ErrorPolicy,
    pub pagination: PaginationMode,
    pub retry: RetryConfig,
    /// Tasks allowed in flight before an inline listing fetches its next page.
    pub max_backlog: usize,
}

impl From<&MirrorConfig> for MirrorOptions {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            workers: config.workers,
            on_error: config.on_error,
            pagination: config.pagination,
            retry: config.retry.clone(),
            max_backlog: config.workers.saturating_mul(config.page_size as usize),
        }
    }
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self::from(&MirrorConfig::default())
    }
}

/// What follows a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Last page of the listing.
    Done,
    /// More pages follow, starting after this marker.
    More(String),
}

impl PageOutcome {
    /// Decide from a page. A truncated page without objects has no marker
    /// to continue from and is rejected.
    pub fn of(page: &ListPage) -> Result<Self, SyncError> {
        if !page.is_truncated {
            return Ok(PageOutcome::Done);
        }
        match page.next_marker() {
            Some(marker) => Ok(PageOutcome::More(marker.to_string())),
            None => Err(SyncError::Decode(
                "truncated listing page contains no objects".to_string(),
            )),
        }
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub list_tasks: u64,
    pub upsert_tasks: u64,
    pub pages_fetched: u64,
    pub objects_listed: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Pages and objects dropped under [`ErrorPolicy::Skip`].
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    list_tasks: AtomicU64,
    upsert_tasks: AtomicU64,
    pages_fetched: AtomicU64,
    objects_listed: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn report(&self) -> MirrorReport {
        MirrorReport {
            list_tasks: self.list_tasks.load(Ordering::Relaxed),
            upsert_tasks: self.upsert_tasks.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            objects_listed: self.objects_listed.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    lister: Arc<dyn ObjectLister>,
    store: Arc<dyn MetadataStore>,
    options: MirrorOptions,
    counters: Counters,
}

/// Mirrors one listing into one store.
pub struct Mirror {
    shared: Arc<Shared>,
}

impl Mirror {
    pub fn new(
        lister: Arc<dyn ObjectLister>,
        store: Arc<dyn MetadataStore>,
        options: MirrorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                lister,
                store,
                options,
                counters: Counters::default(),
            }),
        }
    }

    /// Walk the whole listing. Returns the first error under
    /// [`ErrorPolicy::Abort`].
    pub async fn run(&self) -> Result<MirrorReport, SyncError> {
        let options = &self.shared.options;
        info!(
            workers = options.workers,
            pagination = ?options.pagination,
            on_error = ?options.on_error,
            "mirror started"
        );

        let seed = list_task(self.shared.clone(), String::new());
        let stats = WorkerPool::new(options.workers).run(seed).await?;

        let report = self.shared.counters.report();
        debug!(
            tasks_enqueued = stats.tasks_enqueued,
            tasks_completed = stats.tasks_completed,
            "pool finished"
        );
        Ok(report)
    }
}

fn list_task(shared: Arc<Shared>, marker: String) -> Task {
    Task::new("list", move |queue| async move {
        shared.list(queue, marker).await
    })
}

fn upsert_task(shared: Arc<Shared>, object: ListedObject) -> Task {
    Task::new("upsert", move |_queue| async move { shared.upsert(object).await })
}

fn classify(err: &SyncError) -> RetryAction {
    if err.is_transient() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

impl Shared {
    async fn list(self: Arc<Self>, queue: TaskQueue, mut marker: String) -> Result<(), SyncError> {
        Counters::bump(&self.counters.list_tasks, 1);

        loop {
            let page = match self.fetch(&marker).await {
                Ok(page) => page,
                Err(err) => return self.fail(err, "list", &marker),
            };
            Counters::bump(&self.counters.pages_fetched, 1);
            Counters::bump(&self.counters.objects_listed, page.objects.len() as u64);
            metrics::counter!(PAGES_FETCHED_TOTAL).increment(1);
            info!(
                op = "list",
                marker = %marker,
                objects = page.objects.len(),
                truncated = page.is_truncated,
                "page fetched"
            );

            let outcome = PageOutcome::of(&page);
            for object in page.objects {
                queue.push(upsert_task(self.clone(), object));
            }

            let next = match outcome {
                Ok(PageOutcome::Done) => return Ok(()),
                Ok(PageOutcome::More(next)) => next,
                Err(err) => return self.fail(err, "list", &marker),
            };

            match self.options.pagination {
                PaginationMode::Enqueue => {
                    queue.push(list_task(self.clone(), next));
                    return Ok(());
                }
                PaginationMode::Inline => {
                    queue.wait_for_room(self.options.max_backlog.max(1)).await;
                    if queue.is_stopped() {
                        return Ok(());
                    }
                    marker = next;
                }
            }
        }
    }

    async fn fetch(&self, marker: &str) -> Result<ListPage, SyncError> {
        let lister = &self.lister;
        retry_with_backoff(&self.options.retry, classify, move || {
            lister.fetch_page(marker)
        })
        .await
    }

    async fn upsert(self: Arc<Self>, object: ListedObject) -> Result<(), SyncError> {
        Counters::bump(&self.counters.upsert_tasks, 1);

        let key = object.key.clone();
        let storage_class = object.storage_class.clone();
        let record = match ObjectRecord::from_listing(object) {
            Ok(record) => record,
            Err(err) => return self.fail(err, "upsert", &key),
        };

        let store = &self.store;
        let pending = &record;
        let upserted = retry_with_backoff(&self.options.retry, classify, move || {
            store.upsert(pending.clone())
        })
        .await;
        let outcome = match upserted {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(err, "upsert", &key),
        };
        match outcome {
            UpsertOutcome::Inserted => Counters::bump(&self.counters.inserted, 1),
            UpsertOutcome::Updated => Counters::bump(&self.counters.updated, 1),
        }
        metrics::counter!(OBJECTS_UPSERTED_TOTAL, "outcome" => outcome.as_str()).increment(1);
        info!(
            op = "upsert",
            key = %record.key,
            last_modified = %record.last_modified.format(LAST_MODIFIED_FORMAT),
            size = %record.size,
            etag = %record.etag,
            storage_class = %storage_class,
            outcome = outcome.as_str(),
            "object upserted"
        );
        Ok(())
    }

    /// Apply the error policy to a failed page or object.
    fn fail(&self, err: SyncError, op: &'static str, subject: &str) -> Result<(), SyncError> {
        let kind = err.kind().as_str();
        match self.options.on_error {
            ErrorPolicy::Abort => {
                metrics::counter!(ERRORS_TOTAL, "kind" => kind, "action" => "abort").increment(1);
                error!(op, subject, kind, error = %err, "aborting mirror");
                Err(err)
            }
            ErrorPolicy::Skip => {
                metrics::counter!(ERRORS_TOTAL, "kind" => kind, "action" => "skip").increment(1);
                Counters::bump(&self.counters.skipped, 1);
                warn!(op, subject, kind, error = %err, "skipping");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Serves canned pages keyed by marker and records every marker asked for.
    #[derive(Default)]
    struct StubLister {
        pages: HashMap<String, ListPage>,
        markers: Mutex<Vec<String>>,
        transient_failures: Mutex<u32>,
    }

    impl StubLister {
        fn with_pages(pages: Vec<(&str, ListPage)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(marker, page)| (marker.to_string(), page))
                    .collect(),
                ..Default::default()
            }
        }

        /// Split `objects` into pages of `per_page`, chained by last key.
        fn paged(objects: Vec<ListedObject>, per_page: usize) -> Self {
            let chunks: Vec<Vec<ListedObject>> =
                objects.chunks(per_page).map(|c| c.to_vec()).collect();
            let count = chunks.len();
            let mut pages = HashMap::new();
            let mut marker = String::new();
            for (i, chunk) in chunks.into_iter().enumerate() {
                let next = chunk.last().map(|o| o.key.clone()).unwrap_or_default();
                pages.insert(
                    marker,
                    ListPage {
                        objects: chunk,
                        is_truncated: i + 1 < count,
                    },
                );
                marker = next;
            }
            Self {
                pages,
                ..Default::default()
            }
        }

        fn markers(&self) -> Vec<String> {
            self.markers.lock().unwrap().clone()
        }
    }

    impl ObjectLister for StubLister {
        fn fetch_page(
            &self,
            marker: &str,
        ) -> Pin<Box<dyn Future<Output = Result<ListPage, SyncError>> + Send + '_>> {
            let marker = marker.to_string();
            Box::pin(async move {
                self.markers.lock().unwrap().push(marker.clone());
                {
                    let mut remaining = self.transient_failures.lock().unwrap();
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(SyncError::Status {
                            status: 503,
                            code: "SlowDown".to_string(),
                            message: "Please reduce your request rate.".to_string(),
                        });
                    }
                }
                self.pages
                    .get(&marker)
                    .cloned()
                    .ok_or_else(|| SyncError::Decode(format!("no page for marker {marker:?}")))
            })
        }
    }

    fn object(key: &str, last_modified: &str, size: &str, etag: &str) -> ListedObject {
        ListedObject {
            key: key.to_string(),
            last_modified: last_modified.to_string(),
            size: size.to_string(),
            etag: etag.to_string(),
            storage_class: "STANDARD".to_string(),
        }
    }

    fn numbered(count: usize) -> Vec<ListedObject> {
        (0..count)
            .map(|i| {
                object(
                    &format!("obj/{i:04}"),
                    "2021-06-01T12:00:00.000Z",
                    &i.to_string(),
                    &format!("\"etag-{i}\""),
                )
            })
            .collect()
    }

    /// Memory store that notes how many pages were fetched at each upsert.
    struct PacedStore {
        inner: MemoryMetadataStore,
        lister: Arc<StubLister>,
        pages_seen: Mutex<Vec<usize>>,
    }

    impl MetadataStore for PacedStore {
        fn upsert(
            &self,
            record: ObjectRecord,
        ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, SyncError>> + Send + '_>> {
            let pages = self.lister.markers.lock().unwrap().len();
            self.pages_seen.lock().unwrap().push(pages);
            self.inner.upsert(record)
        }

        fn get_object(
            &self,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<ObjectRecord>, SyncError>> + Send + '_>>
        {
            self.inner.get_object(key)
        }

        fn count_objects(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<u64, SyncError>> + Send + '_>> {
            self.inner.count_objects()
        }
    }

    fn options(workers: usize) -> MirrorOptions {
        MirrorOptions {
            workers,
            ..Default::default()
        }
    }

    fn media_lister() -> StubLister {
        StubLister::with_pages(vec![
            (
                "",
                ListPage {
                    objects: vec![
                        object("img/a", "2020-01-01T00:00:00.000Z", "10", "\"e1\""),
                        object("img/b", "2020-01-02T00:00:00.000Z", "20", "\"e2\""),
                    ],
                    is_truncated: true,
                },
            ),
            (
                "img/b",
                ListPage {
                    objects: vec![object("img/c", "2020-01-03T00:00:00.000Z", "30", "\"e3\"")],
                    is_truncated: false,
                },
            ),
        ])
    }

    async fn run(
        lister: Arc<StubLister>,
        store: Arc<MemoryMetadataStore>,
        options: MirrorOptions,
    ) -> Result<MirrorReport, SyncError> {
        Mirror::new(lister, store, options).run().await
    }

    #[test]
    fn test_page_outcome() {
        let done = ListPage {
            objects: vec![object("a", "", "", "")],
            is_truncated: false,
        };
        assert_eq!(PageOutcome::of(&done).unwrap(), PageOutcome::Done);
        assert_eq!(PageOutcome::of(&ListPage::default()).unwrap(), PageOutcome::Done);

        let more = ListPage {
            is_truncated: true,
            ..done
        };
        assert_eq!(
            PageOutcome::of(&more).unwrap(),
            PageOutcome::More("a".to_string())
        );

        let empty_truncated = ListPage {
            objects: vec![],
            is_truncated: true,
        };
        assert!(matches!(
            PageOutcome::of(&empty_truncated),
            Err(SyncError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_two_pages_mirror_every_object() {
        let lister = Arc::new(media_lister());
        let store = Arc::new(MemoryMetadataStore::new());

        let report = run(lister.clone(), store.clone(), options(4)).await.unwrap();

        assert_eq!(lister.markers(), vec!["", "img/b"]);
        assert_eq!(report.list_tasks, 2);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.objects_listed, 3);
        assert_eq!(report.upsert_tasks, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped, 0);

        let rows = store.snapshot();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["img/a", "img/b", "img/c"]);
        assert_eq!(rows[1].size, "20");
        assert_eq!(rows[1].etag, "\"e2\"");
        assert_eq!(
            rows[2].last_modified.format(LAST_MODIFIED_FORMAT).to_string(),
            "2020-01-03T00:00:00.000Z"
        );
    }

    #[tokio::test]
    async fn test_rerun_updates_in_place() {
        let lister = Arc::new(media_lister());
        let store = Arc::new(MemoryMetadataStore::new());

        run(lister.clone(), store.clone(), options(2)).await.unwrap();
        let report = run(lister, store.clone(), options(2)).await.unwrap();

        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 3);
        assert_eq!(store.count_objects().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_many_pages_any_worker_count() {
        for workers in [1, 8] {
            let lister = Arc::new(StubLister::paged(numbered(25), 10));
            let store = Arc::new(MemoryMetadataStore::new());

            let report = run(lister.clone(), store.clone(), options(workers))
                .await
                .unwrap();

            assert_eq!(report.pages_fetched, 3, "workers={workers}");
            assert_eq!(report.list_tasks, 3, "workers={workers}");
            assert_eq!(report.inserted, 25, "workers={workers}");
            assert_eq!(lister.markers(), vec!["", "obj/0009", "obj/0019"]);
            assert_eq!(store.count_objects().await.unwrap(), 25);
        }
    }

    #[tokio::test]
    async fn test_each_upsert_sees_its_own_object() {
        let lister = Arc::new(StubLister::paged(numbered(40), 7));
        let store = Arc::new(MemoryMetadataStore::new());

        run(lister, store.clone(), options(8)).await.unwrap();

        for (i, row) in store.snapshot().iter().enumerate() {
            assert_eq!(row.key, format!("obj/{i:04}"));
            assert_eq!(row.size, i.to_string());
            assert_eq!(row.etag, format!("\"etag-{i}\""));
        }
    }

    #[tokio::test]
    async fn test_next_marker_is_last_key_of_page() {
        let lister = Arc::new(StubLister::with_pages(vec![
            (
                "",
                ListPage {
                    objects: vec![
                        object("a", "2020-01-01T00:00:00.000Z", "1", "\"1\""),
                        object("z", "2020-01-01T00:00:00.000Z", "2", "\"2\""),
                    ],
                    is_truncated: true,
                },
            ),
            ("z", ListPage::default()),
        ]));
        let store = Arc::new(MemoryMetadataStore::new());

        let report = run(lister.clone(), store, options(3)).await.unwrap();

        assert_eq!(lister.markers(), vec!["", "z"]);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.inserted, 2);
    }

    #[tokio::test]
    async fn test_first_page_failure_aborts_run() {
        let lister = Arc::new(StubLister::default());
        let store = Arc::new(MemoryMetadataStore::new());

        let err = run(lister, store.clone(), options(4)).await.unwrap_err();

        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(store.count_objects().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncated_empty_page_aborts_run() {
        let lister = Arc::new(StubLister::with_pages(vec![(
            "",
            ListPage {
                objects: vec![],
                is_truncated: true,
            },
        )]));
        let store = Arc::new(MemoryMetadataStore::new());

        let err = run(lister, store, options(2)).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    fn bad_timestamp_lister() -> StubLister {
        StubLister::with_pages(vec![(
            "",
            ListPage {
                objects: vec![
                    object("docs/a", "2020-01-01T00:00:00.000Z", "1", "\"1\""),
                    object("docs/b", "2020-01-01 00:00:00", "2", "\"2\""),
                    object("docs/c", "2020-01-01T00:00:00.000Z", "3", "\"3\""),
                ],
                is_truncated: false,
            },
        )])
    }

    #[tokio::test]
    async fn test_bad_timestamp_aborts_by_default() {
        let store = Arc::new(MemoryMetadataStore::new());
        let err = run(Arc::new(bad_timestamp_lister()), store, options(1))
            .await
            .unwrap_err();

        match err {
            SyncError::Timestamp { key, value, .. } => {
                assert_eq!(key, "docs/b");
                assert_eq!(value, "2020-01-01 00:00:00");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skip_policy_continues_past_bad_object() {
        let store = Arc::new(MemoryMetadataStore::new());
        let options = MirrorOptions {
            on_error: ErrorPolicy::Skip,
            ..options(2)
        };

        let report = run(Arc::new(bad_timestamp_lister()), store.clone(), options)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 2);
        assert!(store.get_object("docs/b").await.unwrap().is_none());
        assert_eq!(store.count_objects().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_inline_pagination_uses_one_list_task() {
        let lister = Arc::new(StubLister::paged(numbered(25), 10));
        let store = Arc::new(MemoryMetadataStore::new());
        let options = MirrorOptions {
            pagination: PaginationMode::Inline,
            ..options(4)
        };

        let report = run(lister.clone(), store.clone(), options).await.unwrap();

        assert_eq!(report.list_tasks, 1);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.upsert_tasks, 25);
        assert_eq!(lister.markers(), vec!["", "obj/0009", "obj/0019"]);
        assert_eq!(store.count_objects().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_inline_listing_waits_for_upserts() {
        let lister = Arc::new(StubLister::paged(numbered(1000), 20));
        let store = Arc::new(PacedStore {
            inner: MemoryMetadataStore::new(),
            lister: lister.clone(),
            pages_seen: Mutex::new(Vec::new()),
        });
        let options = MirrorOptions {
            pagination: PaginationMode::Inline,
            max_backlog: 20,
            ..options(2)
        };

        let report = Mirror::new(lister.clone(), store.clone(), options)
            .run()
            .await
            .unwrap();

        assert_eq!(report.pages_fetched, 50);
        assert_eq!(report.inserted, 1000);
        let seen = store.pages_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1000);
        assert_eq!(seen[0], 1);
        // Never more than one page of upserts ahead of the backlog limit.
        for (done, pages) in seen.iter().enumerate() {
            assert!(*pages <= (done + 19) / 20 + 1, "upsert {done} saw {pages} pages");
        }
    }

    #[tokio::test]
    async fn test_inline_listing_stops_after_upsert_abort() {
        let lister = Arc::new(StubLister::with_pages(vec![
            (
                "",
                ListPage {
                    objects: vec![
                        object("docs/a", "not a timestamp", "1", "\"1\""),
                        object("docs/b", "2020-01-01T00:00:00.000Z", "2", "\"2\""),
                    ],
                    is_truncated: true,
                },
            ),
            (
                "docs/b",
                ListPage {
                    objects: vec![object("docs/c", "2020-01-01T00:00:00.000Z", "3", "\"3\"")],
                    is_truncated: false,
                },
            ),
        ]));
        let store = Arc::new(MemoryMetadataStore::new());
        let options = MirrorOptions {
            pagination: PaginationMode::Inline,
            max_backlog: 1,
            ..options(1)
        };

        let err = run(lister.clone(), store, options).await.unwrap_err();

        assert!(matches!(err, SyncError::Timestamp { .. }));
        assert_eq!(lister.markers(), vec![""]);
    }

    #[tokio::test]
    async fn test_skipped_page_ends_listing() {
        let lister = Arc::new(StubLister::with_pages(vec![(
            "",
            ListPage {
                objects: vec![
                    object("img/a", "2020-01-01T00:00:00.000Z", "10", "\"e1\""),
                    object("img/b", "2020-01-02T00:00:00.000Z", "20", "\"e2\""),
                ],
                is_truncated: true,
            },
        )]));
        let store = Arc::new(MemoryMetadataStore::new());
        let options = MirrorOptions {
            on_error: ErrorPolicy::Skip,
            ..options(3)
        };

        let report = run(lister.clone(), store.clone(), options).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(lister.markers(), vec!["", "img/b"]);
        let keys: Vec<String> = store.snapshot().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["img/a", "img/b"]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_upserts_logged_at_info() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime
                .block_on(run(
                    Arc::new(media_lister()),
                    Arc::new(MemoryMetadataStore::new()),
                    options(1),
                ))
                .unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let upserts: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("object upserted"))
            .collect();
        assert_eq!(upserts.len(), 3, "{output}");
        assert!(upserts.iter().all(|line| line.contains("INFO")));
        assert!(upserts.iter().any(|line| line.contains("img/c")));
    }

    #[test]
    fn test_backlog_defaults_to_workers_times_page_size() {
        let config = MirrorConfig {
            workers: 4,
            page_size: 250,
            ..Default::default()
        };
        assert_eq!(MirrorOptions::from(&config).max_backlog, 1000);
    }

    #[tokio::test]
    async fn test_transient_listing_error_is_retried() {
        let lister = Arc::new(media_lister());
        *lister.transient_failures.lock().unwrap() = 2;
        let store = Arc::new(MemoryMetadataStore::new());
        let options = MirrorOptions {
            retry: RetryConfig {
                max_retries: 3,
                base_delay_ms: 0,
                max_delay_ms: 0,
            },
            ..options(2)
        };

        let report = run(lister.clone(), store.clone(), options).await.unwrap();

        assert_eq!(lister.markers(), vec!["", "", "", "img/b"]);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(store.count_objects().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transient_error_without_retries_aborts() {
        let lister = Arc::new(media_lister());
        *lister.transient_failures.lock().unwrap() = 1;
        let store = Arc::new(MemoryMetadataStore::new());

        let err = run(lister.clone(), store, options(2)).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(lister.markers(), vec![""]);
    }
}
