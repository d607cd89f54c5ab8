//! Export → import copy orchestration.
//!
//! One step exports an [`ExportInformation`], imports what came back and
//! yields the continuation. The traversal decides what runs next:
//!
//! - [`Traversal::Recursive`]: depth-first recursion
//! - [`Traversal::Stack`]: the same order driven by an explicit work stack
//!
//! Both finish a container's next page (and everything under it) before any
//! sub-resource found on the current page, so children never run ahead of
//! parents created by earlier pages.
//!
//! Failures stay local. An export error ends that branch only. A failed
//! container import drops the container's subtree (its leaves on the page and
//! its sub-resource export) while the page's siblings and next page carry on.
//! A failed leaf import is recorded and skipped.
//!
//! Containers and leaves are cached under separate idempotency keys (see
//! [`DataItem::import_key`]), so an album and a photo may share an id.

mod recursive;
mod stack;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use portage_core::{
    AdapterError, AuthData, ContainerResource, ContinuationData, DataItem, ExportInformation,
    Exporter, ImportResult, Importer, ItemKind, JobId,
};
use portage_observability::{LoggingMetricRecorder, MetricRecorder, TransferLabels};

use crate::idempotent::{ErrorDetail, IdempotentImportExecutor};
use crate::retry::{RetryError, RetryStrategyLibrary, RetryingCallable};

/// Traversal variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Traversal {
    Recursive,
    #[default]
    Stack,
}

impl FromStr for Traversal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Traversal::Recursive),
            "stack" => Ok(Traversal::Stack),
            other => Err(format!("unknown traversal {other:?} (expected stack or recursive)")),
        }
    }
}

/// A branch that stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    #[error("export of {at:?} failed: {message}")]
    Export {
        at: ExportInformation,
        message: String,
    },
    #[error("import of {} failed: {}", .0.id, .0.cause)]
    ImportContainer(ErrorDetail),
}

/// Everything a job run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyReport {
    /// Every failed import, containers included, in the order recorded.
    /// Ids are [`DataItem::import_key`]s (`container:<id>` or `item:<id>`).
    pub errors: Vec<ErrorDetail>,
    /// Branches that were cut short.
    pub branch_failures: Vec<CopyError>,
    /// Merged counts and byte totals of successful imports.
    pub imported: ImportResult,
    /// Export calls made (one per step).
    pub iterations: u64,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.branch_failures.is_empty()
    }
}

/// Drives one job's copy with a given exporter/importer pair.
#[derive(Clone)]
pub struct DataCopier {
    exporter: Arc<dyn Exporter>,
    importer: Arc<dyn Importer>,
    retry: Arc<RetryStrategyLibrary>,
    traversal: Traversal,
    metrics: Arc<dyn MetricRecorder>,
    labels: TransferLabels,
}

impl DataCopier {
    pub fn new(
        exporter: Arc<dyn Exporter>,
        importer: Arc<dyn Importer>,
        retry: Arc<RetryStrategyLibrary>,
    ) -> Self {
        Self {
            exporter,
            importer,
            retry,
            traversal: Traversal::default(),
            metrics: Arc::new(LoggingMetricRecorder),
            labels: TransferLabels::default(),
        }
    }

    /// Report per-page export/import outcomes to `metrics`, tagged with
    /// `labels`.
    pub fn with_metrics(
        mut self,
        metrics: Arc<dyn MetricRecorder>,
        labels: TransferLabels,
    ) -> Self {
        self.metrics = metrics;
        self.labels = labels;
        self
    }

    pub fn with_traversal(mut self, traversal: Traversal) -> Self {
        self.traversal = traversal;
        self
    }

    /// Copy the whole library. A fresh idempotent executor is used per call.
    pub fn copy(&self, job_id: JobId, export_auth: &AuthData, import_auth: &AuthData) -> CopyReport {
        self.copy_from(job_id, export_auth, import_auth, ExportInformation::whole_library())
    }

    /// Copy starting at `start` instead of the whole library.
    pub fn copy_from(
        &self,
        job_id: JobId,
        export_auth: &AuthData,
        import_auth: &AuthData,
        start: ExportInformation,
    ) -> CopyReport {
        let executor = IdempotentImportExecutor::new();
        let mut run = CopyRun {
            job_id,
            exporter: self.exporter.as_ref(),
            importer: self.importer.as_ref(),
            retry: &self.retry,
            export_auth,
            import_auth,
            executor: &executor,
            metrics: self.metrics.as_ref(),
            labels: &self.labels,
            branch_failures: Vec::new(),
            imported: ImportResult::ok(),
            iterations: 0,
        };

        info!(job_id = %job_id, traversal = ?self.traversal, "copy started");
        match self.traversal {
            Traversal::Recursive => recursive::run(&mut run, start),
            Traversal::Stack => stack::run(&mut run, start),
        }

        let report = CopyReport {
            errors: executor.errors(),
            branch_failures: run.branch_failures,
            imported: run.imported,
            iterations: run.iterations,
        };
        info!(
            job_id = %job_id,
            iterations = report.iterations,
            errors = report.errors.len(),
            branch_failures = report.branch_failures.len(),
            "copy finished"
        );
        report
    }
}

impl core::fmt::Debug for DataCopier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DataCopier")
            .field("traversal", &self.traversal)
            .finish_non_exhaustive()
    }
}

/// State for one copy; shared by both traversals.
pub(crate) struct CopyRun<'a> {
    job_id: JobId,
    exporter: &'a dyn Exporter,
    importer: &'a dyn Importer,
    retry: &'a RetryStrategyLibrary,
    export_auth: &'a AuthData,
    import_auth: &'a AuthData,
    executor: &'a IdempotentImportExecutor<ImportResult>,
    metrics: &'a dyn MetricRecorder,
    labels: &'a TransferLabels,
    branch_failures: Vec<CopyError>,
    imported: ImportResult,
    iterations: u64,
}

impl CopyRun<'_> {
    /// Export `info` and import the page. `None` ends the branch:
    ///
    /// - nothing left to export
    /// - the export failed
    /// - `info` is inside a container whose import failed (not exported)
    pub(crate) fn step(&mut self, info: &ExportInformation) -> Option<ContinuationData> {
        if info.resource.as_ref().is_some_and(|r| self.container_failed(r)) {
            return None;
        }
        self.iterations += 1;
        debug!(
            iteration = self.iterations,
            pagination = ?info.pagination,
            resource = ?info.resource.as_ref().map(|r| &r.id),
            "copy iteration"
        );

        let export_started = Instant::now();
        let exported = RetryingCallable::new(self.retry)
            .labelled("export")
            .call(|| self.exporter.export(self.job_id, self.export_auth, info));
        let parts = match exported {
            Ok(result) => result.into_parts(),
            Err(e) => Err(e.to_string()),
        };
        self.metrics
            .export_page_finished(self.labels, parts.is_ok(), export_started.elapsed());
        let (page, continuation) = match parts {
            Ok(parts) => parts,
            Err(message) => {
                warn!(iteration = self.iterations, error = %message, "export failed; branch stopped");
                self.branch_failures.push(CopyError::Export {
                    at: info.clone(),
                    message,
                });
                return None;
            }
        };

        let (containers, leaves): (Vec<DataItem>, Vec<DataItem>) =
            page.into_iter().partition(DataItem::is_container);

        let import_started = Instant::now();
        let mut page_ok = true;
        for container in &containers {
            if let Err(detail) = self.import_container(container) {
                page_ok = false;
                warn!(
                    container = %container.id,
                    error = %detail.cause,
                    "container import failed; subtree skipped"
                );
                self.branch_failures.push(CopyError::ImportContainer(detail));
            }
        }
        for leaf in &leaves {
            page_ok &= self.import_leaf(leaf);
        }
        self.metrics
            .import_page_finished(self.labels, page_ok, import_started.elapsed());

        continuation
    }

    /// Whether `resource` was imported as a container and failed. Its export
    /// is skipped; leaves pointing at it already failed through
    /// [`CopyRun::import_leaf`].
    fn container_failed(&self, resource: &ContainerResource) -> bool {
        let key = ItemKind::Container.import_key(&resource.id);
        let failed = self.executor.cached_error(&key).is_some();
        if failed {
            debug!(container = %resource.id, "skipping sub-resource of failed container");
        }
        failed
    }

    fn import_container(&mut self, item: &DataItem) -> Result<ImportResult, ErrorDetail> {
        let executor = self.executor;
        let imported = &mut self.imported;
        let (job_id, auth, importer, retry) = (self.job_id, self.import_auth, self.importer, self.retry);
        executor.execute_or_throw(&item.import_key(), &item.name, || {
            let result = import_with_retry(importer, retry, job_id, auth, item)?;
            accumulate(imported, &result);
            Ok::<_, String>(result)
        })
    }

    /// Import one leaf; `false` when it failed (now or on an earlier page).
    fn import_leaf(&mut self, item: &DataItem) -> bool {
        let executor = self.executor;
        let key = item.import_key();
        if let Some(parent) = item.parent_id.as_deref() {
            let parent_key = ItemKind::Container.import_key(parent);
            if let Some(failed) = executor.cached_error(&parent_key) {
                let cause = format!("parent container {parent} failed: {}", failed.cause);
                executor.execute_and_swallow(&key, &item.name, || Err::<ImportResult, _>(cause));
                return false;
            }
        }

        let imported = &mut self.imported;
        let (job_id, auth, importer, retry) = (self.job_id, self.import_auth, self.importer, self.retry);
        executor
            .execute_and_swallow(&key, &item.name, || {
                let result = import_with_retry(importer, retry, job_id, auth, item)?;
                accumulate(imported, &result);
                Ok::<_, String>(result)
            })
            .is_some()
    }
}

fn import_with_retry(
    importer: &dyn Importer,
    retry: &RetryStrategyLibrary,
    job_id: JobId,
    auth: &AuthData,
    item: &DataItem,
) -> Result<ImportResult, String> {
    let result = RetryingCallable::new(retry)
        .labelled("import")
        .call(|| importer.import(job_id, auth, item))
        .map_err(|e: RetryError<AdapterError>| e.to_string())?;
    // The importer answering Error is a failed import, same as a transport
    // error. For a container the caller (`execute_or_throw`) drops the whole
    // subtree; for a leaf (`execute_and_swallow`) it is recorded and skipped.
    match result {
        ImportResult::Error { message } => Err(message),
        ok => Ok(ok),
    }
}

fn accumulate(total: &mut ImportResult, result: &ImportResult) {
    let previous = std::mem::replace(total, ImportResult::ok());
    *total = previous.merge(result.clone());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use portage_core::{AdapterError, ContainerResource, ExportResult, PaginationToken};
    use portage_observability::{InMemoryMetricRecorder, MetricEvent};
    use proptest::prelude::*;

    use super::*;
    use crate::retry::RetryStrategy;
    use crate::testing::{RecordingImporter, ScriptedExporter, TreeSpec};

    fn fast_retry() -> Arc<RetryStrategyLibrary> {
        Arc::new(RetryStrategyLibrary::uniform(RetryStrategy::simple(
            3,
            Duration::from_millis(1),
        )))
    }

    fn copier(exporter: Arc<ScriptedExporter>, importer: Arc<RecordingImporter>, t: Traversal) -> DataCopier {
        DataCopier::new(exporter, importer, fast_retry()).with_traversal(t)
    }

    fn run(exporter: ScriptedExporter, importer: RecordingImporter, t: Traversal) -> (CopyReport, Vec<String>) {
        let importer = Arc::new(importer);
        let report = copier(Arc::new(exporter), importer.clone(), t).copy(
            JobId::new(),
            &AuthData::token("export"),
            &AuthData::token("import"),
        );
        (report, importer.imported_ids())
    }

    /// Page 1 finds album A and a second page; A's items must come after page 2.
    fn two_pages_and_an_album() -> ScriptedExporter {
        let album = ContainerResource::new("A");
        ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![DataItem::leaf("p1", "page one")],
                    Some(
                        ContinuationData::sub_resource(album)
                            .and_next_page(PaginationToken::new("page-2")),
                    ),
                ),
            )
            .page(None, Some("page-2"), ExportResult::end(vec![DataItem::leaf("p2", "page two")]))
            .page(
                Some("A"),
                None,
                ExportResult::end(vec![DataItem::leaf("a1", "in album").in_container("A")]),
            )
    }

    #[test]
    fn next_page_runs_before_sub_resources() {
        for t in [Traversal::Recursive, Traversal::Stack] {
            let (report, imported) = run(two_pages_and_an_album(), RecordingImporter::new(), t);
            assert_eq!(imported, vec!["p1", "p2", "a1"], "{t:?}");
            assert!(report.is_clean());
            assert_eq!(report.iterations, 3);
        }
    }

    #[test]
    fn containers_are_imported_before_their_leaves() {
        let exporter = ScriptedExporter::new().page(
            None,
            None,
            ExportResult::end(vec![
                DataItem::leaf("p1", "photo").in_container("a"),
                DataItem::container("a", "album"),
            ]),
        );
        let (_, imported) = run(exporter, RecordingImporter::new(), Traversal::Stack);
        assert_eq!(imported, vec!["a", "p1"]);
    }

    #[test]
    fn export_error_stops_only_its_branch() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![DataItem::leaf("root", "root")],
                    ContinuationData::new(
                        None,
                        vec![ContainerResource::new("bad"), ContainerResource::new("good")],
                    ),
                ),
            )
            .page(Some("bad"), None, ExportResult::error("album gone"))
            .page(Some("good"), None, ExportResult::end(vec![DataItem::leaf("g1", "g1")]));

        for t in [Traversal::Recursive, Traversal::Stack] {
            let (report, imported) = run(exporter.clone(), RecordingImporter::new(), t);
            assert_eq!(imported, vec!["root", "g1"]);
            assert_eq!(report.branch_failures.len(), 1);
            assert!(matches!(
                &report.branch_failures[0],
                CopyError::Export { message, .. } if message == "album gone"
            ));
        }
    }

    #[test]
    fn transport_errors_are_retried_then_reported() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![],
                    Some(ContinuationData::sub_resource(ContainerResource::new("x"))),
                ),
            )
            .failing(Some("x"), None, AdapterError::transport("timeout"));

        let (report, _) = run(exporter.clone(), RecordingImporter::new(), Traversal::Stack);
        assert_eq!(exporter.calls_for(Some("x")), 3);
        assert!(matches!(
            &report.branch_failures[..],
            [CopyError::Export { message, .. }] if message.contains("3 attempt")
        ));
    }

    #[test]
    fn failed_leaf_is_recorded_and_siblings_continue() {
        let exporter = ScriptedExporter::new().page(
            None,
            None,
            ExportResult::end(vec![
                DataItem::leaf("ok-1", "one"),
                DataItem::leaf("broken", "two"),
                DataItem::leaf("ok-2", "three"),
            ]),
        );
        let importer = RecordingImporter::new().rejecting("broken");
        let (report, imported) = run(exporter, importer, Traversal::Recursive);

        assert_eq!(imported, vec!["ok-1", "ok-2"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].id, "item:broken");
        assert_eq!(report.errors[0].display_name, "two");
        assert!(report.branch_failures.is_empty());
    }

    #[test]
    fn failed_container_cuts_its_subtree() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![
                        DataItem::container("album", "album"),
                        DataItem::leaf("child", "child").in_container("album"),
                        DataItem::leaf("loose", "loose"),
                    ],
                    Some(ContinuationData::sub_resource(ContainerResource::new("album"))),
                ),
            )
            .page(
                Some("album"),
                None,
                ExportResult::end(vec![DataItem::leaf("deep", "deep").in_container("album")]),
            );
        for t in [Traversal::Recursive, Traversal::Stack] {
            let importer = RecordingImporter::new().rejecting("album");
            let (report, imported) = run(exporter.clone(), importer, t);
            assert_eq!(imported, vec!["loose"]);
            let failed: Vec<_> = report.errors.iter().map(|e| e.id.as_str()).collect();
            assert_eq!(failed, vec!["container:album", "item:child"]);
            assert!(matches!(
                &report.branch_failures[..],
                [CopyError::ImportContainer(d)] if d.id == "container:album"
            ));
            assert_eq!(exporter.calls_for(Some("album")), 0);
        }
    }

    #[test]
    fn failed_container_keeps_next_page_and_siblings() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![DataItem::container("A", "a"), DataItem::container("B", "b")],
                    ContinuationData::new(
                        Some(PaginationToken::new("2")),
                        vec![ContainerResource::new("A"), ContainerResource::new("B")],
                    ),
                ),
            )
            .page(None, Some("2"), ExportResult::end(vec![DataItem::leaf("p2", "page two")]))
            .page(
                Some("A"),
                None,
                ExportResult::end(vec![DataItem::leaf("a1", "a1").in_container("A")]),
            )
            .page(
                Some("B"),
                None,
                ExportResult::end(vec![DataItem::leaf("b1", "b1").in_container("B")]),
            );

        for t in [Traversal::Recursive, Traversal::Stack] {
            let importer = RecordingImporter::new().rejecting("A");
            let (report, imported) = run(exporter.clone(), importer, t);
            assert_eq!(imported, vec!["B", "p2", "b1"], "{t:?}");
            assert_eq!(report.iterations, 3, "{t:?}");
            assert!(matches!(
                &report.branch_failures[..],
                [CopyError::ImportContainer(d)] if d.id == "container:A"
            ));
        }
        assert_eq!(exporter.calls_for(Some("A")), 0);
    }

    #[test]
    fn container_and_leaf_may_share_an_id() {
        let exporter = ScriptedExporter::new().page(
            None,
            None,
            ExportResult::end(vec![
                DataItem::container("42", "album"),
                DataItem::leaf("42", "photo").in_container("42"),
            ]),
        );
        let importer = RecordingImporter::new();
        let (report, imported) = run(exporter, importer.clone(), Traversal::Stack);

        assert_eq!(imported, vec!["42", "42"]);
        assert_eq!(importer.calls(), 2);
        assert!(report.is_clean());
        assert_eq!(report.imported, ImportResult::ok().with_count("items", 2));
    }

    #[test]
    fn page_outcomes_are_reported_as_metrics() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![DataItem::leaf("ok", "ok")],
                    ContinuationData::new(
                        Some(PaginationToken::new("2")),
                        vec![ContainerResource::new("gone")],
                    ),
                ),
            )
            .page(None, Some("2"), ExportResult::end(vec![DataItem::leaf("bad", "bad")]))
            .page(Some("gone"), None, ExportResult::error("album deleted"));
        let metrics = Arc::new(InMemoryMetricRecorder::new());
        let labels = TransferLabels::new("photos", "src", "dst");

        DataCopier::new(
            Arc::new(exporter),
            Arc::new(RecordingImporter::new().rejecting("bad")),
            fast_retry(),
        )
        .with_metrics(metrics.clone(), labels.clone())
        .copy(JobId::new(), &AuthData::token("e"), &AuthData::token("i"));

        let export = |success| MetricEvent::ExportPage {
            labels: labels.clone(),
            success,
        };
        let import = |success| MetricEvent::ImportPage {
            labels: labels.clone(),
            success,
        };
        assert_eq!(
            metrics.events(),
            vec![export(true), import(true), export(true), import(false), export(false)]
        );
    }

    #[test]
    fn duplicate_items_are_imported_once() {
        let exporter = ScriptedExporter::new()
            .page(
                None,
                None,
                ExportResult::new(
                    vec![DataItem::leaf("dup", "dup")],
                    Some(ContinuationData::next_page(PaginationToken::new("2"))),
                ),
            )
            .page(None, Some("2"), ExportResult::end(vec![DataItem::leaf("dup", "dup")]));
        let importer = RecordingImporter::new();
        let (report, imported) = run(exporter, importer.clone(), Traversal::Stack);

        assert_eq!(imported, vec!["dup"]);
        assert_eq!(importer.calls(), 1);
        assert_eq!(report.imported, ImportResult::ok().with_count("items", 1));
    }

    #[test]
    fn import_counts_are_merged() {
        let exporter = ScriptedExporter::new().page(
            None,
            None,
            ExportResult::end(vec![
                DataItem::container("a", "a"),
                DataItem::leaf("1", "1"),
                DataItem::leaf("2", "2"),
            ]),
        );
        let importer = RecordingImporter::new().with_bytes(10);
        let (report, _) = run(exporter, importer, Traversal::Stack);

        assert_eq!(
            report.imported,
            ImportResult::ok().with_count("items", 3).with_bytes(30)
        );
    }

    #[test]
    fn traversal_parses_case_insensitively() {
        assert_eq!("Stack".parse::<Traversal>(), Ok(Traversal::Stack));
        assert_eq!(" recursive ".parse::<Traversal>(), Ok(Traversal::Recursive));
        assert!("bfs".parse::<Traversal>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn stack_and_recursive_traversals_agree(tree in TreeSpec::strategy()) {
            let (rec_report, rec_order) =
                run(tree.exporter(), tree.importer(), Traversal::Recursive);
            let (stack_report, stack_order) =
                run(tree.exporter(), tree.importer(), Traversal::Stack);

            prop_assert_eq!(rec_order, stack_order);
            prop_assert_eq!(rec_report.iterations, stack_report.iterations);
            prop_assert_eq!(&rec_report.branch_failures, &stack_report.branch_failures);
            prop_assert_eq!(&rec_report.imported, &stack_report.imported);
            let ids = |r: &CopyReport| r.errors.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
            prop_assert_eq!(ids(&rec_report), ids(&stack_report));
        }

        #[test]
        fn failed_containers_never_stop_the_library_pages(tree in TreeSpec::strategy()) {
            for t in [Traversal::Recursive, Traversal::Stack] {
                let exporter = tree.exporter();
                let (_, order) = run(exporter.clone(), tree.importer(), t);
                prop_assert!(order.contains(&tree.last_library_page()), "{:?}", t);
                for failed in tree.rejected_containers() {
                    prop_assert_eq!(exporter.calls_for(Some(failed.as_str())), 0);
                }
            }
        }

        #[test]
        fn pages_finish_before_discovered_children(tree in TreeSpec::strategy()) {
            let (_, order) = run(tree.exporter(), tree.importer(), Traversal::Stack);
            for (child, parent_last_page) in tree.ordering_constraints() {
                let child_first = order.iter().position(|id| id.starts_with(&format!("n{child}-")));
                let parent_last = order.iter().position(|id| *id == parent_last_page);
                if let (Some(c), Some(p)) = (child_first, parent_last) {
                    prop_assert!(p < c, "child n{} ran before {}", child, parent_last_page);
                }
            }
        }
    }
}
