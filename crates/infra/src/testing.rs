//! Fake adapters and generated resource trees for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use proptest::sample::Index;

use portage_core::{
    AdapterError, AuthData, ContainerResource, ContinuationData, DataItem, ExportInformation,
    ExportPage, ExportResult, Exporter, ImportResult, Importer, JobId, PaginationToken,
};

type PageKey = (Option<String>, Option<String>);

fn page_key(resource: Option<&str>, token: Option<&str>) -> PageKey {
    (resource.map(str::to_string), token.map(str::to_string))
}

/// Exporter answering from a fixed script keyed by (container id, page token).
/// Clones share the script and the call log.
#[derive(Clone, Default)]
pub(crate) struct ScriptedExporter {
    pages: Arc<HashMap<PageKey, Result<ExportResult<ExportPage>, AdapterError>>>,
    calls: Arc<Mutex<Vec<ExportInformation>>>,
}

impl ScriptedExporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(
        self,
        resource: Option<&str>,
        token: Option<&str>,
        result: ExportResult<ExportPage>,
    ) -> Self {
        self.script(page_key(resource, token), Ok(result))
    }

    pub(crate) fn failing(self, resource: Option<&str>, token: Option<&str>, err: AdapterError) -> Self {
        self.script(page_key(resource, token), Err(err))
    }

    fn script(mut self, key: PageKey, answer: Result<ExportResult<ExportPage>, AdapterError>) -> Self {
        Arc::make_mut(&mut self.pages).insert(key, answer);
        self
    }

    /// Export calls made for a container (`None` for the whole library).
    pub(crate) fn calls_for(&self, resource: Option<&str>) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|info| info.resource.as_ref().map(|r| r.id.as_str()) == resource)
            .count()
    }
}

impl Exporter for ScriptedExporter {
    fn export(
        &self,
        _job_id: JobId,
        _auth: &AuthData,
        info: &ExportInformation,
    ) -> Result<ExportResult<ExportPage>, AdapterError> {
        self.calls.lock().unwrap().push(info.clone());
        let key = page_key(
            info.resource.as_ref().map(|r| r.id.as_str()),
            info.pagination.as_ref().map(PaginationToken::as_str),
        );
        self.pages
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(AdapterError::permanent(format!("unscripted export {key:?}"))))
    }
}

/// Importer that records successful imports in call order.
/// Clones share the log.
#[derive(Clone, Default)]
pub(crate) struct RecordingImporter {
    rejected: Arc<HashSet<String>>,
    bytes_per_item: Option<u64>,
    imported: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<usize>>,
}

impl RecordingImporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer `ImportResult::Error` for this item id.
    pub(crate) fn rejecting(mut self, id: &str) -> Self {
        Arc::make_mut(&mut self.rejected).insert(id.to_string());
        self
    }

    pub(crate) fn with_bytes(mut self, n: u64) -> Self {
        self.bytes_per_item = Some(n);
        self
    }

    pub(crate) fn imported_ids(&self) -> Vec<String> {
        self.imported.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Importer for RecordingImporter {
    fn import(
        &self,
        _job_id: JobId,
        _auth: &AuthData,
        item: &DataItem,
    ) -> Result<ImportResult, AdapterError> {
        *self.calls.lock().unwrap() += 1;
        if self.rejected.contains(&item.id) {
            return Ok(ImportResult::error(format!("{} rejected", item.id)));
        }
        self.imported.lock().unwrap().push(item.id.clone());
        let result = ImportResult::ok().with_count("items", 1);
        Ok(match self.bytes_per_item {
            Some(n) => result.with_bytes(n),
            None => result,
        })
    }
}

#[derive(Debug, Clone)]
struct NodeSpec {
    pages: usize,
    parent: usize,
    found_on_page: usize,
    export_fails: bool,
    import_fails: bool,
}

/// A random container tree. Node 0 is the whole library; node `n > 0` is
/// container `c{n}`, listed on one page of its parent. Page `p` of node `n`
/// exports leaf `n{n}-p{p}` plus the containers found on it.
#[derive(Debug, Clone)]
pub(crate) struct TreeSpec {
    nodes: Vec<NodeSpec>,
}

impl TreeSpec {
    pub(crate) fn strategy() -> impl Strategy<Value = TreeSpec> {
        prop::collection::vec(
            (
                1usize..=3,
                any::<Index>(),
                any::<Index>(),
                prop::bool::weighted(0.1),
                prop::bool::weighted(0.1),
            ),
            1..14,
        )
        .prop_map(|raw| {
            let mut nodes: Vec<NodeSpec> = Vec::with_capacity(raw.len());
            for (i, (pages, parent, page, export_fails, import_fails)) in raw.into_iter().enumerate() {
                let (parent, found_on_page) = if i == 0 {
                    (0, 0)
                } else {
                    let parent = parent.index(i);
                    (parent, page.index(nodes[parent].pages))
                };
                nodes.push(NodeSpec {
                    pages,
                    parent,
                    found_on_page,
                    export_fails: i > 0 && export_fails,
                    import_fails: i > 0 && import_fails,
                });
            }
            TreeSpec { nodes }
        })
    }

    fn resource_id(n: usize) -> Option<String> {
        (n > 0).then(|| format!("c{n}"))
    }

    fn children_on(&self, node: usize, page: usize) -> Vec<usize> {
        (1..self.nodes.len())
            .filter(|&c| self.nodes[c].parent == node && self.nodes[c].found_on_page == page)
            .collect()
    }

    pub(crate) fn exporter(&self) -> ScriptedExporter {
        let mut exporter = ScriptedExporter::new();
        for (n, node) in self.nodes.iter().enumerate() {
            let resource = Self::resource_id(n);
            for p in 0..node.pages {
                let token = (p > 0).then(|| p.to_string());
                let key = (resource.as_deref(), token.as_deref());

                if node.export_fails && p + 1 == node.pages {
                    exporter = exporter.page(key.0, key.1, ExportResult::error(format!("n{n} broken")));
                    continue;
                }

                let children = self.children_on(n, p);
                let mut items = vec![DataItem::leaf(format!("n{n}-p{p}"), format!("node {n} page {p}"))];
                items.extend(
                    children
                        .iter()
                        .map(|c| DataItem::container(format!("c{c}"), format!("container {c}"))),
                );
                let next = (p + 1 < node.pages).then(|| PaginationToken::new((p + 1).to_string()));
                let subs = children
                    .iter()
                    .map(|c| ContainerResource::new(format!("c{c}")))
                    .collect();
                exporter = exporter.page(
                    key.0,
                    key.1,
                    ExportResult::new(items, ContinuationData::new(next, subs)),
                );
            }
        }
        exporter
    }

    pub(crate) fn importer(&self) -> RecordingImporter {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.import_fails)
            .fold(RecordingImporter::new(), |imp, (n, _)| imp.rejecting(&format!("c{n}")))
    }

    /// Leaf id of the whole library's last page.
    pub(crate) fn last_library_page(&self) -> String {
        format!("n0-p{}", self.nodes[0].pages - 1)
    }

    /// Resource ids the importer rejects.
    pub(crate) fn rejected_containers(&self) -> Vec<String> {
        (1..self.nodes.len())
            .filter(|&n| self.nodes[n].import_fails)
            .map(|n| format!("c{n}"))
            .collect()
    }

    /// `(child, leaf id of the parent's last page)` for every non-root node.
    pub(crate) fn ordering_constraints(&self) -> Vec<(usize, String)> {
        (1..self.nodes.len())
            .map(|c| {
                let parent = self.nodes[c].parent;
                let last = self.nodes[parent].pages - 1;
                (c, format!("n{parent}-p{last}"))
            })
            .collect()
    }
}
