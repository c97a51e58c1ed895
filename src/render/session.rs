//! Tracks which model is displayed and mediates between the registry selection, background
//! decodes and the GPU scene.

use crate::assets::decode::ModelGeometry;
use crate::assets::{ContentDigest, EntryId, LoadStatus, ModelEntry, SourceStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Receiver of decoded models. At most one model is attached at a time.
pub trait SceneTarget {
    fn attach(&mut self, entry: EntryId, geometry: &ModelGeometry);
    fn detach(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeTag {
    pub entry: EntryId,
    pub generation: u64,
    pub digest: ContentDigest,
}

#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub tag: DecodeTag,
    pub name: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading { entry: EntryId, generation: u64 },
    Displaying { entry: EntryId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Accepted,
    Stale,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedModel {
    pub entry: EntryId,
    pub meshes: usize,
    pub triangles: usize,
}

impl AttachedModel {
    pub fn status(&self) -> LoadStatus {
        LoadStatus::Ready {
            meshes: self.meshes,
            triangles: self.triangles,
        }
    }
}

pub struct RenderSession {
    phase: SessionPhase,
    displayed: Option<EntryId>,
    generation: u64,
    cache: HashMap<ContentDigest, Arc<ModelGeometry>>,
    pending_attach: Option<(EntryId, Arc<ModelGeometry>)>,
    pending_detach: bool,
}

impl Default for RenderSession {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            displayed: None,
            generation: 0,
            cache: HashMap::new(),
            pending_attach: None,
            pending_detach: false,
        }
    }
}

impl RenderSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn displayed(&self) -> Option<EntryId> {
        self.displayed
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase(), SessionPhase::Loading { .. })
    }

    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    /// Reconcile with the current selection. Returns a decode to start when the selected
    /// entry is neither displayed, loading, cached nor known to be broken.
    pub fn sync_selection(
        &mut self,
        selected: Option<&ModelEntry>,
        store: &SourceStore,
    ) -> Option<DecodeRequest> {
        let Some(entry) = selected else {
            if self.phase() != SessionPhase::Idle {
                log::debug!("Selection cleared; detaching displayed model");
            }
            self.phase = SessionPhase::Idle;
            self.pending_attach = None;
            self.pending_detach = self.displayed.is_some();
            return None;
        };

        match self.phase() {
            SessionPhase::Loading { entry: id, .. } | SessionPhase::Displaying { entry: id }
                if id == entry.id =>
            {
                return None;
            }
            _ => {}
        }

        if self.displayed == Some(entry.id) {
            self.phase = SessionPhase::Displaying { entry: entry.id };
            self.pending_attach = None;
            self.pending_detach = false;
            return None;
        }

        if let Some(geometry) = self.cache.get(&entry.digest) {
            log::debug!("Reusing decoded geometry for '{}'", entry.name);
            self.phase = SessionPhase::Displaying { entry: entry.id };
            self.pending_attach = Some((entry.id, geometry.clone()));
            self.pending_detach = false;
            return None;
        }

        if matches!(entry.status, LoadStatus::Failed(_)) {
            return None;
        }

        let Some(bytes) = store.open(entry.source) else {
            log::warn!("Source for '{}' is no longer available", entry.name);
            return None;
        };
        self.generation += 1;
        let tag = DecodeTag {
            entry: entry.id,
            generation: self.generation,
            digest: entry.digest,
        };
        self.phase = SessionPhase::Loading {
            entry: entry.id,
            generation: self.generation,
        };
        Some(DecodeRequest {
            tag,
            name: entry.name.clone(),
            bytes,
        })
    }

    pub fn complete_decode(
        &mut self,
        tag: DecodeTag,
        result: Result<Arc<ModelGeometry>, String>,
    ) -> DecodeOutcome {
        let is_current = self.phase()
            == SessionPhase::Loading {
                entry: tag.entry,
                generation: tag.generation,
            };
        match result {
            Ok(geometry) => {
                self.cache.insert(tag.digest, geometry.clone());
                if !is_current {
                    return DecodeOutcome::Stale;
                }
                self.phase = SessionPhase::Displaying { entry: tag.entry };
                self.pending_attach = Some((tag.entry, geometry));
                self.pending_detach = false;
                DecodeOutcome::Accepted
            }
            Err(message) => {
                if !is_current {
                    return DecodeOutcome::Stale;
                }
                self.phase = match self.displayed {
                    Some(entry) => SessionPhase::Displaying { entry },
                    None => SessionPhase::Idle,
                };
                DecodeOutcome::Failed(message)
            }
        }
    }

    /// Push pending scene changes into `target`. Returns the model attached this call.
    pub fn apply(&mut self, target: &mut impl SceneTarget) -> Option<AttachedModel> {
        if std::mem::take(&mut self.pending_detach) {
            target.detach();
            self.displayed = None;
        }
        let (entry, geometry) = self.pending_attach.take()?;
        target.detach();
        target.attach(entry, &geometry);
        self.displayed = Some(entry);
        Some(AttachedModel {
            entry,
            meshes: geometry.meshes.len(),
            triangles: geometry.triangle_count(),
        })
    }

    /// Drop cached geometry whose digest no longer belongs to any entry.
    pub fn retain_digests(&mut self, live: impl IntoIterator<Item = ContentDigest>) {
        let live: HashSet<ContentDigest> = live.into_iter().collect();
        let before = self.cache.len();
        self.cache.retain(|digest, _| live.contains(digest));
        if self.cache.len() != before {
            log::debug!("Evicted {} decoded models", before - self.cache.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeOutcome, RenderSession, SceneTarget, SessionPhase};
    use crate::assets::decode::{decode_glb, tests::triangle_glb, ModelGeometry};
    use crate::assets::{AssetRegistry, EntryId, IncomingFile, LoadStatus, SourceStore};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeScene {
        attached: Vec<EntryId>,
        attach_calls: usize,
        max_attached: usize,
    }

    impl SceneTarget for FakeScene {
        fn attach(&mut self, entry: EntryId, _geometry: &ModelGeometry) {
            self.attach_calls += 1;
            self.attached.push(entry);
            self.max_attached = self.max_attached.max(self.attached.len());
        }

        fn detach(&mut self) {
            self.attached.clear();
        }
    }

    fn geometry() -> Arc<ModelGeometry> {
        Arc::new(decode_glb(&triangle_glb("", true)).unwrap())
    }

    fn setup(names: &[(&str, u8)]) -> (SourceStore, AssetRegistry) {
        let mut store = SourceStore::new();
        let mut registry = AssetRegistry::new();
        let files = names
            .iter()
            .map(|(name, byte)| IncomingFile::new(*name, vec![*byte; 8]))
            .collect();
        registry.add_files(&mut store, files);
        (store, registry)
    }

    #[test]
    fn decode_then_attach_selected_model() {
        let (store, registry) = setup(&[("a.glb", 1)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        let request = session.sync_selection(registry.selected(), &store).unwrap();
        assert!(session.is_loading());
        assert!(session.sync_selection(registry.selected(), &store).is_none());

        assert_eq!(
            session.complete_decode(request.tag, Ok(geometry())),
            DecodeOutcome::Accepted
        );
        let attached = session.apply(&mut scene).unwrap();
        assert_eq!(attached.triangles, 1);
        assert_eq!(scene.attached, vec![request.tag.entry]);
        assert_eq!(session.phase(), SessionPhase::Displaying { entry: request.tag.entry });
    }

    #[test]
    fn at_most_one_model_attached_across_selection_changes() {
        let (store, mut registry) = setup(&[("a.glb", 1), ("b.glb", 2), ("c.glb", 3)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        for index in [0, 1, 2, 1, 0, 2] {
            registry.select(index).unwrap();
            if let Some(request) = session.sync_selection(registry.selected(), &store) {
                session.complete_decode(request.tag, Ok(geometry()));
            }
            session.apply(&mut scene);
            assert!(scene.attached.len() <= 1);
        }
        assert_eq!(scene.max_attached, 1);
    }

    #[test]
    fn result_for_deselected_entry_is_stale() {
        let (store, mut registry) = setup(&[("a.glb", 1), ("b.glb", 2)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        registry.select(0).unwrap();
        let first = session.sync_selection(registry.selected(), &store).unwrap();
        registry.select(1).unwrap();
        let second = session.sync_selection(registry.selected(), &store).unwrap();

        assert_eq!(session.complete_decode(first.tag, Ok(geometry())), DecodeOutcome::Stale);
        assert!(session.apply(&mut scene).is_none());
        assert_eq!(session.complete_decode(second.tag, Ok(geometry())), DecodeOutcome::Accepted);
        session.apply(&mut scene);
        assert_eq!(scene.attached, vec![second.tag.entry]);
    }

    #[test]
    fn removed_selection_detaches_and_discards_late_result() {
        let (mut store, mut registry) = setup(&[("a.glb", 1), ("b.glb", 2)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        registry.select(0).unwrap();
        let request = session.sync_selection(registry.selected(), &store).unwrap();
        session.complete_decode(request.tag, Ok(geometry()));
        session.apply(&mut scene);

        registry.select(1).unwrap();
        let pending = session.sync_selection(registry.selected(), &store).unwrap();
        registry.remove_selected(&mut store);
        assert!(session.sync_selection(registry.selected(), &store).is_none());
        session.apply(&mut scene);
        assert!(scene.attached.is_empty());
        assert_eq!(session.displayed(), None);

        assert_eq!(session.complete_decode(pending.tag, Ok(geometry())), DecodeOutcome::Stale);
        assert!(session.apply(&mut scene).is_none());
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn failed_decode_keeps_previous_model() {
        let (store, mut registry) = setup(&[("good.glb", 1), ("bad.glb", 2)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        registry.select(0).unwrap();
        let good = session.sync_selection(registry.selected(), &store).unwrap();
        session.complete_decode(good.tag, Ok(geometry()));
        session.apply(&mut scene);

        registry.select(1).unwrap();
        let bad = session.sync_selection(registry.selected(), &store).unwrap();
        let outcome = session.complete_decode(bad.tag, Err("broken".to_string()));
        assert_eq!(outcome, DecodeOutcome::Failed("broken".to_string()));
        assert!(session.apply(&mut scene).is_none());
        assert_eq!(scene.attached, vec![good.tag.entry]);
        assert_eq!(session.phase(), SessionPhase::Displaying { entry: good.tag.entry });

        registry.set_status(bad.tag.entry, LoadStatus::Failed("broken".to_string()));
        assert!(session.sync_selection(registry.selected(), &store).is_none());
    }

    #[test]
    fn duplicate_content_reuses_cached_geometry() {
        let (store, mut registry) = setup(&[("a.glb", 7), ("copy.glb", 7)]);
        let mut session = RenderSession::new();
        let mut scene = FakeScene::default();

        registry.select(0).unwrap();
        let request = session.sync_selection(registry.selected(), &store).unwrap();
        session.complete_decode(request.tag, Ok(geometry()));
        session.apply(&mut scene);

        registry.select(1).unwrap();
        assert!(session.sync_selection(registry.selected(), &store).is_none());
        let attached = session.apply(&mut scene).unwrap();
        assert_eq!(attached.entry, registry.entries()[1].id);
        assert_eq!(scene.attach_calls, 2);
        assert_eq!(session.cached_models(), 1);
    }

    #[test]
    fn cache_evicts_digests_without_entries() {
        let (mut store, mut registry) = setup(&[("a.glb", 1)]);
        let mut session = RenderSession::new();
        let request = session.sync_selection(registry.selected(), &store).unwrap();
        session.complete_decode(request.tag, Ok(geometry()));
        assert_eq!(session.cached_models(), 1);

        registry.remove_selected(&mut store);
        session.retain_digests(registry.digests());
        assert_eq!(session.cached_models(), 0);
    }
}
