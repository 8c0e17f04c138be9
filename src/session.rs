//! Session: the UI-facing facade over the data plane
//!
//! Owns the registry and the entry list, translates UI intents into decoder,
//! edit, selection and export calls, and keeps `transform_version` counters
//! honest so the renderer knows when to rebuild buffers.

use log::info;
use pointstudio_algorithms::{
    delete_points, scale, select_in_rect, thin, translate, DeleteOutcome, SelectionRect,
};
use pointstudio_core::{
    CanonicalCloud, CloudEntry, CloudRegistry, ColorMode, Error, IndexProgress, Matrix4, Result,
};
use pointstudio_io::{decode_bytes, export_cloud, read_cloud_from_path, ExportFormat};
use pointstudio_reconstruction::{
    greedy_projection, CancelFlag, ReconstructionParams, ReconstructionResult,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};
use std::thread::JoinHandle;

/// A reconstruction running on a worker thread.
///
/// The cancel flag is live immediately; the result arrives through the
/// handle and is applied back onto the cloud with
/// [`Session::apply_reconstruction`].
pub struct ReconstructionJob {
    pub cancel: CancelFlag,
    pub progress: Receiver<(String, u8)>,
    pub handle: JoinHandle<Result<ReconstructionResult>>,
}

/// All in-memory UI state plus the cloud buffers
pub struct Session {
    registry: CloudRegistry,
    entries: Vec<CloudEntry>,
    active: Option<String>,
    selections: HashMap<String, Vec<u32>>,
    color_mode: ColorMode,
    point_budget: u32,
    visible_classifications: Option<HashSet<u32>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            registry: CloudRegistry::new(),
            entries: Vec::new(),
            active: None,
            selections: HashMap::new(),
            color_mode: ColorMode::default(),
            point_budget: 1_000_000,
            visible_classifications: None,
        }
    }

    // ---- import / remove -------------------------------------------------

    /// Decode a file from disk and register it; returns the new cloud id
    pub fn import_file<P: AsRef<Path>>(&mut self, path: P) -> Result<String> {
        let path = path.as_ref();
        let cloud = read_cloud_from_path(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        Ok(self.adopt(name, &path.display().to_string(), cloud))
    }

    /// Decode an in-memory buffer by extension and register it
    pub fn import_bytes(&mut self, name: &str, extension: &str, bytes: &[u8]) -> Result<String> {
        let cloud = decode_bytes(extension, bytes)?;
        Ok(self.adopt(name, name, cloud))
    }

    /// Register an already decoded cloud (dispatcher results land here)
    pub fn adopt(&mut self, name: &str, path: &str, cloud: CanonicalCloud) -> String {
        let entry = CloudEntry::from_cloud(name, path, &cloud);
        let id = entry.id.clone();
        info!(
            "imported {} ({} points, {})",
            name,
            cloud.point_count(),
            cloud.header.source_tag
        );
        self.registry.put(&id, cloud);
        self.entries.push(entry);
        if self.active.is_none() {
            self.active = Some(id.clone());
        }
        id
    }

    pub fn remove(&mut self, id: &str) {
        if self.registry.remove(id).is_some() {
            info!("removed cloud {}", id);
        }
        self.entries.retain(|e| e.id != id);
        self.selections.remove(id);
        if self.active.as_deref() == Some(id) {
            self.active = self.entries.first().map(|e| e.id.clone());
        }
    }

    // ---- entry state -----------------------------------------------------

    pub fn entries(&self) -> &[CloudEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&CloudEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut CloudEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn cloud(&self, id: &str) -> Option<&CanonicalCloud> {
        self.registry.get(id)
    }

    pub fn set_active(&mut self, id: &str) {
        if self.entries.iter().any(|e| e.id == id) {
            self.active = Some(id.to_string());
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn set_visible(&mut self, id: &str, visible: bool) {
        if let Some(entry) = self.entry_mut(id) {
            entry.visible = visible;
        }
    }

    /// LOD indexing ticker writes build progress through here
    pub fn set_index_progress(&mut self, id: &str, progress: IndexProgress) {
        if let Some(entry) = self.entry_mut(id) {
            entry.index_progress = progress;
        }
    }

    // ---- transforms ------------------------------------------------------
    // Unknown ids are silent no-ops: the cloud may have been removed while
    // the intent was in flight.

    pub fn translate(&mut self, id: &str, dx: f32, dy: f32, dz: f32) {
        if let Some(cloud) = self.registry.get_mut(id) {
            translate(cloud, dx, dy, dz);
            if let Some(entry) = self.entry_mut(id) {
                entry.bump_version();
            }
        }
    }

    pub fn scale(&mut self, id: &str, sx: f32, sy: f32, sz: f32) {
        if let Some(cloud) = self.registry.get_mut(id) {
            scale(cloud, sx, sy, sz);
            if let Some(entry) = self.entry_mut(id) {
                entry.bump_version();
            }
        }
    }

    pub fn thin(&mut self, id: &str, percent: f32) {
        if let Some(cloud) = self.registry.get_mut(id) {
            thin(cloud, percent);
            let total = cloud.point_count() as u64;
            self.selections.remove(id);
            if let Some(entry) = self.entry_mut(id) {
                entry.total_points = total;
                entry.bump_version();
            }
        }
    }

    // ---- selection -------------------------------------------------------

    /// Rectangle-select across every visible cloud, storing hits per id
    pub fn select_rect(&mut self, view_projection: &Matrix4<f32>, rect: &SelectionRect) {
        let visible: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.visible)
            .map(|e| e.id.clone())
            .collect();

        for id in visible {
            if let Some(cloud) = self.registry.get(&id) {
                let hits = select_in_rect(&cloud.positions, view_projection, rect);
                if hits.is_empty() {
                    self.selections.remove(&id);
                } else {
                    self.selections.insert(id, hits);
                }
            }
        }
    }

    pub fn set_selection(&mut self, id: &str, indices: Vec<u32>) {
        if self.registry.contains(id) && !indices.is_empty() {
            self.selections.insert(id.to_string(), indices);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selections.clear();
    }

    pub fn selection(&self, id: &str) -> Option<&[u32]> {
        self.selections.get(id).map(|v| v.as_slice())
    }

    /// Delete every selected point; clouds that lose all points go away
    pub fn delete_selected(&mut self) {
        let selections: Vec<(String, HashSet<u32>)> = self
            .selections
            .drain()
            .map(|(id, v)| (id, v.into_iter().collect()))
            .collect();

        for (id, selected) in selections {
            let outcome = match self.registry.get_mut(&id) {
                Some(cloud) => delete_points(cloud, &selected),
                None => continue,
            };
            match outcome {
                DeleteOutcome::CloudEmptied => self.remove(&id),
                DeleteOutcome::Edited => {
                    let total = self.registry.get(&id).map(|c| c.point_count()).unwrap_or(0);
                    if let Some(entry) = self.entry_mut(&id) {
                        entry.total_points = total as u64;
                        entry.bump_version();
                    }
                }
            }
        }
    }

    // ---- reconstruction --------------------------------------------------

    /// Kick off greedy projection on a worker thread.
    ///
    /// The worker gets an immutable position snapshot; the finished indices
    /// are applied on the UI side via [`Session::apply_reconstruction`].
    pub fn reconstruct(
        &mut self,
        id: &str,
        params: ReconstructionParams,
    ) -> Result<ReconstructionJob> {
        let cloud = self
            .registry
            .get(id)
            .ok_or_else(|| Error::InvalidData(format!("no cloud {}", id)))?;
        let positions = cloud.positions.clone();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let (tx, rx) = channel();

        let handle = std::thread::spawn(move || {
            let mut progress = move |phase: &str, percent: u8| {
                let _ = tx.send((phase.to_string(), percent));
            };
            greedy_projection(&positions, &params, &mut progress, &worker_cancel)
        });

        Ok(ReconstructionJob {
            cancel,
            progress: rx,
            handle,
        })
    }

    /// Attach reconstructed triangles to the cloud and bump its version
    pub fn apply_reconstruction(&mut self, id: &str, result: &ReconstructionResult) {
        if let Some(cloud) = self.registry.get_mut(id) {
            cloud.indices = Some(result.indices.clone());
            if let Some(entry) = self.entry_mut(id) {
                entry.bump_version();
            }
        }
    }

    // ---- export ----------------------------------------------------------

    pub fn export(&self, id: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let cloud = self
            .registry
            .get(id)
            .ok_or_else(|| Error::InvalidData(format!("no cloud {}", id)))?;
        export_cloud(cloud, format)
    }

    // ---- view settings ---------------------------------------------------

    pub fn set_point_budget(&mut self, budget: u32) {
        self.point_budget = budget.max(1);
    }

    pub fn point_budget(&self) -> u32 {
        self.point_budget
    }

    pub fn set_color_mode(&mut self, mode: ColorMode) {
        self.color_mode = mode;
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    /// `None` shows every classification
    pub fn set_visible_classifications(&mut self, codes: Option<HashSet<u32>>) {
        self.visible_classifications = codes;
    }

    pub fn visible_classifications(&self) -> Option<&HashSet<u32>> {
        self.visible_classifications.as_ref()
    }

    /// Tear down all owned state
    pub fn shutdown(&mut self) {
        self.registry.clear();
        self.entries.clear();
        self.selections.clear();
        self.active = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_cloud() -> (Session, String) {
        let mut session = Session::new();
        let id = session
            .import_bytes("grid.xyz", "xyz", b"0 0 0\n1 0 0\n2 0 0\n3 0 0\n")
            .unwrap();
        (session, id)
    }

    #[test]
    fn test_import_creates_entry_and_buffers() {
        let (session, id) = session_with_cloud();
        let entry = session.entry(&id).unwrap();
        assert_eq!(entry.total_points, 4);
        assert_eq!(entry.transform_version, 0);
        assert!(entry.visible);
        assert_eq!(session.cloud(&id).unwrap().point_count(), 4);
        assert_eq!(session.active(), Some(id.as_str()));
    }

    #[test]
    fn test_transforms_bump_version() {
        let (mut session, id) = session_with_cloud();
        session.translate(&id, 1.0, 0.0, 0.0);
        assert_eq!(session.entry(&id).unwrap().transform_version, 1);
        session.scale(&id, 2.0, 2.0, 2.0);
        assert_eq!(session.entry(&id).unwrap().transform_version, 2);
        session.thin(&id, 50.0);
        assert_eq!(session.entry(&id).unwrap().transform_version, 3);
        assert_eq!(session.entry(&id).unwrap().total_points, 2);
    }

    #[test]
    fn test_unknown_id_transform_is_noop() {
        let (mut session, id) = session_with_cloud();
        session.translate("missing", 1.0, 0.0, 0.0);
        assert_eq!(session.entry(&id).unwrap().transform_version, 0);
    }

    #[test]
    fn test_delete_selected_removes_points() {
        let (mut session, id) = session_with_cloud();
        session.set_selection(&id, vec![0, 2]);
        session.delete_selected();
        assert_eq!(session.cloud(&id).unwrap().point_count(), 2);
        assert_eq!(session.entry(&id).unwrap().transform_version, 1);
        assert!(session.selection(&id).is_none());
    }

    #[test]
    fn test_delete_all_removes_cloud() {
        let (mut session, id) = session_with_cloud();
        session.set_selection(&id, vec![0, 1, 2, 3]);
        session.delete_selected();
        assert!(session.cloud(&id).is_none());
        assert!(session.entry(&id).is_none());
        assert_eq!(session.active(), None);
    }

    #[test]
    fn test_remove_switches_active() {
        let (mut session, first) = session_with_cloud();
        let second = session.import_bytes("b.xyz", "xyz", b"5 5 5\n").unwrap();
        session.set_active(&second);
        session.remove(&second);
        assert_eq!(session.active(), Some(first.as_str()));
    }

    #[test]
    fn test_reconstruction_job_round_trip() {
        let mut session = Session::new();
        // A 6x6 planar grid triangulates reliably
        let mut text = String::new();
        for i in 0..6 {
            for j in 0..6 {
                text.push_str(&format!("{} {} 0\n", i, j));
            }
        }
        let id = session.import_bytes("plane.xyz", "xyz", text.as_bytes()).unwrap();

        let job = session.reconstruct(&id, ReconstructionParams::default()).unwrap();
        let result = job.handle.join().unwrap().unwrap();
        assert!(!result.indices.is_empty());

        session.apply_reconstruction(&id, &result);
        let cloud = session.cloud(&id).unwrap();
        assert!(cloud.indices.is_some());
        cloud.validate().unwrap();
        assert_eq!(session.entry(&id).unwrap().transform_version, 1);
    }

    #[test]
    fn test_import_file_by_extension() {
        use std::io::Write;
        let mut file = tempfile::Builder::new().suffix(".pts").tempfile().unwrap();
        file.write_all(b"2\n0 0 0 0.5\n1 1 1 0.5\n").unwrap();
        file.flush().unwrap();

        let mut session = Session::new();
        let id = session.import_file(file.path()).unwrap();
        let entry = session.entry(&id).unwrap();
        assert_eq!(entry.total_points, 2);
        assert_eq!(entry.source_tag, "PTS");
        assert!(entry.name.ends_with(".pts"));
    }

    #[test]
    fn test_export_unknown_cloud_fails() {
        let session = Session::new();
        assert!(session.export("nope", ExportFormat::Csv).is_err());
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let (mut session, _) = session_with_cloud();
        session.shutdown();
        assert!(session.entries().is_empty());
        assert_eq!(session.active(), None);
    }
}
