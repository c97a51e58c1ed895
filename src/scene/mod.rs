//! Viewer state and its update cycle.
//!
//! Every user intent and every background result enters through [`ViewerState::dispatch`].
//! Work that cannot happen inside the store (threads, GPU) comes back out as [`Effect`]s.

use crate::assets::{
    AssetRegistry, EntryId, IncomingFile, LoadStatus, ModelEntry, Screenshot, SourceStore,
};
use crate::environment::{
    ConversionOutcome, ConversionRequest, ConversionTag, EnvironmentSelector, LightingProbe,
};
use crate::render::CameraDirector;
use serde::Serialize;

#[derive(Debug)]
pub enum Action {
    AddFiles(Vec<IncomingFile>),
    Select(usize),
    RemoveSelected,
    Remove(usize),
    ApplyPreset([f32; 3]),
    UseDefaultEnvironment,
    UseCustomEnvironment(IncomingFile),
    EnvironmentConverted {
        tag: ConversionTag,
        result: Result<LightingProbe, String>,
    },
    SetStatus {
        entry: EntryId,
        status: LoadStatus,
    },
    ScreenshotCaptured {
        entry: EntryId,
        screenshot: Screenshot,
    },
}

#[derive(Debug)]
pub enum Effect {
    ConvertEnvironment(ConversionRequest),
    /// The active lighting probe changed.
    EnvironmentChanged,
    Notice(String),
}

#[derive(Debug, Default, Serialize)]
pub struct ViewerState {
    registry: AssetRegistry,
    camera: CameraDirector,
    environment: EnvironmentSelector,
    has_loaded: bool,
    #[serde(skip)]
    sources: SourceStore,
}

impl ViewerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn camera(&self) -> &CameraDirector {
        &self.camera
    }

    pub fn environment(&self) -> &EnvironmentSelector {
        &self.environment
    }

    pub fn sources(&self) -> &SourceStore {
        &self.sources
    }

    pub fn selected(&self) -> Option<&ModelEntry> {
        self.registry.selected()
    }

    /// True once any model has been picked; switches the shell out of the intake surface.
    pub fn has_loaded(&self) -> bool {
        self.has_loaded
    }

    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn dispatch(&mut self, action: Action) -> Vec<Effect> {
        let mut effects = Vec::new();
        match action {
            Action::AddFiles(files) => {
                if !self.registry.add_files(&mut self.sources, files).is_empty() {
                    self.has_loaded = true;
                }
            }
            Action::Select(index) => {
                if let Err(err) = self.registry.select(index) {
                    log::warn!("{}", err);
                    effects.push(Effect::Notice(err.to_string()));
                }
            }
            Action::RemoveSelected => {
                self.registry.remove_selected(&mut self.sources);
            }
            Action::Remove(index) => {
                self.registry.remove(index, &mut self.sources);
            }
            Action::ApplyPreset(position) => {
                self.camera.apply_preset(position);
            }
            Action::UseDefaultEnvironment => {
                let revision = self.environment.revision();
                self.environment.use_default_preset(&mut self.sources);
                if self.environment.revision() != revision {
                    effects.push(Effect::EnvironmentChanged);
                }
            }
            Action::UseCustomEnvironment(file) => {
                if let Some(request) = self.environment.use_custom_map(&mut self.sources, file) {
                    effects.push(Effect::ConvertEnvironment(request));
                }
            }
            Action::EnvironmentConverted { tag, result } => {
                match self
                    .environment
                    .complete_conversion(&mut self.sources, tag, result)
                {
                    ConversionOutcome::Applied => effects.push(Effect::EnvironmentChanged),
                    ConversionOutcome::Stale => {}
                    ConversionOutcome::Failed(message) => effects.push(Effect::Notice(format!(
                        "Environment map could not be loaded: {message}"
                    ))),
                }
            }
            Action::SetStatus { entry, status } => {
                if let LoadStatus::Failed(message) = &status {
                    if let Some(model) = self.registry.get(entry) {
                        effects.push(Effect::Notice(format!(
                            "Failed to load '{}': {}",
                            model.name, message
                        )));
                    }
                }
                self.registry.set_status(entry, status);
            }
            Action::ScreenshotCaptured { entry, screenshot } => {
                if !self.registry.update_screenshot(entry, screenshot) {
                    log::debug!("Dropping capture for removed entry {:?}", entry);
                }
            }
        }
        effects
    }
}
