pub mod hdr;

use crate::assets::{IncomingFile, SourceHandle, SourceStore};
use glam::Vec3;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Convolution weights of the clamped-cosine lobe per SH band, divided by pi.
const BAND_WEIGHTS: [f32; 9] = [
    1.0,
    2.0 / 3.0,
    2.0 / 3.0,
    2.0 / 3.0,
    0.25,
    0.25,
    0.25,
    0.25,
    0.25,
];

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("failed to decode HDR map: {0}")]
    Decode(#[source] image::ImageError),
    #[error("HDR map has no pixels")]
    EmptyImage,
}

/// Diffuse irradiance stored as nine RGB spherical-harmonic coefficients.
///
/// Coefficients are pre-convolved, so `evaluate` returns outgoing diffuse radiance for a
/// white Lambertian surface facing `normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingProbe {
    pub coefficients: [[f32; 3]; 9],
}

impl LightingProbe {
    pub(crate) fn from_radiance_sh(radiance: [[f32; 3]; 9]) -> Self {
        let mut coefficients = radiance;
        for (coefficient, weight) in coefficients.iter_mut().zip(BAND_WEIGHTS) {
            for channel in coefficient.iter_mut() {
                *channel *= weight;
            }
        }
        Self { coefficients }
    }

    /// Warm horizon, cool zenith and dark ground, evaluated once and shared.
    pub fn default_preset() -> Arc<LightingProbe> {
        static CITY: OnceLock<Arc<LightingProbe>> = OnceLock::new();
        CITY.get_or_init(|| Arc::new(hdr::project_fn(64, 32, city_sky)))
            .clone()
    }

    pub fn evaluate(&self, normal: Vec3) -> Vec3 {
        hdr::sh_basis(normal.normalize_or_zero())
            .iter()
            .zip(self.coefficients.iter())
            .fold(Vec3::ZERO, |acc, (basis, c)| acc + Vec3::from(*c) * *basis)
    }

    /// Coefficients padded to vec4 for uniform buffer layout.
    pub fn to_gpu(&self) -> [[f32; 4]; 9] {
        self.coefficients.map(|[r, g, b]| [r, g, b, 0.0])
    }
}

fn city_sky(dir: Vec3) -> Vec3 {
    let horizon = Vec3::new(1.0, 0.86, 0.7);
    let zenith = Vec3::new(0.45, 0.6, 0.95);
    let ground = Vec3::new(0.22, 0.2, 0.19);
    if dir.y >= 0.0 {
        horizon.lerp(zenith, dir.y.sqrt())
    } else {
        horizon.lerp(ground, (-dir.y * 4.0).min(1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EnvironmentSource {
    Default,
    Custom { source: SourceHandle, name: String },
}

impl EnvironmentSource {
    pub fn label(&self) -> &str {
        match self {
            EnvironmentSource::Default => "city (default)",
            EnvironmentSource::Custom { name, .. } => name,
        }
    }

    fn handle(&self) -> Option<SourceHandle> {
        match self {
            EnvironmentSource::Default => None,
            EnvironmentSource::Custom { source, .. } => Some(*source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionTag(pub u64);

/// Work order for a background HDR conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub tag: ConversionTag,
    pub name: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Applied,
    Stale,
    Failed(String),
}

#[derive(Debug)]
struct PendingConversion {
    tag: ConversionTag,
    previous: EnvironmentSource,
}

/// Which lighting source is active, and the probe currently lighting the scene.
#[derive(Debug, Serialize)]
pub struct EnvironmentSelector {
    source: EnvironmentSource,
    #[serde(skip)]
    probe: Arc<LightingProbe>,
    #[serde(skip)]
    pending: Option<PendingConversion>,
    #[serde(skip)]
    generation: u64,
    #[serde(skip)]
    revision: u64,
}

impl Default for EnvironmentSelector {
    fn default() -> Self {
        Self {
            source: EnvironmentSource::Default,
            probe: LightingProbe::default_preset(),
            pending: None,
            generation: 0,
            revision: 0,
        }
    }
}

impl EnvironmentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> &EnvironmentSource {
        &self.source
    }

    pub fn probe(&self) -> &Arc<LightingProbe> {
        &self.probe
    }

    pub fn is_converting(&self) -> bool {
        self.pending.is_some()
    }

    /// Bumped whenever the active probe changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn use_default_preset(&mut self, store: &mut SourceStore) {
        if let Some(pending) = self.pending.take() {
            if let Some(handle) = pending.previous.handle() {
                store.revoke(handle);
            }
        }
        if let Some(handle) = self.source.handle() {
            store.revoke(handle);
        }
        self.generation += 1;
        if self.source != EnvironmentSource::Default {
            log::info!("Switched to default environment");
        }
        self.source = EnvironmentSource::Default;
        self.set_probe(LightingProbe::default_preset());
    }

    /// Record `file` as the custom source and return the conversion to run.
    ///
    /// The previous probe stays active until the matching result arrives.
    pub fn use_custom_map(&mut self, store: &mut SourceStore, file: IncomingFile) -> Option<ConversionRequest> {
        let name = file.name;
        let source = store.register(file.bytes);
        let bytes = store.open(source)?;

        let previous = match self.pending.take() {
            // A superseded conversion never became active; drop its bytes.
            Some(pending) => {
                if let Some(handle) = self.source.handle() {
                    store.revoke(handle);
                }
                pending.previous
            }
            None => self.source.clone(),
        };

        self.generation += 1;
        let tag = ConversionTag(self.generation);
        self.pending = Some(PendingConversion { tag, previous });
        self.source = EnvironmentSource::Custom {
            source,
            name: name.clone(),
        };
        log::info!("Converting environment map '{}'", name);
        Some(ConversionRequest { tag, name, bytes })
    }

    pub fn complete_conversion(
        &mut self,
        store: &mut SourceStore,
        tag: ConversionTag,
        result: Result<LightingProbe, String>,
    ) -> ConversionOutcome {
        let is_current = self.pending.as_ref().map(|p| p.tag) == Some(tag);
        if !is_current {
            log::debug!("Discarding stale environment conversion {:?}", tag);
            return ConversionOutcome::Stale;
        }
        let Some(pending) = self.pending.take() else {
            return ConversionOutcome::Stale;
        };
        match result {
            Ok(probe) => {
                if let Some(handle) = pending.previous.handle() {
                    store.revoke(handle);
                }
                self.set_probe(Arc::new(probe));
                log::info!("Environment '{}' active", self.source.label());
                ConversionOutcome::Applied
            }
            Err(message) => {
                log::warn!("Environment conversion failed: {}", message);
                if let Some(handle) = self.source.handle() {
                    store.revoke(handle);
                }
                self.source = pending.previous;
                ConversionOutcome::Failed(message)
            }
        }
    }

    fn set_probe(&mut self, probe: Arc<LightingProbe>) {
        if !Arc::ptr_eq(&self.probe, &probe) {
            self.revision += 1;
        }
        self.probe = probe;
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversionOutcome, EnvironmentSelector, EnvironmentSource, LightingProbe};
    use crate::assets::{IncomingFile, SourceStore};
    use glam::Vec3;
    use std::sync::Arc;

    fn flat(value: f32) -> LightingProbe {
        super::hdr::project_fn(16, 8, |_| Vec3::splat(value))
    }

    fn hdr_file(name: &str) -> IncomingFile {
        IncomingFile::new(name, vec![1, 2, 3])
    }

    #[test]
    fn default_sky_is_brighter_above_than_below() {
        let probe = LightingProbe::default_preset();
        let up = probe.evaluate(Vec3::Y);
        let down = probe.evaluate(Vec3::NEG_Y);
        assert!(up.z > down.z);
        assert!(up.is_finite() && down.is_finite());
        assert!(Arc::ptr_eq(&probe, &LightingProbe::default_preset()));
    }

    #[test]
    fn custom_map_keeps_previous_probe_until_converted() {
        let mut store = SourceStore::new();
        let mut selector = EnvironmentSelector::new();
        let request = selector.use_custom_map(&mut store, hdr_file("sky.hdr")).unwrap();
        assert_eq!(selector.source().label(), "sky.hdr");
        assert!(Arc::ptr_eq(selector.probe(), &LightingProbe::default_preset()));
        assert_eq!(&request.bytes[..], &[1, 2, 3]);

        let before = selector.revision();
        let outcome = selector.complete_conversion(&mut store, request.tag, Ok(flat(2.0)));
        assert_eq!(outcome, ConversionOutcome::Applied);
        assert!(selector.revision() > before);
        assert!((selector.probe().evaluate(Vec3::X).x - 2.0).abs() < 0.05);
        assert!(!selector.is_converting());
    }

    #[test]
    fn default_after_custom_discards_late_result() {
        let mut store = SourceStore::new();
        let mut selector = EnvironmentSelector::new();
        let request = selector.use_custom_map(&mut store, hdr_file("sky.hdr")).unwrap();
        selector.use_default_preset(&mut store);
        assert_eq!(selector.source(), &EnvironmentSource::Default);
        assert_eq!(store.live_count(), 0);

        let outcome = selector.complete_conversion(&mut store, request.tag, Ok(flat(5.0)));
        assert_eq!(outcome, ConversionOutcome::Stale);
        assert!(Arc::ptr_eq(selector.probe(), &LightingProbe::default_preset()));
    }

    #[test]
    fn newer_request_supersedes_older_one() {
        let mut store = SourceStore::new();
        let mut selector = EnvironmentSelector::new();
        let first = selector.use_custom_map(&mut store, hdr_file("a.hdr")).unwrap();
        let second = selector.use_custom_map(&mut store, hdr_file("b.hdr")).unwrap();
        assert_eq!(store.live_count(), 1);

        assert_eq!(
            selector.complete_conversion(&mut store, first.tag, Ok(flat(1.0))),
            ConversionOutcome::Stale
        );
        assert_eq!(
            selector.complete_conversion(&mut store, second.tag, Ok(flat(3.0))),
            ConversionOutcome::Applied
        );
        assert_eq!(selector.source().label(), "b.hdr");
    }

    #[test]
    fn failed_conversion_restores_previous_source() {
        let mut store = SourceStore::new();
        let mut selector = EnvironmentSelector::new();
        let good = selector.use_custom_map(&mut store, hdr_file("good.hdr")).unwrap();
        selector.complete_conversion(&mut store, good.tag, Ok(flat(1.5)));
        let applied = selector.probe().clone();

        let bad = selector.use_custom_map(&mut store, hdr_file("bad.hdr")).unwrap();
        let outcome = selector.complete_conversion(&mut store, bad.tag, Err("corrupt".to_string()));
        assert_eq!(outcome, ConversionOutcome::Failed("corrupt".to_string()));
        assert_eq!(selector.source().label(), "good.hdr");
        assert!(Arc::ptr_eq(selector.probe(), &applied));
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn gpu_layout_pads_each_coefficient() {
        let probe = flat(1.0);
        let gpu = probe.to_gpu();
        assert_eq!(gpu.len(), 9);
        assert!(gpu.iter().all(|c| c[3] == 0.0));
        assert_eq!(gpu[0][0], probe.coefficients[0][0]);
    }
}
