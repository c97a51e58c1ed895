//! Short-lived background threads for model decoding and environment conversion.
//!
//! Workers only see the bytes they were handed; results come back to the event loop as
//! [`ViewerEvent`]s and are validated against current state there.

use crate::assets::decode::{decode_glb, ModelGeometry};
use crate::environment::hdr::convert_hdr;
use crate::environment::{ConversionRequest, ConversionTag, LightingProbe};
use crate::render::{DecodeRequest, DecodeTag};
use std::sync::Arc;
use winit::event_loop::EventLoopProxy;

#[derive(Debug)]
pub enum ViewerEvent {
    ModelDecoded {
        tag: DecodeTag,
        result: Result<Arc<ModelGeometry>, String>,
    },
    EnvironmentConverted {
        tag: ConversionTag,
        result: Result<LightingProbe, String>,
    },
}

pub fn decode_job(request: DecodeRequest) -> ViewerEvent {
    let started = std::time::Instant::now();
    let result = decode_glb(&request.bytes)
        .map(Arc::new)
        .map_err(|err| err.to_string());
    match &result {
        Ok(geometry) => log::info!(
            "Decoded '{}' in {:.1} ms ({} triangles)",
            request.name,
            started.elapsed().as_secs_f32() * 1000.0,
            geometry.triangle_count()
        ),
        Err(err) => log::warn!("Failed to decode '{}': {}", request.name, err),
    }
    ViewerEvent::ModelDecoded {
        tag: request.tag,
        result,
    }
}

pub fn conversion_job(request: ConversionRequest) -> ViewerEvent {
    let result = convert_hdr(&request.bytes).map_err(|err| err.to_string());
    if let Err(err) = &result {
        log::warn!("Failed to convert '{}': {}", request.name, err);
    }
    ViewerEvent::EnvironmentConverted {
        tag: request.tag,
        result,
    }
}

pub fn spawn_decode(proxy: EventLoopProxy<ViewerEvent>, request: DecodeRequest) {
    let tag = request.tag;
    let failure = move |reason: &str| ViewerEvent::ModelDecoded {
        tag,
        result: Err(reason.to_string()),
    };
    spawn("decode", proxy, failure, move || decode_job(request));
}

pub fn spawn_conversion(proxy: EventLoopProxy<ViewerEvent>, request: ConversionRequest) {
    let tag = request.tag;
    let failure = move |reason: &str| ViewerEvent::EnvironmentConverted {
        tag,
        result: Err(reason.to_string()),
    };
    spawn("hdr-convert", proxy, failure, move || conversion_job(request));
}

/// Run `job`, turning a panic into the `failure` event so the event loop always hears back.
fn run_guarded<F, E>(name: &str, job: F, failure: E) -> ViewerEvent
where
    F: FnOnce() -> ViewerEvent,
    E: Fn(&str) -> ViewerEvent,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        Ok(event) => event,
        Err(_) => {
            log::error!("{} worker panicked", name);
            failure(&format!("{name} worker panicked"))
        }
    }
}

fn spawn<F, E>(name: &'static str, proxy: EventLoopProxy<ViewerEvent>, failure: E, job: F)
where
    F: FnOnce() -> ViewerEvent + Send + 'static,
    E: Fn(&str) -> ViewerEvent + Copy + Send + 'static,
{
    let worker_proxy = proxy.clone();
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if worker_proxy
                .send_event(run_guarded(name, job, failure))
                .is_err()
            {
                log::debug!("Event loop closed before worker finished");
            }
        });
    if let Err(err) = spawned {
        log::error!("Failed to spawn {} worker: {}", name, err);
        let _ = proxy.send_event(failure(&format!("could not start {name} worker")));
    }
}
