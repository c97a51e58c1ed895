//! GLB Preview
//!
//! Desktop viewer for binary glTF models:
//! - Keeps a list of dropped or picked `.glb` files and displays the selected one
//! - Orbit camera with four preset viewpoints
//! - Image-based lighting from a built-in preset or a custom `.hdr` map
//! - PNG screenshot per model, saved through a file dialog

mod app;
mod assets;
mod config;
mod environment;
mod render;
mod scene;
mod ui;

fn main() {
    app::run();
}
