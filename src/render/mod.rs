pub mod camera;
pub mod capture;
mod egui_overlay;
pub mod session;

pub use camera::{CameraDirector, CameraPreset, OrbitControls};
pub use capture::{CaptureError, CaptureScheduler};
pub use egui_overlay::EguiFrameOutput;
pub use session::{DecodeOutcome, DecodeRequest, DecodeTag, RenderSession, SceneTarget};

use crate::assets::decode::{ModelGeometry, Vertex};
use crate::assets::{EntryId, Screenshot};
use crate::environment::LightingProbe;
use egui_overlay::EguiOverlay;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create window surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
    #[error("no canvas to capture")]
    NoCanvas,
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    eye: [f32; 4],
    sh: [[f32; 4]; 9],
    params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MaterialUniform {
    base_color: [f32; 4],
    emissive_metallic: [f32; 4],
    params: [f32; 4],
}

struct Canvas {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    size: [u32; 2],
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    material: usize,
}

struct GpuMaterial {
    bind_group: wgpu::BindGroup,
    double_sided: bool,
}

struct GpuModel {
    entry: EntryId,
    meshes: Vec<GpuMesh>,
    materials: Vec<GpuMaterial>,
    _textures: Vec<wgpu::Texture>,
}

pub struct RenderContext {
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    device: wgpu::Device,
    queue: wgpu::Queue,
    overlay: EguiOverlay,
    pipeline_culled: wgpu::RenderPipeline,
    pipeline_double_sided: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    material_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    white_texture_view: wgpu::TextureView,
    canvas: Option<Canvas>,
    canvas_texture_id: Option<egui::TextureId>,
    model: Option<GpuModel>,
    probe: [[f32; 4]; 9],
    environment_intensity: f32,
    clear_color: wgpu::Color,
}

impl RenderContext {
    pub fn new(window: Arc<Window>, clear_color: [f32; 4], environment_intensity: f32) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;
        log::info!("Using GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("glb-preview device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: wgpu::Trace::Off,
        }))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(RenderError::NoSurfaceFormat)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("model shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("material layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("model pipeline layout"),
            bind_group_layouts: &[&frame_layout, &material_layout],
            push_constant_ranges: &[],
        });
        let pipeline_culled =
            create_model_pipeline(&device, &pipeline_layout, &shader, Some(wgpu::Face::Back));
        let pipeline_double_sided = create_model_pipeline(&device, &pipeline_layout, &shader, None);

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniform"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame bind group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("base color sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let white_texture = upload_rgba_texture(&device, &queue, "white", 1, 1, &[255, 255, 255, 255]);
        let white_texture_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let overlay = EguiOverlay::new(&device, surface_format);

        log::info!(
            "GPU ready: {}x{}, surface format {:?}",
            surface_config.width,
            surface_config.height,
            surface_format
        );

        let [r, g, b, a] = clear_color.map(f64::from);
        Ok(Self {
            surface,
            surface_config,
            device,
            queue,
            overlay,
            pipeline_culled,
            pipeline_double_sided,
            frame_buffer,
            frame_bind_group,
            material_layout,
            sampler,
            white_texture_view,
            canvas: None,
            canvas_texture_id: None,
            model: None,
            probe: LightingProbe::default_preset().to_gpu(),
            environment_intensity,
            clear_color: wgpu::Color { r, g, b, a },
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.surface_config.width = new_size.width;
        self.surface_config.height = new_size.height;
        self.surface.configure(&self.device, &self.surface_config);
        log::debug!("Surface resized to {}x{}", new_size.width, new_size.height);
    }

    pub fn set_environment(&mut self, probe: &LightingProbe) {
        self.probe = probe.to_gpu();
    }

    pub fn canvas_texture_id(&self) -> Option<egui::TextureId> {
        self.canvas_texture_id
    }

    pub fn max_texture_side(&self) -> usize {
        self.device.limits().max_texture_dimension_2d as usize
    }

    pub fn attached_entry(&self) -> Option<EntryId> {
        self.model.as_ref().map(|model| model.entry)
    }

    /// Make the offscreen canvas `size` pixels, recreating it when the size changed.
    pub fn ensure_canvas(&mut self, size: [u32; 2]) {
        let max = self.device.limits().max_texture_dimension_2d;
        let size = [size[0].clamp(1, max), size[1].clamp(1, max)];
        if self.canvas.as_ref().is_some_and(|canvas| canvas.size == size) {
            return;
        }
        let extent = wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("model canvas"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CANVAS_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("model canvas depth"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        self.canvas_texture_id =
            Some(self.overlay.bind_texture(&self.device, &view, self.canvas_texture_id));
        log::debug!("Canvas resized to {}x{}", size[0], size[1]);
        self.canvas = Some(Canvas {
            texture,
            view,
            depth_view,
            size,
        });
    }

    /// Draw the attached model into the canvas, composite egui and present.
    pub fn render_frame(&mut self, camera: &OrbitControls, ui: &EguiFrameOutput) {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return;
            }
            Err(err) => {
                log::warn!("Skipping frame: {}", err);
                return;
            }
        };
        let surface_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });

        if let Some(canvas) = &self.canvas {
            let aspect = canvas.size[0] as f32 / canvas.size[1] as f32;
            let eye = camera.eye();
            let uniform = FrameUniform {
                view_proj: camera.view_proj(aspect).to_cols_array_2d(),
                eye: [eye[0], eye[1], eye[2], 1.0],
                sh: self.probe,
                params: [self.environment_intensity, 0.0, 0.0, 0.0],
            };
            self.queue
                .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniform));
            self.draw_model(&mut encoder, &canvas.view, &canvas.depth_view);
        }

        self.overlay
            .render(&self.device, &self.queue, &mut encoder, &surface_view, ui);

        self.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
    }

    fn draw_model(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView, depth: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("model"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear_color),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let Some(model) = &self.model else {
            return;
        };
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        for mesh in &model.meshes {
            let Some(material) = model.materials.get(mesh.material) else {
                continue;
            };
            let pipeline = if material.double_sided {
                &self.pipeline_double_sided
            } else {
                &self.pipeline_culled
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, &material.bind_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }

    /// Read the canvas as drawn by the last submitted frame and encode it as PNG.
    pub fn capture_canvas(&self) -> Result<Screenshot, RenderError> {
        let canvas = self.canvas.as_ref().ok_or(RenderError::NoCanvas)?;
        let rgba = capture::read_texture_rgba(&self.device, &self.queue, &canvas.texture)?;
        Ok(capture::encode_png(canvas.size[0], canvas.size[1], rgba)?)
    }

    fn upload_material(
        &self,
        material: &crate::assets::decode::MaterialData,
        textures: &[Option<wgpu::TextureView>],
    ) -> GpuMaterial {
        let uniform = MaterialUniform {
            base_color: material.base_color,
            emissive_metallic: [
                material.emissive[0],
                material.emissive[1],
                material.emissive[2],
                material.metallic,
            ],
            params: [material.roughness, 0.0, 0.0, 0.0],
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("material uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let texture_view = material
            .base_color_texture
            .and_then(|index| textures.get(index))
            .and_then(Option::as_ref)
            .unwrap_or(&self.white_texture_view);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("material bind group"),
            layout: &self.material_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        GpuMaterial {
            bind_group,
            double_sided: material.double_sided,
        }
    }
}

impl SceneTarget for RenderContext {
    fn attach(&mut self, entry: EntryId, geometry: &ModelGeometry) {
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        let mut textures = Vec::new();
        let mut texture_views = Vec::with_capacity(geometry.textures.len());
        for (index, texture) in geometry.textures.iter().enumerate() {
            let view = texture.as_ref().and_then(|data| {
                if data.width > max_dimension || data.height > max_dimension {
                    log::warn!(
                        "Texture {} is {}x{}, above the device limit of {}",
                        index,
                        data.width,
                        data.height,
                        max_dimension
                    );
                    return None;
                }
                let texture = upload_rgba_texture(
                    &self.device,
                    &self.queue,
                    "base color",
                    data.width,
                    data.height,
                    &data.rgba,
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                textures.push(texture);
                Some(view)
            });
            texture_views.push(view);
        }

        let materials = geometry
            .materials
            .iter()
            .map(|material| self.upload_material(material, &texture_views))
            .collect();

        let meshes = geometry
            .meshes
            .iter()
            .filter(|mesh| !mesh.indices.is_empty())
            .map(|mesh| GpuMesh {
                vertex_buffer: self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("model vertices"),
                        contents: bytemuck::cast_slice(&mesh.vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
                index_buffer: self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("model indices"),
                        contents: bytemuck::cast_slice(&mesh.indices),
                        usage: wgpu::BufferUsages::INDEX,
                    }),
                index_count: mesh.indices.len() as u32,
                material: mesh.material,
            })
            .collect::<Vec<_>>();

        log::info!(
            "Attached model {:?}: {} meshes, {} triangles",
            entry,
            meshes.len(),
            geometry.triangle_count()
        );
        self.model = Some(GpuModel {
            entry,
            meshes,
            materials,
            _textures: textures,
        });
    }

    fn detach(&mut self) {
        if let Some(model) = self.model.take() {
            log::debug!("Detached model {:?}", model.entry);
        }
    }
}

fn create_model_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    cull_mode: Option<wgpu::Face>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(if cull_mode.is_some() {
            "model pipeline"
        } else {
            "model pipeline (double sided)"
        }),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &VERTEX_ATTRIBUTES,
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: CANVAS_FORMAT,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn upload_rgba_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> wgpu::Texture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    texture
}
