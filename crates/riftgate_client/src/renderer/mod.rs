pub mod mesh;
pub mod pipeline;
pub mod portal_renderer;

use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::camera::Camera;
use crate::portal::{PortalEnd, PortalPair};
use crate::renderer::mesh::{build_box_mesh, GpuMesh};
use crate::renderer::pipeline::{ObjectUniform, ScenePipeline};
use crate::renderer::portal_renderer::{apply_oblique_clip, PortalRenderer};
use crate::scene::SceneObject;
use crate::traveler::{TravelerId, TravelerSet};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.035,
    a: 1.0,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
}

impl CameraUniform {
    fn new(view_proj: Mat4, position: glam::Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: [position.x, position.y, position.z, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderFrameStats {
    pub portal_view_passes: u32,
    pub draw_calls: u32,
}

#[derive(Debug)]
struct DepthTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Riftgate Depth Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

#[derive(Debug)]
pub enum RendererInitError {
    CreateSurface(wgpu::CreateSurfaceError),
    RequestAdapter(wgpu::RequestAdapterError),
    RequestDevice(wgpu::RequestDeviceError),
    UnsupportedSurface,
}

impl fmt::Display for RendererInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSurface(err) => write!(f, "failed to create surface: {err}"),
            Self::RequestAdapter(err) => write!(f, "failed to request adapter: {err}"),
            Self::RequestDevice(err) => write!(f, "failed to request device: {err}"),
            Self::UnsupportedSurface => write!(f, "adapter does not support this surface"),
        }
    }
}

impl std::error::Error for RendererInitError {}

/// A static box with its uniform written once at upload.
struct StaticDraw {
    mesh: GpuMesh,
    _uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// GPU state for one traveler: the mesh is shared between the real
/// object and its clone, each with its own uniform.
struct TravelerDraw {
    mesh: GpuMesh,
    main_buffer: wgpu::Buffer,
    main_bind_group: wgpu::BindGroup,
    clone_buffer: wgpu::Buffer,
    clone_bind_group: wgpu::BindGroup,
}

pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    depth_texture: DepthTexture,
    scene_pipeline: ScenePipeline,
    portal_renderer: PortalRenderer,
    camera_uniform_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    portal_camera_uniform_buffers: [wgpu::Buffer; 2],
    portal_camera_bind_groups: [wgpu::BindGroup; 2],
    static_draws: Vec<StaticDraw>,
    traveler_draws: FxHashMap<TravelerId, TravelerDraw>,
    frame_stats: RenderFrameStats,
}

impl Renderer {
    pub fn new(window: Arc<Window>, portal_render_scale: f32) -> Result<Self, RendererInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(RendererInitError::CreateSurface)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(RendererInitError::RequestAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Riftgate Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(RendererInitError::RequestDevice)?;

        let initial_size = window.inner_size();
        let surface_config = surface
            .get_default_config(&adapter, initial_size.width.max(1), initial_size.height.max(1))
            .ok_or(RendererInitError::UnsupportedSurface)?;
        surface.configure(&device, &surface_config);

        let scene_pipeline = ScenePipeline::new(&device, surface_config.format, DEPTH_FORMAT);
        let portal_renderer = PortalRenderer::new(
            &device,
            surface_config.format,
            &scene_pipeline.camera_bind_group_layout,
            portal_render_scale,
        );

        let initial_camera = CameraUniform::new(Mat4::IDENTITY, glam::Vec3::ZERO);
        let camera_uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Camera Uniform Buffer"),
            contents: bytemuck::bytes_of(&initial_camera),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Camera Bind Group"),
            layout: &scene_pipeline.camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_uniform_buffer.as_entire_binding(),
            }],
        });
        let portal_camera_uniform_buffers: [wgpu::Buffer; 2] = std::array::from_fn(|index| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(match index {
                    0 => "Portal Camera Uniform Buffer A",
                    _ => "Portal Camera Uniform Buffer B",
                }),
                contents: bytemuck::bytes_of(&initial_camera),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        });
        let portal_camera_bind_groups = std::array::from_fn(|index| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(match index {
                    0 => "Portal Camera Bind Group A",
                    _ => "Portal Camera Bind Group B",
                }),
                layout: &scene_pipeline.camera_bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: portal_camera_uniform_buffers[index].as_entire_binding(),
                }],
            })
        });

        let depth_texture = DepthTexture::new(&device, surface_config.width, surface_config.height);

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            depth_texture,
            scene_pipeline,
            portal_renderer,
            camera_uniform_buffer,
            camera_bind_group,
            portal_camera_uniform_buffers,
            portal_camera_bind_groups,
            static_draws: Vec::new(),
            traveler_draws: FxHashMap::default(),
            frame_stats: RenderFrameStats::default(),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_texture = DepthTexture::new(&self.device, width, height);
    }

    pub fn frame_stats(&self) -> RenderFrameStats {
        self.frame_stats
    }

    pub fn begin_frame(&mut self) {
        self.frame_stats = RenderFrameStats::default();
    }

    /// Reallocates the portal view targets if the output size changed.
    /// Called on the render path only for ends that will actually draw.
    pub fn ensure_portal_targets(&mut self) {
        self.portal_renderer
            .resize(&self.device, self.surface_config.width, self.surface_config.height);
    }

    pub fn upload_scene(&mut self, objects: &[SceneObject]) {
        self.static_draws.clear();
        for (index, object) in objects.iter().enumerate() {
            let (vertices, indices) = build_box_mesh(object.half_extents);
            let mesh = GpuMesh::upload(&self.device, &format!("Scene Object {index}"), &vertices, &indices);
            let uniform = ObjectUniform::new(object.pose.to_matrix(), &object.material);
            let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("Scene Object Uniform {index}")),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Scene Object Bind Group {index}")),
                layout: &self.scene_pipeline.object_bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
            });
            self.static_draws.push(StaticDraw {
                mesh,
                _uniform_buffer: uniform_buffer,
                bind_group,
            });
        }
    }

    pub fn register_traveler(&mut self, id: TravelerId, travelers: &TravelerSet) {
        let Some(traveler) = travelers.get(id) else { return };
        let (vertices, indices) = build_box_mesh(traveler.half_extents);
        let mesh = GpuMesh::upload(&self.device, &format!("Traveler {}", id.0), &vertices, &indices);

        let make_uniform = |label: &str| {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&ObjectUniform::default()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.scene_pipeline.object_bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            (buffer, bind_group)
        };
        let (main_buffer, main_bind_group) = make_uniform(&format!("Traveler Uniform {}", id.0));
        let (clone_buffer, clone_bind_group) = make_uniform(&format!("Traveler Clone Uniform {}", id.0));

        self.traveler_draws.insert(
            id,
            TravelerDraw {
                mesh,
                main_buffer,
                main_bind_group,
                clone_buffer,
                clone_bind_group,
            },
        );
    }

    fn write_traveler_uniforms(&self, travelers: &TravelerSet) {
        for (id, draw) in &self.traveler_draws {
            let Some(traveler) = travelers.get(*id) else { continue };
            let Some(material) = traveler.materials().first() else { continue };
            let uniform = ObjectUniform::new(traveler.pose.to_matrix(), material);
            self.queue.write_buffer(&draw.main_buffer, 0, bytemuck::bytes_of(&uniform));

            let clone = traveler.clone_state();
            if clone.active {
                if let Some(clone_material) = clone.materials.first() {
                    let clone_uniform = ObjectUniform::new(clone.pose.to_matrix(), clone_material);
                    self.queue.write_buffer(&draw.clone_buffer, 0, bytemuck::bytes_of(&clone_uniform));
                }
            }
        }
    }

    fn draw_world(
        &self,
        render_pass: &mut wgpu::RenderPass<'_>,
        camera_bind_group: &wgpu::BindGroup,
        travelers: &TravelerSet,
        skip_traveler: Option<TravelerId>,
    ) -> u32 {
        render_pass.set_pipeline(self.scene_pipeline.pipeline());
        render_pass.set_bind_group(0, camera_bind_group, &[]);

        let mut draw_calls = 0;
        for draw in &self.static_draws {
            render_pass.set_bind_group(1, &draw.bind_group, &[]);
            render_pass.set_vertex_buffer(0, draw.mesh.vertex_buffer.slice(..));
            render_pass.set_index_buffer(draw.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..draw.mesh.index_count, 0, 0..1);
            draw_calls += 1;
        }
        for (id, draw) in &self.traveler_draws {
            let Some(traveler) = travelers.get(*id) else { continue };
            render_pass.set_vertex_buffer(0, draw.mesh.vertex_buffer.slice(..));
            render_pass.set_index_buffer(draw.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            if skip_traveler != Some(*id) {
                render_pass.set_bind_group(1, &draw.main_bind_group, &[]);
                render_pass.draw_indexed(0..draw.mesh.index_count, 0, 0..1);
                draw_calls += 1;
            }
            if traveler.clone_state().active {
                render_pass.set_bind_group(1, &draw.clone_bind_group, &[]);
                render_pass.draw_indexed(0..draw.mesh.index_count, 0, 0..1);
                draw_calls += 1;
            }
        }
        draw_calls
    }

    /// Renders end's view into its off-screen target and submits it.
    /// Traveler uniforms must already carry the anti-self-clip slice
    /// state for this view.
    pub fn render_portal_view(
        &mut self,
        end: PortalEnd,
        pair: &PortalPair,
        travelers: &TravelerSet,
        main_camera: &Camera,
        clip_plane: Option<Vec4>,
    ) {
        let render_camera = *pair.portal(end).render_camera();
        let view = render_camera.to_matrix().inverse();
        let mut projection = main_camera.projection_matrix();
        if let Some(plane) = clip_plane {
            projection = apply_oblique_clip(projection, plane);
        }
        let camera_uniform = CameraUniform::new(projection * view, render_camera.position);
        self.queue.write_buffer(
            &self.portal_camera_uniform_buffers[end.index()],
            0,
            bytemuck::bytes_of(&camera_uniform),
        );
        self.write_traveler_uniforms(travelers);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Portal View Encoder"),
            });
        let mut draw_calls = 0;
        {
            let (color_view, depth_view) = self.portal_renderer.target_views(end);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Portal View Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let camera_bind_group = &self.portal_camera_bind_groups[end.index()];
            draw_calls += self.draw_world(&mut render_pass, camera_bind_group, travelers, None);
            // own surface disabled for this view; the far surface shows
            // a tint since its texture is the one being rendered
            draw_calls += self.portal_renderer.render_portal_surfaces(
                &self.queue,
                &mut render_pass,
                camera_bind_group,
                pair,
                false,
                Some(end),
                0,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.frame_stats.draw_calls += draw_calls;
        self.frame_stats.portal_view_passes += 1;
    }

    /// Renders the primary view and presents. Traveler uniforms must
    /// carry the player-view slice state written in the post-render
    /// phase.
    pub fn render_main_view(
        &mut self,
        pair: &PortalPair,
        travelers: &TravelerSet,
        camera: &Camera,
        hide_traveler: Option<TravelerId>,
    ) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let frame_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let camera_uniform = CameraUniform::new(camera.view_projection_matrix(), camera.position);
        self.queue
            .write_buffer(&self.camera_uniform_buffer, 0, bytemuck::bytes_of(&camera_uniform));
        self.write_traveler_uniforms(travelers);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Main View Encoder"),
            });
        let mut draw_calls = 0;
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Main View Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            draw_calls += self.draw_world(&mut render_pass, &self.camera_bind_group, travelers, hide_traveler);
            draw_calls += self.portal_renderer.render_portal_surfaces(
                &self.queue,
                &mut render_pass,
                &self.camera_bind_group,
                pair,
                true,
                None,
                1,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.frame_stats.draw_calls += draw_calls;
        frame.present();
        Ok(())
    }
}
