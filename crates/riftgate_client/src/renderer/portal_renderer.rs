//! Off-screen render targets for the two portal views and the pipeline
//! that draws the portal surfaces, sampling the linked view's image with
//! screen-space UVs.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::portal::{PortalEnd, PortalPair};
use crate::renderer::mesh::{build_box_mesh, GpuMesh, SceneVertex};

const PORTAL_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

// Tint shown when a surface is drawn without its view texture, inside
// another portal's render pass.
const SURFACE_TINT: [f32; 4] = [0.05, 0.12, 0.18, 1.0];

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SurfaceParamsUniform {
    model: [[f32; 4]; 4],
    color: [f32; 4],
    textured: f32,
    _padding: [f32; 3],
}

impl Default for SurfaceParamsUniform {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            color: SURFACE_TINT,
            textured: 0.0,
            _padding: [0.0; 3],
        }
    }
}

struct PortalRenderTarget {
    _color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    sample_bind_group: wgpu::BindGroup,
}

pub struct PortalRenderer {
    surface_pipeline: wgpu::RenderPipeline,
    portal_texture_bind_group_layout: wgpu::BindGroupLayout,
    surface_params_buffers: [[wgpu::Buffer; 2]; 2],
    surface_params_bind_groups: [[wgpu::BindGroup; 2]; 2],
    surface_mesh: GpuMesh,
    sampler: wgpu::Sampler,
    targets: [PortalRenderTarget; 2],
    target_width: u32,
    target_height: u32,
    render_scale: f32,
    surface_format: wgpu::TextureFormat,
}

impl PortalRenderer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        camera_bind_group_layout: &wgpu::BindGroupLayout,
        render_scale: f32,
    ) -> Self {
        let surface_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Portal Surface Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../../assets/shaders/portal_surface.wgsl"
                ))
                .into(),
            ),
        });

        let portal_texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Portal Texture Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let surface_params_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Portal Surface Params Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Portal RTT Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // One params buffer per surface per pass kind, so a portal-view
        // pass and the main pass never stomp each other's uniforms
        // within one frame's submissions.
        let surface_params_buffers: [[wgpu::Buffer; 2]; 2] = std::array::from_fn(|pass| {
            std::array::from_fn(|index| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Portal Surface Params Buffer {pass}/{index}")),
                    contents: bytemuck::bytes_of(&SurfaceParamsUniform::default()),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                })
            })
        });
        let surface_params_bind_groups: [[wgpu::BindGroup; 2]; 2] = std::array::from_fn(|pass| {
            std::array::from_fn(|index| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Portal Surface Params Bind Group {pass}/{index}")),
                    layout: &surface_params_bind_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: surface_params_buffers[pass][index].as_entire_binding(),
                    }],
                })
            })
        });

        let surface_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Portal Surface Pipeline Layout"),
                bind_group_layouts: &[
                    camera_bind_group_layout,
                    &portal_texture_bind_group_layout,
                    &surface_params_bind_group_layout,
                ],
                push_constant_ranges: &[],
            });

        let surface_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Portal Surface Pipeline"),
            layout: Some(&surface_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &surface_shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[SceneVertex::desc()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &surface_shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // the surface box is viewed from both sides
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: PORTAL_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let (vertices, indices) = build_box_mesh(Vec3::ONE);
        let surface_mesh = GpuMesh::upload(device, "Portal Surface", &vertices, &indices);

        let targets = create_targets(device, 1, 1, surface_format, &portal_texture_bind_group_layout, &sampler);

        Self {
            surface_pipeline,
            portal_texture_bind_group_layout,
            surface_params_buffers,
            surface_params_bind_groups,
            surface_mesh,
            sampler,
            targets,
            target_width: 1,
            target_height: 1,
            render_scale,
            surface_format,
        }
    }

    /// Reallocates both view targets when the scaled output size
    /// changed. Dropping the old array releases its textures before the
    /// new ones are created.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let target_width = scaled_dimension(width, self.render_scale);
        let target_height = scaled_dimension(height, self.render_scale);
        if target_width == self.target_width && target_height == self.target_height {
            return;
        }

        self.targets = create_targets(
            device,
            target_width,
            target_height,
            self.surface_format,
            &self.portal_texture_bind_group_layout,
            &self.sampler,
        );
        self.target_width = target_width;
        self.target_height = target_height;
    }

    pub fn target_views(&self, end: PortalEnd) -> (&wgpu::TextureView, &wgpu::TextureView) {
        let target = &self.targets[end.index()];
        (&target.color_view, &target.depth_view)
    }

    /// Draws portal surfaces into an ongoing pass. `textured` surfaces
    /// sample the linked end's view target (the main pass); untextured
    /// ones show a flat tint (portal-view passes, where the target being
    /// rendered cannot also be sampled). `skip` disables one end's own
    /// surface during its view pass. `pass_slot` selects which uniform
    /// set to write, 0 for portal-view passes and 1 for the main pass.
    #[allow(clippy::too_many_arguments)]
    pub fn render_portal_surfaces(
        &self,
        queue: &wgpu::Queue,
        render_pass: &mut wgpu::RenderPass<'_>,
        camera_bind_group: &wgpu::BindGroup,
        pair: &PortalPair,
        textured: bool,
        skip: Option<PortalEnd>,
        pass_slot: usize,
    ) -> u32 {
        render_pass.set_pipeline(&self.surface_pipeline);
        render_pass.set_vertex_buffer(0, self.surface_mesh.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.surface_mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.set_bind_group(0, camera_bind_group, &[]);

        let mut draw_calls = 0;
        for end in PortalEnd::BOTH {
            if skip == Some(end) {
                continue;
            }
            let portal = pair.portal(end);
            let screen = portal.screen();
            let pose = portal.pose();
            let model = Mat4::from_scale_rotation_translation(
                Vec3::new(screen.half_extents.x, screen.half_extents.y, screen.depth * 0.5),
                pose.rotation,
                pose.position + pose.forward() * screen.offset,
            );
            let params = SurfaceParamsUniform {
                model: model.to_cols_array_2d(),
                color: SURFACE_TINT,
                textured: if textured { 1.0 } else { 0.0 },
                _padding: [0.0; 3],
            };
            queue.write_buffer(
                &self.surface_params_buffers[pass_slot][end.index()],
                0,
                bytemuck::bytes_of(&params),
            );

            // end's own camera renders the image shown on the linked
            // surface, so this surface samples the other end's target
            let sampled = &self.targets[end.other().index()].sample_bind_group;
            render_pass.set_bind_group(1, sampled, &[]);
            render_pass.set_bind_group(2, &self.surface_params_bind_groups[pass_slot][end.index()], &[]);
            render_pass.draw_indexed(0..self.surface_mesh.index_count, 0, 0..1);
            draw_calls += 1;
        }
        draw_calls
    }
}

fn scaled_dimension(dimension: u32, scale: f32) -> u32 {
    ((dimension.max(1) as f32) * scale).round().max(1.0) as u32
}

fn create_targets(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    color_format: wgpu::TextureFormat,
    portal_texture_bind_group_layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
) -> [PortalRenderTarget; 2] {
    std::array::from_fn(|index| {
        let color_label = format!("Portal RTT Color Texture {index}");
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&color_label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_label = format!("Portal RTT Depth Texture {index}");
        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&depth_label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PORTAL_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group_label = format!("Portal RTT Sample Bind Group {index}");
        let sample_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&bind_group_label),
            layout: portal_texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        PortalRenderTarget {
            _color_texture: color_texture,
            color_view,
            _depth_texture: depth_texture,
            depth_view,
            sample_bind_group,
        }
    })
}

/// Replaces a projection's near plane with an arbitrary camera-space
/// plane, leaving the far plane approximately intact.
pub fn apply_oblique_clip(proj: Mat4, clip_plane_camera: Vec4) -> Mat4 {
    let q = proj.inverse()
        * Vec4::new(
            clip_plane_camera.x.signum(),
            clip_plane_camera.y.signum(),
            1.0,
            1.0,
        );
    let denom = clip_plane_camera.dot(q);
    if denom.abs() < 1e-5 {
        return proj;
    }

    let c = clip_plane_camera * (2.0 / denom);
    let mut m = proj.to_cols_array_2d();
    m[0][2] = c.x - m[0][3];
    m[1][2] = c.y - m[1][3];
    m[2][2] = c.z - m[2][3];
    m[3][2] = c.w - m[3][3];
    Mat4::from_cols_array_2d(&m)
}

// keep the uniform size in sync with the WGSL struct
const _: () = assert!(mem::size_of::<SurfaceParamsUniform>() == 96);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dimension_never_hits_zero() {
        assert_eq!(scaled_dimension(0, 0.5), 1);
        assert_eq!(scaled_dimension(1, 0.25), 1);
        assert_eq!(scaled_dimension(1920, 0.5), 960);
        assert_eq!(scaled_dimension(1920, 1.0), 1920);
    }

    #[test]
    fn degenerate_clip_plane_leaves_projection_unchanged() {
        let proj = Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 500.0);
        let clipped = apply_oblique_clip(proj, Vec4::ZERO);
        assert_eq!(proj, clipped);
    }

    #[test]
    fn oblique_clip_changes_the_depth_row() {
        let proj = Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 500.0);
        let plane = Vec4::new(0.0, 0.0, -1.0, -2.0);
        let clipped = apply_oblique_clip(proj, plane);
        assert_ne!(proj, clipped);
        // x/y rows untouched
        let a = proj.to_cols_array_2d();
        let b = clipped.to_cols_array_2d();
        for col in 0..4 {
            assert_eq!(a[col][0], b[col][0]);
            assert_eq!(a[col][1], b[col][1]);
        }
    }
}
