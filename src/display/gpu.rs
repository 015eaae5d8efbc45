//! WebGPU renderer: float depth texture upload and a textured quad

use color_eyre::{eyre::eyre, Result};
use once_cell::sync::OnceCell;
use tracing::{debug, info, instrument};
use wgpu::*;

use crate::capture::FrameFormat;
use crate::display::FrameRenderer;
use crate::host::OutputSize;
use crate::pipeline::RenderFrame;

/// Format of the offscreen colour target
const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Process-wide GPU device, created at most once
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
}

static GPU: OnceCell<GpuContext> = OnceCell::new();

impl GpuContext {
    async fn create() -> Result<Self> {
        info!("Initializing WebGPU context");

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        // Get adapter - prefer high-performance
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| eyre!("No suitable GPU adapter found"))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("depthpipe GPU Device"),
                    required_features: Features::empty(),
                    required_limits: Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        Ok(Self { device, queue })
    }

    /// The shared context, initialising it on first use
    pub fn shared() -> Result<&'static GpuContext> {
        GPU.get_or_try_init(|| pollster::block_on(Self::create()))
    }
}

/// Texture format holding `channels` float samples per texel
pub fn depth_texture_format(channels: u32) -> Result<TextureFormat> {
    match channels {
        1 => Ok(TextureFormat::R32Float),
        2 => Ok(TextureFormat::Rg32Float),
        4 => Ok(TextureFormat::Rgba32Float),
        n => Err(eyre!("No float texture format with {} channels", n)),
    }
}

struct DepthTexture {
    format: FrameFormat,
    texture: Texture,
    bind_group: BindGroup,
}

struct Target {
    size: OutputSize,
    /// Owns the storage behind `view`
    _texture: Texture,
    view: TextureView,
}

/// Offscreen renderer drawing the depth frame as a full-output quad
pub struct GpuRenderer {
    ctx: &'static GpuContext,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    depth: Option<DepthTexture>,
    target: Option<Target>,
    upload: Vec<u8>,
}

impl GpuRenderer {
    pub fn new() -> Result<Self> {
        let ctx = GpuContext::shared()?;
        let bind_group_layout = ctx
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Depth Bind Group Layout"),
                entries: &[BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: false },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                }],
            });
        let pipeline = Self::create_render_pipeline(&ctx.device, &bind_group_layout);

        Ok(Self {
            ctx,
            pipeline,
            bind_group_layout,
            depth: None,
            target: None,
            upload: Vec::new(),
        })
    }

    fn depth_texture(&mut self, format: FrameFormat) -> Result<&DepthTexture> {
        if self.depth.as_ref().map(|d| d.format) != Some(format) {
            debug!(?format, "Creating depth texture");
            let texture = self.ctx.device.create_texture(&TextureDescriptor {
                label: Some("Depth Texture"),
                size: Extent3d {
                    width: format.width,
                    height: format.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: depth_texture_format(format.channels)?,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&TextureViewDescriptor::default());
            let bind_group = self.ctx.device.create_bind_group(&BindGroupDescriptor {
                label: Some("Depth Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                }],
            });
            self.depth = Some(DepthTexture {
                format,
                texture,
                bind_group,
            });
        }
        self.depth
            .as_ref()
            .ok_or_else(|| eyre!("Depth texture missing"))
    }

    fn ensure_target(&mut self, size: OutputSize) {
        if self.target.as_ref().map(|t| t.size) == Some(size) {
            return;
        }
        debug!(width = size.width, height = size.height, "Creating render target");
        let texture = self.ctx.device.create_texture(&TextureDescriptor {
            label: Some("Output Texture"),
            size: Extent3d {
                width: size.width.max(1),
                height: size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        self.target = Some(Target {
            size,
            _texture: texture,
            view,
        });
    }

    fn create_render_pipeline(device: &Device, layout: &BindGroupLayout) -> RenderPipeline {
        let shader_source = r#"
            struct VsOut {
                @builtin(position) position: vec4<f32>,
                @location(0) uv: vec2<f32>,
            };

            @vertex
            fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
                // Two triangles covering the output
                var corners = array<vec2<f32>, 6>(
                    vec2<f32>(-1.0, -1.0),
                    vec2<f32>(1.0, -1.0),
                    vec2<f32>(1.0, 1.0),
                    vec2<f32>(-1.0, -1.0),
                    vec2<f32>(1.0, 1.0),
                    vec2<f32>(-1.0, 1.0),
                );
                let p = corners[vertex_index];
                var out: VsOut;
                out.position = vec4<f32>(p, 0.0, 1.0);
                out.uv = vec2<f32>((p.x + 1.0) * 0.5, (1.0 - p.y) * 0.5);
                return out;
            }

            @group(0) @binding(0) var depth_tex: texture_2d<f32>;

            @fragment
            fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
                let dims = vec2<f32>(textureDimensions(depth_tex));
                let texel = vec2<i32>(clamp(in.uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
                let d = textureLoad(depth_tex, texel, 0).r;
                return vec4<f32>(d, d, d, 1.0);
            }
        "#;

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Depth Shader"),
            source: ShaderSource::Wgsl(shader_source.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Depth Pipeline Layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Depth Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        })
    }
}

impl FrameRenderer for GpuRenderer {
    #[instrument(skip_all, fields(sequence = frame.sequence()))]
    fn render(&mut self, frame: &RenderFrame, output: OutputSize) -> Result<()> {
        let format = frame.format();
        let mut upload = std::mem::take(&mut self.upload);
        frame.write_le_bytes(&mut upload);

        let ctx = self.ctx;
        let depth = self.depth_texture(format)?;
        ctx.queue.write_texture(
            ImageCopyTexture {
                texture: &depth.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &upload,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(format.row_bytes() as u32),
                rows_per_image: Some(format.height),
            },
            Extent3d {
                width: format.width,
                height: format.height,
                depth_or_array_layers: 1,
            },
        );
        self.upload = upload;

        self.ensure_target(output);
        let (Some(depth), Some(target)) = (&self.depth, &self.target) else {
            return Err(eyre!("Render resources missing"));
        };

        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &depth.bind_group, &[]);
            render_pass.draw(0..6, 0..1);
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formats_by_channel_count() {
        assert_eq!(depth_texture_format(1).unwrap(), TextureFormat::R32Float);
        assert_eq!(depth_texture_format(2).unwrap(), TextureFormat::Rg32Float);
        assert_eq!(depth_texture_format(4).unwrap(), TextureFormat::Rgba32Float);
        assert!(depth_texture_format(3).is_err());
    }
}
