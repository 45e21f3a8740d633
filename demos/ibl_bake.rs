//! # IBL Bake
//!
//! Runs the precompute pipeline headless over a radiance panorama and reports the maps it
//! produced. Without `--panorama` a constant-radiance image is baked instead.
//!
//! ```text
//! cargo run --example ibl_bake -- --panorama studio.hdr --prefilter-samples 2048
//! cargo run --example ibl_bake -- --backend dummy --max-frames 10
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use pbr_ibl::backend::dummy::DummyBackend;
use pbr_ibl::backend::wgpu_backend::{BackendConfig, WgpuBackend};
use pbr_ibl::backend::GraphicsBackend;
use pbr_ibl::precompute::{PrecomputeConfig, PrecomputePipeline};
use pbr_ibl::resources::{HdrImage, RadianceTexture, TextureInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// wgpu on the best available adapter
    #[default]
    Wgpu,
    /// Records calls without touching a GPU
    Dummy,
}

/// Bake image-based lighting maps from an equirectangular HDR panorama.
#[derive(Parser, Debug)]
#[command(name = "ibl_bake", version)]
struct Args {
    /// Radiance (.hdr) panorama to bake.
    #[arg(long)]
    panorama: Option<PathBuf>,

    /// Graphics backend to use.
    #[arg(long, default_value = "wgpu", value_enum)]
    backend: CliBackend,

    /// Use a software adapter.
    #[arg(long)]
    fallback_adapter: bool,

    /// Environment cubemap face size.
    #[arg(long, default_value = "1024")]
    environment_size: u32,

    /// Irradiance cubemap face size.
    #[arg(long, default_value = "32")]
    irradiance_size: u32,

    /// Prefiltered cubemap face size at mip 0.
    #[arg(long, default_value = "128")]
    prefilter_size: u32,

    /// Prefiltered mips, one roughness level each.
    #[arg(long, default_value = "5")]
    prefilter_mips: u32,

    /// BRDF lookup map size.
    #[arg(long, default_value = "512")]
    brdf_size: u32,

    /// GGX samples per prefiltered texel.
    #[arg(long, default_value = "1024")]
    prefilter_samples: u32,

    /// GGX samples per BRDF lookup texel.
    #[arg(long, default_value = "1024")]
    brdf_samples: u32,

    /// Directory with `<program>.wgsl` bodies overriding the built-in shaders.
    #[arg(long)]
    shader_dir: Option<PathBuf>,

    /// Give up after N updates.
    #[arg(long, default_value = "600")]
    max_frames: u64,

    /// Log debug output.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn precompute_config(&self) -> PrecomputeConfig {
        let config = PrecomputeConfig::default()
            .with_environment_size(self.environment_size)
            .with_irradiance_size(self.irradiance_size)
            .with_prefilter(self.prefilter_size, self.prefilter_mips)
            .with_brdf_lut_size(self.brdf_size)
            .with_sample_counts(self.prefilter_samples, self.brdf_samples);
        match &self.shader_dir {
            Some(dir) => config.with_shader_dir(dir),
            None => config,
        }
    }
}

fn describe(name: &str, info: &TextureInfo) {
    match info.handle {
        Some(handle) => println!(
            "  {:<12} {:?} {:?} {}x{}, {} mips ({:?})",
            name, info.kind, info.format, info.width, info.height, info.mip_levels, handle
        ),
        None => println!("  {:<12} not produced", name),
    }
}

fn bake<B: GraphicsBackend>(backend: &mut B, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = PrecomputePipeline::new(backend, args.precompute_config())?;

    match &args.panorama {
        Some(path) => pipeline.set_radiance_path(backend, path),
        None => {
            let image = HdrImage::solid_color(512, 256, [1.0, 1.0, 1.0, 1.0], "constant");
            pipeline.set_radiance_source(backend, RadianceTexture::from_image(image));
        }
    }

    let started = Instant::now();
    let mut frame = 0;
    while !pipeline.is_ready() && pipeline.stalled_on().is_none() && frame < args.max_frames {
        pipeline.update(backend);
        frame += 1;
        // Pace like a 60 Hz frame loop so background decodes get time to finish
        std::thread::sleep(Duration::from_millis(16));
    }

    if let Some(stall) = pipeline.stalled_on() {
        log::error!("Bake stalled in {}: {:?}", pipeline.state(), stall);
    } else if !pipeline.is_ready() {
        log::warn!("Bake still in {} after {} frames", pipeline.state(), frame);
    } else {
        log::info!("Bake finished in {} frames ({:.2?})", frame, started.elapsed());
    }

    println!("IBL maps ({} backend):", backend.name());
    describe("environment", &pipeline.environment_map());
    describe("irradiance", &pipeline.irradiance_map());
    describe("prefiltered", &pipeline.prefiltered_map());
    describe("brdf_lut", &pipeline.brdf_lut());

    pipeline.release(backend);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match args.backend {
        CliBackend::Wgpu => {
            let config = BackendConfig {
                force_fallback_adapter: args.fallback_adapter,
                ..BackendConfig::default()
            };
            let mut backend = WgpuBackend::new_headless(&config)?;
            let info = backend.adapter_info();
            log::info!("Baking on {} ({:?})", info.name, info.backend);
            bake(&mut backend, &args)
        }
        CliBackend::Dummy => bake(&mut DummyBackend::new(), &args),
    }
}
