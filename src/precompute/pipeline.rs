//! The frame-driven IBL precompute state machine

use std::path::PathBuf;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::precompute::capture::CaptureMatrices;
use crate::precompute::config::PrecomputeConfig;
use crate::precompute::cube_faces::CubeFaceRenderer;
use crate::precompute::error::{PrecomputeError, PrecomputeResult};
use crate::precompute::offscreen::OffscreenTarget;
use crate::precompute::sampling::{mip_size, roughness_for_mip};
use crate::precompute::state::PipelineState;
use crate::resources::{GeometryCache, GpuMesh, GpuTexture, RadianceTexture, TextureInfo};
use crate::shaders::{
    PrecomputePrograms, ProgramKind, ENVIRONMENT_MAP_SAMPLER, RESOLUTION_UNIFORM,
    ROUGHNESS_UNIFORM, SPHERE_MAP_SAMPLER,
};

const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// Why the pipeline stopped advancing. A stalled pipeline stays stalled until a new
/// panorama is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// The program of the current stage failed to compile
    Program(ProgramKind),
    /// The radiance panorama failed to decode or upload
    RadianceTexture,
    /// The current stage could not allocate or bind its resources
    Stage(PipelineState),
}

/// Program that performs the work pending in `state`
fn stage_program(state: PipelineState) -> Option<ProgramKind> {
    match state {
        PipelineState::ConvertingToEnvironmentMap => Some(ProgramKind::EquirectToCube),
        PipelineState::CalculatingIrradianceMap => Some(ProgramKind::Irradiance),
        PipelineState::CalculatingPrefilterMap => Some(ProgramKind::Prefilter),
        PipelineState::GeneratingBRDFLookupMap => Some(ProgramKind::BrdfIntegration),
        _ => None,
    }
}

fn render_target(desc: TextureDescriptor) -> TextureDescriptor {
    desc.with_usage(TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT)
}

/// Turns an equirectangular radiance panorama into the four IBL maps.
///
/// Call [`PrecomputePipeline::update`] once per frame. Each call performs at most one stage,
/// so the work spreads over several frames. The outputs are complete once
/// [`PrecomputePipeline::is_ready`] returns `true`.
pub struct PrecomputePipeline {
    config: PrecomputeConfig,
    state: PipelineState,
    stall: Option<Stall>,
    programs: PrecomputePrograms,
    geometry: GeometryCache,
    matrices: CaptureMatrices,
    radiance: Option<RadianceTexture>,
    offscreen: Option<OffscreenTarget>,
    environment: Option<GpuTexture>,
    irradiance: Option<GpuTexture>,
    prefiltered: Option<GpuTexture>,
    brdf_lut: Option<GpuTexture>,
}

impl PrecomputePipeline {
    /// Request the programs and upload the geometry.
    ///
    /// Fails when the configuration is invalid or the backend cannot render half-float
    /// cubemaps of the configured sizes.
    pub fn new<B: GraphicsBackend>(backend: &mut B, config: PrecomputeConfig) -> PrecomputeResult<Self> {
        config.validate()?;
        backend
            .capabilities()
            .ensure_float_rendering(config.largest_target())?;

        let programs = PrecomputePrograms::create(backend, &config)?;
        let geometry = match GeometryCache::new(backend) {
            Ok(geometry) => geometry,
            Err(e) => {
                programs.destroy(backend);
                return Err(e.into());
            }
        };

        log::info!(
            "IBL precompute pipeline created on {} (environment {}, irradiance {}, prefilter {}x{} mips, BRDF LUT {})",
            backend.name(),
            config.environment_size,
            config.irradiance_size,
            config.prefilter_size,
            config.prefilter_mip_levels,
            config.brdf_lut_size
        );

        Ok(Self {
            config,
            state: PipelineState::PreparingResources,
            stall: None,
            programs,
            geometry,
            matrices: CaptureMatrices::new(),
            radiance: None,
            offscreen: None,
            environment: None,
            irradiance: None,
            prefiltered: None,
            brdf_lut: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// True once all four maps are complete
    pub fn is_ready(&self) -> bool {
        self.state.is_finished()
    }

    pub fn config(&self) -> &PrecomputeConfig {
        &self.config
    }

    pub fn programs(&self) -> &PrecomputePrograms {
        &self.programs
    }

    pub fn capture_matrices(&self) -> &CaptureMatrices {
        &self.matrices
    }

    pub fn stalled_on(&self) -> Option<Stall> {
        self.stall
    }

    /// Decode `path` in the background and restart the pipeline from it
    pub fn set_radiance_path<B: GraphicsBackend>(&mut self, backend: &mut B, path: impl Into<PathBuf>) {
        let path = path.into();
        log::info!("Loading radiance panorama {}", path.display());
        self.set_radiance_source(backend, RadianceTexture::load(path));
    }

    /// Restart the pipeline from `radiance`, releasing everything earlier stages produced
    pub fn set_radiance_source<B: GraphicsBackend>(&mut self, backend: &mut B, radiance: RadianceTexture) {
        self.release_stage_resources(backend);
        self.radiance = Some(radiance);
        self.stall = None;
        if self.state != PipelineState::AwaitingRadianceTexture {
            log::info!("{} -> {}", self.state, PipelineState::AwaitingRadianceTexture);
        }
        self.state = PipelineState::AwaitingRadianceTexture;
    }

    /// Drive the pipeline. Never blocks; performs at most one stage.
    pub fn update<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if self.stall.is_some() {
            return;
        }

        match self.state {
            PipelineState::PreparingResources | PipelineState::Finished => {}
            PipelineState::AwaitingRadianceTexture => self.poll_radiance(backend),
            state => self.run_stage(backend, state),
        }
    }

    fn poll_radiance<B: GraphicsBackend>(&mut self, backend: &mut B) {
        let Some(radiance) = self.radiance.as_mut() else {
            return;
        };
        if radiance.poll(backend) {
            // The upload counts as this frame's transition, so rendering starts next update
            self.advance(backend);
        } else if radiance.has_failed() {
            log::error!(
                "Pipeline stalled: radiance panorama {} is unavailable",
                radiance.name()
            );
            self.stall = Some(Stall::RadianceTexture);
        }
    }

    fn run_stage<B: GraphicsBackend>(&mut self, backend: &mut B, state: PipelineState) {
        let Some(kind) = stage_program(state) else {
            return;
        };
        let program = self.programs.get(kind);
        match backend.program_status(program) {
            ProgramStatus::Pending => return,
            ProgramStatus::Failed => {
                log::error!(
                    "Pipeline stalled in {}: program `{}` failed to build",
                    state,
                    kind.label()
                );
                self.stall = Some(Stall::Program(kind));
                return;
            }
            ProgramStatus::Ready => {}
        }

        let result = match state {
            PipelineState::ConvertingToEnvironmentMap => self.convert_to_environment(backend, program),
            PipelineState::CalculatingIrradianceMap => self.calculate_irradiance(backend, program),
            PipelineState::CalculatingPrefilterMap => self.calculate_prefilter(backend, program),
            PipelineState::GeneratingBRDFLookupMap => self.generate_brdf_lut(backend, program),
            _ => Ok(()),
        };
        backend.flush();

        match result {
            Ok(()) => self.advance(backend),
            Err(e) => {
                log::error!("Pipeline stalled in {}: {}", state, e);
                self.stall = Some(Stall::Stage(state));
            }
        }
    }

    fn advance<B: GraphicsBackend>(&mut self, backend: &mut B) {
        let Some(next) = self.state.successor() else {
            return;
        };
        log::info!("{} -> {}", self.state, next);
        self.state = next;
        if next.is_finished() {
            self.release_intermediates(backend);
        }
    }

    /// Create the offscreen target on first use, otherwise resize it
    fn prepare_offscreen<B: GraphicsBackend>(&mut self, backend: &mut B, size: u32) -> BackendResult<()> {
        match self.offscreen.as_mut() {
            Some(target) => target.resize(backend, size),
            None => {
                self.offscreen = Some(OffscreenTarget::new(backend, HDR_FORMAT, size)?);
                Ok(())
            }
        }
    }

    fn environment_handle(&self) -> PrecomputeResult<TextureHandle> {
        self.environment
            .as_ref()
            .map(|texture| texture.handle)
            .ok_or(PrecomputeError::MissingInput("environment map"))
    }

    fn convert_to_environment<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: ProgramHandle,
    ) -> PrecomputeResult<()> {
        let panorama = self
            .radiance
            .as_ref()
            .and_then(|radiance| radiance.texture())
            .map(|texture| texture.handle)
            .ok_or(PrecomputeError::MissingInput("radiance panorama"))?;

        let size = self.config.environment_size;
        let desc = render_target(TextureDescriptor::new_cube(size, HDR_FORMAT))
            .with_label("environment_map")
            .with_mip_levels(self.config.environment_mip_levels());
        let environment = GpuTexture::create(backend, &desc)?;
        let cubemap = environment.handle;
        replace_output(&mut self.environment, backend, environment);

        self.prepare_offscreen(backend, size)?;
        let (target, cube, matrices) = self.render_parts()?;
        {
            let mut pass = target.begin_pass(backend, program)?;
            pass.set_texture(SPHERE_MAP_SAMPLER, panorama);
            CubeFaceRenderer::new(cube, matrices).render(&mut pass, cubemap, 0);
        }
        log::debug!("Generating {} environment mips", desc.mip_levels);
        if let Err(e) = backend.generate_mipmaps(cubemap) {
            log::error!("Environment mip generation failed: {}", e);
        }
        Ok(())
    }

    fn calculate_irradiance<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: ProgramHandle,
    ) -> PrecomputeResult<()> {
        let environment = self.environment_handle()?;
        let size = self.config.irradiance_size;
        let desc = render_target(TextureDescriptor::new_cube(size, HDR_FORMAT)).with_label("irradiance_map");
        let irradiance = GpuTexture::create(backend, &desc)?;
        let cubemap = irradiance.handle;
        replace_output(&mut self.irradiance, backend, irradiance);

        self.prepare_offscreen(backend, size)?;
        let (target, cube, matrices) = self.render_parts()?;
        let mut pass = target.begin_pass(backend, program)?;
        pass.set_texture(ENVIRONMENT_MAP_SAMPLER, environment);
        CubeFaceRenderer::new(cube, matrices).render(&mut pass, cubemap, 0);
        Ok(())
    }

    fn calculate_prefilter<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: ProgramHandle,
    ) -> PrecomputeResult<()> {
        let environment = self.environment_handle()?;
        let base = self.config.prefilter_size;
        let mip_count = self.config.prefilter_mip_levels;
        let resolution = self.config.environment_size as f32;
        let desc = render_target(TextureDescriptor::new_cube(base, HDR_FORMAT))
            .with_label("prefiltered_map")
            .with_mip_levels(mip_count);
        let prefiltered = GpuTexture::create(backend, &desc)?;
        let cubemap = prefiltered.handle;
        replace_output(&mut self.prefiltered, backend, prefiltered);

        for mip in 0..mip_count {
            let size = mip_size(base, mip);
            let roughness = roughness_for_mip(mip, mip_count);
            log::debug!("Prefiltering mip {} ({}x{}, roughness {:.2})", mip, size, size, roughness);

            self.prepare_offscreen(backend, size)?;
            let (target, cube, matrices) = self.render_parts()?;
            let mut pass = target.begin_pass(backend, program)?;
            pass.set_texture(ENVIRONMENT_MAP_SAMPLER, environment);
            pass.set_uniform(ROUGHNESS_UNIFORM, roughness.into());
            pass.set_uniform(RESOLUTION_UNIFORM, resolution.into());
            CubeFaceRenderer::new(cube, matrices).render(&mut pass, cubemap, mip);
        }
        Ok(())
    }

    fn generate_brdf_lut<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: ProgramHandle,
    ) -> PrecomputeResult<()> {
        let size = self.config.brdf_lut_size;
        let desc = render_target(TextureDescriptor::new_2d(size, size, BRDF_LUT_FORMAT)).with_label("brdf_lut");
        let lut = GpuTexture::create(backend, &desc)?;
        let handle = lut.handle;
        replace_output(&mut self.brdf_lut, backend, lut);

        self.prepare_offscreen(backend, size)?;
        let target = self
            .offscreen
            .as_ref()
            .ok_or(PrecomputeError::MissingInput("offscreen target"))?;
        let quad = &self.geometry.quad;
        let mut pass = target.begin_pass(backend, program)?;
        pass.attach_and_clear(handle, AttachmentTarget::Texture2D, 0)?;
        quad.bind(&mut *pass, program);
        if let Err(e) = quad.draw(&mut *pass) {
            log::error!("Drawing the BRDF lookup quad failed: {}", e);
        }
        log::debug!("Integrated {}x{} BRDF lookup map", size, size);
        Ok(())
    }

    fn render_parts(&self) -> PrecomputeResult<(&OffscreenTarget, &GpuMesh, &CaptureMatrices)> {
        let target = self
            .offscreen
            .as_ref()
            .ok_or(PrecomputeError::MissingInput("offscreen target"))?;
        Ok((target, &self.geometry.cube, &self.matrices))
    }

    /// Drop what only the stages need: the offscreen target and the panorama
    fn release_intermediates<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(target) = self.offscreen.take() {
            target.destroy(backend);
        }
        if let Some(radiance) = self.radiance.take() {
            radiance.release(backend);
        }
        log::debug!("Released precompute intermediates");
    }

    fn release_stage_resources<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.release_intermediates(backend);
        for output in [
            &mut self.environment,
            &mut self.irradiance,
            &mut self.prefiltered,
            &mut self.brdf_lut,
        ] {
            if let Some(texture) = output.take() {
                texture.destroy(backend);
            }
        }
    }

    /// Environment cubemap rendered from the panorama, with a full mip chain
    pub fn environment_map(&self) -> TextureInfo {
        output_info(&self.environment, TextureKind::Cube, HDR_FORMAT)
    }

    /// Diffuse irradiance cubemap
    pub fn irradiance_map(&self) -> TextureInfo {
        output_info(&self.irradiance, TextureKind::Cube, HDR_FORMAT)
    }

    /// Specular cubemap, one roughness level per mip
    pub fn prefiltered_map(&self) -> TextureInfo {
        output_info(&self.prefiltered, TextureKind::Cube, HDR_FORMAT)
    }

    /// Split-sum scale and bias indexed by `(NdotV, roughness)`
    pub fn brdf_lut(&self) -> TextureInfo {
        output_info(&self.brdf_lut, TextureKind::D2, BRDF_LUT_FORMAT)
    }

    /// Destroy every GPU resource the pipeline owns, the outputs included
    pub fn release<B: GraphicsBackend>(mut self, backend: &mut B) {
        self.release_stage_resources(backend);
        self.geometry.destroy(backend);
        self.programs.destroy(backend);
        log::info!("IBL precompute pipeline released");
    }
}

fn replace_output<B: GraphicsBackend>(slot: &mut Option<GpuTexture>, backend: &mut B, texture: GpuTexture) {
    if let Some(previous) = slot.replace(texture) {
        previous.destroy(backend);
    }
}

fn output_info(texture: &Option<GpuTexture>, kind: TextureKind, format: TextureFormat) -> TextureInfo {
    texture
        .as_ref()
        .map(GpuTexture::info)
        .unwrap_or_else(|| TextureInfo::pending(kind, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn every_rendering_state_has_a_program() {
        for state in PipelineState::ALL {
            assert_eq!(stage_program(state).is_some(), state.renders(), "{}", state);
        }
    }

    #[test]
    fn construction_waits_for_a_panorama() {
        let mut backend = DummyBackend::new();
        let mut pipeline = PrecomputePipeline::new(&mut backend, PrecomputeConfig::default()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::PreparingResources);
        pipeline.update(&mut backend);
        pipeline.update(&mut backend);
        assert_eq!(pipeline.state(), PipelineState::PreparingResources);
        assert!(!pipeline.environment_map().is_available());
    }

    #[test]
    fn invalid_config_is_rejected_before_any_allocation() {
        let mut backend = DummyBackend::new();
        let config = PrecomputeConfig::default().with_prefilter(100, 5);
        let result = PrecomputePipeline::new(&mut backend, config);
        assert!(matches!(result, Err(PrecomputeError::InvalidConfig(_))));
        assert!(backend.calls().is_empty());
    }
}
