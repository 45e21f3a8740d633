//! Integration tests for the IBL precompute pipeline.
//!
//! The pipeline is driven frame by frame against the recording backend and checked on the
//! calls it issues, the resources it leaves alive and the maps it reports.
//!
//! ```bash
//! cargo test --test precompute_pipeline
//! ```

mod common;

use rstest::{fixture, rstest};

use common::{
    deferred_radiance, drive, init_logging, mark_ready, panorama, panorama_texture, pipeline,
    ready_radiance, run_to_completion,
};
use pbr_ibl::backend::dummy::{Call, DummyBackend};
use pbr_ibl::backend::{
    AttachmentTarget, BackendError, Capabilities, ProgramStatus, TextureFormat, TextureKind,
    UniformValue,
};
use pbr_ibl::precompute::{PipelineState, PrecomputeConfig, PrecomputeError, Stall};
use pbr_ibl::resources::LoadError;
use pbr_ibl::shaders::{ProgramKind, RESOLUTION_UNIFORM, ROUGHNESS_UNIFORM};

#[fixture]
fn backend() -> DummyBackend {
    init_logging();
    DummyBackend::new()
}

// ============================================================================
// State Progression
// ============================================================================

#[rstest]
fn advances_one_state_per_frame(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    assert_eq!(pipeline.state(), PipelineState::AwaitingRadianceTexture);

    let states = drive(&mut pipeline, &mut backend, 7);
    assert_eq!(
        states,
        vec![
            PipelineState::ConvertingToEnvironmentMap,
            PipelineState::CalculatingIrradianceMap,
            PipelineState::CalculatingPrefilterMap,
            PipelineState::GeneratingBRDFLookupMap,
            PipelineState::Finished,
            PipelineState::Finished,
            PipelineState::Finished,
        ]
    );
    assert!(pipeline.is_ready());
    assert_eq!(pipeline.stalled_on(), None);
}

#[rstest]
fn does_not_advance_without_a_panorama(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let states = drive(&mut pipeline, &mut backend, 5);
    assert!(states.iter().all(|s| *s == PipelineState::PreparingResources));
    assert_eq!(backend.draws().count(), 0);
}

#[rstest]
fn waits_for_the_decode_to_finish(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let (sender, radiance) = deferred_radiance();
    pipeline.set_radiance_source(&mut backend, radiance);

    let states = drive(&mut pipeline, &mut backend, 3);
    assert!(states
        .iter()
        .all(|s| *s == PipelineState::AwaitingRadianceTexture));
    assert!(panorama_texture(&backend).is_none());

    assert!(sender.send(Ok(panorama())));
    pipeline.update(&mut backend);
    assert_eq!(pipeline.state(), PipelineState::ConvertingToEnvironmentMap);
    assert!(panorama_texture(&backend).is_some());
    // One transition per update: the upload takes this frame, the first stage renders on the next
    assert_eq!(backend.draws().count(), 0);
}

#[rstest]
fn pending_program_holds_its_stage() {
    init_logging();
    let mut backend = DummyBackend::new().with_pending_programs();
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());

    pipeline.update(&mut backend);
    let states = drive(&mut pipeline, &mut backend, 3);
    assert!(states
        .iter()
        .all(|s| *s == PipelineState::ConvertingToEnvironmentMap));
    assert_eq!(backend.draws().count(), 0);

    mark_ready(&mut backend, ProgramKind::EquirectToCube.label());
    pipeline.update(&mut backend);
    assert_eq!(pipeline.state(), PipelineState::CalculatingIrradianceMap);

    // The next stage has its own program, still compiling
    pipeline.update(&mut backend);
    assert_eq!(pipeline.state(), PipelineState::CalculatingIrradianceMap);

    for kind in [
        ProgramKind::Irradiance,
        ProgramKind::Prefilter,
        ProgramKind::BrdfIntegration,
    ] {
        mark_ready(&mut backend, kind.label());
    }
    run_to_completion(&mut pipeline, &mut backend);
}

#[rstest]
#[case::equirect(ProgramKind::EquirectToCube, PipelineState::ConvertingToEnvironmentMap)]
#[case::irradiance(ProgramKind::Irradiance, PipelineState::CalculatingIrradianceMap)]
#[case::prefilter(ProgramKind::Prefilter, PipelineState::CalculatingPrefilterMap)]
#[case::brdf(ProgramKind::BrdfIntegration, PipelineState::GeneratingBRDFLookupMap)]
fn failed_program_stalls_its_stage(
    mut backend: DummyBackend,
    #[case] kind: ProgramKind,
    #[case] stage: PipelineState,
) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let program = pipeline.programs().get(kind);
    backend.set_program_status(program, ProgramStatus::Failed);
    pipeline.set_radiance_source(&mut backend, ready_radiance());

    let states = drive(&mut pipeline, &mut backend, 10);
    assert_eq!(states.last(), Some(&stage));
    assert_eq!(pipeline.stalled_on(), Some(Stall::Program(kind)));
    assert!(!pipeline.is_ready());
}

#[rstest]
fn decode_failure_stalls_waiting_for_radiance(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let (sender, radiance) = deferred_radiance();
    pipeline.set_radiance_source(&mut backend, radiance);
    sender.send(Err(LoadError::Decode {
        path: "broken.hdr".into(),
        message: "not a radiance file".into(),
    }));

    let states = drive(&mut pipeline, &mut backend, 4);
    assert!(states
        .iter()
        .all(|s| *s == PipelineState::AwaitingRadianceTexture));
    assert_eq!(pipeline.stalled_on(), Some(Stall::RadianceTexture));
    assert!(panorama_texture(&backend).is_none());
}

#[rstest]
fn abandoned_decode_stalls_waiting_for_radiance(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let (sender, radiance) = deferred_radiance();
    drop(sender);
    pipeline.set_radiance_source(&mut backend, radiance);

    pipeline.update(&mut backend);
    assert_eq!(pipeline.stalled_on(), Some(Stall::RadianceTexture));
}

#[rstest]
fn missing_file_stalls_waiting_for_radiance(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_path(&mut backend, "/nonexistent/panorama.hdr");

    for _ in 0..200 {
        pipeline.update(&mut backend);
        if pipeline.stalled_on().is_some() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(pipeline.stalled_on(), Some(Stall::RadianceTexture));
    assert_eq!(pipeline.state(), PipelineState::AwaitingRadianceTexture);
}

#[rstest]
#[case::no_float_textures(Capabilities { float_textures: false, ..Capabilities::default() })]
#[case::no_float_filtering(Capabilities { float_linear_filtering: false, ..Capabilities::default() })]
#[case::no_float_targets(Capabilities { float_render_targets: false, ..Capabilities::default() })]
#[case::too_small(Capabilities { max_texture_size: 512, ..Capabilities::default() })]
fn refuses_backends_without_float_rendering(#[case] capabilities: Capabilities) {
    init_logging();
    let mut backend = DummyBackend::new().with_capabilities(capabilities);
    let result = pbr_ibl::PrecomputePipeline::new(&mut backend, PrecomputeConfig::default());
    assert!(matches!(
        result,
        Err(PrecomputeError::Backend(BackendError::MissingCapability(_)))
    ));
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.live_textures(), 0);
}

// ============================================================================
// Outputs
// ============================================================================

#[rstest]
fn outputs_are_pending_until_their_stage_runs(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    pipeline.update(&mut backend);
    pipeline.update(&mut backend);

    assert!(pipeline.environment_map().is_available());
    assert!(!pipeline.irradiance_map().is_available());
    assert!(!pipeline.prefiltered_map().is_available());
    let lut = pipeline.brdf_lut();
    assert!(!lut.is_available());
    assert_eq!(lut.kind, TextureKind::D2);
    assert_eq!(lut.format, TextureFormat::Rg16Float);
}

#[rstest]
fn default_maps_have_the_documented_shapes(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let environment = pipeline.environment_map();
    assert_eq!(environment.kind, TextureKind::Cube);
    assert_eq!(environment.format, TextureFormat::Rgba16Float);
    assert_eq!((environment.width, environment.mip_levels), (1024, 11));

    let irradiance = pipeline.irradiance_map();
    assert_eq!(irradiance.kind, TextureKind::Cube);
    assert_eq!((irradiance.width, irradiance.mip_levels), (32, 1));

    let prefiltered = pipeline.prefiltered_map();
    assert_eq!(prefiltered.kind, TextureKind::Cube);
    assert_eq!((prefiltered.width, prefiltered.mip_levels), (128, 5));

    let lut = pipeline.brdf_lut();
    assert_eq!(lut.kind, TextureKind::D2);
    assert_eq!(lut.format, TextureFormat::Rg16Float);
    assert_eq!((lut.width, lut.height, lut.mip_levels), (512, 512, 1));
}

#[rstest]
fn environment_mips_are_generated_after_the_faces(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let environment = pipeline.environment_map().handle.expect("environment map");
    let calls = backend.calls();
    let mipmaps = calls
        .iter()
        .position(|call| *call == Call::GenerateMipmaps(environment))
        .expect("mip generation");
    let last_face = calls
        .iter()
        .rposition(|call| matches!(call, Call::DrawIndexed(d) if d.target.map(|t| t.0) == Some(environment)))
        .expect("environment draws");
    assert!(last_face < mipmaps);
    assert_eq!(
        calls
            .iter()
            .filter(|call| matches!(call, Call::GenerateMipmaps(_)))
            .count(),
        1
    );
}

#[rstest]
fn every_cube_stage_renders_six_faces(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let count = |kind: ProgramKind| {
        let program = pipeline.programs().get(kind);
        backend.draws().filter(|d| d.program == program).count()
    };
    assert_eq!(count(ProgramKind::EquirectToCube), 6);
    assert_eq!(count(ProgramKind::Irradiance), 6);
    assert_eq!(count(ProgramKind::Prefilter), 6 * 5);
    assert_eq!(count(ProgramKind::BrdfIntegration), 1);
}

#[rstest]
#[case::mirror(0, 128, 0.0)]
#[case::quarter(1, 64, 0.25)]
#[case::half(2, 32, 0.5)]
#[case::three_quarters(3, 16, 0.75)]
#[case::rough(4, 8, 1.0)]
fn prefilter_mip_uses_its_roughness(
    mut backend: DummyBackend,
    #[case] mip: u32,
    #[case] size: u32,
    #[case] roughness: f32,
) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let prefiltered = pipeline.prefiltered_map().handle.expect("prefiltered map");
    let draws: Vec<_> = backend
        .draws()
        .filter(|d| matches!(d.target, Some((t, AttachmentTarget::CubeFace(_), m)) if t == prefiltered && m == mip))
        .collect();
    assert_eq!(draws.len(), 6);
    for draw in draws {
        let viewport = draw.viewport.expect("viewport");
        assert_eq!((viewport.width, viewport.height), (size, size));
        assert_eq!(
            draw.uniforms.get(ROUGHNESS_UNIFORM),
            Some(&UniformValue::Float(roughness))
        );
        assert_eq!(
            draw.uniforms.get(RESOLUTION_UNIFORM),
            Some(&UniformValue::Float(1024.0))
        );
    }
}

#[rstest]
fn depth_storage_follows_every_target_size(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let mut sizes: Vec<u32> = backend
        .calls()
        .iter()
        .filter_map(|call| match call {
            Call::RenderbufferStorage { width, height, .. } => {
                assert_eq!(width, height);
                Some(*width)
            }
            _ => None,
        })
        .collect();
    // Colour and depth are resized together
    sizes.dedup();
    assert_eq!(sizes, vec![1024, 32, 128, 64, 32, 16, 8, 512]);
}

#[rstest]
fn brdf_lut_ignores_the_panorama(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    let lut = pipeline.brdf_lut().handle.expect("brdf lut");
    let program = pipeline.programs().get(ProgramKind::BrdfIntegration);
    let draw = backend
        .draws()
        .find(|d| d.program == program)
        .expect("lut draw");
    assert_eq!(draw.target, Some((lut, AttachmentTarget::Texture2D, 0)));
    assert_eq!(draw.index_count, 6);
    assert!(!backend.calls().iter().any(|call| matches!(
        call,
        Call::SetTexture { program: p, .. } if *p == program
    )));
}

// ============================================================================
// Resource Lifetime
// ============================================================================

#[rstest]
fn finishing_releases_intermediates(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    assert_eq!(backend.live_framebuffers(), 0);
    assert_eq!(backend.live_renderbuffers(), 0);
    let panorama = panorama_texture(&backend).expect("panorama was uploaded");
    assert!(!backend.texture_alive(panorama));

    let outputs = [
        pipeline.environment_map(),
        pipeline.irradiance_map(),
        pipeline.prefiltered_map(),
        pipeline.brdf_lut(),
    ];
    assert_eq!(backend.live_textures(), outputs.len());
    for output in &outputs {
        let handle = output.handle.expect("output handle");
        assert!(backend.texture_alive(handle));
    }

    // Further frames neither allocate nor change the outputs
    backend.take_calls();
    drive(&mut pipeline, &mut backend, 3);
    assert!(backend.calls().is_empty());
    assert_eq!(pipeline.environment_map(), outputs[0]);
    assert_eq!(pipeline.brdf_lut(), outputs[3]);
}

#[rstest]
fn new_panorama_restarts_from_scratch(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);
    let previous = pipeline.irradiance_map().handle.expect("irradiance");

    pipeline.set_radiance_source(&mut backend, ready_radiance());
    assert_eq!(pipeline.state(), PipelineState::AwaitingRadianceTexture);
    assert!(!backend.texture_alive(previous));
    assert!(!pipeline.irradiance_map().is_available());

    run_to_completion(&mut pipeline, &mut backend);
    assert_eq!(backend.live_textures(), 4);
}

#[rstest]
fn new_panorama_clears_a_stall(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    let (sender, radiance) = deferred_radiance();
    drop(sender);
    pipeline.set_radiance_source(&mut backend, radiance);
    pipeline.update(&mut backend);
    assert!(pipeline.stalled_on().is_some());

    pipeline.set_radiance_source(&mut backend, ready_radiance());
    assert_eq!(pipeline.stalled_on(), None);
    run_to_completion(&mut pipeline, &mut backend);
}

#[rstest]
fn release_destroys_everything(mut backend: DummyBackend) {
    let mut pipeline = pipeline(&mut backend, PrecomputeConfig::default());
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    drive(&mut pipeline, &mut backend, 3);

    pipeline.release(&mut backend);
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_framebuffers(), 0);
    assert_eq!(backend.live_renderbuffers(), 0);
    assert_eq!(backend.live_programs(), 0);
    let destroyed_buffers = backend
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::DestroyBuffer(_)))
        .count();
    let created_buffers = backend
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::CreateBuffer(_)))
        .count();
    assert_eq!(destroyed_buffers, created_buffers);
}

#[rstest]
fn small_configuration_runs_the_same_stages(mut backend: DummyBackend) {
    let config = PrecomputeConfig::default()
        .with_environment_size(64)
        .with_irradiance_size(8)
        .with_prefilter(16, 3)
        .with_brdf_lut_size(32);
    let mut pipeline = pipeline(&mut backend, config);
    pipeline.set_radiance_source(&mut backend, ready_radiance());
    run_to_completion(&mut pipeline, &mut backend);

    assert_eq!(pipeline.environment_map().mip_levels, 7);
    assert_eq!(pipeline.prefiltered_map().mip_levels, 3);
    let program = pipeline.programs().get(ProgramKind::Prefilter);
    let roughness: Vec<_> = backend
        .draws()
        .filter(|d| d.program == program)
        .filter_map(|d| d.uniforms.get(ROUGHNESS_UNIFORM).copied())
        .collect();
    assert_eq!(roughness.len(), 18);
    assert_eq!(roughness[0], UniformValue::Float(0.0));
    assert_eq!(roughness[6], UniformValue::Float(0.5));
    assert_eq!(roughness[17], UniformValue::Float(1.0));
}
