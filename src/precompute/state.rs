//! Pipeline states
//!
//! Each state names the work still pending. The pipeline only moves forward through
//! [`PipelineState::successor`].

use std::fmt;

/// State of the precompute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Programs requested and geometry uploaded; no panorama assigned yet.
    PreparingResources,
    /// Waiting for the radiance panorama to decode and upload.
    AwaitingRadianceTexture,
    ConvertingToEnvironmentMap,
    CalculatingIrradianceMap,
    CalculatingPrefilterMap,
    GeneratingBRDFLookupMap,
    /// All four maps are valid.
    Finished,
}

impl PipelineState {
    /// States in pipeline order
    pub const ALL: [PipelineState; 7] = [
        PipelineState::PreparingResources,
        PipelineState::AwaitingRadianceTexture,
        PipelineState::ConvertingToEnvironmentMap,
        PipelineState::CalculatingIrradianceMap,
        PipelineState::CalculatingPrefilterMap,
        PipelineState::GeneratingBRDFLookupMap,
        PipelineState::Finished,
    ];

    /// The state entered when this one's work completes.
    ///
    /// `PreparingResources` has no successor: leaving it takes a panorama, which is a reset
    /// rather than an advance.
    pub fn successor(self) -> Option<PipelineState> {
        match self {
            PipelineState::PreparingResources => None,
            PipelineState::AwaitingRadianceTexture => Some(PipelineState::ConvertingToEnvironmentMap),
            PipelineState::ConvertingToEnvironmentMap => Some(PipelineState::CalculatingIrradianceMap),
            PipelineState::CalculatingIrradianceMap => Some(PipelineState::CalculatingPrefilterMap),
            PipelineState::CalculatingPrefilterMap => Some(PipelineState::GeneratingBRDFLookupMap),
            PipelineState::GeneratingBRDFLookupMap => Some(PipelineState::Finished),
            PipelineState::Finished => None,
        }
    }

    /// True for the states that render on the GPU
    pub fn renders(self) -> bool {
        matches!(
            self,
            PipelineState::ConvertingToEnvironmentMap
                | PipelineState::CalculatingIrradianceMap
                | PipelineState::CalculatingPrefilterMap
                | PipelineState::GeneratingBRDFLookupMap
        )
    }

    pub fn is_finished(self) -> bool {
        self == PipelineState::Finished
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::PreparingResources => "preparing resources",
            PipelineState::AwaitingRadianceTexture => "awaiting radiance texture",
            PipelineState::ConvertingToEnvironmentMap => "converting to environment map",
            PipelineState::CalculatingIrradianceMap => "calculating irradiance map",
            PipelineState::CalculatingPrefilterMap => "calculating prefilter map",
            PipelineState::GeneratingBRDFLookupMap => "generating BRDF lookup map",
            PipelineState::Finished => "finished",
        };
        f.write_str(name)
    }
}
