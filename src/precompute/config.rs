//! Sizes and sample counts of the precomputed maps

use std::path::PathBuf;

use crate::backend::types::TextureDescriptor;
use crate::precompute::error::{PrecomputeError, PrecomputeResult};

/// Configuration for the precompute pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputeConfig {
    /// Face size of the environment cubemap rendered from the panorama
    pub environment_size: u32,
    /// Face size of the diffuse irradiance cubemap
    pub irradiance_size: u32,
    /// Face size of mip 0 of the specular prefilter cubemap
    pub prefilter_size: u32,
    /// Prefilter mips, one roughness step each
    pub prefilter_mip_levels: u32,
    /// Side of the square BRDF lookup texture
    pub brdf_lut_size: u32,
    /// Angular step in radians of the irradiance convolution grid
    pub irradiance_sample_delta: f32,
    pub prefilter_sample_count: u32,
    pub brdf_sample_count: u32,
    /// Directory of `<program>.wgsl` bodies loaded at startup instead of the built-in ones
    pub shader_dir: Option<PathBuf>,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            environment_size: 1024,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_lut_size: 512,
            irradiance_sample_delta: 0.025,
            prefilter_sample_count: 1024,
            brdf_sample_count: 1024,
            shader_dir: None,
        }
    }
}

impl PrecomputeConfig {
    pub fn with_environment_size(mut self, size: u32) -> Self {
        self.environment_size = size;
        self
    }

    pub fn with_irradiance_size(mut self, size: u32) -> Self {
        self.irradiance_size = size;
        self
    }

    pub fn with_prefilter(mut self, size: u32, mip_levels: u32) -> Self {
        self.prefilter_size = size;
        self.prefilter_mip_levels = mip_levels;
        self
    }

    pub fn with_brdf_lut_size(mut self, size: u32) -> Self {
        self.brdf_lut_size = size;
        self
    }

    pub fn with_irradiance_sample_delta(mut self, delta: f32) -> Self {
        self.irradiance_sample_delta = delta;
        self
    }

    pub fn with_sample_counts(mut self, prefilter: u32, brdf: u32) -> Self {
        self.prefilter_sample_count = prefilter;
        self.brdf_sample_count = brdf;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    /// Mips of the environment cubemap, down to 1x1
    pub fn environment_mip_levels(&self) -> u32 {
        TextureDescriptor::full_mip_chain(self.environment_size)
    }

    /// Largest render target any stage allocates
    pub fn largest_target(&self) -> u32 {
        self.environment_size
            .max(self.irradiance_size)
            .max(self.prefilter_size)
            .max(self.brdf_lut_size)
    }

    pub fn validate(&self) -> PrecomputeResult<()> {
        let sizes = [
            ("environment_size", self.environment_size),
            ("irradiance_size", self.irradiance_size),
            ("prefilter_size", self.prefilter_size),
            ("brdf_lut_size", self.brdf_lut_size),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(PrecomputeError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        if !self.prefilter_size.is_power_of_two() {
            return Err(PrecomputeError::InvalidConfig(format!(
                "prefilter_size {} is not a power of two",
                self.prefilter_size
            )));
        }
        if self.prefilter_mip_levels < 2 {
            return Err(PrecomputeError::InvalidConfig(
                "prefilter_mip_levels must be at least 2 to span roughness 0..1".into(),
            ));
        }
        if self.prefilter_mip_levels > TextureDescriptor::full_mip_chain(self.prefilter_size) {
            return Err(PrecomputeError::InvalidConfig(format!(
                "{} prefilter mips do not fit a {} texel face",
                self.prefilter_mip_levels, self.prefilter_size
            )));
        }
        if !(self.irradiance_sample_delta > 0.0) {
            return Err(PrecomputeError::InvalidConfig(
                "irradiance_sample_delta must be positive".into(),
            ));
        }
        if self.prefilter_sample_count == 0 || self.brdf_sample_count == 0 {
            return Err(PrecomputeError::InvalidConfig(
                "sample counts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = PrecomputeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.environment_mip_levels(), 11);
        assert_eq!(config.largest_target(), 1024);
    }

    #[rstest]
    #[case::zero_size(PrecomputeConfig::default().with_irradiance_size(0))]
    #[case::odd_prefilter(PrecomputeConfig::default().with_prefilter(96, 5))]
    #[case::single_mip(PrecomputeConfig::default().with_prefilter(128, 1))]
    #[case::mips_below_one_texel(PrecomputeConfig::default().with_prefilter(8, 5))]
    #[case::zero_delta(PrecomputeConfig::default().with_irradiance_sample_delta(0.0))]
    #[case::nan_delta(PrecomputeConfig::default().with_irradiance_sample_delta(f32::NAN))]
    #[case::no_samples(PrecomputeConfig::default().with_sample_counts(0, 1024))]
    fn rejects_invalid(#[case] config: PrecomputeConfig) {
        assert!(matches!(
            config.validate(),
            Err(PrecomputeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn smallest_valid_prefilter_chain() {
        let config = PrecomputeConfig::default().with_prefilter(16, 5);
        assert!(config.validate().is_ok());
    }
}
