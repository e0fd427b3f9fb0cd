//! Execution and file-based configuration.
//!
//! `ExecutionConfig` is what the model executor needs (where to run, at what
//! precision). `Settings` is the full TOML document the binaries read:
//!
//! ```toml
//! [model]
//! vocab_size = 64
//! n_layers = 2
//!
//! [execution]
//! device = "cpu"
//! precision = "f16"
//!
//! [generation]
//! max_new_tokens = 50
//! template = "chatml"
//! eos_token = "<|im_end|>"
//!
//! [provision]
//! checkpoint = "model.blz"
//! vocab = "vocab.txt"
//! seed = 42
//!
//! [journal]
//! path = "generations.db"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use half::{bf16, f16};
use ndarray::{ArrayBase, DataMut, Dimension};
use serde::Deserialize;

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::model::ModelArgs;
use crate::template::TemplateKind;

/// File looked up in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "blazeinfer.toml";

/// Where the model computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Device {
    /// Host CPU; always available.
    #[default]
    Cpu,
    /// A numbered accelerator.
    Accelerator(u32),
    /// Use an accelerator when one is available, otherwise the CPU.
    Auto,
}

impl Device {
    /// Resolve `Auto` to a concrete device. Only the CPU backend is built in.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::Cpu,
            other => other,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self.resolve(), Self::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(id) => write!(f, "accelerator:{id}"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => return Ok(Self::Cpu),
            "auto" => return Ok(Self::Auto),
            "accelerator" | "cuda" | "gpu" => return Ok(Self::Accelerator(0)),
            _ => {}
        }
        let id = lower
            .strip_prefix("accelerator:")
            .or_else(|| lower.strip_prefix("cuda:"))
            .or_else(|| lower.strip_prefix("gpu:"))
            .ok_or_else(|| format!("unknown device '{s}' (expected cpu, auto or accelerator:<id>)"))?;
        id.parse()
            .map(Self::Accelerator)
            .map_err(|_| format!("invalid accelerator id in '{s}'"))
    }
}

impl TryFrom<String> for Device {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Floating point width used for parameters and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F16,
    Bf16,
    F32,
}

impl Precision {
    pub fn bits(self) -> u32 {
        match self {
            Self::F16 | Self::Bf16 => 16,
            Self::F32 => 32,
        }
    }

    /// Round a single value to this precision.
    pub fn round(self, v: f32) -> f32 {
        match self {
            Self::F16 => f16::from_f32(v).to_f32(),
            Self::Bf16 => bf16::from_f32(v).to_f32(),
            Self::F32 => v,
        }
    }

    /// Round every element in place.
    pub fn round_in_place<S, D>(self, a: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        if self != Self::F32 {
            a.mapv_inplace(|v| self.round(v));
        }
    }

    pub(crate) fn tag(self) -> u32 {
        match self {
            Self::F16 => 0,
            Self::Bf16 => 1,
            Self::F32 => 2,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::F16),
            1 => Some(Self::Bf16),
            2 => Some(Self::F32),
            _ => None,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F16 => "f16",
            Self::Bf16 => "bf16",
            Self::F32 => "f32",
        };
        f.write_str(name)
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "f32" | "float32" => Ok(Self::F32),
            other => Err(format!("unknown precision '{other}' (expected f16, bf16 or f32)")),
        }
    }
}

/// Compute location and numeric precision, kept apart from weight loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub device: Device,
    pub precision: Precision,
}

impl ExecutionConfig {
    pub fn new(device: Device, precision: Precision) -> Self {
        Self { device, precision }
    }

    pub fn cpu(precision: Precision) -> Self {
        Self::new(Device::Cpu, precision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub template: TemplateKind,
    pub eos_token: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            template: TemplateKind::ChatMl,
            eos_token: crate::template::IM_END.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    /// Checkpoint written by `convert`. Without one the model is seeded at random.
    pub checkpoint: Option<PathBuf>,
    /// One token per line. Without one the built-in vocabulary is used.
    pub vocab: Option<PathBuf>,
    pub seed: u64,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            checkpoint: None,
            vocab: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub path: Option<PathBuf>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelArgs,
    pub execution: ExecutionConfig,
    pub generation: GenerationSettings,
    pub provision: ProvisionSettings,
    pub journal: JournalSettings,
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from a specific file.
    pub fn from_path(path: &Path) -> ProvisioningResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ProvisioningError::io(path, e))?;
        Self::from_toml_str(&contents).map_err(|source| ProvisioningError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Explicit path if given, else `./blazeinfer.toml` if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> ProvisioningResult<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            log::info!("Loading settings from {}", local.display());
            return Self::from_path(local);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("AUTO".parse::<Device>().unwrap(), Device::Auto);
        assert_eq!("accelerator:3".parse::<Device>().unwrap(), Device::Accelerator(3));
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Accelerator(0));
        assert!("tpu".parse::<Device>().is_err());
        assert!("accelerator:x".parse::<Device>().is_err());
    }

    #[test]
    fn auto_resolves_to_cpu() {
        assert_eq!(Device::Auto.resolve(), Device::Cpu);
        assert!(Device::Auto.is_available());
        assert!(!Device::Accelerator(0).is_available());
    }

    #[test]
    fn precision_rounding() {
        let v = 0.1_f32;
        assert_eq!(Precision::F32.round(v), v);
        assert_ne!(Precision::F16.round(v), v);
        assert!((Precision::F16.round(v) - v).abs() < 1e-3);
        assert!((Precision::Bf16.round(v) - v).abs() < 1e-2);
        assert_eq!(Precision::F16.bits(), 16);
    }

    #[test]
    fn settings_from_toml() {
        let settings = Settings::from_toml_str(
            r#"
            [model]
            vocab_size = 10
            dim = 8

            [execution]
            device = "accelerator:1"
            precision = "bf16"

            [generation]
            max_new_tokens = 7
            template = "plain"
            "#,
        )
        .unwrap();
        assert_eq!(settings.model.vocab_size, 10);
        assert_eq!(settings.model.dim, 8);
        assert_eq!(settings.model.n_layers, ModelArgs::default().n_layers);
        assert_eq!(settings.execution.device, Device::Accelerator(1));
        assert_eq!(settings.execution.precision, Precision::Bf16);
        assert_eq!(settings.generation.max_new_tokens, 7);
        assert_eq!(settings.generation.template, TemplateKind::Plain);
        assert_eq!(settings.generation.eos_token, crate::template::IM_END);
        assert_eq!(settings.provision.seed, 42);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }
}
