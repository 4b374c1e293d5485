use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("File not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    /// Feed crops to the model as RGB instead of the decoder's BGR order.
    #[serde(default)]
    pub rgb_input: bool,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_min_region_size")]
    pub min_region_size: i32,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: i32,
}

fn default_min_region_size() -> i32 {
    30
}

fn default_kernel_size() -> i32 {
    5
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_region_size: default_min_region_size(),
            kernel_size: default_kernel_size(),
        }
    }
}
