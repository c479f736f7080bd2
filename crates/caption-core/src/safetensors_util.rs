use anyhow::{anyhow, Result};
use log::{debug, warn};
use memmap2::MmapOptions;
use safetensors::SafeTensors;
use std::fs::File;
use std::path::Path;
use tch::{nn, Kind, Tensor};

use crate::error::CheckpointError;

/// Copies every tensor of the safetensors file at `path` into the matching
/// variable of `vs`. Tensors the store does not know are skipped with a
/// warning. Returns the names of store variables the file did not provide.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    for (name, view) in tensors.tensors() {
        let Some(var) = variables.remove(&name) else {
            warn!("Tensor {} found in {:?} but not in model", name, path.as_ref());
            continue;
        };

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if shape != var.size() {
            return Err(CheckpointError::ShapeMismatch {
                name,
                expected: var.size(),
                found: shape,
            }
            .into());
        }

        let kind = match view.dtype() {
            safetensors::Dtype::F32 => Kind::Float,
            safetensors::Dtype::F16 => Kind::Half,
            safetensors::Dtype::BF16 => Kind::BFloat16,
            safetensors::Dtype::F64 => Kind::Double,
            _ => return Err(anyhow!("Unsupported dtype: {:?}", view.dtype())),
        };

        let tch_tensor = Tensor::from_data_size(view.data(), &shape, kind)
            .to_kind(var.kind())
            .to_device(device);

        let mut var = var;
        tch::no_grad(|| {
            var.copy_(&tch_tensor);
        });
        debug!("Loaded tensor: {}", name);
    }

    let mut missing: Vec<String> = variables.into_keys().collect();
    missing.sort();
    Ok(missing)
}

/// Writes every variable of `vs` to `path` in safetensors format.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    let named: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    Tensor::write_safetensors(&named, path.as_ref())?;
    Ok(())
}
