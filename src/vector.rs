//! Vector collaborator supplying cutline polygons.

use std::collections::HashMap;

use crate::cutline::Cutline;
use crate::error::WarpError;

pub trait VectorSource {
    /// Load the polygons of `layer` (or the only layer) from `datasource`.
    fn load_layer(&self, datasource: &str, layer: Option<&str>) -> Result<Cutline, WarpError>;
}

/// Cutlines registered in memory, keyed by datasource and layer name.
#[derive(Default)]
pub struct MemoryVectorSource {
    layers: HashMap<String, Vec<(String, Cutline)>>,
}

impl MemoryVectorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, datasource: &str, layer: &str, cutline: Cutline) {
        self.layers
            .entry(datasource.to_string())
            .or_default()
            .push((layer.to_string(), cutline));
    }
}

impl VectorSource for MemoryVectorSource {
    fn load_layer(&self, datasource: &str, layer: Option<&str>) -> Result<Cutline, WarpError> {
        let layers = self
            .layers
            .get(datasource)
            .ok_or_else(|| WarpError::Io(format!("{datasource}: no such datasource")))?;
        match layer {
            Some(name) => layers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| WarpError::Io(format!("{datasource}: no layer named {name}"))),
            None => match layers.as_slice() {
                [(_, c)] => Ok(c.clone()),
                _ => Err(WarpError::Configuration(format!(
                    "{datasource} has {} layers, name one",
                    layers.len()
                ))),
            },
        }
    }
}
