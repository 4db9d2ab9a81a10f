use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{LINES, POIS, PROPOSALS, VEHICLES};
use crate::queries::_structs::{Line, Poi, RouteProposal, Vehicle};

/// Colecciones cargadas, indexadas por id de documento.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub lines: BTreeMap<String, Line>,
    pub vehicles: BTreeMap<String, Vehicle>,
    pub pois: BTreeMap<String, Poi>,
    pub proposals: BTreeMap<String, RouteProposal>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Carga un volcado JSON de las colecciones del almacén.
///
/// Formato: un objeto con las claves `Lineas`, `Vehiculos`,
/// `Ubicaciones_POI` y `PropuestasRuta`; cada una es un objeto
/// `{ id: documento }`. Los documentos que no se pueden interpretar se
/// registran y se omiten.
pub struct DataLoader {
    data_file: PathBuf,
}

impl DataLoader {
    pub fn new<P: AsRef<Path>>(data_file: P) -> Self {
        Self {
            data_file: data_file.as_ref().to_path_buf(),
        }
    }

    /// Carga todas las colecciones
    pub fn load_all(&self) -> Result<Collections, LoaderError> {
        info!("Loading {}", self.data_file.display());

        let file = File::open(&self.data_file)?;
        let root: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            error!("Failed to parse {}: {}", self.data_file.display(), e);
            LoaderError::Json(e)
        })?;

        Self::from_value(root)
    }

    pub fn from_value(root: Value) -> Result<Collections, LoaderError> {
        let Value::Object(mut root) = root else {
            return Err(LoaderError::InvalidData(
                "top-level value must be an object of collections".to_string(),
            ));
        };

        let collections = Collections {
            lines: load_collection(&mut root, LINES),
            vehicles: load_collection(&mut root, VEHICLES),
            pois: load_collection(&mut root, POIS),
            proposals: load_collection(&mut root, PROPOSALS),
        };

        info!(
            "Loaded {} lines, {} vehicles, {} POIs and {} proposals",
            collections.lines.len(),
            collections.vehicles.len(),
            collections.pois.len(),
            collections.proposals.len()
        );
        Ok(collections)
    }
}

fn load_collection<T: DeserializeOwned>(
    root: &mut Map<String, Value>,
    name: &str,
) -> BTreeMap<String, T> {
    let documents = match root.remove(name) {
        Some(Value::Object(documents)) => documents,
        Some(_) => {
            warn!("Collection {} is not an object, ignored", name);
            return BTreeMap::new();
        }
        None => {
            debug!("Collection {} not present", name);
            return BTreeMap::new();
        }
    };

    documents
        .into_iter()
        .filter_map(|(id, mut document)| {
            if let Value::Object(fields) = &mut document {
                fields.insert("id".to_string(), Value::String(id.clone()));
            }
            match serde_json::from_value::<T>(document) {
                Ok(parsed) => Some((id, parsed)),
                Err(e) => {
                    warn!("Skipping malformed document {}/{}: {}", name, id, e);
                    None
                }
            }
        })
        .collect()
}
