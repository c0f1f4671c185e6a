//! The set of airports exit geometry is known for.
//!
//! The built-in airports are always present; a TOML catalog file can add
//! airports or replace a built-in one by reusing its code:
//!
//! ```toml
//! [[airports]]
//! code = "TST"
//! runway_count = 1
//! center = { lon = 0.0, lat = 0.0 }
//! proximity_tolerance = 0.1
//! plot_bounds = { lon_min = -0.01, lon_max = 0.01, lat_min = -0.01, lat_max = 0.01 }
//! exit_regions = [
//!     { label = "A", lon_min = 0.001, lon_max = 0.002, lat_min = 0.001, lat_max = 0.002 },
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::{builtin_specs, AirportGeometry, AirportSpec};

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    airports: Vec<AirportSpec>,
}

/// Validated airport geometries keyed by code.
#[derive(Debug, Clone, Default)]
pub struct AirportCatalog {
    airports: BTreeMap<String, Arc<AirportGeometry>>,
}

impl AirportCatalog {
    /// Build a catalog from specs; later specs replace earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGeometry`] for the first spec that fails
    /// validation.
    pub fn from_specs(specs: impl IntoIterator<Item = AirportSpec>) -> Result<Self> {
        let mut airports = BTreeMap::new();
        for spec in specs {
            let geometry = AirportGeometry::from_spec(spec)?;
            debug!(
                airport = geometry.code(),
                exits = geometry.exit_regions().len(),
                "Loaded airport geometry"
            );
            airports.insert(geometry.code().to_string(), Arc::new(geometry));
        }
        Ok(Self { airports })
    }

    /// The airports compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in spec fails validation.
    pub fn builtin() -> Result<Self> {
        Self::from_specs(builtin_specs())
    }

    /// The built-in airports, extended by a catalog file if one is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// contains an invalid airport.
    pub fn load(catalog_path: Option<&Path>) -> Result<Self> {
        let Some(path) = catalog_path else {
            return Self::builtin();
        };
        if !path.is_file() {
            return Err(Error::ConfigValidation {
                message: format!("airport catalog not found: {}", path.display()),
            });
        }

        let file: CatalogFile = Figment::from(Toml::file(path)).extract()?;
        info!(
            "Loaded {} airports from {}",
            file.airports.len(),
            path.display()
        );
        Self::from_specs(builtin_specs().into_iter().chain(file.airports))
    }

    /// Look up an airport, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAirport`] if no geometry exists for the code.
    pub fn get(&self, code: &str) -> Result<Arc<AirportGeometry>> {
        self.airports
            .get(&code.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnknownAirport(code.to_string()))
    }

    /// All airports, ordered by code.
    pub fn iter(&self) -> impl Iterator<Item = &AirportGeometry> {
        self.airports.values().map(AsRef::as_ref)
    }

    /// Number of airports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.airports.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.airports.is_empty()
    }
}
