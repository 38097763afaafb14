use std::path::Path;

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use crate::catalog::{ParamSlot, QueryKind};
use crate::error::BenchError;

/// Curated parameter pools, loaded from an optional JSON file of the form
/// `{"mode_s": [...], "mmsi": [...], "countries": [...]}`. Any pool that is
/// absent or empty falls back to synthetic values and flips
/// `synthetic_data_used`.
#[derive(Debug, Clone, Default)]
pub struct DatasetSelector {
    mode_s: Vec<String>,
    mmsi: Vec<String>,
    countries: Vec<String>,
    synthetic_data_used: bool,
}

#[derive(Debug, Deserialize, Default)]
struct PoolFile {
    #[serde(default)]
    mode_s: Vec<String>,
    #[serde(default)]
    mmsi: Vec<String>,
    #[serde(default)]
    countries: Vec<String>,
}

const FALLBACK_COUNTRIES: &[&str] = &[
    "United States",
    "United Kingdom",
    "Germany",
    "France",
    "Netherlands",
    "Norway",
    "Denmark",
    "Greece",
    "Panama",
    "Liberia",
    "Singapore",
    "Japan",
    "South Korea",
    "China",
    "Brazil",
    "Canada",
    "Australia",
    "Spain",
    "Italy",
    "Malta",
];

const ACTIVITY_TYPES: &[&str] = &["port_call", "transit", "fishing", "anchored", "maintenance"];

impl DatasetSelector {
    pub fn synthetic() -> Self {
        Self {
            synthetic_data_used: true,
            ..Self::default()
        }
    }

    /// Loads curated pools from `path`. A missing file is downgraded to a
    /// warning and the selector runs fully synthetic.
    pub fn load(path: Option<&Path>) -> Result<Self, BenchError> {
        let Some(path) = path else {
            return Ok(Self::synthetic());
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("dataset file {} unreadable ({e}), using synthetic values", path.display());
                return Ok(Self::synthetic());
            }
        };
        let pools: PoolFile = serde_json::from_str(&raw)
            .map_err(|e| BenchError::Usage(format!("malformed dataset file {}: {e}", path.display())))?;
        let synthetic = pools.mode_s.is_empty() || pools.mmsi.is_empty() || pools.countries.is_empty();
        if synthetic {
            tracing::warn!(
                "dataset file {} has empty pools, synthetic fallback engaged where needed",
                path.display()
            );
        }
        Ok(Self {
            mode_s: pools.mode_s,
            mmsi: pools.mmsi,
            countries: pools.countries,
            synthetic_data_used: synthetic,
        })
    }

    pub fn synthetic_data_used(&self) -> bool {
        self.synthetic_data_used
    }

    /// Uniform draw from a curated pool, or a synthetic value of the pool's
    /// shape when the pool is empty. All randomness comes from the caller's
    /// RNG so that one seed fixes the whole parameter sequence.
    pub fn pick_identifier(&self, slot: ParamSlot, rng: &mut StdRng) -> String {
        match slot {
            ParamSlot::AirIdentifier => self.pick_mode_s(rng),
            ParamSlot::SeaIdentifier => self.pick_mmsi(rng),
            _ => self.pick_country(rng),
        }
    }

    pub fn pick_mode_s(&self, rng: &mut StdRng) -> String {
        match self.mode_s.is_empty() {
            true => format!("A{:05}", rng.gen_range(0..100_000u32)),
            false => self.mode_s[rng.gen_range(0..self.mode_s.len())].clone(),
        }
    }

    pub fn pick_mmsi(&self, rng: &mut StdRng) -> String {
        match self.mmsi.is_empty() {
            true => format!("{:09}", rng.gen_range(100_000_000..1_000_000_000u64)),
            false => self.mmsi[rng.gen_range(0..self.mmsi.len())].clone(),
        }
    }

    pub fn pick_country(&self, rng: &mut StdRng) -> String {
        match self.countries.is_empty() {
            true => FALLBACK_COUNTRIES[rng.gen_range(0..FALLBACK_COUNTRIES.len())].to_string(),
            false => self.countries[rng.gen_range(0..self.countries.len())].clone(),
        }
    }

    /// A semantically valid body for a write endpoint. Timestamps are drawn
    /// from the RNG, not the wall clock, to keep sequences reproducible.
    pub fn pick_write_payload(&self, kind: &QueryKind, rng: &mut StdRng) -> serde_json::Value {
        // One year of plausible activity starting 2024-01-01T00:00:00Z.
        let epoch = 1_704_067_200 + rng.gen_range(0..365 * 24 * 3600i64);
        let timestamp = chrono::DateTime::from_timestamp(epoch, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        match kind.id {
            "sighting_link" => json!({
                "mode_s": self.pick_mode_s(rng),
                "mmsi": self.pick_mmsi(rng),
                "country": self.pick_country(rng),
                "timestamp": timestamp,
            }),
            _ => json!({
                "mmsi": self.pick_mmsi(rng),
                "activity_type": ACTIVITY_TYPES[rng.gen_range(0..ACTIVITY_TYPES.len())],
                "country": self.pick_country(rng),
                "timestamp": timestamp,
                "details": { "reported_by": "benchmark", "confidence": rng.gen_range(1..=100) },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn synthetic_identifiers_have_expected_shape() {
        let selector = DatasetSelector::synthetic();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mode_s = selector.pick_mode_s(&mut rng);
            assert_eq!(mode_s.len(), 6);
            assert!(mode_s.starts_with('A'));
            assert!(mode_s[1..].chars().all(|c| c.is_ascii_digit()));

            let mmsi = selector.pick_mmsi(&mut rng);
            assert_eq!(mmsi.len(), 9);
            assert!(mmsi.chars().all(|c| c.is_ascii_digit()));
        }
        assert!(selector.synthetic_data_used());
    }

    #[test]
    fn curated_pools_are_drawn_from_verbatim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mode_s": ["A11111", "A22222"], "mmsi": ["123456789"], "countries": ["Norway"]}}"#
        )
        .unwrap();
        let selector = DatasetSelector::load(Some(file.path())).unwrap();
        assert!(!selector.synthetic_data_used());

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert!(["A11111", "A22222"].contains(&selector.pick_mode_s(&mut rng).as_str()));
            assert_eq!(selector.pick_mmsi(&mut rng), "123456789");
            assert_eq!(selector.pick_country(&mut rng), "Norway");
        }
    }

    #[test]
    fn pick_identifier_dispatches_by_slot() {
        let selector = DatasetSelector::synthetic();
        let mut rng = StdRng::seed_from_u64(3);
        let mode_s = selector.pick_identifier(ParamSlot::AirIdentifier, &mut rng);
        assert!(mode_s.starts_with('A'));
        let mmsi = selector.pick_identifier(ParamSlot::SeaIdentifier, &mut rng);
        assert_eq!(mmsi.len(), 9);
        assert!(mmsi.chars().all(|c| c.is_ascii_digit()));
        let country = selector.pick_identifier(ParamSlot::Country, &mut rng);
        assert!(!country.is_empty());
    }

    #[test]
    fn missing_file_downgrades_to_synthetic() {
        let selector = DatasetSelector::load(Some(Path::new("/nonexistent/pools.json"))).unwrap();
        assert!(selector.synthetic_data_used());
    }

    #[test]
    fn draws_are_deterministic_for_a_seed() {
        let selector = DatasetSelector::synthetic();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20).map(|_| selector.pick_mmsi(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[test]
    fn write_payloads_carry_required_fields() {
        let catalog = Catalog::standard();
        let selector = DatasetSelector::synthetic();
        let mut rng = StdRng::seed_from_u64(9);

        let log = selector.pick_write_payload(catalog.get("activity_log").unwrap(), &mut rng);
        assert!(log.get("mmsi").is_some());
        assert!(log.get("activity_type").is_some());
        assert!(log.get("timestamp").is_some());

        let link = selector.pick_write_payload(catalog.get("sighting_link").unwrap(), &mut rng);
        assert!(link.get("mode_s").is_some());
        assert!(link.get("mmsi").is_some());
    }
}
