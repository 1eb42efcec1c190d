use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::data::ReferenceData;
use super::engine::{RunState, Simulation};
use super::error::Result;

/// Storage for the whole-run snapshot. The snapshot is opaque to the store.
pub trait RunStore {
    fn load(&self) -> Result<Option<RunState>>;
    fn save(&mut self, state: &RunState) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunStore for JsonFileStore {
    fn load(&self) -> Result<Option<RunState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &RunState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, data)?;
        tracing::debug!(path = %self.path.display(), year = state.year, "run saved");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the serialized blob in memory. Goes through JSON so it behaves like
/// the file store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blob: Option<String>,
}

impl RunStore for MemoryStore {
    fn load(&self) -> Result<Option<RunState>> {
        self.blob
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(Into::into)
    }

    fn save(&mut self, state: &RunState) -> Result<()> {
        self.blob = Some(serde_json::to_string(state)?);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.blob = None;
        Ok(())
    }
}

impl Simulation {
    pub fn save_to(&self, store: &mut impl RunStore) -> Result<()> {
        store.save(self.state())
    }

    pub fn load_from(data: ReferenceData, store: &impl RunStore) -> Result<Option<Self>> {
        match store.load()? {
            Some(state) => Simulation::restore(data, state).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimConfig;
    use crate::core::error::SimError;
    use crate::core::types::{BASE_RATE_BOUNDS, CAP_RATE_BOUNDS, LIQUIDITY_BOUNDS, VACANCY_BOUNDS};

    fn new_run(seed: u32) -> Simulation {
        Simulation::with_seed(
            ReferenceData::bundled().expect("bundled data"),
            SimConfig::default(),
            seed,
        )
        .expect("run created")
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("estate-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let path = temp_path("round_trip.json");
        let mut store = JsonFileStore::new(&path);
        let _ = store.clear();
        assert!(store.load().expect("load").is_none());

        let mut sim = new_run(5);
        sim.advance_year().expect("advance");
        sim.save_to(&mut store).expect("save");

        let resumed = Simulation::load_from(sim.data().clone(), &store)
            .expect("load")
            .expect("stored run");
        assert_eq!(resumed.state(), sim.state());

        store.clear().expect("clear");
        assert!(!path.exists());
        store.clear().expect("clearing twice is fine");
    }

    #[test]
    fn resumed_run_continues_identically() {
        let mut store = MemoryStore::default();
        let mut original = new_run(99);
        original.advance_year().expect("advance");
        original.save_to(&mut store).expect("save");

        let mut resumed = Simulation::load_from(original.data().clone(), &store)
            .expect("load")
            .expect("stored run");
        for _ in 0..3 {
            original.advance_year().expect("advance original");
            resumed.advance_year().expect("advance resumed");
        }
        assert_eq!(original.state(), resumed.state());
    }

    #[test]
    fn older_snapshot_without_optional_fields_is_backfilled() {
        let mut sim = new_run(17);
        let listing_id = sim.listings()[0].id;
        sim.state.cash = 1e9;
        sim.buy(listing_id).expect("buy");

        let mut blob = serde_json::to_value(sim.state()).expect("serialize");
        for key in ["listings", "pendingEvent", "config"] {
            blob.as_object_mut().expect("object").remove(key);
        }
        let property = &mut blob["properties"][0];
        let property = property.as_object_mut().expect("property object");
        property.remove("lease");
        property.remove("renoLevel");
        property["loan"]
            .as_object_mut()
            .expect("loan object")
            .remove("maturityYear");

        let state: RunState = serde_json::from_value(blob).expect("tolerant load");
        let restored = Simulation::restore(sim.data().clone(), state).expect("restore");
        let p = &restored.state().properties[0];
        assert_eq!(p.reno_level, 0);
        assert!(p.lease.is_some());
        assert!(p.loan.maturity_year.is_some());
        assert!(restored.listings().is_empty());
    }

    #[test]
    fn restored_snapshot_is_pulled_back_into_bounds() {
        let sim = new_run(23);
        let mut state = sim.state().clone();
        state.market.base_rate = 0.9;
        state.market.liquidity = -3.0;
        state.neighborhoods[0].vacancy = 0.9;
        state.neighborhoods[1].cap_rate = 0.0;

        let restored = Simulation::restore(sim.data().clone(), state).expect("restore");
        let s = restored.state();
        assert_eq!(s.market.base_rate, BASE_RATE_BOUNDS.1);
        assert_eq!(s.market.liquidity, LIQUIDITY_BOUNDS.0);
        assert_eq!(s.neighborhoods[0].vacancy, VACANCY_BOUNDS.1);
        assert_eq!(s.neighborhoods[1].cap_rate, CAP_RATE_BOUNDS.0);
        assert!(restored.portfolio().is_ok());
    }

    #[test]
    fn snapshot_without_neighborhoods_or_zoning_is_rejected() {
        let sim = new_run(29);

        let mut empty = sim.state().clone();
        empty.neighborhoods.clear();
        let err = Simulation::restore(sim.data().clone(), empty).expect_err("no neighborhoods");
        assert!(matches!(err, SimError::InvalidReferenceData(_)));

        let mut unzoned = sim.state().clone();
        unzoned.neighborhoods[2].zoning.clear();
        let err = Simulation::restore(sim.data().clone(), unzoned).expect_err("no zoning");
        assert!(matches!(err, SimError::InvalidReferenceData(_)));
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let path = temp_path("corrupt.json");
        let mut store = JsonFileStore::new(&path);
        store.clear().expect("clear");
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, "{ not json").expect("write");
        let err = store.load().expect_err("corrupt snapshot");
        assert!(matches!(err, SimError::Json(_)));
        store.clear().expect("clear");
    }
}
