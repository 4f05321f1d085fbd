use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::baseline;
use crate::config::RegistrationConfig;
use crate::matching::{self, Dedup, IdentityKey, Matching};
use crate::models::*;
use crate::registration::run_bounded_registration;
use crate::size;
use crate::store::{InventoryItem, InventoryStore};

fn runtime_err<E: std::fmt::Display>(e: E) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string())
}

#[pyfunction]
#[pyo3(signature = (raw, manufacturer=None))]
fn parse_size<'py>(
    py: Python<'py>,
    raw: &str,
    manufacturer: Option<&str>,
) -> PyResult<Bound<'py, PyDict>> {
    let parsed = size::parse_size(raw, manufacturer);
    let dict = PyDict::new(py);
    dict.set_item("diameter", parsed.diameter)?;
    dict.set_item("length", parsed.length)?;
    dict.set_item("cuff", &parsed.cuff)?;
    dict.set_item("suffix", &parsed.suffix)?;
    dict.set_item("raw", &parsed.raw)?;
    dict.set_item("match_key", &parsed.match_key)?;
    dict.set_item("notation", parsed.notation.map(|n| format!("{:?}", n)))?;
    Ok(dict)
}

#[pyfunction]
#[pyo3(signature = (raw, manufacturer=None))]
fn to_canonical_size(raw: &str, manufacturer: Option<&str>) -> String {
    size::to_canonical_size(raw, manufacturer)
}

#[pyfunction]
#[pyo3(signature = (raw, manufacturer=None))]
fn get_size_match_key(raw: &str, manufacturer: Option<&str>) -> String {
    size::get_size_match_key(raw, manufacturer)
}

#[pyfunction]
fn normalize_for_matching(name: &str) -> String {
    matching::normalize_for_matching(name)
}

#[pyfunction]
fn normalize_for_deduplication(name: &str) -> String {
    matching::normalize_for_deduplication(name)
}

#[pyfunction]
fn is_same_manufacturer_alias(a: &str, b: &str) -> bool {
    matching::is_same_manufacturer_alias(a, b)
}

/// Build a `manufacturer|brand|size` key under the "matching" or "dedup" policy.
#[pyfunction]
#[pyo3(signature = (manufacturer, brand, size, policy="dedup"))]
fn build_identity_key(
    manufacturer: &str,
    brand: &str,
    size: &str,
    policy: &str,
) -> PyResult<String> {
    match policy {
        "dedup" => Ok(IdentityKey::<Dedup>::build(manufacturer, brand, size).to_string()),
        "matching" => Ok(IdentityKey::<Matching>::build(manufacturer, brand, size).to_string()),
        other => Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "Unknown policy: '{}'. Expected one of: dedup, matching",
            other
        ))),
    }
}

/// Classify every unregistered surgery entry against an inventory snapshot.
#[pyfunction]
fn analyze_candidates<'py>(
    py: Python<'py>,
    inventory: &Bound<'py, PyList>,
    surgery_rows: &Bound<'py, PyList>,
) -> PyResult<Bound<'py, PyDict>> {
    let inventory = list_to_fixtures(inventory)?;
    let rows = list_to_surgery_records(surgery_rows)?;
    let analysis = baseline::analyze_candidates(&rows, &inventory);

    let candidates = PyList::empty(py);
    for candidate in &analysis.candidates {
        candidates.append(candidate_to_dict(py, candidate)?)?;
    }

    let summary = PyDict::new(py);
    summary.set_item("total", analysis.summary.total)?;
    summary.set_item("registrable", analysis.summary.registrable)?;
    let blocked = PyDict::new(py);
    for (code, count) in &analysis.summary.blocked {
        blocked.set_item(code, count)?;
    }
    summary.set_item("blocked", blocked)?;

    let dict = PyDict::new(py);
    dict.set_item("candidates", candidates)?;
    dict.set_item("summary", summary)?;
    Ok(dict)
}

/// Python-facing wrapper for InventoryStore
#[pyclass(name = "InventoryStore")]
struct PyInventoryStore {
    inner: Arc<InventoryStore>,
}

#[pymethods]
impl PyInventoryStore {
    #[new]
    #[pyo3(signature = (path=None))]
    fn new(path: Option<&str>) -> PyResult<Self> {
        let inner = match path {
            Some(p) => InventoryStore::persistent(p),
            None => InventoryStore::in_memory(),
        };
        inner
            .map(|store| PyInventoryStore {
                inner: Arc::new(store),
            })
            .map_err(runtime_err)
    }

    /// Add one item. Returns its id.
    fn add_item(&self, item_dict: &Bound<'_, PyDict>) -> PyResult<String> {
        let fixture = dict_to_fixture(item_dict)?;
        self.inner
            .add_item(&fixture)
            .map(|item| item.id)
            .map_err(runtime_err)
    }

    fn count(&self) -> PyResult<usize> {
        self.inner.count().map_err(runtime_err)
    }

    fn items(&self, py: Python) -> PyResult<Py<PyAny>> {
        let items = self.inner.list_items().map_err(runtime_err)?;
        let list = PyList::empty(py);
        for item in &items {
            list.append(item_to_dict(py, item)?)?;
        }
        Ok(list.into())
    }

    /// Register fixtures with a bounded worker pool, each with its
    /// exchange-category pair. Returns a report dict.
    #[pyo3(signature = (fixtures, concurrency=6))]
    fn register_candidates(
        &self,
        py: Python,
        fixtures: &Bound<'_, PyList>,
        concurrency: usize,
    ) -> PyResult<Py<PyAny>> {
        let queue = list_to_fixtures(fixtures)?;
        let inventory = self.inner.records().map_err(runtime_err)?;
        let config = RegistrationConfig::default().with_concurrency(concurrency);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.concurrency)
            .build()
            .map_err(runtime_err)?;
        let report = runtime.block_on(run_bounded_registration(
            queue,
            &inventory,
            Arc::clone(&self.inner),
            config,
            |_, _| {},
        ));

        let dict = PyDict::new(py);
        dict.set_item("total", report.total)?;
        dict.set_item("processed", report.processed)?;
        dict.set_item("skipped", report.skipped)?;

        let inserted = PyList::empty(py);
        for fixture in &report.inserted {
            inserted.append(fixture_to_dict(py, fixture)?)?;
        }
        dict.set_item("inserted", inserted)?;

        let failed = PyList::empty(py);
        for (fixture, error) in &report.failed {
            let d = fixture_to_dict(py, fixture)?;
            d.set_item("error", error)?;
            failed.append(d)?;
        }
        dict.set_item("failed", failed)?;

        Ok(dict.into())
    }
}

// ── Conversion helpers ──────────────────────────────────────────────

fn required_str(dict: &Bound<'_, PyDict>, key: &str) -> PyResult<String> {
    dict.get_item(key)?
        .ok_or_else(|| PyErr::new::<pyo3::exceptions::PyKeyError, _>(key.to_string()))?
        .extract()
}

fn dict_to_fixture(dict: &Bound<'_, PyDict>) -> PyResult<FixtureRecord> {
    Ok(FixtureRecord::new(
        &required_str(dict, "manufacturer")?,
        &required_str(dict, "brand")?,
        &required_str(dict, "size")?,
    ))
}

fn list_to_fixtures(list: &Bound<'_, PyList>) -> PyResult<Vec<FixtureRecord>> {
    let mut fixtures = Vec::new();
    for item in list.iter() {
        let dict: &Bound<'_, PyDict> = item.cast()?;
        fixtures.push(dict_to_fixture(dict)?);
    }
    Ok(fixtures)
}

fn list_to_surgery_records(list: &Bound<'_, PyList>) -> PyResult<Vec<SurgeryRecord>> {
    let mut rows = Vec::new();
    for item in list.iter() {
        let dict: &Bound<'_, PyDict> = item.cast()?;
        let fixture = dict_to_fixture(dict)?;

        let source = match dict.get_item("source")? {
            Some(value) => match value.extract::<String>()?.as_str() {
                "list" | "list_selected" => EntrySource::ListSelected,
                "free_text" | "manual" => EntrySource::FreeText,
                other => {
                    return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                        "Unknown entry source: '{}'. Expected one of: list, free_text",
                        other
                    )));
                }
            },
            None => EntrySource::ListSelected,
        };

        let mut row =
            SurgeryRecord::new(&fixture.manufacturer, &fixture.brand, &fixture.size, source);
        if let Some(quantity) = dict.get_item("quantity")? {
            row = row.with_quantity(quantity.extract()?);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn fixture_to_dict<'py>(
    py: Python<'py>,
    fixture: &FixtureRecord,
) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("manufacturer", &fixture.manufacturer)?;
    dict.set_item("brand", &fixture.brand)?;
    dict.set_item("size", &fixture.size)?;
    Ok(dict)
}

fn item_to_dict<'py>(py: Python<'py>, item: &InventoryItem) -> PyResult<Bound<'py, PyDict>> {
    let dict = fixture_to_dict(py, &item.fixture)?;
    dict.set_item("id", &item.id)?;
    dict.set_item("dedup_key", &item.dedup_key)?;
    dict.set_item("stock", item.stock)?;
    dict.set_item("registered_at", item.registered_at.to_rfc3339())?;
    Ok(dict)
}

fn candidate_to_dict<'py>(
    py: Python<'py>,
    candidate: &UnregisteredCandidate,
) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("manufacturer", &candidate.manufacturer)?;
    dict.set_item("brand", &candidate.brand)?;
    dict.set_item("size", &candidate.size)?;
    dict.set_item("usage_count", candidate.usage_count)?;
    dict.set_item("reason", candidate.reason.as_str())?;
    dict.set_item("canonical_manufacturer", &candidate.canonical_manufacturer)?;
    dict.set_item("canonical_size", &candidate.canonical_size)?;
    dict.set_item("pattern", candidate.pattern.name())?;
    dict.set_item(
        "baseline_pattern",
        candidate.baseline.as_ref().map(|b| b.dominant_pattern.name()),
    )?;
    dict.set_item("baseline_pattern_label", candidate.baseline_pattern_label())?;
    dict.set_item("is_duplicate", candidate.is_duplicate)?;
    dict.set_item("can_register", candidate.can_register())?;
    dict.set_item("block_reason", candidate.block_reason.as_ref().map(|r| r.code()))?;
    dict.set_item(
        "block_message",
        candidate.block_reason.as_ref().map(|r| r.to_string()),
    )?;
    Ok(dict)
}

/// Python module definition
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(parse_size, m)?)?;
    m.add_function(wrap_pyfunction!(to_canonical_size, m)?)?;
    m.add_function(wrap_pyfunction!(get_size_match_key, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_for_matching, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_for_deduplication, m)?)?;
    m.add_function(wrap_pyfunction!(is_same_manufacturer_alias, m)?)?;
    m.add_function(wrap_pyfunction!(build_identity_key, m)?)?;
    m.add_function(wrap_pyfunction!(analyze_candidates, m)?)?;
    m.add_class::<PyInventoryStore>()?;
    Ok(())
}
