use crate::analysis::{analyze, AnalysisOptions};
use crate::errors::AnalysisError;
use crate::logs::LogFormat;
use crate::model::Model;
use crate::sample::Observables;
use numpy::PyArray;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;
use std::collections::BTreeMap;
use std::path::PathBuf;

impl From<AnalysisError> for PyErr {
    fn from(err: AnalysisError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn observables_dict<'py>(py: Python<'py>, observables: &Observables) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("p_i", PyArray::from_slice(py, &observables.p_i))?;
    dict.set_item(
        "free_energy_profile",
        PyArray::from_slice(py, &observables.free_energy_profile),
    )?;
    let mfpts: Vec<(String, String, f64)> = observables
        .mfpts
        .iter()
        .map(|(key, &time)| (format!("{:?}", key.src), format!("{:?}", key.dst), time))
        .collect();
    dict.set_item("mfpts", mfpts)?;
    dict.set_item("k_off", observables.k_off)?;
    dict.set_item("k_ons", observables.k_ons.clone())?;
    Ok(dict)
}

/// Analyse the OpenMM logs of a model given as JSON
///
/// `output_files` maps anchor indices to their log files in chronological order. Returns a dict
/// of the observables, with their errors under `"errors"` when `num_error_samples > 0`.
#[pyfunction]
fn analyze_openmm(
    py: Python<'_>,
    model_json: &str,
    output_files: BTreeMap<usize, Vec<String>>,
    num_error_samples: usize,
    seed: Option<u64>,
) -> PyResult<PyObject> {
    let model = Model::from_json_str(model_json)?;
    let output_files: BTreeMap<usize, Vec<PathBuf>> = output_files
        .into_iter()
        .map(|(alpha, files)| (alpha, files.into_iter().map(PathBuf::from).collect()))
        .collect();

    let mut options = AnalysisOptions::builder();
    options.num_error_samples(num_error_samples);
    if let Some(seed) = seed {
        options.seed(seed);
    }
    let options = options.build()?;

    let analysis = analyze(&model, &output_files, LogFormat::OpenMm, options)?;
    let results = analysis.results()?;

    let dict = observables_dict(py, &results.observables)?;
    if let Some(errors) = &results.errors {
        dict.set_item("errors", observables_dict(py, errors)?)?;
    }
    Ok(dict.to_object(py))
}

#[pymodule]
fn mmvt_rs(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_wrapped(wrap_pyfunction!(analyze_openmm))?;
    Ok(())
}
