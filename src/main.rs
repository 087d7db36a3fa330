use mmvt_rs::testsystems::{Potential, SmoluchowskiSystem};
use mmvt_rs::*;

fn main() -> Result<()> {
    env_logger::init();

    let system = SmoluchowskiSystem::builder()
        .potential(Potential::Coulomb { q1q2: -8.0 })
        .build()?;
    let model = system.model()?;

    let dir = std::env::temp_dir().join("mmvt-rs-demo");
    std::fs::create_dir_all(&dir).map_err(|source| AnalysisError::Io {
        path: dir.clone(),
        source,
    })?;
    let options = AnalysisOptions::builder()
        .num_error_samples(100)
        .seed(2022)
        .build()?;
    let mut analysis = Analysis::new(&model, options)?;
    for anchor in model.anchors.iter().filter(|a| !a.bulkstate) {
        let path = dir.join(format!("anchor{}.out", anchor.index));
        system.write_mmvt_log(anchor.index, &path, 100_000, 1e-3, anchor.index as u64)?;
        analysis.read_output_files(anchor.index, LogFormat::OpenMm, &[path])?;
    }
    analysis.set_bd_statistics(0, system.bd_statistics()?);
    analysis.process_main_sample()?;
    analysis.estimate_errors()?;

    println!("{}", serde_json::to_string_pretty(&analysis.results()?)?);
    println!(
        "exact MFPT = {}, exact k_on = {}",
        system.analytical_mfpt(),
        system.analytical_k_on()?
    );
    Ok(())
}
