use std::path::PathBuf;

use vctk_resnet::preprocess::preprocess;
use vctk_resnet::FeatureConfig;

const USAGE: &str = "usage: vctk-preprocess <manifest> <output.npz> [features.toml]";

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (manifest, output) = match (args.first(), args.get(1)) {
        (Some(m), Some(o)) => (PathBuf::from(m), PathBuf::from(o)),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    let config = match args.get(2) {
        Some(path) => FeatureConfig::from_path(path),
        None => Ok(FeatureConfig::default()),
    };
    match config.and_then(|config| preprocess(&manifest, &output, &config)) {
        Ok(corpus) => println!(
            "Wrote {} samples for {} speakers to {}",
            corpus.samples.len(),
            corpus.speakers.len(),
            output.display()
        ),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
