use vctk_resnet::TrainConfig;

fn main() {
    env_logger::init();
    let config = match std::env::args().nth(1) {
        Some(path) => TrainConfig::from_path(&path),
        None => Ok(TrainConfig::default()),
    };
    if let Err(e) = config.and_then(|config| vctk_resnet::run(&config)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
