/// Generate a default node configuration file.
///
/// Usage:
///   cargo run --bin config_gen [output_file]
///
/// Examples:
///   cargo run --bin config_gen                    # writes config.default.json
///   cargo run --bin config_gen config.json        # writes config.json

use btclib::config::NodeConfig;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let output_file = args.get(1).map(|s| s.as_str()).unwrap_or("config.default.json");

    let config = NodeConfig::default();
    let json = serde_json::to_string_pretty(&config).expect("NodeConfig is always representable as JSON");

    match std::fs::write(output_file, json) {
        Ok(_) => {
            eprintln!("generated default configuration: {output_file}");
            eprintln!("copy it to config.json and edit; env vars still override at load time");
        }
        Err(e) => {
            eprintln!("error writing {output_file}: {e}");
            std::process::exit(1);
        }
    }
}
