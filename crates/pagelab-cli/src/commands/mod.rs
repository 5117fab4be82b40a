//! CLI command implementations.

pub mod queue;
pub mod status;

use anyhow::Result;
use pagelab_config::load_settings_file;

pub fn validate(path: &str) -> Result<()> {
    match load_settings_file(path).and_then(|settings| settings.validate().map(|_| settings)) {
        Ok(settings) => {
            println!("Configuration is valid");
            println!("  queue:   {}", settings.queue_name);
            println!("  workers: {}", settings.num_workers);
            println!("  engine:  {}", settings.engine.command);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
