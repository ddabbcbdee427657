mod extract;
mod render;

use std::path::Path;

use clap::ArgMatches;

use crate::config::MapConfig;

pub use extract::Extract;
pub use render::Render;

pub trait Command {
    fn register(&self) -> clap::App<'static>;
    fn run(&self, args: &ArgMatches) -> anyhow::Result<()>;
}

/// The `--config` file if one was given, the built-in defaults otherwise.
fn load_config(args: &ArgMatches) -> anyhow::Result<MapConfig> {
    match args.value_of("config") {
        Some(path) => {
            println!("▶️  Loading {}", path);
            let config = MapConfig::from_file(Path::new(path))?;
            println!("✔️  Loaded {}", path);
            Ok(config)
        }
        None => Ok(MapConfig::default()),
    }
}

/// Parses an optional flag value, keeping `current` when the flag is absent.
fn parse_flag<T>(args: &ArgMatches, name: &str, current: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match args.value_of(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value '{}' for --{}: {}", raw, name, e)),
        None => Ok(current),
    }
}
