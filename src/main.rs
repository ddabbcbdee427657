use clap::{app_from_crate, AppSettings};
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, Extract, Render};

mod commands;
mod config;
mod dem;
mod error;
mod extract;
mod projection;
mod render;
#[cfg(test)]
mod test;
mod utils;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<_> = std::env::args().collect();

    if let Err(e) = execute(&args) {
        println!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn execute(input: &[String]) -> anyhow::Result<()> {
    let commands: Vec<Box<dyn Command>> = vec![
        Box::new(Extract {}),
        Box::new(Render {}),
        // Add commands here
    ];

    let mut app = app_from_crate!()
        .global_setting(AppSettings::PropagateVersion)
        .global_setting(AppSettings::UseLongFormatForHelpSubcommand)
        .setting(AppSettings::SubcommandRequiredElseHelp);

    app = commands.iter().fold(app, |a, c| a.subcommand(c.register()));

    let matches = app.get_matches_from(input);

    match matches.subcommand() {
        Some((name, sub_matches)) => match commands.iter().find(|c| c.register().get_name() == name) {
            Some(command) => command.run(sub_matches),
            None => unreachable!(),
        },
        None => unreachable!(),
    }
}
