// src/bin/redesign.rs
use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use redesigner::client::{RedesignClient, RedesignSession, Style};

/// Redesign a room or building photo through a running redesigner server
#[derive(Parser, Debug)]
#[command(name = "redesign")]
#[command(about = "Upload a photo, redesign it, and save the result", long_about = None)]
struct Cli {
    /// Photo to redesign (JPEG or PNG, up to 20 MiB)
    image: PathBuf,

    /// Base URL of the redesigner server
    #[arg(long, env = "REDESIGNER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Room type, e.g. "Living Room"
    #[arg(long, requires = "room_theme", conflicts_with = "building_type")]
    room_type: Option<String>,

    /// Room theme, e.g. "Modern"
    #[arg(long)]
    room_theme: Option<String>,

    /// Building type, e.g. "Beach House"
    #[arg(long, requires = "building_theme")]
    building_type: Option<String>,

    /// Building theme, e.g. "Tropical"
    #[arg(long)]
    building_theme: Option<String>,

    /// Where to save the redesigned image
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

impl Cli {
    fn style(&self) -> Result<Style> {
        match (&self.room_type, &self.room_theme, &self.building_type, &self.building_theme) {
            (Some(room_type), Some(theme), _, _) => Ok(Style::Room {
                room_type: room_type.clone(),
                theme: theme.clone(),
            }),
            (None, _, Some(building_type), Some(theme)) => Ok(Style::Building {
                building_type: building_type.clone(),
                theme: theme.clone(),
            }),
            _ => bail!("pass --room-type/--room-theme or --building-type/--building-theme"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let mut session = RedesignSession::new(cli.style()?);
    let client = RedesignClient::new(&cli.server);

    let saved = client
        .run(&mut session, &cli.image, &cli.out_dir)
        .await
        .with_context(|| format!("redesign of {} failed", cli.image.display()))?;

    info!(
        "Redesigned image {} saved to {}",
        session.predicted_image_url.as_deref().unwrap_or_default(),
        saved.display()
    );
    Ok(())
}
