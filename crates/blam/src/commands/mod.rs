use std::fs::File;
use std::path::Path;

use blam_map::schema::SchemaDefinition;
use blam_map::types::TagId;
use blam_map::{MapArchive, Schema};
use miette::{Context, IntoDiagnostic, Result};

pub mod map;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle map files
    Map {
        #[command(subcommand)]
        command: map::MapCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Map { command } => command.handle(),
        }
    }
}

pub(crate) fn open_map(path: &Path) -> Result<MapArchive> {
    let data = std::fs::read(path)
        .into_diagnostic()
        .context(format!("path: {}", path.display()))?;
    Ok(MapArchive::new(data)?)
}

pub(crate) fn open_schema(path: &Path) -> Result<Schema> {
    let f = File::open(path)
        .into_diagnostic()
        .context(format!("path: {}", path.display()))?;
    let definition: SchemaDefinition = serde_json::from_reader(f)
        .into_diagnostic()
        .context(format!("parsing schema {}", path.display()))?;

    let schema = definition.into_builder().build();
    schema.validate()?;
    Ok(schema)
}

/// Accepts `0xE1740000` as well as plain decimal ids
pub(crate) fn parse_tag_id(s: &str) -> Result<TagId, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed
        .map(TagId)
        .map_err(|e| format!("`{s}` is not a tag id: {e}"))
}
