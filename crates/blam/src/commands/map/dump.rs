use std::path::PathBuf;

use blam_map::error::Error;
use blam_map::path::PropertyPath;
use clap::Args;
use miette::{miette, IntoDiagnostic, Result};
use tracing::info;

use crate::commands::{open_map, open_schema, parse_tag_id};

#[derive(Args)]
pub struct DumpArgs {
    /// An input map file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A JSON schema describing the tag classes
    #[arg(short, long, value_name = "FILE")]
    schema: PathBuf,

    /// The tag to decode, as `0xE1740000` or decimal
    #[arg(short, long, value_parser = parse_tag_id)]
    tag: blam_map::types::TagId,

    /// Only print the value at this property path
    #[arg(short, long, value_name = "PATH")]
    path: Option<String>,
}

impl DumpArgs {
    pub fn handle(&self) -> Result<()> {
        let map = open_map(&self.file)?;
        let schema = open_schema(&self.schema)?;

        let entry = map.entry(self.tag).ok_or(Error::TagNotFound(self.tag))?;
        let plan = schema.plan_for(entry.type_code)?;
        let tag = map.decode(&plan, entry)?;
        info!("decoded {} {} ({})", tag.type_code(), tag.id(), tag.name());

        let json = match &self.path {
            Some(path) => {
                let path: PropertyPath = path.parse()?;
                let value = tag
                    .body()
                    .lookup(&path)
                    .ok_or_else(|| miette!("{path} does not exist in {}", tag.id()))?;
                serde_json::to_string_pretty(value)
            }
            None => serde_json::to_string_pretty(&tag),
        }
        .into_diagnostic()?;

        println!("{json}");
        Ok(())
    }
}
