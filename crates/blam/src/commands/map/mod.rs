pub mod dump;
pub mod index;
pub mod patch;

#[derive(clap::Subcommand)]
pub enum MapCommands {
    /// List the tags of a map file
    Index(index::IndexArgs),
    /// Decode a tag and print it as JSON
    Dump(dump::DumpArgs),
    /// Apply a JSON patch script to a map file
    Patch(patch::PatchArgs),
}

impl MapCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            MapCommands::Index(index) => index.handle(),
            MapCommands::Dump(dump) => dump.handle(),
            MapCommands::Patch(patch) => patch.handle(),
        }
    }
}
