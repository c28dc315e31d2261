use std::path::PathBuf;

use blam_map::types::TypeCode;
use clap::Args;
use itertools::Itertools;
use miette::Result;
use owo_colors::OwoColorize;

use crate::commands::open_map;

#[derive(Args)]
pub struct IndexArgs {
    /// An input map file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Only list tags of this class
    #[arg(short, long, value_name = "CLASS")]
    class: Option<String>,
}

impl IndexArgs {
    pub fn handle(&self) -> Result<()> {
        let map = open_map(&self.file)?;
        let class: Option<TypeCode> = self.class.as_deref().map(str::parse).transpose()?;

        let header = map.header();
        let index = map.index_header();
        let magics = map.magics();
        println!("{}", self.file.display().bold());
        println!(
            "  version {}, {} bytes, meta base {:#x}",
            header.version, header.file_size, header.meta_base
        );
        println!(
            "  scenario {}, globals {}",
            index.scenario_ref, index.globals_ref
        );
        println!(
            "  magics: primary {:#x}, secondary {:#x}",
            magics.primary.unwrap_or_default(),
            magics.secondary.unwrap_or_default()
        );
        println!("  {} classes, {} tags", map.classes().len(), map.len());

        let groups = map
            .entries()
            .filter(|e| class.map_or(true, |c| e.type_code == c))
            .sorted_by_key(|e| e.type_code)
            .chunk_by(|e| e.type_code);

        for (type_code, entries) in &groups {
            let entries = entries.collect_vec();
            println!();
            println!("{} ({})", type_code.green(), entries.len());
            for entry in entries {
                println!(
                    "  {} {} {}",
                    entry.id.yellow(),
                    map.name(entry.id).unwrap_or("<unnamed>"),
                    format!("{} bytes", entry.data_size).dimmed()
                );
            }
        }

        Ok(())
    }
}
