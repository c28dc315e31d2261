use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use blam_map::patch::TagPatch;
use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::info;

use crate::commands::{open_map, open_schema};

#[derive(Args)]
pub struct PatchArgs {
    /// An input map file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A JSON schema describing the tag classes
    #[arg(short, long, value_name = "FILE")]
    schema: PathBuf,

    /// A JSON list of `{ "tag", "path", "value" }` patches
    #[arg(short, long, value_name = "FILE")]
    patches: PathBuf,

    /// Where to write the patched map, defaults to the input
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PatchArgs {
    pub fn handle(&self) -> Result<()> {
        let mut map = open_map(&self.file)?;
        let schema = open_schema(&self.schema)?;

        let f = File::open(&self.patches)
            .into_diagnostic()
            .context(format!("path: {}", self.patches.display()))?;
        let patches: Vec<TagPatch> = serde_json::from_reader(f)
            .into_diagnostic()
            .context(format!("parsing patches {}", self.patches.display()))?;

        let report = map.patcher(&schema).apply_all(&patches);
        for failure in &report.failed {
            println!(
                "❌ #{} {} {}: {}",
                failure.index,
                failure.tag,
                failure.path,
                failure.error.red()
            );
        }
        info!("applied {} of {} patches", report.applied, patches.len());

        let target = self.output.as_ref().unwrap_or(&self.file);
        if target == &self.file && !self.overwrite {
            return Err(miette!(
                "refusing to overwrite {} without --overwrite",
                target.display()
            ));
        }

        let mut out = if !self.overwrite {
            File::create_new(target)
                .into_diagnostic()
                .context(format!("creating {}", target.display()))?
        } else {
            File::create(target)
                .into_diagnostic()
                .context(format!("creating {}", target.display()))?
        };
        out.write_all(&map.into_inner()).into_diagnostic()?;
        info!("wrote {}", target.display());

        if report.is_clean() {
            Ok(())
        } else {
            Err(miette!("{} patches failed", report.failed.len()))
        }
    }
}
