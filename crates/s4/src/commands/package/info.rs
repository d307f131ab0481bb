use clap::Args;
use itertools::Itertools;
use miette::Result;
use owo_colors::{OwoColorize, Stream};
use std::path::PathBuf;

use super::OpenArgs;

#[derive(Args)]
pub struct InfoArgs {
    /// An input package file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Print how many resources there are of each type
    #[arg(long, default_value_t = false)]
    types: bool,

    #[command(flatten)]
    open: OpenArgs,
}

impl InfoArgs {
    pub fn handle(&self) -> Result<()> {
        let package = self.open.open(&self.file)?;

        let (major, minor) = package.version()?;
        println!(
            "{} {major}.{minor}",
            "version".if_supports_color(Stream::Stdout, |t| t.bold())
        );
        println!(
            "{} {}",
            "resources".if_supports_color(Stream::Stdout, |t| t.bold()),
            package.len()?
        );

        for resource in package.resources()? {
            println!(
                "{:<24} {:016X}",
                resource.type_name(),
                resource.instance_id()
            );
        }

        let duplicates = package.duplicates()?.count();
        if duplicates > 0 {
            println!(
                "{}",
                format!("{duplicates} records repeat an earlier key")
                    .if_supports_color(Stream::Stdout, |t| t.yellow())
            );
        }

        if self.types {
            println!();
            package
                .resources()?
                .counts_by(|resource| resource.type_name())
                .into_iter()
                .sorted_by(|(a, a_count), (b, b_count)| b_count.cmp(a_count).then(a.cmp(b)))
                .for_each(|(name, count)| {
                    let name = format!("{name:<24}");
                    println!("{} {count}", name.if_supports_color(Stream::Stdout, |t| t.cyan()))
                });
        }

        package.close()?;
        Ok(())
    }
}
