use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use s4_dbpf::{registry, ResourceHandle, ResourceKey};
use std::{collections::HashSet, fs::File, io::BufWriter, path::PathBuf};
use tracing::{info, warn};

use super::OpenArgs;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Only extract the resource with this key, written as TYPE:GROUP:INSTANCE in hex
    #[arg(short, long, value_name = "KEY")]
    key: Option<ResourceKey>,

    /// Only extract resources of this type, by name or as Unknown_XXXXXXXX
    #[arg(short, long = "type", value_name = "NAME")]
    type_name: Option<String>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    #[command(flatten)]
    open: OpenArgs,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let type_id = self
            .type_name
            .as_deref()
            .map(|name| {
                registry::type_id_for_name(name).ok_or_else(|| miette!("unknown resource type {name}"))
            })
            .transpose()?;

        let package = self.open.open(&self.file)?;
        std::fs::create_dir_all(&self.directory)
            .into_diagnostic()
            .context(format!("creating {}", self.directory.display()))?;

        let shadowed: HashSet<usize> = package.duplicates()?.map(|r| r.position()).collect();

        let mut written = 0usize;
        let mut failed = 0usize;
        for resource in package.resources()? {
            if self.key.is_some_and(|key| key != resource.key())
                || type_id.is_some_and(|id| id != resource.type_id())
            {
                continue;
            }
            if shadowed.contains(&resource.position()) {
                warn!(key = %resource.key(), "skipping resource shadowed by an earlier key");
                continue;
            }

            match self.write_resource(&resource) {
                Ok(()) => written += 1,
                Err(e) if e.is_resource_scoped() => {
                    warn!(key = %resource.key(), "failed to extract: {e}");
                    failed += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if written == 0 && failed == 0 && (self.key.is_some() || type_id.is_some()) {
            warn!("no resources matched");
        }
        info!(written, failed, "extracted {}", self.file.display());

        package.close()?;
        Ok(())
    }

    fn write_resource(&self, resource: &ResourceHandle<'_, File>) -> s4_dbpf::error::Result<()> {
        let p = self.directory.join(format!(
            "{}_{:016X}.bin",
            resource.type_name(),
            resource.instance_id()
        ));
        info!("writing {}", p.display());

        let data = resource.extract()?;
        let out = if !self.overwrite {
            File::create_new(&p)?
        } else {
            File::create(&p)?
        };

        let mut out = BufWriter::new(out);
        std::io::Write::write_all(&mut out, &data)?;
        std::io::Write::flush(&mut out)?;
        Ok(())
    }
}
