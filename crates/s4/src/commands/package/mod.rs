use std::path::Path;

use clap::Args;
use miette::{Context, Result};
use s4_dbpf::{read::DEFAULT_MAX_RESOURCE_SIZE, Package, PackageOptions};

pub mod extract;
pub mod info;

#[derive(clap::Subcommand)]
pub enum PackageCommands {
    /// Print the version and resources of a package
    Info(info::InfoArgs),
    /// Extract the resources of a package into a directory
    Extract(extract::ExtractArgs),
}

impl PackageCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            PackageCommands::Info(info) => info.handle(),
            PackageCommands::Extract(extract) => extract.handle(),
        }
    }
}

/// Options shared by every command that opens a package
#[derive(Args)]
pub struct OpenArgs {
    /// Largest stored or decoded resource size accepted, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_RESOURCE_SIZE)]
    max_resource_size: u64,

    /// Only read the compression directory once a resource needs it
    #[arg(long, default_value_t = false)]
    lazy_directory: bool,
}

impl OpenArgs {
    pub fn open(&self, path: &Path) -> Result<Package> {
        let options = PackageOptions::builder()
            .max_resource_size(self.max_resource_size)
            .eager_compression_directory(!self.lazy_directory)
            .build();

        Package::open_with(path, options).context(format!("path: {}", path.display()))
    }
}
