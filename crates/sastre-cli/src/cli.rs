//! Argument surface. Task semantics live in `sastre-core`; this module
//! only shapes argv into core option structs.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "sastre",
    version,
    about = "Automation tool for Cisco SD-WAN controller configuration"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller address: https URL or bare hostname.
    #[arg(short, long, env = "SASTRE_ADDRESS", global = true)]
    pub address: Option<String>,

    /// Controller port, used when the address has none.
    #[arg(long, default_value_t = 8443, global = true)]
    pub port: u16,

    #[arg(short, long, env = "SASTRE_USER", global = true)]
    pub user: Option<String>,

    #[arg(long, env = "SASTRE_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Tenant name, for multi-tenant controllers.
    #[arg(long, env = "SASTRE_TENANT", global = true)]
    pub tenant: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 300, global = true)]
    pub timeout: u64,

    /// Verify the controller TLS certificate (off by default; controllers
    /// ship self-signed certificates).
    #[arg(long, global = true)]
    pub verify_tls: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save controller configuration items to a local workdir.
    Backup(BackupArgs),
    /// Push items from a workdir to the controller.
    Restore(RestoreArgs),
    /// Remove items from the controller.
    Delete(DeleteArgs),
    /// Attach saved device templates to devices.
    Attach(AttachArgs),
    /// Detach device templates from devices.
    Detach(DetachArgs),
    /// Manage WAN edge certificate status.
    Certificate(CertificateArgs),
    /// Rename or copy items into a new workdir.
    Transform(TransformArgs),
    /// Migrate an 18.4/19.2/19.3 snapshot to 20.1.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Backup destination.
    #[arg(long, default_value = "backup")]
    pub workdir: PathBuf,

    /// Package the backup as a zip archive.
    #[arg(long)]
    pub archive: bool,

    /// Keep an existing workdir instead of rolling it over.
    #[arg(long)]
    pub no_rollover: bool,

    /// Regular expression matching item names to back up.
    #[arg(long)]
    pub regex: Option<String>,

    /// Also save device running configurations (with the `all` tag).
    #[arg(long)]
    pub save_running: bool,

    /// Tags selecting items to back up. `all` selects everything.
    #[arg(required = true)]
    pub tags: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Restore source.
    #[arg(long, default_value = "backup")]
    pub workdir: PathBuf,

    /// Regular expression matching item names to restore.
    #[arg(long)]
    pub regex: Option<String>,

    /// List what would be pushed without writing.
    #[arg(long, conflicts_with = "attach")]
    pub dry_run: bool,

    /// Update items whose target body differs; default skips existing.
    #[arg(long)]
    pub update: bool,

    /// Attach templates and activate the vSmart policy after restoring.
    #[arg(long)]
    pub attach: bool,

    /// Convert matched factory-default items to regular items.
    #[arg(long)]
    pub convert_factory_defaults: bool,

    /// Tag selecting items to restore; dependencies are included.
    pub tag: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Regular expression matching item names to delete.
    #[arg(long)]
    pub regex: Option<String>,

    /// List what would be deleted without writing.
    #[arg(long, conflicts_with = "detach")]
    pub dry_run: bool,

    /// Detach templates and deactivate the vSmart policy first.
    #[arg(long)]
    pub detach: bool,

    /// Tag selecting items to delete.
    pub tag: String,
}

#[derive(Debug, Args)]
pub struct AttachArgs {
    /// Device class to attach: edge or vsmart.
    pub device_class: DeviceClassArg,

    /// Attach source.
    #[arg(long, default_value = "backup")]
    pub workdir: PathBuf,

    /// Regular expression selecting templates by name.
    #[arg(long)]
    pub templates: Option<String>,

    /// Regular expression selecting devices by uuid.
    #[arg(long)]
    pub devices: Option<String>,

    #[arg(long)]
    pub dry_run: bool,

    /// Devices per attach request.
    #[arg(long, default_value_t = sastre_core::actions::DEFAULT_CHUNK_SIZE)]
    pub batch: usize,
}

#[derive(Debug, Args)]
pub struct DetachArgs {
    /// Device class to detach: edge or vsmart.
    pub device_class: DeviceClassArg,

    #[arg(long)]
    pub templates: Option<String>,

    #[arg(long)]
    pub devices: Option<String>,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value_t = sastre_core::actions::DEFAULT_CHUNK_SIZE)]
    pub batch: usize,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum DeviceClassArg {
    Edge,
    Vsmart,
}

#[derive(Debug, Args)]
pub struct CertificateArgs {
    #[command(subcommand)]
    pub command: CertificateCommand,
}

#[derive(Debug, Subcommand)]
pub enum CertificateCommand {
    /// Restore certificate status from a backup.
    Restore {
        #[arg(long, default_value = "backup")]
        workdir: PathBuf,

        #[arg(long)]
        regex: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
    /// Set certificate status to a fixed value.
    Set {
        /// One of invalid, staging, valid.
        #[arg(value_parser = ["invalid", "staging", "valid"])]
        status: String,

        #[arg(long)]
        regex: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
pub struct TransformArgs {
    #[command(subcommand)]
    pub command: TransformCommand,
}

#[derive(Debug, Subcommand)]
pub enum TransformCommand {
    /// Rename items in place.
    Rename(TransformRuleArgs),
    /// Keep originals and add renamed copies.
    Copy(TransformRuleArgs),
    /// Transform using a YAML recipe file.
    Recipe {
        /// Recipe file.
        #[arg(long)]
        from_file: PathBuf,

        /// Directory to save the transform result.
        output: PathBuf,

        #[arg(long)]
        workdir: Option<PathBuf>,

        #[arg(long)]
        no_rollover: bool,
    },
}

#[derive(Debug, Args)]
pub struct TransformRuleArgs {
    /// Tag selecting items to transform.
    pub tag: String,

    /// Name-regex producing the new name; `{name}` is the original name,
    /// `{name <regex>}` splices its capturing groups.
    pub name_regex: String,

    /// Directory to save the transform result.
    pub output: PathBuf,

    /// Only transform names matching this regex.
    #[arg(long, conflicts_with = "not_regex")]
    pub regex: Option<String>,

    /// Only transform names NOT matching this regex.
    #[arg(long)]
    pub not_regex: Option<String>,

    /// Read from this workdir instead of the controller.
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    #[arg(long)]
    pub no_rollover: bool,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Evaluate all feature templates, or only attached ones.
    #[arg(value_parser = ["all", "attached"])]
    pub scope: String,

    /// Directory to save migrated items.
    pub output: PathBuf,

    /// Name template for migrated items.
    #[arg(long, default_value = "migrated_{name}")]
    pub name: String,

    /// Source controller version.
    #[arg(long = "from", default_value = "18.4")]
    pub from_version: String,

    /// Target controller version.
    #[arg(long = "to", default_value = "20.1")]
    pub to_version: String,

    /// Read from this workdir instead of the controller.
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    #[arg(long)]
    pub no_rollover: bool,
}
