mod cli;
mod error;

use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use url::Url;

use sastre_core::tasks::{TaskContext, TaskOutcome};
use sastre_core::{
    AttachOptions, AttachTask, BackupOptions, BackupTask, CertificateOptions, CertificateTask,
    ControllerConfig, DeleteOptions, DeleteTask, DetachOptions, DetachTask, DeviceClass,
    MigrateOptions, MigrateTask, RestoreOptions, RestoreTask, StatusSource, TaskError,
    TlsVerification, TransformOptions, TransformTask,
};

use crate::cli::{
    CertificateCommand, Cli, Command, DeviceClassArg, GlobalOpts, TransformCommand,
    TransformRuleArgs,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match run(cli).await {
        Ok(outcome) => {
            eprintln!("{}", outcome.summary("task"));
            std::process::exit(if outcome.success() {
                error::exit_code::SUCCESS
            } else {
                error::exit_code::FAILURE
            });
        }
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<TaskOutcome, CliError> {
    let mut ctx = TaskContext::default();

    // Ctrl-C requests cooperative cancellation: the current request
    // finishes, no new ones are issued.
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Backup(args) => {
            let api = connect(&cli.global).await?;
            let task = BackupTask {
                options: BackupOptions {
                    workdir: args.workdir,
                    archive: args.archive,
                    no_rollover: args.no_rollover,
                    regex: args.regex,
                    tags: args.tags,
                    save_running: args.save_running,
                },
            };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Restore(args) => {
            let api = connect(&cli.global).await?;
            let task = RestoreTask {
                options: RestoreOptions {
                    workdir: args.workdir,
                    tag: args.tag,
                    regex: args.regex,
                    dry_run: args.dry_run,
                    update: args.update,
                    attach: args.attach,
                    convert_factory_defaults: args.convert_factory_defaults,
                },
            };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Delete(args) => {
            let api = connect(&cli.global).await?;
            let task = DeleteTask {
                options: DeleteOptions {
                    tag: args.tag,
                    regex: args.regex,
                    dry_run: args.dry_run,
                    detach: args.detach,
                },
            };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Attach(args) => {
            let api = connect(&cli.global).await?;
            let task = AttachTask {
                options: AttachOptions {
                    workdir: args.workdir,
                    device_class: device_class(&args.device_class),
                    templates: args.templates,
                    devices: args.devices,
                    dry_run: args.dry_run,
                    batch: args.batch,
                },
            };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Detach(args) => {
            let api = connect(&cli.global).await?;
            let task = DetachTask {
                options: DetachOptions {
                    device_class: device_class(&args.device_class),
                    templates: args.templates,
                    devices: args.devices,
                    dry_run: args.dry_run,
                    batch: args.batch,
                },
            };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Certificate(args) => {
            let api = connect(&cli.global).await?;
            let options = match args.command {
                CertificateCommand::Restore {
                    workdir,
                    regex,
                    dry_run,
                } => CertificateOptions {
                    source: StatusSource::Workdir(workdir),
                    regex,
                    dry_run,
                },
                CertificateCommand::Set {
                    status,
                    regex,
                    dry_run,
                } => CertificateOptions {
                    source: StatusSource::Fixed(status),
                    regex,
                    dry_run,
                },
            };
            let task = CertificateTask { options };
            let outcome = task.run(&api, &mut ctx).await?;
            api.logout().await;
            Ok(outcome)
        }

        Command::Transform(args) => {
            let (recipe, output, workdir, no_rollover) = match args.command {
                TransformCommand::Rename(rule) => rename_recipe(rule, true),
                TransformCommand::Copy(rule) => rename_recipe(rule, false),
                TransformCommand::Recipe {
                    from_file,
                    output,
                    workdir,
                    no_rollover,
                } => {
                    let text = std::fs::read_to_string(&from_file).map_err(|e| {
                        TaskError::InvalidRecipe(format!(
                            "could not load recipe file {}: {e}",
                            from_file.display()
                        ))
                    })?;
                    (
                        sastre_core::transform::TransformRecipe::from_yaml(&text)?,
                        output,
                        workdir,
                        no_rollover,
                    )
                }
            };

            let task = TransformTask {
                options: TransformOptions {
                    recipe,
                    output,
                    workdir: workdir.clone(),
                    no_rollover,
                },
            };
            // Reading from a workdir needs no controller session.
            if workdir.is_some() {
                Ok(task.run(None, &mut ctx).await?)
            } else {
                let api = connect(&cli.global).await?;
                let outcome = task.run(Some(&api), &mut ctx).await?;
                api.logout().await;
                Ok(outcome)
            }
        }

        Command::Migrate(args) => {
            let task = MigrateTask {
                options: MigrateOptions {
                    scope_all: args.scope == "all",
                    output: args.output,
                    name_template: args.name,
                    from_version: args.from_version,
                    to_version: args.to_version,
                    workdir: args.workdir.clone(),
                    no_rollover: args.no_rollover,
                },
            };
            if args.workdir.is_some() {
                Ok(task.run(None, &mut ctx).await?)
            } else {
                let api = connect(&cli.global).await?;
                let outcome = task.run(Some(&api), &mut ctx).await?;
                api.logout().await;
                Ok(outcome)
            }
        }
    }
}

fn rename_recipe(
    rule: TransformRuleArgs,
    replace_source: bool,
) -> (
    sastre_core::transform::TransformRecipe,
    std::path::PathBuf,
    Option<std::path::PathBuf>,
    bool,
) {
    let recipe = if replace_source {
        sastre_core::transform::TransformRecipe::rename(
            &rule.tag,
            rule.regex,
            rule.not_regex,
            &rule.name_regex,
        )
    } else {
        sastre_core::transform::TransformRecipe::copy(
            &rule.tag,
            rule.regex,
            rule.not_regex,
            &rule.name_regex,
        )
    };
    (recipe, rule.output, rule.workdir, rule.no_rollover)
}

fn device_class(arg: &DeviceClassArg) -> DeviceClass {
    match arg {
        DeviceClassArg::Edge => DeviceClass::Edge,
        DeviceClassArg::Vsmart => DeviceClass::Vsmart,
    }
}

/// Build the controller session from global options.
async fn connect(global: &GlobalOpts) -> Result<sastre_api::Rest, CliError> {
    let address = global.address.as_ref().ok_or(CliError::NoAddress)?;
    let (Some(user), Some(password)) = (&global.user, &global.password) else {
        return Err(CliError::NoCredentials);
    };

    let url = parse_address(address, global.port)?;
    let mut config = ControllerConfig::new(
        url,
        user.clone(),
        SecretString::from(password.clone()),
    );
    config.tenant = global.tenant.clone();
    config.timeout = std::time::Duration::from_secs(global.timeout);
    if global.verify_tls {
        config.tls = TlsVerification::SystemDefaults;
    }

    config.connect().await.map_err(CliError::Task)
}

/// Accept a full https URL or a bare hostname (the port option applies).
fn parse_address(address: &str, port: u16) -> Result<Url, CliError> {
    let candidate = if address.contains("://") {
        address.to_owned()
    } else {
        format!("https://{address}:{port}")
    };
    candidate.parse().map_err(|_| CliError::BadAddress {
        address: address.to_owned(),
    })
}
