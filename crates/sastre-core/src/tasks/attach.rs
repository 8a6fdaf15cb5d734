// ── Standalone attach / detach tasks ──
//
// Attach pushes workdir-saved attachments to the target controller for
// templates that exist there; detach flips attached devices back to CLI
// mode. Both operate on one device class at a time (WAN edge or vSmart)
// and accept template/device name filters plus a request batch size.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::info;

use sastre_api::Rest;

use crate::actions::ActionEngine;
use crate::catalog;
use crate::error::TaskError;
use crate::store::Workdir;
use crate::tasks::{
    attach_inputs_from_workdir, compile_filter, detach_inputs, edge_device_set, fetch_index,
    load_index, matches_filter, vsmart_device_set, AttachCandidate, TaskContext, TaskOutcome,
};

/// Which device class a task operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Edge,
    Vsmart,
}

impl DeviceClass {
    fn title(&self) -> &'static str {
        match self {
            DeviceClass::Edge => "WAN edges",
            DeviceClass::Vsmart => "vSmarts",
        }
    }

    async fn device_set(&self, api: &Rest) -> Result<HashSet<String>, TaskError> {
        match self {
            DeviceClass::Edge => edge_device_set(api).await,
            DeviceClass::Vsmart => vsmart_device_set(api).await,
        }
    }
}

pub struct AttachOptions {
    pub workdir: PathBuf,
    pub device_class: DeviceClass,
    /// Template-name filter.
    pub templates: Option<String>,
    /// Device-uuid filter.
    pub devices: Option<String>,
    pub dry_run: bool,
    /// Devices per attach request.
    pub batch: usize,
}

pub struct AttachTask {
    pub options: AttachOptions,
}

impl AttachTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let template_filter = compile_filter(&opts.templates)?;
        let device_filter = compile_filter(&opts.devices)?;

        info!(
            "starting attach templates{}: {} -> {}",
            if opts.dry_run { " (dry-run)" } else { "" },
            opts.workdir.display(),
            api.base_url()
        );

        let workdir = Workdir::open(&opts.workdir)?;
        let device_entry = catalog::entry_for_kind("template_device")
            .expect("template_device catalog entry");

        let saved_index = load_index(&workdir, device_entry)?.ok_or_else(|| {
            TaskError::InvalidBackup("device template index not found in backup".into())
        })?;
        let target_templates = fetch_index(api, device_entry)
            .await?
            .map(|i| i.by_name())
            .unwrap_or_default();

        let device_set: HashSet<String> = opts
            .device_class
            .device_set(api)
            .await?
            .into_iter()
            .filter(|uuid| matches_filter(&device_filter, &[uuid.as_str()]))
            .collect();

        let candidates: Vec<AttachCandidate> = saved_index
            .attached_templates(opts.device_class == DeviceClass::Vsmart)
            .into_iter()
            .filter(|e| matches_filter(&template_filter, &[e.name.as_str()]))
            .map(|e| AttachCandidate {
                target_id: target_templates.get(&e.name).cloned(),
                name: e.name,
                saved_id: e.id,
            })
            .collect();

        let inputs = attach_inputs_from_workdir(
            api,
            &workdir,
            saved_index.need_extended_name,
            candidates,
            Some(&device_set),
            &mut ctx.tally,
        )
        .await?;

        if opts.dry_run {
            for input in &inputs {
                info!(
                    "DRY-RUN: attach {} ({} devices)",
                    input.template_name,
                    input.device_inputs.len()
                );
            }
            return Ok(ctx.outcome());
        }

        let engine =
            ActionEngine::new(api, ctx.cancel.clone()).with_chunk_size(opts.batch);
        let pending = engine.submit_attach(inputs, false).await?;
        if pending.is_empty() {
            info!("no {} attachments to process", opts.device_class.title());
        } else if !engine
            .wait_actions(
                pending,
                &format!("attaching {}", opts.device_class.title()),
                false,
            )
            .await?
        {
            ctx.tally.warn(format!(
                "attaching {} completed with failures",
                opts.device_class.title()
            ));
        }
        Ok(ctx.outcome())
    }
}

pub struct DetachOptions {
    pub device_class: DeviceClass,
    pub templates: Option<String>,
    pub devices: Option<String>,
    pub dry_run: bool,
    pub batch: usize,
}

pub struct DetachTask {
    pub options: DetachOptions,
}

impl DetachTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let template_filter = compile_filter(&opts.templates)?;
        let device_filter = compile_filter(&opts.devices)?;

        info!(
            "starting detach templates{}: {}",
            if opts.dry_run { " (dry-run)" } else { "" },
            api.base_url()
        );

        let device_entry = catalog::entry_for_kind("template_device")
            .expect("template_device catalog entry");
        let template_index = fetch_index(api, device_entry).await?.ok_or_else(|| {
            TaskError::NotFound("device template index not served by controller".into())
        })?;

        let device_set: HashSet<String> = opts
            .device_class
            .device_set(api)
            .await?
            .into_iter()
            .filter(|uuid| matches_filter(&device_filter, &[uuid.as_str()]))
            .collect();

        let templates: Vec<(String, String)> = template_index
            .attached_templates(opts.device_class == DeviceClass::Vsmart)
            .into_iter()
            .filter(|e| matches_filter(&template_filter, &[e.name.as_str()]))
            .map(|e| (e.id, e.name))
            .collect();

        let inputs = detach_inputs(api, templates, Some(&device_set), &mut ctx.tally).await?;

        if opts.dry_run {
            for input in &inputs {
                info!(
                    "DRY-RUN: detach {} ({} devices)",
                    input.template_name,
                    input.device_ids.len()
                );
            }
            return Ok(ctx.outcome());
        }

        let engine =
            ActionEngine::new(api, ctx.cancel.clone()).with_chunk_size(opts.batch);
        let pending = engine.submit_detach(inputs).await?;
        if pending.is_empty() {
            info!("no {} detachments to process", opts.device_class.title());
        } else if !engine
            .wait_actions(
                pending,
                &format!("detaching {}", opts.device_class.title()),
                false,
            )
            .await?
        {
            ctx.tally.warn(format!(
                "detaching {} completed with failures",
                opts.device_class.title()
            ));
        }
        Ok(ctx.outcome())
    }
}
