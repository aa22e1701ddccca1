//! Software stages: `system.mss`, libgen, device trees, applications and
//! kernel images.

use std::path::Path;

use fpgabuild_core::domain::layout::{SYSTEM_MHS, SYSTEM_MSS};
use fpgabuild_core::domain::SourceSet;
use fpgabuild_core::textedit::{apply_device_tree_edits, regenerate_mss, rewrite_file};
use fpgabuild_core::{
    EditError, EditResult, ExecutionMode, ProcessorDescriptor, SoftwareApp, TargetLayout,
    TransferDirection,
};
use tracing::debug;

use crate::error::{StageError, StageOutcome};
use crate::runner::{StageContext, ToolRunner, ToolStep};
use crate::stage::Stage;

/// Kernel architecture for soft processors.
pub const KERNEL_ARCH: &str = "microblaze";

/// Rewrite a file on the build host.
///
/// Remote files are downloaded to a scratch directory, edited there and
/// uploaded only when the edit succeeded and changed something.
pub async fn edit_build_file<F>(ctx: &mut StageContext<'_>, path: &str, edit: F) -> StageOutcome
where
    F: FnOnce(Option<&str>) -> EditResult<String> + Send,
{
    if ctx.channel.mode() == ExecutionMode::Local {
        rewrite_file(Path::new(path), edit)?;
        return Ok(());
    }

    let scratch = tempfile::tempdir()?;
    let local = scratch.path().join("edit");
    if ctx.channel.exists(path).await? {
        ctx.channel
            .transfer(TransferDirection::Download, &local, path)
            .await?;
    }
    if rewrite_file(&local, edit)? {
        ctx.channel
            .transfer(TransferDirection::Upload, &local, path)
            .await?;
    } else {
        debug!(path = %path, "no change, upload skipped");
    }
    Ok(())
}

/// Regenerate `system.mss` for the target's processors.
pub async fn prepare(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let processors = &spec.processors;
    let path = ctx.layout.mss();
    edit_build_file(ctx, &path, |old| regenerate_mss(old, processors)).await
}

pub async fn lib_gen(ctx: &mut StageContext<'_>) -> StageOutcome {
    let part = ctx.spec.part.part_string();
    let inv = ctx
        .invocation(Stage::LibGen, "libgen", "libgen", ctx.layout.root.clone())
        .args(["-mhs", SYSTEM_MHS, "-p", part.as_str(), SYSTEM_MSS]);
    ToolRunner::run(ctx, ToolStep::new(inv).log("libgen.log")).await
}

fn kernel_layout(ctx: &StageContext<'_>, kernel: &str) -> TargetLayout {
    TargetLayout::new(kernel, ctx.layout.style)
}

/// Patch each Linux processor's device tree and install it in its kernel tree.
pub async fn device_tree_update(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    for proc in spec.processors.iter().filter(|p| p.is_linux()) {
        let (Some(dts), Some(stem), Some(kernel)) = (
            proc.device_tree.as_deref(),
            proc.device_tree_stem(),
            proc.kernel_source.as_deref(),
        ) else {
            return Err(StageError::Missing(format!(
                "{}: device tree or kernel source",
                proc.instance
            )));
        };

        let path = ctx.layout.join(&[dts]);
        let missing = dts.to_string();
        edit_build_file(ctx, &path, move |old| match old {
            Some(text) => apply_device_tree_edits(text, proc),
            None => Err(EditError::NotFound(missing)),
        })
        .await?;

        let installed = kernel_layout(ctx, kernel).join(&[
            "arch",
            KERNEL_ARCH,
            "boot",
            "dts",
            &format!("{stem}.dts"),
        ]);
        let out = ctx.channel.copy_file(&path, &installed).await?;
        if !out.success() {
            return Err(StageError::Command {
                operation: format!("install device tree for {}", proc.instance),
                detail: out.stderr.trim().to_string(),
            });
        }
    }
    Ok(())
}

/// Explicit files followed by each rule's matches, as host paths relative to
/// the target root.
pub async fn resolve_sources(
    ctx: &mut StageContext<'_>,
    set: &SourceSet,
) -> Result<Vec<String>, StageError> {
    let mut out: Vec<String> = set.files.iter().map(|f| ctx.layout.relative(f)).collect();
    for rule in &set.rules {
        let dir = ctx.layout.join(&[&rule.directory]);
        let listing = ctx.channel.list_dir(&dir).await?;
        let hits = rule.select(&listing)?;
        debug!(dir = %dir, filter = %rule.filter, hits = hits.len(), "sources discovered");
        out.extend(hits.iter().map(|h| ctx.layout.relative(h)));
    }
    Ok(out)
}

/// Compiler arguments for one bare-metal application.
pub fn app_arguments(
    ctx: &StageContext<'_>,
    proc: &ProcessorDescriptor,
    app: &SoftwareApp,
    sources: &[String],
    headers: &[String],
    output: &str,
) -> Vec<String> {
    let layout = &ctx.layout;
    let mut args = vec![format!("-O{}", app.optimization_level())];
    args.push(format!("-I{}", layout.relative(&format!("{}/include", proc.instance))));
    for inc in &app.include_paths {
        args.push(format!("-I{}", layout.relative(inc)));
    }
    let mut header_dirs: Vec<String> = headers
        .iter()
        .filter_map(|h| h.rsplit_once(['/', '\\']).map(|(dir, _)| dir.to_string()))
        .collect();
    header_dirs.sort();
    header_dirs.dedup();
    for dir in header_dirs {
        args.push(format!("-I{dir}"));
    }
    if let Some(script) = &app.linker_script {
        args.push(format!("-Wl,-T,{}", layout.relative(script)));
    }
    if let Some(heap) = app.heap_size {
        args.push(format!("-Wl,--defsym,_HEAP_SIZE=0x{heap:x}"));
    }
    if let Some(stack) = app.stack_size {
        args.push(format!("-Wl,--defsym,_STACK_SIZE=0x{stack:x}"));
    }
    args.push(format!("-L{}", layout.relative(&format!("{}/lib", proc.instance))));
    for lib_path in &app.library_paths {
        args.push(format!("-L{}", layout.relative(lib_path)));
    }
    args.extend(sources.iter().cloned());
    for lib in &app.libraries {
        args.push(format!("-l{lib}"));
    }
    args.push("-o".to_string());
    args.push(output.to_string());
    args
}

/// File name an application is published under. The first application of a
/// processor produces the processor's output artifact.
pub fn app_artifact(proc: &ProcessorDescriptor, index: usize, app: &SoftwareApp) -> String {
    if index == 0 && !proc.output_artifact.is_empty() {
        proc.output_artifact.clone()
    } else {
        format!("{}.elf", app.name)
    }
}

async fn compile_apps(ctx: &mut StageContext<'_>, proc: &ProcessorDescriptor) -> StageOutcome {
    for (index, app) in proc.apps.iter().enumerate() {
        let sources = resolve_sources(ctx, &app.sources).await?;
        if sources.is_empty() {
            return Err(StageError::Missing(format!("{}: no source files", app.name)));
        }
        let headers = resolve_sources(ctx, &app.headers).await?;
        let output = ctx.output_file(&app_artifact(proc, index, app));
        let args = app_arguments(ctx, proc, app, &sources, &headers, &output);
        let inv = ctx
            .invocation(
                Stage::Compile,
                &format!("compile_{}", app.name),
                &proc.compiler(),
                ctx.layout.root.clone(),
            )
            .args(args);
        ToolRunner::run(ctx, ToolStep::new(inv)).await?;
    }
    Ok(())
}

async fn compile_kernel(ctx: &mut StageContext<'_>, proc: &ProcessorDescriptor) -> StageOutcome {
    let (Some(kernel), Some(stem)) = (proc.kernel_source.as_deref(), proc.device_tree_stem())
    else {
        return Err(StageError::Missing(format!(
            "{}: kernel source or device tree",
            proc.instance
        )));
    };
    let make_args = |goal: &str| {
        vec![
            "-C".to_string(),
            kernel.to_string(),
            format!("ARCH={KERNEL_ARCH}"),
            format!("CROSS_COMPILE={}", proc.cross_compile),
            goal.to_string(),
        ]
    };

    if let Some(config) = proc.kernel_config.as_deref().filter(|c| !c.is_empty()) {
        let inv = ctx
            .invocation(
                Stage::Compile,
                &format!("kernel_config_{}", proc.instance),
                "make",
                ctx.layout.root.clone(),
            )
            .args(make_args(config));
        ToolRunner::run(ctx, ToolStep::new(inv)).await?;
    }

    let image = format!("simpleImage.{stem}");
    let inv = ctx
        .invocation(
            Stage::Compile,
            &format!("kernel_{}", proc.instance),
            "make",
            ctx.layout.root.clone(),
        )
        .args(make_args(&image));
    ToolRunner::run(ctx, ToolStep::new(inv)).await?;

    let built = kernel_layout(ctx, kernel).join(&["arch", KERNEL_ARCH, "boot", &image]);
    let published = ctx.output_file(&proc.output_artifact);
    let out = ctx.channel.copy_file(&built, &published).await?;
    if !out.success() {
        return Err(StageError::Command {
            operation: format!("publish {image}"),
            detail: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Build every processor's software.
pub async fn compile(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    for proc in &spec.processors {
        if proc.is_linux() {
            compile_kernel(ctx, proc).await?;
        } else {
            compile_apps(ctx, proc).await?;
        }
    }
    Ok(())
}
