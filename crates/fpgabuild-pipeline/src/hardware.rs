//! Hardware stages: platgen through bitstream and codelet merge.

use fpgabuild_core::domain::layout::{SYSTEM_MHS, SYSTEM_UCF};
use fpgabuild_core::script::{quote_batch, quote_posix};
use fpgabuild_core::{ScriptDialect, Subdir};
use tracing::warn;

use crate::error::{StageError, StageOutcome};
use crate::runner::{StageContext, ToolRunner, ToolStep};
use crate::stage::Stage;

/// Line the PAR report carries when every timing constraint was met.
pub const PAR_CONSTRAINTS_MET: &str = "All constraints were met";

pub async fn generate(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let part = spec.part.part_string();
    let inv = ctx
        .invocation(Stage::Generate, "platgen", "platgen", ctx.layout.root.clone())
        .args([
            "-p",
            part.as_str(),
            "-lang",
            spec.hdl.flag(),
            "-intstyle",
            "silent",
            SYSTEM_MHS,
        ]);
    ToolRunner::run(ctx, ToolStep::new(inv).log("platgen.log")).await
}

/// Synthesize every core wrapper, then the system netlist, then merge the
/// netlists into `implementation/`.
pub async fn synthesize(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let synth = ctx.layout.subdir(Subdir::Synthesis);
    let implementation = ctx.layout.subdir(Subdir::Implementation);

    for core in &spec.cores {
        let script = format!("{}_wrapper_xst.scr", core.instance);
        let report = format!("{}_wrapper_xst.srp", core.instance);
        let inv = ctx
            .invocation(
                Stage::SynthesizeCore,
                &format!("xst_{}", core.instance),
                "xst",
                synth.clone(),
            )
            .args(["-ifn", script.as_str(), "-ofn", report.as_str()]);
        ToolRunner::run(ctx, ToolStep::new(inv).log(report)).await?;
    }

    let inv = ctx
        .invocation(Stage::SynthesizeCore, "xst_system", "xst", synth.clone())
        .args(["-ifn", "system_xst.scr", "-ofn", "system_xst.srp"]);
    ToolRunner::run(ctx, ToolStep::new(inv).log("system_xst.srp")).await?;

    let part = spec.part.part_string();
    let netlist = ctx.layout.file(Subdir::Synthesis, "system.ngc");
    let inv = ctx
        .invocation(Stage::SynthesizeCore, "ngcbuild", "ngcbuild", implementation.clone())
        .args([
            "-p",
            part.as_str(),
            "-sd",
            implementation.as_str(),
            netlist.as_str(),
            "system.ngc",
        ]);
    ToolRunner::run(ctx, ToolStep::new(inv).log("system.blc")).await
}

/// ngdbuild, map and par. The PAR constraint check only warns.
pub async fn implement(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let part = spec.part.part_string();
    let implementation = ctx.layout.subdir(Subdir::Implementation);

    let mut ngdbuild = ctx
        .invocation(Stage::Implement, "ngdbuild", "ngdbuild", implementation.clone())
        .args(["-p", part.as_str(), "-nt", "timestamp"]);
    if !spec.processors.is_empty() {
        ngdbuild = ngdbuild.args(["-bm", "system.bmm"]);
    }
    let ucf = ctx.layout.file(Subdir::Data, SYSTEM_UCF);
    let ngdbuild = ngdbuild.args([
        "-uc",
        ucf.as_str(),
        "system.ngc",
        "system.ngd",
    ]);
    ToolRunner::run(ctx, ToolStep::new(ngdbuild).log("system.bld")).await?;

    let map = ctx
        .invocation(Stage::Implement, "map", "map", implementation.clone())
        .args([
            "-o",
            "system_map.ncd",
            "-w",
            "-pr",
            "b",
            "-ol",
            "high",
            "-timing",
            "-detail",
            "system.ngd",
            "system.pcf",
        ]);
    ToolRunner::run(ctx, ToolStep::new(map).log("system_map.mrp")).await?;

    let par = ctx
        .invocation(Stage::Implement, "par", "par", implementation.clone())
        .args([
            "-w",
            "-ol",
            "high",
            "system_map.ncd",
            "system.ncd",
            "system.pcf",
        ]);
    ToolRunner::run(ctx, ToolStep::new(par).log("system.par")).await?;

    check_par_constraints(ctx).await;
    Ok(())
}

/// Look for [`PAR_CONSTRAINTS_MET`] in the PAR report and warn when absent.
pub async fn check_par_constraints(ctx: &mut StageContext<'_>) -> bool {
    let report = ctx.layout.file(Subdir::Implementation, "system.par");
    let command = match ScriptDialect::for_host(ctx.channel.host_os()) {
        ScriptDialect::Posix => format!(
            "grep -q {} {}",
            quote_posix(PAR_CONSTRAINTS_MET),
            quote_posix(&report)
        ),
        ScriptDialect::Batch => format!(
            "findstr /c:\"{}\" {} >nul",
            PAR_CONSTRAINTS_MET,
            quote_batch(&report)
        ),
    };
    let met = match ctx.channel.run_one_shot(&command).await {
        Ok(out) => out.success(),
        Err(e) => {
            warn!(target_id = %ctx.spec.id, error = %e, "could not read PAR report");
            false
        }
    };
    if !met {
        warn!(target_id = %ctx.spec.id, "PAR report does not confirm all constraints were met");
        ctx.reporter
            .note("Warning: timing constraints were not all met");
    }
    met
}

/// bitgen (or the custom script), then publish `output/<target>.bit`.
pub async fn bitstream(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let implementation = ctx.layout.subdir(Subdir::Implementation);

    let step = match spec.bitstream_script.as_deref() {
        Some(script) => {
            let program = ctx.layout.join(&[script]);
            ToolStep::new(ctx.invocation(
                Stage::Bitstream,
                "bitstream_script",
                &program,
                implementation.clone(),
            ))
        }
        None => ToolStep::new(
            ctx.invocation(Stage::Bitstream, "bitgen", "bitgen", implementation.clone())
                .args(["-w", "-f", "bitgen.ut", "system"]),
        )
        .log("system.bgn"),
    };
    ToolRunner::run(ctx, step).await?;

    let built = ctx.layout.file(Subdir::Implementation, "system.bit");
    let published = ctx.output_file(&format!("{}.bit", spec.id));
    let out = ctx.channel.copy_file(&built, &published).await?;
    if !out.success() {
        return Err(StageError::Command {
            operation: "publish bitstream".to_string(),
            detail: out.stderr.trim().to_string(),
        });
    }
    Ok(())
}

pub fn codelet_elf(proc_instance: &str) -> String {
    format!("{proc_instance}_codelet.elf")
}

/// Compile each processor's boot codelet into `output/`.
pub async fn codelet_compile(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    for proc in &spec.processors {
        let source = ctx
            .layout
            .join(&["bsp", &proc.instance, "codelet", "codelet.c"]);
        let elf = ctx.output_file(&codelet_elf(&proc.instance));
        let inv = ctx
            .invocation(
                Stage::CodeletCompile,
                &format!("codelet_{}", proc.instance),
                &proc.compiler(),
                ctx.layout.root.clone(),
            )
            .args(["-Os", "-o", elf.as_str(), source.as_str()]);
        ToolRunner::run(ctx, ToolStep::new(inv)).await?;
    }
    Ok(())
}

/// data2mem: place every codelet into the bitstream's block RAM.
pub async fn codelet_merge(ctx: &mut StageContext<'_>) -> StageOutcome {
    let spec = ctx.spec;
    let bmm = ctx.layout.file(Subdir::Implementation, "system_bd.bmm");
    let mut inv = ctx
        .invocation(Stage::CodeletMerge, "data2mem", "data2mem", ctx.layout.root.clone())
        .args(["-bm", bmm.as_str()]);
    for proc in &spec.processors {
        inv = inv.args([
            "-bd".to_string(),
            ctx.output_file(&codelet_elf(&proc.instance)),
            "tag".to_string(),
            proc.instance.clone(),
        ]);
    }
    let inv = inv.args([
        "-bt".to_string(),
        ctx.output_file(&format!("{}.bit", spec.id)),
        "-o".to_string(),
        "b".to_string(),
        ctx.output_file(&format!("{}_download.bit", spec.id)),
    ]);
    ToolRunner::run(ctx, ToolStep::new(inv)).await
}
