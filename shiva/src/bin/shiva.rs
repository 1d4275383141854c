//
// Shiva ELF interpreter and patch engine
//
//! The interpreter binary, installed as `PT_INTERP` by `shiva-ld`. On
//! startup it verifies the Shiva signature on the target it was handed,
//! reads back the `DT_SHIVA_*` tags the prelinker wrote, userland-execs the
//! target and the real dynamic linker into its own address space, loads the
//! patch object the tags point at, installs its call hooks, and transfers
//! control. None of this returns on success.
use std::fs;
use std::path::{Path, PathBuf};

use argh::FromArgs;
use eyre::{eyre, Result, WrapErr};
use goblin::elf64::dynamic::DT_NULL;
use goblin::elf64::program_header::PT_DYNAMIC;
use kernlog::KernelLog;
use log::{info, Log, LevelFilter};
use nix::unistd::Pid;

use shiva::analyzer::{analyze, BranchType};
use shiva::config::ShivaConfig;
use shiva::elf_view::ElfImage;
use shiva::error::TraceError;
use shiva::mapping::tracker::{MappingTracker, ProcSelfMaps};
use shiva::module::{load, LoadRequest, ModuleFlags};
use shiva::prelink::tags::{
    DT_SHIVA_NEEDED, DT_SHIVA_ORIG_INTERP, DT_SHIVA_SEARCH, EI_PAD, SHIVA_SIGNATURE,
};
use shiva::runtime::{exec, RuntimeContext};
use shiva::trace::{self, BreakpointKind, TraceBreakpoint};

const STACK_BASE: u64 = 0x7f_0000_000000;

#[derive(FromArgs)]
/// Shiva ELF interpreter and patch engine.
struct ShivaArgs {
    /// verbose logging
    #[argh(switch, short = 'V')]
    verbose: bool,

    /// path to the prelinked target executable
    #[argh(positional)]
    target: PathBuf,

    /// arguments passed through to the target
    #[argh(positional)]
    target_args: Vec<String>,
}

fn build_logger(level: LevelFilter) -> stderrlog::StdErrLog {
    let mut log = stderrlog::new();
    log.module("shiva");
    log.verbosity(stderrlog::LogLevelNum::from(level));
    log
}

/// Tries the kernel log first, falling back to stderr; the interpreter is
/// frequently launched by `execve` with no attached terminal.
fn init_logger(level: LevelFilter) {
    if std::env::var("KERNLOG_LEVEL").is_err() {
        std::env::set_var("KERNLOG_LEVEL", level.as_str());
    }
    let logger: Box<dyn Log> = match KernelLog::from_env() {
        Ok(logger) => Box::new(logger),
        Err(_) => Box::new(build_logger(level)),
    };
    log::set_boxed_logger(logger).unwrap();
    log::set_max_level(level);
}

/// Default hook handler installed for every patched callsite: logs the
/// interception and otherwise defers entirely to the module function the
/// breakpoint redirected to (that function decides whether and how to call
/// back through `call_original_n`).
fn log_hook(pid: i32, bp: &TraceBreakpoint) -> Result<(), TraceError> {
    info!("hook fired: {:?} at {:#x} (pid {pid})", bp.kind(), bp.addr());
    Ok(())
}

struct ShivaTags {
    search_path: String,
    patch_basename: String,
    orig_interp: String,
}

/// Reads back the `DT_SHIVA_*` tags the prelinker wrote, after checking the
/// signature magic the prelinker stamped into the ELF identification
/// padding (spec §4 "Shiva-signature magic value check on load").
fn read_shiva_tags(target_path: &Path) -> Result<ShivaTags> {
    let data = fs::read(target_path).wrap_err("reading target executable")?;
    let image = ElfImage::new(data).wrap_err("parsing target executable")?;
    let header = image.header()?;

    let signature = u32::from_le_bytes(header.e_ident[EI_PAD..EI_PAD + 4].try_into().unwrap());
    if signature != SHIVA_SIGNATURE {
        return Err(eyre!(
            "{} was not prelinked by shiva-ld (missing signature)",
            target_path.display()
        ));
    }

    let (_, dyn_ph) = image
        .program_header_of_type(PT_DYNAMIC)?
        .ok_or_else(|| eyre!("{} has no PT_DYNAMIC segment", target_path.display()))?;
    let count = dyn_ph.p_filesz as usize / std::mem::size_of::<goblin::elf64::dynamic::Dyn>();
    let entries = image.read_dynamic_array(dyn_ph.p_offset as usize, count)?;

    let mut search_path = None;
    let mut patch_basename = None;
    let mut orig_interp = None;
    for d in &entries {
        if d.d_tag == DT_NULL as u64 {
            break;
        }
        let offset = dyn_ph.p_offset as usize + (d.d_val - dyn_ph.p_vaddr) as usize;
        let value = image.read_cstr(offset).map(str::to_string);
        if d.d_tag == DT_SHIVA_SEARCH {
            search_path = value;
        } else if d.d_tag == DT_SHIVA_NEEDED {
            patch_basename = value;
        } else if d.d_tag == DT_SHIVA_ORIG_INTERP {
            orig_interp = value;
        }
    }

    Ok(ShivaTags {
        search_path: search_path.ok_or_else(|| eyre!("missing DT_SHIVA_SEARCH"))?,
        patch_basename: patch_basename.ok_or_else(|| eyre!("missing DT_SHIVA_NEEDED"))?,
        orig_interp: orig_interp.ok_or_else(|| eyre!("missing DT_SHIVA_ORIG_INTERP"))?,
    })
}

fn run() -> Result<()> {
    let args: ShivaArgs = argh::from_env();
    init_logger(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });

    let tags = read_shiva_tags(&args.target)?;
    info!(
        "loaded shiva tags: search={} patch={} orig_interp={}",
        tags.search_path, tags.patch_basename, tags.orig_interp
    );

    let mut config = ShivaConfig::from_env();
    config.module_search_path = PathBuf::from(&tags.search_path);

    let tracker = MappingTracker::from_self_maps(&ProcSelfMaps)?;
    let mut ctx = RuntimeContext::new(tracker);

    let module_path = config.module_search_path.join(&tags.patch_basename);

    let target_data = fs::read(&args.target)?;
    let target_image = ElfImage::new(target_data)?;
    let target_header = target_image.header()?;
    let mut branch_sites = Vec::new();
    for sh in target_image.section_headers()? {
        if sh.sh_flags & shiva::elf_view::section_header::SHF_EXECINSTR as u64 == 0 {
            continue;
        }
        let start = sh.sh_offset as usize;
        let end = start + sh.sh_size as usize;
        let arch = if target_header.e_machine == goblin::elf64::header::EM_AARCH64 {
            shiva::analyzer::disasm::TargetArch::Aarch64
        } else {
            shiva::analyzer::disasm::TargetArch::X86_64
        };
        let sites = analyze(&target_image.data[start..end], config.target_base + sh.sh_addr, arch)?;
        branch_sites.extend(sites);
    }
    ctx.record_branch_sites(branch_sites);

    let target_dynsyms = std::collections::HashMap::new();
    let shiva_exports = std::collections::HashMap::new();
    let request = LoadRequest {
        path: &module_path,
        text_base: config.target_base + 0x0100_0000,
        data_base: config.target_base + 0x0200_0000,
        plt_base: config.target_base + 0x0300_0000,
        got_base: config.target_base + 0x0400_0000,
        flags: ModuleFlags::RUNTIME | ModuleFlags::INIT,
        shiva_exports: &shiva_exports,
        target_dynsyms: &target_dynsyms,
        branch_sites: &ctx.branch_sites,
    };
    let module = load(request, &mut ctx.tracker).wrap_err("loading patch module")?;

    for kind in [BreakpointKind::Call, BreakpointKind::Jmp] {
        trace::register_handler(&mut ctx, kind, log_hook);
    }

    // A patch function is exported under the name of the target function it
    // replaces; match each resolved, named callsite against the module's
    // exports and redirect the ones it actually patches.
    let sites = ctx.branch_sites.clone();
    for site in &sites {
        if !site.is_resolved() {
            continue;
        }
        let kind = match site.branch_type {
            BranchType::Call => BreakpointKind::Call,
            BranchType::Jmp => BreakpointKind::Jmp,
            BranchType::Ret => continue,
        };
        let Some(symbol) = &site.symbol else { continue };
        let Some(replacement) = module.resolve_export(symbol) else { continue };

        trace::set_breakpoint(&mut ctx, Pid::this(), kind, site.site_vaddr, replacement, Some(symbol.clone()))
            .wrap_err_with(|| format!("installing hook for {symbol} at {:#x}", site.site_vaddr))?;
    }

    let envp: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let mut argv = vec![args.target.to_string_lossy().into_owned()];
    argv.extend(args.target_args);

    exec(
        &mut ctx,
        &args.target,
        Path::new(&tags.orig_interp),
        config.target_base,
        config.ldso_base,
        STACK_BASE,
        config.stack_size(),
        &argv,
        &envp,
    )?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
