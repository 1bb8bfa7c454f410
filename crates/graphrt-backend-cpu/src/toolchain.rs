//! Invoking the system C compiler and caching its output on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use graphrt::{BackendError, BackendResult};

use crate::options::CpuOptions;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        ".dylib"
    } else if cfg!(target_os = "windows") {
        ".dll"
    } else {
        ".so"
    }
}

/// True when `compiler` can be executed.
pub(crate) fn compiler_available(compiler: &str) -> bool {
    Command::new(compiler)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn io_error(context: &str, path: &Path, err: std::io::Error) -> BackendError {
    BackendError::execution(format!("{context} {}: {err}", path.display()))
}

/// Unique sibling path for writing before an atomic rename.
fn staging_path(target: &Path) -> PathBuf {
    let serial = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.{serial}.tmp", std::process::id()));
    target.with_file_name(name)
}

/// Returns the shared object for `source`, compiling it unless a library with
/// the same fingerprint is already cached.
/// Source and shared-object paths for a fingerprint in the cache directory.
pub(crate) fn artifact_paths(options: &CpuOptions, fingerprint: u64) -> [PathBuf; 2] {
    let cache_dir = &options.cache_dir;
    [
        cache_dir.join(format!("function_{fingerprint:016x}.c")),
        cache_dir.join(format!("libgraphrt_cpu_{fingerprint:016x}{}", lib_ext())),
    ]
}

pub(crate) fn build_shared_object(
    options: &CpuOptions,
    source: &str,
    fingerprint: u64,
) -> BackendResult<PathBuf> {
    let cache_dir = &options.cache_dir;
    fs::create_dir_all(cache_dir).map_err(|err| io_error("cannot create", cache_dir, err))?;

    let [src_path, lib_path] = artifact_paths(options, fingerprint);
    if lib_path.exists() {
        tracing::debug!(path = %lib_path.display(), "reusing cached shared object");
        return Ok(lib_path);
    }

    let staged_src = staging_path(&src_path);
    fs::write(&staged_src, source).map_err(|err| io_error("cannot write", &staged_src, err))?;
    fs::rename(&staged_src, &src_path).map_err(|err| io_error("cannot rename", &staged_src, err))?;

    let staged_lib = staging_path(&lib_path);
    let result = compile_c(options, &src_path, &staged_lib)
        .and_then(|()| fs::rename(&staged_lib, &lib_path).map_err(|err| io_error("cannot rename", &staged_lib, err)));
    if result.is_err() {
        let _ = fs::remove_file(&staged_lib);
    }
    result.map(|()| lib_path)
}

fn compile_c(options: &CpuOptions, src: &Path, out: &Path) -> BackendResult<()> {
    let mut cmd = Command::new(&options.compiler);
    if cfg!(target_os = "macos") {
        cmd.arg("-dynamiclib");
    } else {
        cmd.arg("-shared").arg("-fPIC");
    }
    cmd.arg(&options.opt_level)
        .arg("-std=c11")
        .arg("-fwrapv")
        .arg("-fno-strict-aliasing")
        .arg("-o")
        .arg(out)
        .arg(src);
    if !cfg!(target_os = "windows") {
        cmd.arg("-lm");
    }

    tracing::debug!(compiler = %options.compiler, source = %src.display(), "compiling generated C");
    let output = cmd.output().map_err(|err| {
        BackendError::unavailable(
            crate::CPU_IDENTITY,
            format!("cannot run C compiler {:?}: {err}", options.compiler),
        )
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::execution(format!("C compiler failed: {stderr}")));
    }
    Ok(())
}
