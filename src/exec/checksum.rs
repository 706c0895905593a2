// src/exec/checksum.rs

//! `blake3` checksum sidecars (`<artifact>.b3`).

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

pub const SIDECAR_EXT: &str = "b3";

pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name: OsString = artifact.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXT);
    PathBuf::from(name)
}

pub fn hash_reader(mut reader: impl Read) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash `artifact` and write `<hex>  <file name>` to its sidecar.
pub fn write_sidecar(fs: &dyn FileSystem, artifact: &Path) -> Result<String> {
    let reader = fs
        .open_read(artifact)
        .with_context(|| format!("opening {:?} for checksum", artifact))?;
    let hash = hash_reader(reader)?;
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = sidecar_path(artifact);
    fs.write(&sidecar, format!("{hash}  {name}\n").as_bytes())?;
    debug!(artifact = ?artifact, hash = %hash, "wrote checksum sidecar");
    Ok(hash)
}
