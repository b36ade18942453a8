//! `sealgated keygen`: create a local KEK file

use anyhow::{Context, Result};
use sealgate_pipeline::Kek;
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::Path;

/// Write a fresh encoded KEK keyset to `path` with mode 0600.
pub fn write_kek_file(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it (data wrapped under the old KEK becomes unreadable)",
            path.display()
        );
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let encoded = Kek::generate_encoded();
    let mut file = options
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(encoded.expose_secret().as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    file.write_all(b"\n")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }

    tracing::info!(path = %path.display(), "KEK written");
    Ok(())
}
