//! Fichier d'erreur fatale : un fichier horodaté par échec de démarrage

use chrono::Local;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const FRAME: &str = "******************************************************************************";

pub fn render_error(error: &anyhow::Error) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", FRAME);
    let _ = writeln!(out, "{}", error);
    for cause in error.chain().skip(1) {
        let _ = writeln!(out, "  caused by: {}", cause);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{:?}", error);
    let _ = writeln!(out, "{}", FRAME);
    out
}

/// Écrit l'erreur dans `<dir>/<horodatage>.txt` ; le répertoire est créé au besoin
pub fn write_error_log(dir: impl AsRef<Path>, error: &anyhow::Error) -> std::io::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("{}.txt", Local::now().format("%Y_%m_%d_%H_%M_%S_%3f")));
    std::fs::write(&path, render_error(error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_log_is_framed_and_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/logs");
        let error = Err::<(), _>(std::io::Error::other("connection refused"))
            .context("device discovery failed")
            .unwrap_err();

        let path = write_error_log(&dir, &error).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert!(path.starts_with(&dir));
        assert!(content.starts_with(FRAME));
        assert!(content.trim_end().ends_with(FRAME));
        assert!(content.contains("device discovery failed"));
        assert!(content.contains("caused by: connection refused"));
    }
}
