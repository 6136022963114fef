use std::path::{Path, PathBuf};

use super::error::ReceiverError;

// confirms a `filename=` value is already a bare name -- a single normal
// path component -- rather than silently rewriting anything that looks
// like a traversal attempt down to its final component. `../../etc/passwd`,
// an absolute path, or `..` itself are all refused outright
pub fn sanitize_filename(filename: &str) -> Result<&str, ReceiverError> {
    use std::path::Component;

    let path = Path::new(filename);
    let mut components = path.components();

    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == path.as_os_str() => name
            .to_str()
            .filter(|name| !name.is_empty())
            .ok_or(ReceiverError::InvalidFilePath),
        _ => Err(ReceiverError::InvalidFilePath),
    }
}

// picks the path a part's file will be written to
//
// if `on_header` returns `Some(path)`, that path is used as-is with no
// collision check -- the caller took responsibility for it. otherwise we
// join the sanitized filename onto output_directory and, if that path
// already exists, try "stem(1).ext", "stem(2).ext", ... until a free name
// is found, matching generate_file_path in the downloader this module is
// modeled on
pub async fn resolve_destination(
    filename: &str,
    output_directory: &Path,
    override_path: Option<PathBuf>,
) -> Result<PathBuf, ReceiverError> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    let name = sanitize_filename(filename)?;
    let candidate = output_directory.join(name);

    if !candidate
        .try_exists()
        .map_err(|_| ReceiverError::InvalidFilePath)?
    {
        return Ok(candidate);
    }

    let stem = candidate
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or(ReceiverError::InvalidFilePath)?
        .to_owned();

    let ext = candidate.extension().and_then(|e| e.to_str());

    let mut n: u64 = 1;

    loop {
        let name = match ext {
            Some(ext) => format!("{stem}({n}).{ext}"),
            None => format!("{stem}({n})"),
        };

        let next = output_directory.join(name);

        if !next
            .try_exists()
            .map_err(|_| ReceiverError::InvalidFilePath)?
        {
            return Ok(next);
        }

        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(matches!(
            sanitize_filename("../../etc/passwd"),
            Err(ReceiverError::InvalidFilePath)
        ));
        assert!(matches!(sanitize_filename(".."), Err(ReceiverError::InvalidFilePath)));
        assert!(matches!(sanitize_filename(""), Err(ReceiverError::InvalidFilePath)));
    }

    #[test]
    fn sanitize_rejects_absolute_path() {
        assert!(matches!(
            sanitize_filename("/etc/passwd"),
            Err(ReceiverError::InvalidFilePath)
        ));
    }

    #[test]
    fn sanitize_accepts_bare_filename() {
        assert_eq!(sanitize_filename("report.csv").unwrap(), "report.csv");
    }

    #[tokio::test]
    async fn resolve_joins_plain_filename_when_free() {
        let dir = tempdir();
        let path = resolve_destination("report.csv", dir.path(), None)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("report.csv"));
    }

    #[tokio::test]
    async fn resolve_avoids_collision_with_numbered_suffix() {
        let dir = tempdir();
        std::fs::write(dir.path().join("report.csv"), b"existing").unwrap();

        let path = resolve_destination("report.csv", dir.path(), None)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("report(1).csv"));
    }

    #[tokio::test]
    async fn resolve_honors_override_path_without_collision_check() {
        let dir = tempdir();
        std::fs::write(dir.path().join("taken.csv"), b"existing").unwrap();

        let path = resolve_destination(
            "whatever.csv",
            dir.path(),
            Some(dir.path().join("taken.csv")),
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("taken.csv"));
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("failed to create tempdir for test")
    }
}
