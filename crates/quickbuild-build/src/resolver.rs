use crate::error::{BuildError, BuildResult};
use std::path::{Component, Path, PathBuf};

/// Dockerfile のパスを解決
///
/// 明示的な指定がなければ `{source}/Dockerfile` を使う
pub fn resolve_dockerfile(source_dir: &Path, explicit: Option<&Path>) -> BuildResult<PathBuf> {
    let path = match explicit {
        Some(p) => absolutize(p)?,
        None => source_dir.join("Dockerfile"),
    };

    if !path.is_file() {
        return Err(BuildError::Validation(format!(
            "Dockerfile not found: {}",
            path.display()
        )));
    }

    Ok(path)
}

/// ソースルートからの Dockerfile の相対パス (`./` 付き POSIX 形式)
///
/// 相対パスはカレントディレクトリ基準で絶対化し、
/// ファイルシステムに触れずに字句的に正規化して比較する。
/// Dockerfile がソースルート配下にない場合は Validation エラー。
pub fn relative_dockerfile_path(source_dir: &Path, dockerfile: &Path) -> BuildResult<String> {
    let root = normalize(&absolutize(source_dir)?);
    let file = normalize(&absolutize(dockerfile)?);

    let relative = file.strip_prefix(&root).map_err(|_| {
        BuildError::Validation(format!(
            "Source code path {} must be a parent of the Dockerfile path {}",
            source_dir.display(),
            dockerfile.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    BuildError::Validation(format!(
                        "Dockerfile path is not valid UTF-8: {}",
                        dockerfile.display()
                    ))
                })?;
                parts.push(part);
            }
            _ => {
                return Err(BuildError::Validation(format!(
                    "Unexpected component in Dockerfile path: {}",
                    dockerfile.display()
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(BuildError::Validation(format!(
            "Dockerfile path {} points at the source directory itself",
            dockerfile.display()
        )));
    }

    Ok(format!("./{}", parts.join("/")))
}

/// カレントディレクトリ基準の絶対パス (空のパスはカレントディレクトリ)
fn absolutize(path: &Path) -> BuildResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Ok(std::env::current_dir()?);
    }
    Ok(std::path::absolute(path)?)
}

/// `.` を除去し `..` を畳み込む字句的な正規化
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // ルートより上には出ない
                if !normalized.pop() && !path.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_relative_dockerfile_at_root() {
        let rel = relative_dockerfile_path(
            Path::new("/work/app"),
            Path::new("/work/app/Dockerfile"),
        )
        .unwrap();
        assert_eq!(rel, "./Dockerfile");
    }

    #[test]
    fn test_relative_dockerfile_nested() {
        let rel = relative_dockerfile_path(
            Path::new("/work/app/"),
            Path::new("/work/app/./docker/prod/Dockerfile.prod"),
        )
        .unwrap();
        assert_eq!(rel, "./docker/prod/Dockerfile.prod");
    }

    #[test]
    fn test_sibling_with_common_prefix_is_rejected() {
        // 文字列の前方一致ではなくパス要素で比較する
        let result = relative_dockerfile_path(
            Path::new("/work/app"),
            Path::new("/work/app2/Dockerfile"),
        );
        assert!(matches!(result, Err(BuildError::Validation(_))));
    }

    #[test]
    fn test_escaping_dockerfile_is_rejected() {
        for dockerfile in ["/work/Dockerfile", "/work/app/../Dockerfile", "/other/Dockerfile"] {
            let result = relative_dockerfile_path(Path::new("/work/app"), Path::new(dockerfile));
            assert!(
                matches!(result, Err(BuildError::Validation(_))),
                "accepted {}",
                dockerfile
            );
        }
    }

    #[test]
    fn test_source_dir_itself_is_rejected() {
        let result = relative_dockerfile_path(Path::new("/work/app"), Path::new("/work/app/."));
        assert!(matches!(result, Err(BuildError::Validation(_))));
    }

    #[test]
    fn test_relative_source_dir_with_absolute_dockerfile() {
        let cwd = std::env::current_dir().unwrap();
        let rel = relative_dockerfile_path(
            Path::new("app"),
            &cwd.join("app").join("docker").join("Dockerfile"),
        )
        .unwrap();
        assert_eq!(rel, "./docker/Dockerfile");

        let rel = relative_dockerfile_path(Path::new("."), &cwd.join("Dockerfile")).unwrap();
        assert_eq!(rel, "./Dockerfile");
    }

    #[test]
    fn test_relative_source_dir_with_relative_dockerfile() {
        let rel =
            relative_dockerfile_path(Path::new("./app/"), Path::new("app/Dockerfile")).unwrap();
        assert_eq!(rel, "./Dockerfile");

        let result = relative_dockerfile_path(Path::new("app"), Path::new("other/Dockerfile"));
        assert!(matches!(result, Err(BuildError::Validation(_))));
    }

    #[test]
    fn test_resolve_dockerfile_explicit_relative() {
        let cwd = std::env::current_dir().unwrap();
        let source = tempfile::tempdir_in(&cwd).unwrap();
        fs::write(source.path().join("Dockerfile"), "FROM alpine").unwrap();
        let relative_source = source.path().strip_prefix(&cwd).unwrap();

        let resolved = resolve_dockerfile(
            relative_source,
            Some(&relative_source.join("Dockerfile")),
        )
        .unwrap();
        assert!(resolved.is_absolute());

        let rel = relative_dockerfile_path(relative_source, &resolved).unwrap();
        assert_eq!(rel, "./Dockerfile");
    }

    #[test]
    fn test_resolve_dockerfile_default() {
        let temp_dir = tempdir().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let resolved = resolve_dockerfile(temp_dir.path(), None).unwrap();
        assert_eq!(resolved, dockerfile);
    }

    #[test]
    fn test_resolve_dockerfile_explicit() {
        let temp_dir = tempdir().unwrap();
        let dockerfile = temp_dir.path().join("build.dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let resolved = resolve_dockerfile(temp_dir.path(), Some(&dockerfile)).unwrap();
        assert_eq!(resolved, dockerfile);
    }

    #[test]
    fn test_resolve_dockerfile_missing() {
        let temp_dir = tempdir().unwrap();
        let result = resolve_dockerfile(temp_dir.path(), None);
        assert!(matches!(result, Err(BuildError::Validation(_))));
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,8}".prop_filter("not a dot segment", |s| s != "." && s != "..")
    }

    /// `/` 起点またはカレントディレクトリ起点のパス
    fn base(rooted: bool) -> PathBuf {
        if rooted {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    }

    proptest! {
        #[test]
        fn prop_relative_path_round_trips(
            rooted in any::<bool>(),
            absolute_dockerfile in any::<bool>(),
            root in prop::collection::vec(segment(), 0..4),
            inner in prop::collection::vec(segment(), 1..5),
        ) {
            let source = root.iter().fold(base(rooted), |p, s| p.join(s));
            let dockerfile = inner.iter().fold(source.clone(), |p, s| p.join(s));
            let dockerfile = if absolute_dockerfile {
                std::path::absolute(&dockerfile).unwrap()
            } else {
                dockerfile
            };

            let rel = relative_dockerfile_path(&source, &dockerfile).unwrap();
            prop_assert!(rel.starts_with("./"));
            let expected = inner.iter().fold(PathBuf::from("."), |p, s| p.join(s));
            prop_assert_eq!(normalize(Path::new(&rel)), normalize(&expected));
        }

        #[test]
        fn prop_non_descendants_are_rejected(
            rooted in any::<bool>(),
            root in prop::collection::vec(segment(), 1..4),
            other in prop::collection::vec(segment(), 1..4),
        ) {
            let source = root.iter().fold(base(rooted), |p, s| p.join(s));
            // ルートの兄弟ディレクトリ配下
            let sibling = format!("{}-other", root[root.len() - 1]);
            let parent = source.parent().unwrap().join(sibling);
            let dockerfile = other.iter().fold(parent, |p, s| p.join(s));

            prop_assert!(matches!(
                relative_dockerfile_path(&source, &dockerfile),
                Err(BuildError::Validation(_))
            ));
        }
    }
}
