use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tar::Builder;

/// 一時ファイル名のランダムサフィックスの桁数
const ID_DIGITS: u32 = 6;
/// 名前が衝突した場合の再試行回数
const MAX_NAME_ATTEMPTS: usize = 8;

/// ディスク上のソースアーカイブ
///
/// `keep` が指定されない限り、drop 時にファイルを削除する。
#[derive(Debug)]
pub struct SourceArchive {
    path: PathBuf,
    size: u64,
    keep: bool,
}

impl SourceArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// アーカイブを残すかどうか
    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }
}

impl Drop for SourceArchive {
    fn drop(&mut self) {
        if self.keep {
            tracing::info!("Keeping source archive: {}", self.path.display());
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed source archive: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove source archive {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ソースディレクトリを tar.gz アーカイブとして一時ディレクトリに作成
    pub fn create_archive(source_dir: &Path) -> BuildResult<SourceArchive> {
        Self::create_archive_in(source_dir, &std::env::temp_dir())
    }

    /// 指定ディレクトリに `sourceArchiveNNNNNN.tar.gz` を作成
    pub fn create_archive_in(source_dir: &Path, temp_dir: &Path) -> BuildResult<SourceArchive> {
        if !source_dir.is_dir() {
            return Err(BuildError::SourceNotFound(source_dir.to_path_buf()));
        }

        tracing::debug!("Creating source archive from: {}", source_dir.display());

        let (path, file) = Self::create_temp_file(temp_dir)?;
        // ここから先で失敗してもファイルは drop で削除される
        let mut archive = SourceArchive {
            path,
            size: 0,
            keep: false,
        };

        {
            let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            let mut tar = Builder::new(encoder);

            // 書き込み中のアーカイブ自身は含めない
            let exclude = std::fs::canonicalize(&archive.path)?;
            Self::append_tree(&mut tar, source_dir, Path::new(""), &exclude)?;

            let encoder = tar.into_inner()?;
            let mut writer = encoder.finish()?;
            io::Write::flush(&mut writer)?;
        }

        archive.size = std::fs::metadata(&archive.path)?.len();
        tracing::debug!(
            "Source archive created: {} ({} bytes)",
            archive.path.display(),
            archive.size
        );

        // アーカイブサイズの警告
        Self::check_archive_size(archive.size);

        Ok(archive)
    }

    /// ディレクトリ配下を名前順に再帰的に追加する
    ///
    /// シンボリックリンクは `append_dir_all` と同じく辿る。
    fn append_tree<W: io::Write>(
        tar: &mut Builder<W>,
        dir: &Path,
        prefix: &Path,
        exclude: &Path,
    ) -> BuildResult<()> {
        let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let name = prefix.join(entry.file_name());

            if path.is_dir() {
                tar.append_dir(&name, &path)?;
                Self::append_tree(tar, &path, &name, exclude)?;
            } else if std::fs::canonicalize(&path)? == exclude {
                tracing::debug!("Skipping source archive inside source: {}", path.display());
            } else {
                tar.append_path_with_name(&path, &name)?;
            }
        }
        Ok(())
    }

    /// ランダムな6桁のサフィックスで一時ファイルを新規作成
    fn create_temp_file(temp_dir: &Path) -> BuildResult<(PathBuf, File)> {
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let id: u32 = rng.gen_range(0..10u32.pow(ID_DIGITS));
            let path = Self::archive_path(temp_dir, id);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    tracing::debug!("Setting up temp file {}", path.display());
                    return Ok((path, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(BuildError::Io(e)),
            }
        }

        Err(BuildError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "could not find a free source archive name in {}",
                temp_dir.display()
            ),
        )))
    }

    fn archive_path(temp_dir: &Path, id: u32) -> PathBuf {
        temp_dir.join(format!(
            "sourceArchive{:0width$}.tar.gz",
            id,
            width = ID_DIGITS as usize
        ))
    }

    /// アーカイブサイズのチェックと警告
    fn check_archive_size(size: u64) {
        const MAX_ARCHIVE_SIZE: u64 = 500 * 1024 * 1024; // 500MB

        if size > MAX_ARCHIVE_SIZE {
            tracing::warn!(
                "Source archive is large ({}MB); consider building from a smaller directory",
                size / 1024 / 1024
            );
        }
    }
}
