use quickbuild_cloud::CloudError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build service error: {0}")]
    Service(#[source] CloudError),

    #[error("Source upload failed: {0}")]
    Transfer(#[source] CloudError),

    #[error("Invalid build configuration: {0}")]
    Validation(String),

    #[error("Build was canceled")]
    Canceled,
}

impl BuildError {
    /// ビルドサービス呼び出しのエラーを分類
    ///
    /// リクエスト自体の不備は送信前に検出されるため Validation として扱う
    pub fn service(error: CloudError) -> Self {
        match error {
            CloudError::InvalidRequest(msg) => BuildError::Validation(msg),
            other => BuildError::Service(other),
        }
    }

    pub fn transfer(error: CloudError) -> Self {
        BuildError::Transfer(error)
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::SourceNotFound(path) => {
                format!(
                    "ソースディレクトリが見つかりません: {}\n\
                     \n\
                     --source で既存のディレクトリを指定してください。",
                    path.display()
                )
            }
            BuildError::Validation(msg) => {
                format!(
                    "ビルド設定が不正です: {}\n\
                     \n\
                     Dockerfile はソースディレクトリ配下に置く必要があります。",
                    msg
                )
            }
            BuildError::Service(CloudError::AuthenticationFailed(msg)) => {
                format!(
                    "ビルドサービスの認証に失敗しました: {}\n\
                     \n\
                     解決方法:\n\
                     1. QUICKBUILD_ACCESS_TOKEN が有効か確認してください\n\
                     2. サブスクリプションとリソースグループの指定を確認してください",
                    msg
                )
            }
            BuildError::Transfer(CloudError::TokenExpired(at)) => {
                format!(
                    "アップロード用トークンの有効期限が切れています ({})\n\
                     \n\
                     もう一度ビルドを実行してください。",
                    at
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
