//! イメージ名の検証
//!
//! ビルドリクエストに載せる `name:tag` 形式のイメージ名を正規化します。

use crate::error::{BuildError, BuildResult};

/// イメージ名とタグを分離
///
/// # Examples
/// - `myregistry.azurecr.io/app:v1.0` -> `("myregistry.azurecr.io/app", "v1.0")`
/// - `app` -> `("app", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    // 最後の : を探す
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // レジストリのポート番号の後には必ず / が続く
        if !potential_tag.contains('/') {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::Validation("image tag is empty".to_string()));
    }

    if tag.len() > 128 {
        return Err(BuildError::Validation(format!(
            "image tag too long ({} characters, max 128)",
            tag.len()
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::Validation(format!(
            "image tag must not start with '.' or '-': {}",
            tag
        )));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(BuildError::Validation(format!(
            "invalid character '{}' in image tag: {}",
            c, tag
        )));
    }

    Ok(())
}

/// `name:tag` 形式に正規化（タグ省略時は latest）
pub fn normalize_image_name(image: &str) -> BuildResult<String> {
    let image = image.trim();
    if image.is_empty() {
        return Err(BuildError::Validation("image name is empty".to_string()));
    }

    let (name, tag) = split_image_tag(image);
    if name.is_empty()
        || name.ends_with('/')
        || name.ends_with(':')
        || name.chars().any(char::is_whitespace)
    {
        return Err(BuildError::Validation(format!(
            "invalid image name: {}",
            image
        )));
    }
    validate_tag(&tag)?;

    Ok(format!("{}:{}", name, tag))
}

/// 複数のイメージ名を正規化（少なくとも1つ必要）
pub fn normalize_image_names<S: AsRef<str>>(images: &[S]) -> BuildResult<Vec<String>> {
    if images.is_empty() {
        return Err(BuildError::Validation(
            "at least one image name is required (name:tag)".to_string(),
        ));
    }
    images
        .iter()
        .map(|image| normalize_image_name(image.as_ref()))
        .collect()
}
