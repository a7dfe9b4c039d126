use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFileType {
    #[default]
    Original,
    Thumbnail,
    Page,
}

impl Display for DownloadFileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DownloadFileType::Original => write!(f, "original"),
            DownloadFileType::Thumbnail => write!(f, "thumbnail"),
            DownloadFileType::Page => write!(f, "page"),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadUrlQuery {
    pub score_id: Uuid,
    /// original (default), thumbnail or page
    #[serde(default)]
    pub file_type: DownloadFileType,
    /// 1-based page number; required for, and only allowed with, file_type=page
    pub page: Option<i32>,
}

/// What the client asked to download, after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTarget {
    Original,
    Thumbnail,
    Page(i32),
}

impl DownloadUrlQuery {
    pub fn target(&self) -> Result<DownloadTarget, AppError> {
        match (self.file_type, self.page) {
            (DownloadFileType::Page, Some(page)) if page >= 1 => Ok(DownloadTarget::Page(page)),
            (DownloadFileType::Page, Some(_)) => Err(AppError::Validation(
                "page must be greater than or equal to 1".to_string(),
            )),
            (DownloadFileType::Page, None) => Err(AppError::Validation(
                "page is required when file_type is 'page'".to_string(),
            )),
            (_, Some(_)) => Err(AppError::Validation(
                "page is only allowed when file_type is 'page'".to_string(),
            )),
            (DownloadFileType::Original, None) => Ok(DownloadTarget::Original),
            (DownloadFileType::Thumbnail, None) => Ok(DownloadTarget::Thumbnail),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub s3_key: String,
    pub expires_in: u64,
    pub method: String,
    pub file_type: DownloadFileType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(file_type: DownloadFileType, page: Option<i32>) -> DownloadUrlQuery {
        DownloadUrlQuery {
            score_id: Uuid::new_v4(),
            file_type,
            page,
        }
    }

    #[test]
    fn page_requires_page_number() {
        let err = query(DownloadFileType::Page, None).target().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(
            query(DownloadFileType::Page, Some(3)).target().unwrap(),
            DownloadTarget::Page(3)
        );
        assert!(query(DownloadFileType::Page, Some(0)).target().is_err());
    }

    #[test]
    fn page_number_rejected_for_other_types() {
        assert!(query(DownloadFileType::Original, Some(1)).target().is_err());
        assert!(query(DownloadFileType::Thumbnail, Some(2)).target().is_err());
    }

    #[test]
    fn defaults_to_original() {
        let q: DownloadUrlQuery =
            serde_json::from_value(serde_json::json!({ "score_id": Uuid::nil() })).unwrap();
        assert_eq!(q.target().unwrap(), DownloadTarget::Original);
    }
}
