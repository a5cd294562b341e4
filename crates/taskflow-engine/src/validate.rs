use taskflow_core::task::{Attachment, MAX_TITLE_LEN};

use crate::error::EngineError;

/// Attachment size ceiling: 10 MiB.
pub const MAX_ATTACHMENT_SIZE: i64 = 10 * 1024 * 1024;

/// Mime types accepted for attachments. The upstream upload step enforces
/// the same list; the engine re-checks so a rejected descriptor can never
/// reach the store.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

pub fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(EngineError::Validation(format!(
            "title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_attachment(attachment: &Attachment) -> Result<(), EngineError> {
    if !ALLOWED_MIME_TYPES.contains(&attachment.mime_type.as_str()) {
        return Err(EngineError::Validation(format!(
            "file type not allowed: {}",
            attachment.mime_type
        )));
    }
    if attachment.size <= 0 {
        return Err(EngineError::Validation(
            "attachment size must be positive".to_string(),
        ));
    }
    if attachment.size > MAX_ATTACHMENT_SIZE {
        return Err(EngineError::Validation(format!(
            "attachment exceeds {MAX_ATTACHMENT_SIZE} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(size: i64) -> Attachment {
        Attachment {
            url: "https://blobs.example/f.pdf".to_string(),
            name: "f.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size,
        }
    }

    #[test]
    fn title_rules() {
        assert!(validate_title("ok").is_ok());
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"x".repeat(500)).is_ok());
        assert!(validate_title(&"x".repeat(501)).is_err());
    }

    #[test]
    fn attachment_size_ceiling() {
        assert!(validate_attachment(&pdf(MAX_ATTACHMENT_SIZE)).is_ok());
        assert!(validate_attachment(&pdf(MAX_ATTACHMENT_SIZE + 1)).is_err());
        assert!(validate_attachment(&pdf(0)).is_err());
    }

    #[test]
    fn attachment_mime_allow_list() {
        let mut exe = pdf(100);
        exe.mime_type = "application/x-msdownload".to_string();
        let err = validate_attachment(&exe).unwrap_err();
        assert_eq!(err.kind(), "validation");

        for mime in ALLOWED_MIME_TYPES {
            let mut ok = pdf(100);
            ok.mime_type = mime.to_string();
            assert!(validate_attachment(&ok).is_ok(), "rejected {mime}");
        }
    }
}
