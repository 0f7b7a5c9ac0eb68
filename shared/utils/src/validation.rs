use crate::error::{PricebookError, PricebookResult};
use validator::ValidationErrors;

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match error.code.as_ref() {
                "length" => format!("Length validation failed for field '{}'", field),
                "range" => format!("Value out of range for field '{}'", field),
                "required" => format!("Field '{}' is required", field),
                code => format!("Validation failed for field '{}': {}", field, code),
            };
            messages.push(message);
        }
    }

    // nested config sections report under their own key
    for (section, kind) in errors.errors() {
        if let validator::ValidationErrorsKind::Struct(inner) = kind {
            let nested = format_validation_errors(inner);
            if !nested.is_empty() {
                messages.push(format!("{}: {}", section, nested));
            }
        }
    }

    messages.join(", ")
}

pub fn file_extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn validate_file_size(file_size: u64, max_size: u64) -> PricebookResult<()> {
    if file_size > max_size {
        return Err(PricebookError::too_large(file_size, max_size));
    }

    Ok(())
}

pub fn validate_uuid(uuid_str: &str) -> PricebookResult<uuid::Uuid> {
    uuid::Uuid::parse_str(uuid_str).map_err(|_| PricebookError::validation("uuid", "Invalid UUID format"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension_is_lowercased() {
        assert_eq!(file_extension("Harga Maret.XLSX").as_deref(), Some("xlsx"));
        assert_eq!(file_extension("no_extension"), None);
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(10, 10).is_ok());
        let err = validate_file_size(11, 10).unwrap_err();
        assert_eq!(err.http_status_code(), 413);
    }

    #[test]
    fn test_validate_uuid() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(validate_uuid(&id.to_string()).unwrap(), id);
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}
