//! Display formatting shared by every surface
//!
//! Sanitizes server-controlled text before it reaches the terminal and builds
//! the outcome and error messages shown in rows, banners and modals.

use crate::api::ApiError;

/// Shown when the server fails without saying why, or says nothing parseable.
pub const GENERIC_ERROR: &str = "The management server could not complete the request.";

/// Escapes `<` and `>` so stored names and error text can never be read as markup.
pub fn escape_markup(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Every server or user string rendered by the UI passes through here.
///
/// Markup is escaped and control characters are dropped, which keeps escape
/// sequences stored in resource names from reaching the terminal.
pub fn display_safe(value: &str) -> String {
    escape_markup(value)
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect()
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut shortened: String = value.chars().take(keep).collect();
    shortened.push('…');
    shortened
}

pub fn success_message(label: &str, note: Option<&str>) -> String {
    match note {
        Some(note) if !note.is_empty() => format!("{} succeeded. {}", label, display_safe(note)),
        _ => format!("{} succeeded", label),
    }
}

pub fn failure_message(label: &str, error_text: &str) -> String {
    let reason = if error_text.trim().is_empty() {
        GENERIC_ERROR.to_string()
    } else {
        display_safe(error_text)
    };
    format!("{} failed: {}", label, reason)
}

/// Title, details and suggestions for the error modal of one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub title: String,
    pub details: String,
    pub suggestions: Vec<String>,
}

pub fn error_notice(err: &ApiError) -> ErrorNotice {
    match err {
        ApiError::Unauthorized => ErrorNotice {
            title: "Session Expired".to_string(),
            details: "Your session has expired or is no longer valid.".to_string(),
            suggestions: vec!["Log in again to continue".to_string()],
        },
        ApiError::Network(details) => ErrorNotice {
            title: "Management Server Unreachable".to_string(),
            details: display_safe(details),
            suggestions: vec![
                "Check the --endpoint URL".to_string(),
                "Verify the management server is running".to_string(),
                "Check network connectivity to the server".to_string(),
            ],
        },
        ApiError::Application { code, text } => ErrorNotice {
            title: format!("Request Failed ({})", code),
            details: if text.trim().is_empty() {
                GENERIC_ERROR.to_string()
            } else {
                display_safe(text)
            },
            suggestions: Vec::new(),
        },
        ApiError::Malformed => ErrorNotice {
            title: "Unexpected Response".to_string(),
            details: GENERIC_ERROR.to_string(),
            suggestions: vec!["Check that the endpoint points at the API".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markup() {
        assert_eq!(
            escape_markup("<script>alert(1)</script>"),
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
        assert_eq!(escape_markup("web-01"), "web-01");
    }

    #[test]
    fn test_display_safe_drops_terminal_escapes() {
        assert_eq!(display_safe("vm\u{1b}[31m-red"), "vm[31m-red");
        assert_eq!(display_safe("a<b"), "a&lt;b");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-name", 6), "a-ver…");
    }

    #[test]
    fn test_failure_message_falls_back_to_generic_text() {
        assert_eq!(
            failure_message("Start Instance", ""),
            format!("Start Instance failed: {}", GENERIC_ERROR)
        );
        assert_eq!(
            failure_message("Start Instance", "insufficient capacity"),
            "Start Instance failed: insufficient capacity"
        );
    }

    #[test]
    fn test_error_notice_for_empty_application_error() {
        let notice = error_notice(&ApiError::Application {
            code: 530,
            text: String::new(),
        });
        assert_eq!(notice.title, "Request Failed (530)");
        assert_eq!(notice.details, GENERIC_ERROR);
    }
}
