//! Text shaping for reports: reason lines, type-name normalization, and
//! trace headers.

/// Longest reason line handed to the delivery side, in bytes.
pub const MAX_REASON_LEN: usize = 255;

/// Longest stack-trace text carried in a report, in bytes.
pub const MAX_TRACE_LEN: usize = 10_000;

/// Build the one-line reason for a report.
///
/// The line has the form `<prefix> exception <type> in method
/// <class>.<method>()`. When it would exceed [`MAX_REASON_LEN`] it is
/// shortened in stages: first the class loses its namespace, then the
/// exception type loses its namespace, then the class is dropped entirely.
/// If the line is still too long after all of that it is cut at a character
/// boundary.
pub fn format_reason(caught: bool, exception_type: &str, class: &str, method: &str) -> String {
    let prefix = if caught { "Caught" } else { "Uncaught" };
    let mut exception_name = exception_type;
    let mut class_name = class;

    loop {
        let separator = if class_name.is_empty() { "" } else { "." };
        let mut message = format!(
            "{prefix} exception {exception_name} in method {class_name}{separator}{method}()"
        );
        if message.len() <= MAX_REASON_LEN {
            return message;
        }
        if let Some(dot) = class_name.rfind('.') {
            class_name = &class_name[dot + 1..];
            continue;
        }
        if let Some(dot) = exception_name.rfind('.') {
            exception_name = &exception_name[dot + 1..];
            continue;
        }
        if !class_name.is_empty() {
            class_name = "";
            continue;
        }
        truncate_on_boundary(&mut message, MAX_REASON_LEN);
        return message;
    }
}

/// Normalize a runtime type descriptor to dotted form.
///
/// `Ljava/lang/String;` and `java/lang/String` both become
/// `java.lang.String`; text that is already dotted passes through.
pub fn normalize_type_name(descriptor: &str) -> String {
    let stripped = descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .unwrap_or(descriptor);
    stripped.replace('/', ".")
}

/// First-line prefix of a rendered trace.
pub fn trace_header(thread_name: &str) -> String {
    format!("Exception in thread \"{thread_name}\" ")
}

/// Cut `text` to at most `max` bytes without splitting a character.
pub fn truncate_on_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
