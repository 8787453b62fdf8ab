use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters escaped when a stored name is placed in a URL path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Escapes text for interpolation into HTML element content or quoted attributes
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

const ERROR_PAGE_STYLE: &str = "\
body { font-family: sans-serif; margin: 40px; color: #333; }
.error-container { max-width: 800px; margin: 0 auto; }
h1 { color: #c0392b; }
pre { background: #f6f6f6; padding: 16px; border-left: 4px solid #c0392b; overflow-x: auto; }
";

fn error_page(title: &str, heading: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
    <div class="error-container">
        <h1>{heading}</h1>
        {body}
        <p><a href="/">&larr; Back to Home</a></p>
    </div>
</body>
</html>
"#,
        title = escape(title),
        style = ERROR_PAGE_STYLE,
        heading = escape(heading),
        body = body,
    )
}

/// Page shown when the requested upload does not exist
pub fn not_found_page(filename: &str) -> String {
    error_page(
        "Error - File Not Found",
        "File Not Found",
        &format!(
            "<p>The file <strong>{}</strong> could not be found.</p>\n        <p>Please upload the file again.</p>",
            escape(filename)
        ),
    )
}

/// Page shown when loading or evaluating the dataset fails
pub fn validation_error_page(message: &str) -> String {
    error_page(
        "Validation Error",
        "Validation Error",
        &format!(
            "<p>An error occurred during validation:</p>\n        <pre>{}</pre>",
            escape(message)
        ),
    )
}
