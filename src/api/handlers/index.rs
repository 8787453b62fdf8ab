use crate::utils::validation::ALLOWED_EXTENSIONS;
use axum::response::Html;

const INDEX_STYLE: &str = "\
body { font-family: sans-serif; background: #eef1f7; margin: 0; padding: 40px 20px; color: #333; }
.card { max-width: 560px; margin: 0 auto; background: #fff; border-radius: 12px; padding: 32px; box-shadow: 0 10px 30px rgba(0,0,0,0.12); }
h1 { margin-top: 0; }
button { padding: 10px 24px; background: #4f6bd8; color: #fff; border: 0; border-radius: 6px; font-weight: bold; cursor: pointer; }
#status { margin-top: 16px; min-height: 1.2em; }
.error { color: #c0392b; }
";

const INDEX_SCRIPT: &str = "\
document.getElementById('upload-form').addEventListener('submit', async (event) => {
  event.preventDefault();
  const status = document.getElementById('status');
  status.className = '';
  status.textContent = 'Uploading...';
  try {
    const response = await fetch('/upload', { method: 'POST', body: new FormData(event.target) });
    const body = await response.json();
    if (body.status === 'success') {
      status.textContent = 'Validating...';
      window.location.href = body.redirect;
    } else {
      status.className = 'error';
      status.textContent = body.message;
    }
  } catch (err) {
    status.className = 'error';
    status.textContent = 'Upload failed: ' + err;
  }
});
";

/// Upload form posting the `dataset` field to `/upload`
pub async fn index() -> Html<String> {
    let accept = ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(",");

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Data Validation</title>
    <style>{INDEX_STYLE}</style>
</head>
<body>
    <div class="card">
        <h1>Data Validation</h1>
        <p>Upload a dataset ({listed}) to run the quality checks.</p>
        <form id="upload-form" action="/upload" method="post" enctype="multipart/form-data">
            <input type="file" name="dataset" accept="{accept}" required>
            <button type="submit">Validate</button>
        </form>
        <div id="status"></div>
    </div>
    <script>{INDEX_SCRIPT}</script>
</body>
</html>
"#,
        listed = ALLOWED_EXTENSIONS.join(", "),
    ))
}
