use axum::response::Html;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Tomato Freshness</title>
</head>
<body>
  <h1>Tomato Freshness</h1>
  <section>
    <h2>Live camera</h2>
    <p id="camera-status"></p>
    <img id="video-stream" src="/video_feed" alt="Live camera feed">
  </section>
  <section>
    <h2>Analyze an image</h2>
    <form id="upload-form">
      <input type="file" name="image" accept="image/*" required>
      <button type="submit">Analyze</button>
    </form>
    <img id="processed-image" alt="">
    <ul id="detections"></ul>
  </section>
  <script>
    fetch('/camera_status')
      .then((r) => r.json())
      .then((d) => {
        document.getElementById('camera-status').textContent =
          d.available ? 'Camera available' : 'Camera unavailable';
      });

    document.getElementById('upload-form').addEventListener('submit', async (e) => {
      e.preventDefault();
      const response = await fetch('/analyze_image', { method: 'POST', body: new FormData(e.target) });
      const data = await response.json();
      if (!data.success) {
        alert('Error: ' + data.error);
        return;
      }
      document.getElementById('processed-image').src = 'data:image/jpeg;base64,' + data.processed_image;
      const list = document.getElementById('detections');
      list.innerHTML = '';
      data.detections.forEach((d, i) => {
        const item = document.createElement('li');
        item.textContent = `#${i + 1} ${d.label} ${(d.confidence * 100).toFixed(1)}% at (${d.bbox[0]}, ${d.bbox[1]})`;
        list.appendChild(item);
      });
    });
  </script>
</body>
</html>
"#;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}
