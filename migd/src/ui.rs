//! Embedded HTML console served at `GET /ui`.

use axum::http::header;
use axum::response::{IntoResponse, Response};

const MIG_CONSOLE_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>MIG Console</title>
  <style>
    :root {
      --bg: #f5f7fb;
      --panel: #ffffff;
      --text: #172033;
      --muted: #5f6c86;
      --accent: #0666d4;
      --border: #d5deea;
    }
    body {
      margin: 0;
      font-family: "IBM Plex Sans", "Segoe UI", sans-serif;
      color: var(--text);
      background: var(--bg);
    }
    .shell { max-width: 960px; margin: 0 auto; padding: 24px 16px 40px; }
    .title { font-size: 28px; margin: 0 0 4px; letter-spacing: -0.02em; }
    .subtitle { margin: 0 0 18px; color: var(--muted); }
    .panel {
      background: var(--panel);
      border: 1px solid var(--border);
      border-radius: 12px;
      padding: 14px;
      margin-bottom: 14px;
    }
    .label { display: block; font-size: 12px; color: var(--muted); margin-bottom: 6px; }
    input, textarea {
      width: 100%;
      box-sizing: border-box;
      border: 1px solid var(--border);
      border-radius: 8px;
      padding: 8px;
      font-family: "IBM Plex Mono", monospace;
      font-size: 13px;
    }
    button {
      background: var(--accent);
      border: none;
      border-radius: 8px;
      color: #fff;
      padding: 8px 14px;
      margin: 8px 6px 0 0;
      cursor: pointer;
    }
    pre {
      background: #0f1829;
      color: #dce6f7;
      border-radius: 8px;
      padding: 12px;
      overflow: auto;
      min-height: 180px;
      font-size: 12px;
    }
  </style>
</head>
<body>
  <div class="shell">
    <h1 class="title">MIG Console</h1>
    <p class="subtitle">Model Interface Gateway v0.1 — HTTP binding playground</p>

    <div class="panel">
      <label class="label">Tenant</label>
      <input id="tenant" value="acme" />
      <label class="label" style="margin-top:10px">Capability</label>
      <input id="capability" value="observatory.models.infer" />
      <label class="label" style="margin-top:10px">Topic</label>
      <input id="topic" value="observatory.inference.completed" />
      <label class="label" style="margin-top:10px">Payload (JSON)</label>
      <textarea id="payload" rows="4">{"input": "hello"}</textarea>
      <div>
        <button onclick="hello()">Hello</button>
        <button onclick="discover()">Discover</button>
        <button onclick="invoke()">Invoke</button>
        <button onclick="publish()">Publish</button>
        <button onclick="heartbeat()">Heartbeat</button>
      </div>
    </div>

    <div class="panel">
      <label class="label">Response</label>
      <pre id="out">—</pre>
    </div>
  </div>

  <script>
    const out = document.getElementById('out');
    const tenant = () => document.getElementById('tenant').value.trim();
    const payload = () => JSON.parse(document.getElementById('payload').value || '{}');
    const show = (value) => { out.textContent = JSON.stringify(value, null, 2); };
    const fail = (err) => { out.textContent = String(err); };

    async function call(path, body) {
      const resp = await fetch(path, {
        method: 'POST',
        headers: { 'Content-Type': 'application/json', 'X-Tenant-ID': tenant() },
        body: JSON.stringify(body),
      });
      return resp.json();
    }

    function header() { return { tenant_id: tenant() }; }

    function hello() {
      call('/mig/v0.1/hello', {
        header: header(),
        supported_versions: ['0.1'],
        requested_bindings: ['http'],
      }).then(show).catch(fail);
    }

    function discover() {
      call('/mig/v0.1/discover', { header: header() }).then(show).catch(fail);
    }

    function invoke() {
      const capability = document.getElementById('capability').value.trim();
      call('/mig/v0.1/invoke/' + encodeURIComponent(capability), {
        header: header(),
        payload: payload(),
      }).then(show).catch(fail);
    }

    function publish() {
      const topic = document.getElementById('topic').value.trim();
      call('/mig/v0.1/publish/' + encodeURIComponent(topic), {
        header: header(),
        payload: payload(),
      }).then(show).catch(fail);
    }

    function heartbeat() {
      call('/mig/v0.1/heartbeat', { header: header() }).then(show).catch(fail);
    }
  </script>
</body>
</html>
"#;

pub async fn console() -> Response {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        MIG_CONSOLE_HTML,
    )
        .into_response()
}
