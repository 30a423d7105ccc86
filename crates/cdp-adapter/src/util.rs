use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const STDERR_PREVIEW_LINES: usize = 8;

/// Pull the browser-level DevTools websocket URL out of one line of Chromium stderr.
pub fn parse_devtools_line(line: &str) -> Option<&str> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then_some(ws)
}

/// Read Chromium stderr until it announces its DevTools websocket URL.
pub async fn devtools_ws_url(child: &mut Child, within: Duration) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(ws) = parse_devtools_line(&line) {
                return Ok(ws.to_string());
            }
            if preview.len() < STDERR_PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            preview.join(" | ")
        ))
    };

    timeout(within, reader)
        .await
        .map_err(|_| anyhow!("timed out waiting for chromium devtools websocket url"))?
}

#[cfg(test)]
mod tests {
    use super::parse_devtools_line;

    #[test]
    fn finds_browser_endpoint() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/7c1f0f3e";
        assert_eq!(
            parse_devtools_line(line),
            Some("ws://127.0.0.1:9222/devtools/browser/7c1f0f3e")
        );
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_devtools_line("[0101/000000.000:ERROR:gpu_init.cc] oops"), None);
        assert_eq!(
            parse_devtools_line("listening on http://127.0.0.1:9222/json"),
            None
        );
    }
}
