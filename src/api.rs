//! Dashboard API client.
//!
//! Everything outside the real-time pipeline is request/response glue
//! against the remote dashboard backend: authentication, the uploaded-video
//! history list, video upload, and the label-set fetch that populates the
//! target selector. Failures here surface as inline errors to the caller;
//! they never affect the detection pipeline.
//!
//! The base URL is injected at construction. There is no ambient global
//! endpoint, which keeps the pipeline testable in isolation.

use anyhow::{anyhow, Context, Result};
use log::warn;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::wire::{HistoryRecord, HistoryResponse, LabelSetResponse};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub struct DashboardApi {
    agent: ureq::Agent,
    base: Url,
    session_cookie: Option<String>,
}

impl DashboardApi {
    pub fn new(base: Url) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build();
        Self {
            agent,
            base,
            session_cookie: None,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid API endpoint path '{}'", path))
    }

    fn request(&self, method: &str, path: &str) -> Result<ureq::Request> {
        let url = self.endpoint(path)?;
        let mut req = self.agent.request_url(method, &url);
        if let Some(cookie) = &self.session_cookie {
            req = req.set("Cookie", cookie);
        }
        Ok(req)
    }

    /// Log in and keep the session cookie for subsequent calls.
    pub fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let resp = self
            .request("POST", "login/")?
            .send_json(serde_json::json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .map_err(|e| anyhow!("login failed: {}", e))?;

        match resp.header("set-cookie") {
            Some(cookie) => {
                // Keep the cookie pair only, not its attributes.
                let pair = cookie.split(';').next().unwrap_or(cookie).to_string();
                self.session_cookie = Some(pair);
            }
            None => warn!("login response carried no session cookie"),
        }
        Ok(())
    }

    /// Fetch the detector's label set for the target selector. An empty list
    /// is a valid "not yet loaded" state, not an error.
    pub fn fetch_labels(&self) -> Result<Vec<String>> {
        let resp: LabelSetResponse = self
            .request("GET", "labels/")?
            .call()
            .map_err(|e| anyhow!("label fetch failed: {}", e))?
            .into_json()
            .context("malformed label set response")?;
        Ok(resp.labels)
    }

    pub fn list_history(&self) -> Result<Vec<HistoryRecord>> {
        let resp: HistoryResponse = self
            .request("GET", "history/")?
            .call()
            .map_err(|e| anyhow!("history fetch failed: {}", e))?
            .into_json()
            .context("malformed history response")?;
        Ok(resp.history)
    }

    pub fn delete_history(&self, id: u64) -> Result<()> {
        self.request("POST", &format!("delete/{}/", id))?
            .call()
            .map_err(|e| anyhow!("history delete failed: {}", e))?;
        Ok(())
    }

    /// Upload a local video file as multipart form data (field `video`).
    pub fn upload_video(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read video file {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.mp4");

        let boundary = format!("----vision-dash-{:016x}", rand::random::<u64>());
        let body = build_multipart(&boundary, "video", filename, &bytes);

        self.request("POST", "upload/")?
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .map_err(|e| anyhow!("video upload failed: {}", e))?;
        Ok(())
    }
}

/// Assemble a single-file multipart/form-data body.
fn build_multipart(boundary: &str, field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread::JoinHandle;

    /// One-shot HTTP fake: answers the first request with `body` as JSON and
    /// hands the raw request back for inspection.
    fn serve_json_once(body: &'static str) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).expect("read request");
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
            request
        });
        (addr, handle)
    }

    fn api_at(addr: SocketAddr) -> DashboardApi {
        DashboardApi::new(Url::parse(&format!("http://{}/", addr)).unwrap())
    }

    #[test]
    fn endpoints_join_against_the_injected_base() {
        let api = DashboardApi::new(Url::parse("http://localhost:8000/").unwrap());
        assert_eq!(
            api.endpoint("labels/").unwrap().as_str(),
            "http://localhost:8000/labels/"
        );
        assert_eq!(
            api.endpoint("delete/7/").unwrap().as_str(),
            "http://localhost:8000/delete/7/"
        );
    }

    #[test]
    fn list_history_decodes_records_from_the_backend() {
        let (addr, server) =
            serve_json_once(r#"{"history":[{"id":7,"name":"clip.mp4"},{"id":9,"name":"yard.mp4"}]}"#);

        let records = api_at(addr).list_history().unwrap();
        let request = server.join().unwrap();

        assert!(request.starts_with("GET /history/ "), "request was: {}", request);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 7);
        assert_eq!(records[0].name, "clip.mp4");
        assert_eq!(records[1].id, 9);
    }

    #[test]
    fn delete_history_posts_to_the_record_path() {
        let (addr, server) = serve_json_once("{}");

        api_at(addr).delete_history(7).unwrap();
        let request = server.join().unwrap();

        assert!(request.starts_with("POST /delete/7/ "), "request was: {}", request);
    }

    #[test]
    fn multipart_body_is_well_formed() {
        let body = build_multipart("----b", "video", "clip.mp4", b"DATA");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("------b\r\n"));
        assert!(text.contains("name=\"video\"; filename=\"clip.mp4\""));
        assert!(text.contains("DATA"));
        assert!(text.ends_with("------b--\r\n"));
    }
}
