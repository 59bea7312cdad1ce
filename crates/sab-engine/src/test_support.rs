use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Result};
use sab_contracts::chat::ChatRequest;
use sab_contracts::payload::GenerationRequest;
use serde_json::{json, Value};

use crate::display::ImageDisplay;
use crate::transport::{ChatCompletion, ImageService};

#[derive(Debug, Clone)]
pub(crate) struct CannedResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl CannedResponse {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: "image/png",
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn json_body(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Serves the canned responses, one connection each, in order.
pub(crate) struct OneShotServer {
    pub base_url: String,
    handle: JoinHandle<Result<Vec<RecordedRequest>>>,
}

impl OneShotServer {
    pub(crate) fn finish(self) -> Result<Vec<RecordedRequest>> {
        self.handle
            .join()
            .map_err(|_| anyhow!("test server thread panicked"))?
    }
}

pub(crate) fn serve(responses: Vec<CannedResponse>) -> Result<OneShotServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let handle = thread::spawn(move || -> Result<Vec<RecordedRequest>> {
        let mut recorded = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept()?;
            recorded.push(read_request(&mut stream)?);
            let head = format!(
                "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                response.status,
                response.content_type,
                response.body.len()
            );
            stream.write_all(head.as_bytes())?;
            stream.write_all(&response.body)?;
            stream.flush()?;
        }
        Ok(recorded)
    });
    Ok(OneShotServer { base_url, handle })
}

fn read_request(stream: &mut impl Read) -> Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos;
        }
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            bail!("connection closed before request headers ended");
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// In-memory generation service. Generated references are named
/// `<n>-<prompt>-<model>-42.png` so the filename lookup can find them.
pub(crate) struct FakeImageService {
    pub session_response: Value,
    pub fail_session: bool,
    pub fail_generate: bool,
    pub fail_fetch: bool,
    /// 1-based generate call from which responses carry no images.
    pub empty_images_from: Option<usize>,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeImageService {
    pub(crate) fn new() -> Self {
        Self {
            session_response: json!({"session_id": "fresh-session"}),
            fail_session: false,
            fail_generate: false,
            fail_fetch: false,
            empty_images_from: None,
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.as_str() == name || call.starts_with(&format!("{name}:")))
            .count()
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl ImageService for FakeImageService {
    fn new_session(&self) -> Result<Value> {
        self.record("new_session".to_string());
        if self.fail_session {
            bail!("connection refused");
        }
        Ok(self.session_response.clone())
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        self.record("generate".to_string());
        let index = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| anyhow!("requests lock poisoned"))?;
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_generate {
            bail!("GenerateText2Image request failed (500): out of VRAM");
        }
        if self.empty_images_from.is_some_and(|from| index >= from) {
            return Ok(json!({"images": []}));
        }
        let model = request.model.as_deref().unwrap_or("none");
        Ok(json!({
            "images": [format!("View/local/raw/{index:04}-{}-{model}-42.png", request.prompt)]
        }))
    }

    fn fetch_image(&self, image_ref: &str) -> Result<Vec<u8>> {
        self.record(format!("fetch:{image_ref}"));
        if self.fail_fetch {
            bail!("image download failed (404): not found");
        }
        Ok(format!("bytes of {image_ref}").into_bytes())
    }
}

/// Scripted chat model; records every request it receives.
pub(crate) struct FakeChat {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeChat {
    pub(crate) fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|reply| Ok(reply.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(vec![Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl ChatCompletion for FakeChat {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let count = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| anyhow!("requests lock poisoned"))?;
            requests.push(request.clone());
            requests.len()
        };
        let reply = self
            .replies
            .lock()
            .map_err(|_| anyhow!("replies lock poisoned"))?
            .pop_front();
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(format!("revised prompt {count}")),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingDisplay {
    shown: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingDisplay {
    pub(crate) fn shown(&self) -> Vec<(String, PathBuf)> {
        self.shown.lock().map(|shown| shown.clone()).unwrap_or_default()
    }
}

impl ImageDisplay for RecordingDisplay {
    fn render_in_terminal(&self, path: &Path) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(("terminal".to_string(), path.to_path_buf()));
        }
    }

    fn open_in_viewer(&self, path: &Path) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(("viewer".to_string(), path.to_path_buf()));
        }
    }
}
