//! Local HTTP server that records requests and replays canned responses.

use std::io::Read;
use std::thread::JoinHandle;

use reqwest::Url;
use tiny_http::{Response, Server, StatusCode};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    fn parsed(&self) -> Url {
        Url::parse(&format!("http://stub{}", self.url)).expect("parse recorded url")
    }

    pub fn path(&self) -> String {
        self.parsed().path().to_string()
    }

    pub fn query(&self) -> Vec<(String, String)> {
        self.parsed().query_pairs().into_owned().collect()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("recorded body is json")
    }
}

pub(crate) struct StubServer {
    base_url: String,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl StubServer {
    /// Answer one request per `(status, body)` pair, in order, then stop.
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let server = Server::http(("127.0.0.1", 0)).expect("bind stub server");
        let base_url = format!("http://{}", server.server_addr());
        let handle = std::thread::spawn(move || {
            let mut recorded = Vec::new();
            for (status, body) in responses {
                let Ok(mut request) = server.recv() else {
                    break;
                };
                let mut content = String::new();
                let _ = request.as_reader().read_to_string(&mut content);
                recorded.push(RecordedRequest {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    authorization: request
                        .headers()
                        .iter()
                        .find(|header| header.field.equiv("Authorization"))
                        .map(|header| header.value.as_str().to_string()),
                    body: content,
                });
                let _ = request
                    .respond(Response::from_string(body).with_status_code(StatusCode(status)));
            }
            recorded
        });

        Self { base_url, handle }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().expect("stub server thread")
    }
}
