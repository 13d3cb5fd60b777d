//! Minimal HTTP/1.1 server for tests.
//!
//! Each connection is handled on its own thread and answered by a closure,
//! then closed. Replies can stall mid-body or trickle their body out in
//! pieces, which is enough to exercise timeouts and progress throttling.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn query(&self, name: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Send `Content-Length`; when false the body ends at connection close.
    pub content_length: bool,
    /// Write half the body, then sleep this long before the rest.
    pub stall: Option<Duration>,
    /// Split the body into this many pieces with a pause between each.
    pub pace: Option<(usize, Duration)>,
}

impl Reply {
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream".to_string(),
            body: body.into(),
            content_length: true,
            stall: None,
            pace: None,
        }
    }

    pub fn json(body: &str) -> Self {
        Self {
            content_type: "application/json".to_string(),
            ..Self::bytes(body.as_bytes().to_vec())
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            ..Self::bytes(body.as_bytes().to_vec())
        }
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    pub fn stalled(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    pub fn paced(mut self, pieces: usize, pause: Duration) -> Self {
        self.pace = Some((pieces.max(1), pause));
        self
    }
}

pub struct TestServer {
    base: String,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let handler = Arc::new(handler);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let handler = Arc::clone(&handler);
                thread::spawn(move || handle(stream, handler.as_ref()));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", port),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

fn handle<F>(mut stream: TcpStream, handler: &F)
where
    F: Fn(&Request) -> Reply,
{
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let reply = handler(&request);

    let reason = if reply.status < 400 { "OK" } else { "Error" };
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n",
        reply.status, reason, reply.content_type
    );
    if reply.content_length {
        head.push_str(&format!("Content-Length: {}\r\n", reply.body.len()));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    if let Some(stall) = reply.stall {
        let half = reply.body.len() / 2;
        let _ = stream.write_all(&reply.body[..half]);
        let _ = stream.flush();
        thread::sleep(stall);
        let _ = stream.write_all(&reply.body[half..]);
    } else if let Some((pieces, pause)) = reply.pace {
        let size = reply.body.len().div_ceil(pieces).max(1);
        for (i, piece) in reply.body.chunks(size).enumerate() {
            if i > 0 {
                thread::sleep(pause);
            }
            if stream.write_all(piece).is_err() {
                return;
            }
            let _ = stream.flush();
        }
    } else {
        let _ = stream.write_all(&reply.body);
    }
    let _ = stream.flush();
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let parsed = url::Url::parse(&format!("http://localhost{}", target)).ok()?;
    Some(Request {
        method,
        path: parsed.path().to_string(),
        query: parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        headers,
        body,
    })
}
