mod common;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tempfile::{tempdir, TempDir};

use common::{marker_registry, open_store, patterned_bytes, raw_job, CopyNormalizer};
use siren_watch::api::{ApiConfig, ApiHandle, ApiServer, AppState};
use siren_watch::{RetentionPolicy, VideoId, VideoStore};

const VIDEO_LEN: usize = 300_000;

struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

fn start_server(dir: &TempDir) -> Result<(ApiHandle, VideoStore)> {
    let store = open_store(dir.path(), RetentionPolicy::default());
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        workers: 2,
        ..ApiConfig::default()
    };
    let state = AppState::new(
        raw_job(store.clone(), Arc::new(CopyNormalizer)),
        marker_registry(),
        &cfg,
    );
    let handle = ApiServer::new(cfg, state).spawn()?;
    Ok((handle, store))
}

fn publish(store: &VideoStore, bytes: &[u8]) -> Result<String> {
    let id = VideoId::generate();
    std::fs::write(store.output_path(id), bytes)?;
    Ok(VideoStore::output_file_name(id))
}

fn get(addr: SocketAddr, path: &str, range: Option<&str>) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(range) = range {
        request.push_str(&format!("Range: {range}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes())?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> Result<Response> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("missing header terminator"))?;
    let head = std::str::from_utf8(&raw[..split])?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or_else(|| anyhow!("empty response"))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status"))?
        .parse()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();
    Ok(Response {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    })
}

#[test]
fn full_request_returns_the_whole_file() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let video = patterned_bytes(VIDEO_LEN);
    let name = publish(&store, &video)?;

    let resp = get(handle.addr, &format!("/output/{name}"), None)?;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("video/mp4"));
    assert_eq!(resp.header("accept-ranges"), Some("bytes"));
    assert_eq!(resp.header("content-length"), Some(VIDEO_LEN.to_string().as_str()));
    assert!(resp.body == video, "full body differs from the stored file");

    handle.stop()?;
    Ok(())
}

#[test]
fn open_ended_range_matches_the_full_body() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let video = patterned_bytes(VIDEO_LEN);
    let name = publish(&store, &video)?;
    let path = format!("/output/{name}");

    let full = get(handle.addr, &path, None)?;
    let ranged = get(handle.addr, &path, Some("bytes=0-"))?;
    assert_eq!(ranged.status, 206);
    assert_eq!(
        ranged.header("content-range"),
        Some(format!("bytes 0-{}/{}", VIDEO_LEN - 1, VIDEO_LEN).as_str())
    );
    assert!(ranged.body == full.body);

    handle.stop()?;
    Ok(())
}

#[test]
fn bounded_range_returns_exactly_that_window() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let video = patterned_bytes(VIDEO_LEN);
    let name = publish(&store, &video)?;

    let resp = get(handle.addr, &format!("/output/{name}"), Some("bytes=10-19"))?;
    assert_eq!(resp.status, 206);
    assert_eq!(resp.body.len(), 10);
    assert_eq!(resp.body, &video[10..20]);
    assert_eq!(
        resp.header("content-range"),
        Some(format!("bytes 10-19/{VIDEO_LEN}").as_str())
    );
    assert_eq!(resp.header("content-length"), Some("10"));
    assert_eq!(resp.header("accept-ranges"), Some("bytes"));
    assert_eq!(resp.header("content-type"), Some("video/mp4"));

    let tail = get(handle.addr, &format!("/output/{name}"), Some("bytes=299990-"))?;
    assert_eq!(tail.status, 206);
    assert_eq!(tail.body, &video[299_990..]);

    handle.stop()?;
    Ok(())
}

#[test]
fn ranges_past_the_end_are_not_satisfiable() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let name = publish(&store, &patterned_bytes(VIDEO_LEN))?;
    let path = format!("/output/{name}");

    for range in [
        format!("bytes={}-{}", VIDEO_LEN, VIDEO_LEN + 5),
        format!("bytes=10-{VIDEO_LEN}"),
        "bytes=20-10".to_string(),
        "bytes=0-1,5-6".to_string(),
        "pages=1-2".to_string(),
    ] {
        let resp = get(handle.addr, &path, Some(&range))?;
        assert_eq!(resp.status, 416, "{range}");
        assert_eq!(
            resp.header("content-range"),
            Some(format!("bytes */{VIDEO_LEN}").as_str()),
            "{range}"
        );
        let body: Value = serde_json::from_slice(&resp.body)?;
        assert!(body["error"].is_string());
    }

    handle.stop()?;
    Ok(())
}

#[test]
fn unknown_and_private_names_are_not_found() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let id = VideoId::generate();
    std::fs::write(store.raw_output_path(id), b"raw")?;
    std::fs::write(store.staging_output_path(id), b"staging")?;

    for name in [
        VideoStore::output_file_name(VideoId::generate()),
        format!("processed_raw_{id}.mp4"),
        format!("processed_{id}.part.mp4"),
        "input.mp4".to_string(),
        VideoStore::output_file_name(id).to_uppercase(),
    ] {
        let resp = get(handle.addr, &format!("/output/{name}"), None)?;
        assert_eq!(resp.status, 404, "{name}");
        let body: Value = serde_json::from_slice(&resp.body)?;
        assert_eq!(body, serde_json::json!({ "error": "File not found" }));
    }

    handle.stop()?;
    Ok(())
}

#[test]
fn concurrent_range_reads_match_the_file() -> Result<()> {
    let dir = tempdir()?;
    let (handle, store) = start_server(&dir)?;
    let video = Arc::new(patterned_bytes(VIDEO_LEN));
    let name = publish(&store, &video)?;
    let path = format!("/output/{name}");
    let addr = handle.addr;

    let workers: Vec<_> = (0..8u64)
        .map(|worker| {
            let video = video.clone();
            let path = path.clone();
            std::thread::spawn(move || -> Result<()> {
                for step in 0..6u64 {
                    let start = (worker * 37_117 + step * 4_099) % (VIDEO_LEN as u64 - 1);
                    let end = (start + 70_000 + worker * 13).min(VIDEO_LEN as u64 - 1);
                    let resp = get(addr, &path, Some(&format!("bytes={start}-{end}")))?;
                    if resp.status != 206 {
                        return Err(anyhow!("worker {worker}: status {}", resp.status));
                    }
                    if resp.body[..] != video[start as usize..=end as usize] {
                        return Err(anyhow!("worker {worker}: bytes {start}-{end} differ"));
                    }
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("range reader panicked"))??;
    }

    handle.stop()?;
    Ok(())
}

#[test]
fn dropping_the_handle_shuts_the_server_down() -> Result<()> {
    let dir = tempdir()?;
    let (handle, _store) = start_server(&dir)?;
    let addr = handle.addr;
    assert_eq!(get(addr, "/health", None)?.status, 200);

    drop(handle);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err() {
            break;
        }
        if std::time::Instant::now() >= deadline {
            return Err(anyhow!("server still accepting connections after drop"));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

#[test]
fn health_is_served_until_stop() -> Result<()> {
    let dir = tempdir()?;
    let (handle, _store) = start_server(&dir)?;
    let resp = get(handle.addr, "/health", None)?;
    assert_eq!(resp.status, 200);
    let body: Value = serde_json::from_slice(&resp.body)?;
    assert_eq!(body["status"], "ok");
    handle.stop()?;
    Ok(())
}
