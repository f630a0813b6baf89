use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;

use recon_sync::config::{LoaderConfig, SyncConfig};
use recon_sync::test_support::FixtureFetcher;
use recon_sync::{DatasetStore, PageFetcher};

#[allow(dead_code)]
pub fn small_pages(page_size: usize) -> SyncConfig {
    SyncConfig {
        loader: LoaderConfig {
            page_size,
            chunk_size: 1,
            yield_every: 1,
        },
        window_size: 10,
        ..SyncConfig::default()
    }
}

#[allow(dead_code)]
pub fn store_over(fetcher: &Arc<FixtureFetcher>, page_size: usize) -> DatasetStore {
    let fetcher: Arc<dyn PageFetcher> = fetcher.clone();
    DatasetStore::new("job-1", fetcher, &small_pages(page_size))
}

/// Serve canned responses keyed by request target (`/path?query`).
///
/// One request per connection; unknown targets get a 404.
#[allow(dead_code)]
pub fn spawn_http_stub(routes: Vec<(&'static str, u16, String)>) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let head = String::from_utf8_lossy(&head);
            let target = head.split_whitespace().nth(1).unwrap_or_default();
            let (status, body) = routes
                .iter()
                .find(|(path, _, _)| *path == target)
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or((404, "not found".to_string()));
            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    Ok(format!("http://{}", addr))
}
