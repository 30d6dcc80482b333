use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::logger::MessageLogger;
use crate::protocol::{Command, POST_PATH, PostRequest};
use crate::{Error, Result};

/// One HTTP request per command against the controller. Transient network
/// failures get a bounded number of extra attempts; HTTP error statuses and
/// payload problems never do.
pub(crate) struct Transport {
    http: reqwest::Client,
    base_url: String,
    retries: u8,
    logger: Option<Mutex<MessageLogger>>,
}

impl Transport {
    pub fn new(
        base_url: String,
        request_timeout: Duration,
        retries: u8,
        logger: Option<MessageLogger>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url,
            retries,
            logger: logger.map(Mutex::new),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, command: Command) -> Result<String> {
        let url = format!("{}{}", self.base_url, command.path());
        let url = url.as_str();
        self.with_retry(command, || async move {
            self.log(|l| l.log_request("GET", command));
            trace!(url = %url, "GET");
            let resp = self.http.get(url).send().await?;
            self.read_body(command, resp).await
        })
        .await
    }

    pub async fn post(&self, action: &str, request: &PostRequest) -> Result<String> {
        let url = format!("{}{}", self.base_url, POST_PATH);
        let url = url.as_str();
        let form = request.form();
        let form = &form;
        self.log(|l| l.log_command(action, request));
        self.with_retry(request.command, || async move {
            debug!(url = %url, command = %request.command, value = %request.value, "POST");
            let resp = self.http.post(url).form(form).send().await?;
            self.read_body(request.command, resp).await
        })
        .await
    }

    pub fn log_cycle(&self, cycle: Uuid, outcome: &str, error: Option<String>) {
        self.log(|l| l.log_cycle(cycle, outcome, error));
    }

    async fn read_body(&self, command: Command, resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                command,
                status: status.as_u16(),
            });
        }
        let body = resp.text().await?;
        let payload = body.trim().to_string();
        self.log(|l| l.log_response(command, status.as_u16(), &payload));
        Ok(payload)
    }

    async fn with_retry<F, Fut>(&self, command: Command, mut attempt: F) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut tries = 0u8;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && tries < self.retries => {
                    tries += 1;
                    debug!(command = %command, attempt = tries, error = %e, "transient failure, retrying");
                }
                other => return other,
            }
        }
    }

    fn log(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    /// A device that answers connections in order: `None` reads the request
    /// and hangs up, `Some(body)` answers 200. Connections past the end of
    /// the script are hung up too. Returns the number of connections seen
    /// once `stop` is set.
    fn scripted_device(
        script: Vec<Option<&'static str>>,
    ) -> (String, Arc<AtomicBool>, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut served = 0;
            while !stop_flag.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        read_request(&mut stream);
                        if let Some(Some(body)) = script.get(served) {
                            let reply = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                                body.len()
                            );
                            std::io::Write::write_all(&mut stream, reply.as_bytes()).unwrap();
                        }
                        served += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => panic!("accept failed: {e}"),
                }
            }
            served
        });
        (base_url, stop, handle)
    }

    // Headers plus a Content-Length body, so closing never resets the socket
    fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let expected = loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break end + 4 + body_len;
            }
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        };
        while buf.len() < expected {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn finish(stop: Arc<AtomicBool>, handle: JoinHandle<usize>) -> usize {
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap()
    }

    #[tokio::test]
    async fn dropped_connection_is_retried_once() {
        let (base_url, stop, handle) = scripted_device(vec![None, Some("0000000164")]);
        let transport = Transport::new(base_url, Duration::from_secs(2), 1, None).unwrap();

        let payload = transport.get(Command::Mode).await;
        assert_eq!(finish(stop, handle), 2);
        assert_eq!(payload.unwrap(), "0000000164");
    }

    #[tokio::test]
    async fn second_dropped_connection_is_final() {
        let (base_url, stop, handle) =
            scripted_device(vec![None, None, Some("0000000164")]);
        let transport = Transport::new(base_url, Duration::from_secs(2), 1, None).unwrap();

        let err = transport.get(Command::Mode).await.unwrap_err();
        assert_eq!(finish(stop, handle), 2);
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn no_retry_when_disabled() {
        let (base_url, stop, handle) = scripted_device(vec![None, Some("0000000164")]);
        let transport = Transport::new(base_url, Duration::from_secs(2), 0, None).unwrap();

        assert!(transport.get(Command::Mode).await.is_err());
        assert_eq!(finish(stop, handle), 1);
    }

    #[tokio::test]
    async fn post_retries_a_dropped_connection() {
        let (base_url, stop, handle) = scripted_device(vec![None, Some("OK")]);
        let transport = Transport::new(base_url, Duration::from_secs(2), 1, None).unwrap();
        let request = crate::protocol::filter_reset_request().unwrap();

        let ack = transport.post("reset_filter", &request).await;
        assert_eq!(finish(stop, handle), 2);
        assert_eq!(ack.unwrap(), "OK");
    }
}
