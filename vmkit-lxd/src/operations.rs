use std::time::Duration;

use serde_json::Value;

use vmkit_common::{Error, LaunchPhase, ProgressMonitor, Result};

use crate::transport::{RemoteResponse, Transport};

/// How often an in-flight operation is re-polled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Status code an operation record reports once it has finished cleanly.
const OPERATION_SUCCESS: i64 = 200;

/// Top-level status code marking a reply as "accepted, still running".
const OPERATION_RUNNING: i64 = 100;

/// Handle for an asynchronous daemon-side operation. Transient: built from a
/// mutation reply, discarded once terminal.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub url: String,
}

/// Recognize an asynchronous task envelope in a mutation reply.
///
/// The daemon marks those with `metadata.class == "task"` plus a top-level
/// in-flight status code, and the operation id yields the poll URL.
pub fn spawned_task(base_url: &str, reply: &Value) -> Option<Operation> {
    if reply["metadata"]["class"].as_str() != Some("task")
        || reply["status_code"].as_i64().unwrap_or(-1) != OPERATION_RUNNING
    {
        return None;
    }

    let id = reply["metadata"]["id"].as_str()?.to_string();
    let url = format!("{}/operations/{}", base_url, id);
    Some(Operation { id, url })
}

/// Poll an operation until it reaches a terminal state.
///
/// A 404 while polling is terminal success: the daemon discards finished
/// operation records. A non-zero `error_code` stops polling immediately and
/// is surfaced as `Error::OperationFailed`.
pub async fn poll_to_completion(transport: &dyn Transport, op: &Operation) -> Result<()> {
    loop {
        let reply = match transport.request("GET", &op.url, None, None).await? {
            RemoteResponse::NotFound => return Ok(()),
            RemoteResponse::Found(reply) => reply,
        };

        check_terminal_failure(op, &reply)?;

        if operation_status_code(&reply) == OPERATION_SUCCESS {
            return Ok(());
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Like `poll_to_completion`, but reports download progress between polls
/// and honors cancellation: a monitor returning `false` issues one
/// best-effort DELETE against the operation and raises
/// `Error::DownloadAborted`.
pub async fn poll_with_progress(
    transport: &dyn Transport,
    op: &Operation,
    monitor: &ProgressMonitor,
) -> Result<()> {
    loop {
        let reply = match transport.request("GET", &op.url, None, None).await? {
            RemoteResponse::NotFound => return Ok(()),
            RemoteResponse::Found(reply) => reply,
        };

        check_terminal_failure(op, &reply)?;

        if operation_status_code(&reply) == OPERATION_SUCCESS {
            return Ok(());
        }

        let progress = parse_percent(
            reply["metadata"]["metadata"]["download_progress"]
                .as_str()
                .unwrap_or(""),
        );

        if !monitor(LaunchPhase::Image, progress) {
            // The daemon may well finish the pull anyway; we only promise to ask.
            let _ = transport.request("DELETE", &op.url, None, None).await;
            return Err(Error::DownloadAborted);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Blocking variant: one GET against the operation's `/wait` endpoint, which
/// the daemon holds open until the operation is terminal. The usual
/// error/success fields still need checking afterwards.
pub async fn wait_for_completion(transport: &dyn Transport, op: &Operation) -> Result<()> {
    let url = format!("{}/wait", op.url);
    match transport.request("GET", &url, None, None).await? {
        RemoteResponse::NotFound => Ok(()),
        RemoteResponse::Found(reply) => {
            check_terminal_failure(op, &reply)?;
            Ok(())
        }
    }
}

/// Extract a trailing "NN%" token from free-form progress text.
/// Returns -1 when no parsable percentage is present.
pub fn parse_percent(progress: &str) -> i32 {
    for token in progress.split_whitespace() {
        if let Some(digits) = token.strip_suffix('%') {
            if !digits.is_empty() && digits.len() <= 3 && digits.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(value) = digits.parse() {
                    return value;
                }
            }
        }
    }

    -1
}

fn operation_status_code(reply: &Value) -> i64 {
    reply["metadata"]["status_code"].as_i64().unwrap_or(-1)
}

fn check_terminal_failure(op: &Operation, reply: &Value) -> Result<()> {
    let error_code = reply["error_code"].as_i64().unwrap_or(-1);
    if error_code == 0 {
        return Ok(());
    }

    let mut status = reply["error"].as_str().unwrap_or("").to_string();
    if status.is_empty() {
        status = format!("error code {}", error_code);
    }

    Err(Error::OperationFailed {
        id: op.id.clone(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed sequence of replies and records every request.
    struct SeqTransport {
        replies: Mutex<VecDeque<RemoteResponse>>,
        log: Mutex<Vec<(String, String)>>,
    }

    impl SeqTransport {
        fn new(replies: Vec<RemoteResponse>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                log: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(String, String)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for SeqTransport {
        async fn request(
            &self,
            method: &str,
            url: &str,
            _body: Option<Value>,
            _timeout: Option<Duration>,
        ) -> Result<RemoteResponse> {
            self.log
                .lock()
                .unwrap()
                .push((method.to_string(), url.to_string()));
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport script exhausted"))
        }
    }

    fn op() -> Operation {
        Operation {
            id: "op-1".into(),
            url: "https://lxd.test/1.0/operations/op-1".into(),
        }
    }

    fn running_reply(progress: &str) -> RemoteResponse {
        RemoteResponse::Found(json!({
            "error_code": 0,
            "metadata": {
                "status_code": 103,
                "metadata": { "download_progress": progress }
            }
        }))
    }

    fn success_reply() -> RemoteResponse {
        RemoteResponse::Found(json!({
            "error_code": 0,
            "metadata": { "status_code": 200 }
        }))
    }

    #[test]
    fn recognizes_task_envelopes() {
        let reply = json!({
            "status_code": 100,
            "metadata": { "class": "task", "id": "1f2e3d" }
        });
        let op = spawned_task("https://lxd.test/1.0", &reply).unwrap();
        assert_eq!(op.id, "1f2e3d");
        assert_eq!(op.url, "https://lxd.test/1.0/operations/1f2e3d");

        // Synchronous replies are not tasks.
        assert!(spawned_task("https://lxd.test/1.0", &json!({"status_code": 200})).is_none());
        assert!(spawned_task(
            "https://lxd.test/1.0",
            &json!({"status_code": 100, "metadata": {"class": "token", "id": "x"}})
        )
        .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_success() {
        let transport = SeqTransport::new(vec![
            running_reply(""),
            running_reply(""),
            success_reply(),
        ]);

        poll_to_completion(&transport, &op()).await.unwrap();
        // Three polls means exactly two sleeps in between.
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_while_polling_is_success() {
        let transport = SeqTransport::new(vec![running_reply(""), RemoteResponse::NotFound]);

        poll_to_completion(&transport, &op()).await.unwrap();
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn error_code_stops_polling_immediately() {
        let transport = SeqTransport::new(vec![RemoteResponse::Found(json!({
            "error_code": 1,
            "error": "image download failed",
            "metadata": { "status_code": 400 }
        }))]);

        let err = poll_to_completion(&transport, &op()).await.unwrap_err();
        assert!(
            matches!(err, Error::OperationFailed { ref id, ref status } if id == "op-1" && status == "image download failed")
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_to_the_monitor() {
        let transport = SeqTransport::new(vec![
            running_reply("Downloading: 42% (1.2MB/s)"),
            running_reply("metadata: 100% (12.34MB/s)"),
            success_reply(),
        ]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let monitor = {
            let seen = Arc::clone(&seen);
            move |phase: LaunchPhase, pct: i32| {
                assert_eq!(phase, LaunchPhase::Image);
                seen.lock().unwrap().push(pct);
                true
            }
        };

        poll_with_progress(&transport, &op(), &monitor)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![42, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_monitor_cancels_the_operation() {
        let transport = SeqTransport::new(vec![
            running_reply("Downloading: 13%"),
            // Reply to the cancellation DELETE.
            RemoteResponse::Found(json!({})),
        ]);

        let monitor = |_: LaunchPhase, _: i32| false;
        let err = poll_with_progress(&transport, &op(), &monitor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadAborted));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0, "DELETE");
        assert_eq!(requests[1].1, "https://lxd.test/1.0/operations/op-1");
    }

    #[tokio::test]
    async fn wait_variant_checks_the_terminal_fields() {
        let transport = SeqTransport::new(vec![success_reply()]);
        wait_for_completion(&transport, &op()).await.unwrap();
        assert_eq!(
            transport.requests()[0].1,
            "https://lxd.test/1.0/operations/op-1/wait"
        );

        let transport = SeqTransport::new(vec![RemoteResponse::Found(json!({
            "error_code": 1,
            "error": "instance is busy"
        }))]);
        assert!(wait_for_completion(&transport, &op()).await.is_err());
    }

    #[test]
    fn percent_parsing() {
        assert_eq!(parse_percent("Downloading: 42% (1.2MB/s)"), 42);
        assert_eq!(parse_percent("rootfs: 100% (50.00MB/s)"), 100);
        assert_eq!(parse_percent("still waiting"), -1);
        assert_eq!(parse_percent(""), -1);
        assert_eq!(parse_percent("broken 12a% token"), -1);
    }
}
