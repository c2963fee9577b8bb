//! # Pod Exec
//!
//! Runs a command inside a container and captures its output. The transport
//! is hidden behind [`PodExecutor`] so the reconciler can be driven by a
//! scripted executor in tests. [`KubeExecutor::exec_streaming`] is the
//! attached variant used by the `kubectl-mailserver` plugin.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Captured streams of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Transport failure or non-zero exit, with whatever stderr was captured
    #[error("{message}: {stderr}")]
    Failed { message: String, stderr: String },
    #[error("command did not complete within {0}s")]
    Timeout(u64),
    #[error("command cancelled, controller is shutting down")]
    Cancelled,
}

#[async_trait]
pub trait PodExecutor: Send + Sync {
    /// Run `command` in `container` of the given pod, without TTY or stdin.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ExecError>;
}

/// Executor over the pods/exec websocket subresource
#[derive(Clone)]
pub struct KubeExecutor {
    client: Client,
}

impl std::fmt::Debug for KubeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeExecutor").finish_non_exhaustive()
    }
}

impl KubeExecutor {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Read a stream to its end, keeping what arrived before any failure
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> (String, io::Result<()>) {
    let mut buf = Vec::new();
    let result = match reader {
        Some(mut r) => r.read_to_end(&mut buf).await.map(|_| ()),
        None => Ok(()),
    };
    (String::from_utf8_lossy(&buf).into_owned(), result)
}

/// Drain both output streams. A broken stream fails the whole command.
async fn collect<O, E>(stdout: Option<O>, stderr: Option<E>) -> Result<ExecOutput, ExecError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let ((stdout, out_res), (stderr, err_res)) = tokio::join!(drain(stdout), drain(stderr));
    if let Err(e) = out_res.and(err_res) {
        return Err(ExecError::Failed {
            message: format!("exec stream broken: {e}"),
            stderr,
        });
    }
    Ok(ExecOutput { stdout, stderr })
}

/// Copy `reader` into `writer` chunk by chunk, passing every chunk through `filter`
async fn forward<R, W>(
    reader: Option<R>,
    mut writer: W,
    filter: fn(&[u8]) -> Vec<u8>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&filter(&buf[..n])).await?;
        writer.flush().await?;
    }
    Ok(())
}

impl KubeExecutor {
    /// Run `command` attached to local streams, for interactive use.
    ///
    /// Output reaches `stdout` and `stderr` as it arrives, after `filter`.
    /// `stdin`, when given, is copied to the remote process until it ends.
    #[allow(clippy::too_many_arguments, reason = "one argument per attached stream")]
    pub async fn exec_streaming<I, O, E>(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<I>,
        stdout: O,
        stderr: E,
        filter: fn(&[u8]) -> Vec<u8>,
    ) -> Result<(), ExecError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams {
            container: Some(container.to_string()),
            stdin: stdin.is_some(),
            stdout: true,
            stderr: true,
            tty: false,
            max_stdin_buf_size: None,
            max_stdout_buf_size: None,
            max_stderr_buf_size: None,
        };
        debug!(pod = pod, namespace = namespace, command = ?command, "exec.attach");

        let mut attached = pods
            .exec(pod, command, &params)
            .await
            .map_err(|e| ExecError::Failed {
                message: e.to_string(),
                stderr: String::new(),
            })?;

        let feeder = match (stdin, attached.stdin()) {
            (Some(mut local), Some(mut remote)) => Some(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut local, &mut remote).await {
                    debug!(error = %e, "exec.stdin.closed");
                }
                let _ = remote.shutdown().await;
            })),
            _ => None,
        };

        let status = attached.take_status();
        let (out_res, err_res) = tokio::join!(
            forward(attached.stdout(), stdout, filter),
            forward(attached.stderr(), stderr, filter)
        );
        if let Some(feeder) = feeder {
            feeder.abort();
        }
        out_res.and(err_res).map_err(|e| ExecError::Failed {
            message: format!("exec stream broken: {e}"),
            stderr: String::new(),
        })?;

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                return Err(ExecError::Failed {
                    message: status
                        .message
                        .unwrap_or_else(|| "command failed".to_string()),
                    stderr: String::new(),
                });
            }
        }
        attached.join().await.map_err(|e| ExecError::Failed {
            message: e.to_string(),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl PodExecutor for KubeExecutor {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams {
            container: Some(container.to_string()),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            max_stdin_buf_size: None,
            max_stdout_buf_size: None,
            max_stderr_buf_size: None,
        };
        debug!(pod = pod, namespace = namespace, command = ?command, "exec.start");

        let mut attached = pods
            .exec(pod, command, &params)
            .await
            .map_err(|e| ExecError::Failed {
                message: e.to_string(),
                stderr: String::new(),
            })?;

        let status = attached.take_status();
        let ExecOutput { stdout, stderr } = collect(attached.stdout(), attached.stderr()).await?;

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                return Err(ExecError::Failed {
                    message: status
                        .message
                        .unwrap_or_else(|| "command failed".to_string()),
                    stderr,
                });
            }
        }
        attached.join().await.map_err(|e| ExecError::Failed {
            message: e.to_string(),
            stderr: stderr.clone(),
        })?;

        Ok(ExecOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields one chunk, then resets
    struct Resetting {
        chunk: Option<&'static [u8]>,
    }

    impl AsyncRead for Resetting {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.chunk.take() {
                Some(chunk) => {
                    buf.put_slice(chunk);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "websocket closed",
                ))),
            }
        }
    }

    #[tokio::test]
    async fn test_truncated_stdout_is_a_failure() {
        let stdout = Resetting {
            chunk: Some(b"mail._domainkey IN TXT ( \"v=DKIM1; k=rsa; \"".as_slice()),
        };
        let stderr: &[u8] = b"opendkim: warning";
        let err = collect(Some(stdout), Some(stderr)).await.unwrap_err();
        match err {
            ExecError::Failed { message, stderr } => {
                assert!(message.contains("websocket closed"));
                assert_eq!(stderr, "opendkim: warning");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broken_stderr_keeps_what_arrived() {
        let stdout: &[u8] = b"203.0.113.7";
        let stderr = Resetting {
            chunk: Some(b"curl: (56) Recv failure".as_slice()),
        };
        let err = collect(Some(stdout), Some(stderr)).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Failed { ref stderr, .. } if stderr == "curl: (56) Recv failure"
        ));
    }

    fn shout(chunk: &[u8]) -> Vec<u8> {
        chunk.to_ascii_uppercase()
    }

    fn verbatim(chunk: &[u8]) -> Vec<u8> {
        chunk.to_vec()
    }

    #[tokio::test]
    async fn test_forward_filters_every_chunk() {
        let remote: &[u8] = b"setup email list\n";
        let mut local = Vec::new();
        forward(Some(remote), &mut local, shout).await.unwrap();
        assert_eq!(local, b"SETUP EMAIL LIST\n");
    }

    #[tokio::test]
    async fn test_forward_reports_broken_stream() {
        let remote = Resetting {
            chunk: Some(b"user@example.com".as_slice()),
        };
        let mut local = Vec::new();
        let err = forward(Some(remote), &mut local, verbatim)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(local, b"user@example.com");
    }

    #[tokio::test]
    async fn test_complete_streams_are_captured() {
        let stdout: &[u8] = b"203.0.113.7\n";
        let out = collect(Some(stdout), None::<&[u8]>).await.unwrap();
        assert_eq!(out.stdout, "203.0.113.7\n");
        assert_eq!(out.stderr, "");
    }

    #[test]
    fn test_failure_message_includes_stderr() {
        let err = ExecError::Failed {
            message: "command terminated with non-zero exit code".to_string(),
            stderr: "cat: /etc/opendkim/keys/example.com/mail.txt: No such file".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command terminated with non-zero exit code: cat: /etc/opendkim/keys/example.com/mail.txt: No such file"
        );
    }
}
