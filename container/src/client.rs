//! Engine API client over the system runtime's Unix socket.

use crate::error::{Error, Result};
use crate::http::{encode_request, header_end, next_frame, parse_head, parse_response, Response, StreamKind};
use crate::types::{
    ApiMessage, ContainerHandle, CreateBody, CreateResponse, CreateSpec, ExitInfo,
    InspectResponse, ListEntry, ListFilter,
};
use crate::ContainerRuntime;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Client for the system container runtime.
///
/// Opens one connection per call and performs no retries.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket: PathBuf,
}

impl DockerClient {
    /// Create a client for the runtime listening on `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket)
            .await
            .map_err(|source| Error::Connect {
                socket: self.socket.clone(),
                source,
            })
    }

    async fn request(&self, method: &str, path: &str, body: Option<&[u8]>) -> Result<Response> {
        debug!(method = method, path = path, "Container runtime request");
        let mut stream = self.connect().await?;
        stream
            .write_all(&encode_request(method, path, body, false))
            .await?;

        let mut raw = Vec::with_capacity(4096);
        stream.read_to_end(&mut raw).await?;
        parse_response(&raw)
    }
}

/// Map a non-success response to an error, naming `id` on 404.
fn check(resp: Response, id: &str) -> Result<Response> {
    match resp.status {
        200..=299 | 304 => Ok(resp),
        404 => Err(Error::NotFound(id.to_string())),
        status => {
            let message = serde_json::from_slice::<ApiMessage>(&resp.body)
                .map(|m| m.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&resp.body).trim().to_string());
            Err(Error::Api { status, message })
        }
    }
}

/// Copy a multiplexed attach stream onto `out` and `err` until EOF.
///
/// `buf` holds bytes already read past the response headers.
pub(crate) async fn demux_stream<R, O, E>(
    reader: &mut R,
    mut buf: Vec<u8>,
    out: &mut O,
    err: &mut E,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        while let Some((kind, payload, used)) = next_frame(&buf) {
            match kind {
                StreamKind::Stderr => err.write_all(payload).await?,
                StreamKind::Stdout => out.write_all(payload).await?,
                StreamKind::Stdin => {}
            }
            buf.drain(..used);
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    out.flush().await?;
    err.flush().await?;
    Ok(())
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        let resp = self
            .request("GET", &format!("/containers/{id}/json"), None)
            .await?;
        let resp = check(resp, id)?;
        let parsed: InspectResponse = serde_json::from_slice(&resp.body)?;
        Ok(parsed.into())
    }

    async fn create(&self, spec: &CreateSpec) -> Result<ContainerHandle> {
        let body = serde_json::to_vec(&CreateBody {
            image: &spec.image,
            cmd: &spec.command,
            env: &spec.env,
            host_config: &spec.host_config,
        })?;
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("name", &spec.name)
            .finish();
        let resp = self
            .request("POST", &format!("/containers/create?{query}"), Some(&body))
            .await?;
        let resp = check(resp, &spec.image)?;
        let created: CreateResponse = serde_json::from_slice(&resp.body)?;

        Ok(ContainerHandle {
            id: created.id,
            name: spec.name.clone(),
            image: spec.image.clone(),
            privileged: spec.host_config.privileged,
            pid_mode: spec.host_config.pid_mode.clone(),
            mount_propagation: Vec::new(),
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        let resp = self
            .request("POST", &format!("/containers/{id}/start"), None)
            .await?;
        check(resp, id).map(|_| ())
    }

    async fn attach(&self, id: &str, stdout: bool, stderr: bool) -> Result<()> {
        let mut stream = self.connect().await?;
        let path = format!(
            "/containers/{id}/attach?stream=1&stdout={}&stderr={}",
            u8::from(stdout),
            u8::from(stderr)
        );
        stream
            .write_all(&encode_request("POST", &path, None, true))
            .await?;

        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        let end = loop {
            if let Some(end) = header_end(&buf) {
                break end;
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Protocol(
                    "connection closed before attach headers".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let (status, _) = parse_head(&buf[..end])?;
        if status != 101 {
            check(
                Response {
                    status,
                    body: buf[end..].to_vec(),
                },
                id,
            )?;
        }
        buf.drain(..end);

        demux_stream(
            &mut stream,
            buf,
            &mut tokio::io::stdout(),
            &mut tokio::io::stderr(),
        )
        .await
    }

    async fn stop(&self, id: &str, timeout_secs: u64) -> Result<()> {
        let resp = self
            .request("POST", &format!("/containers/{id}/stop?t={timeout_secs}"), None)
            .await?;
        check(resp, id).map(|_| ())
    }

    async fn wait(&self, id: &str) -> Result<ExitInfo> {
        let resp = self
            .request("POST", &format!("/containers/{id}/wait"), None)
            .await?;
        let resp = check(resp, id)?;
        Ok(serde_json::from_slice(&resp.body)?)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let resp = self
            .request("DELETE", &format!("/containers/{id}"), None)
            .await?;
        check(resp, id).map(|_| ())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerHandle>> {
        let query = {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            if filter.all {
                query.append_pair("all", "1");
            }
            if !filter.status.is_empty() {
                let filters = serde_json::json!({ "status": filter.status });
                query.append_pair("filters", &filters.to_string());
            }
            query.finish()
        };

        let path = if query.is_empty() {
            "/containers/json".to_string()
        } else {
            format!("/containers/json?{query}")
        };
        let resp = check(self.request("GET", &path, None).await?, "")?;
        let entries: Vec<ListEntry> = serde_json::from_slice(&resp.body)?;
        Ok(entries.into_iter().map(ContainerHandle::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demux_stream_splits_outputs() {
        let mut data = vec![1, 0, 0, 0, 0, 0, 0, 3];
        data.extend_from_slice(b"out");
        data.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 3]);
        data.extend_from_slice(b"err");
        data.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 1]);
        data.extend_from_slice(b"!");

        // First four bytes arrive with the headers.
        let (head, rest) = data.split_at(4);
        let mut reader = rest;
        let mut out = Vec::new();
        let mut err = Vec::new();
        demux_stream(&mut reader, head.to_vec(), &mut out, &mut err)
            .await
            .unwrap();

        assert_eq!(out, b"out!");
        assert_eq!(err, b"err");
    }

    #[test]
    fn test_check_maps_errors() {
        let not_found = check(
            Response {
                status: 404,
                body: b"{\"message\":\"no such container\"}".to_vec(),
            },
            "power",
        )
        .unwrap_err();
        assert!(not_found.is_not_found());

        let api = check(
            Response {
                status: 409,
                body: b"{\"message\":\"conflict\"}".to_vec(),
            },
            "power",
        )
        .unwrap_err();
        assert!(matches!(api, Error::Api { status: 409, ref message } if message == "conflict"));

        assert!(check(Response { status: 304, body: Vec::new() }, "x").is_ok());
    }
}
