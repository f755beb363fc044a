use crate::points::Reading;
use crate::server::{NodeIds, PointRequest, PointResponse};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("protocol endpoint unavailable: {0}")]
    Unavailable(std::io::Error),
    #[error("i/o error while sampling: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out sampling `{0}`")]
    Timeout(String),
    #[error("read of `{node}` rejected: {message}")]
    Rejected { node: String, message: String },
    #[error("malformed response for `{node}`: {message}")]
    Malformed { node: String, message: String },
}

/// Read-side seam of the bridge: anything that can produce one complete
/// Reading per call.
#[async_trait]
pub trait Sampler: Send {
    async fn read_all(&mut self) -> Result<Reading, SampleError>;
}

/// Protocol client that samples the current point values on demand. One
/// short-lived connection per call; retry policy belongs to the caller.
pub struct PointSampler {
    addr: String,
    nodes: NodeIds,
    timeout: Duration,
}

impl PointSampler {
    pub fn new(addr: String, nodes: NodeIds, timeout: Duration) -> Self {
        Self { addr, nodes, timeout }
    }

    async fn read_point(
        &self,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        node: &str,
    ) -> Result<f64, SampleError> {
        let request = PointRequest::Read { node: node.to_string() };
        let payload = serde_json::to_string(&request).map_err(|e| SampleError::Malformed {
            node: node.to_string(),
            message: e.to_string(),
        })?;

        let mut line = String::new();
        let exchange = async {
            writer.write_all(payload.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            reader.read_line(&mut line).await?;
            Ok::<(), std::io::Error>(())
        };
        time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| SampleError::Timeout(node.to_string()))??;

        let response: PointResponse =
            serde_json::from_str(line.trim()).map_err(|e| SampleError::Malformed {
                node: node.to_string(),
                message: e.to_string(),
            })?;
        if !response.ok {
            return Err(SampleError::Rejected {
                node: node.to_string(),
                message: response.error.unwrap_or_else(|| "unspecified".to_string()),
            });
        }
        response.value.ok_or_else(|| SampleError::Malformed {
            node: node.to_string(),
            message: "response carries no value".to_string(),
        })
    }
}

#[async_trait]
impl Sampler for PointSampler {
    /// Read every tracked point in one pass. A Reading is produced only when
    /// all reads succeed; any failure surfaces as a recoverable error.
    async fn read_all(&mut self) -> Result<Reading, SampleError> {
        let stream = time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SampleError::Timeout(self.addr.clone()))?
            .map_err(SampleError::Unavailable)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let temperature = self
            .read_point(&mut reader, &mut writer, &self.nodes.temperature)
            .await?;
        let pressure = self
            .read_point(&mut reader, &mut writer, &self.nodes.pressure)
            .await?;

        Ok(Reading { temperature, pressure })
    }
}
