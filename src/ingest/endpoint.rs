//! Stream locator and transport options.

use std::time::Duration;

use url::Url;

use super::IngestError;

/// Default RTSP port when the URL carries none.
pub const DEFAULT_RTSP_PORT: u16 = 554;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower transport handed to the source. Only reliable transport is offered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportMode {
    #[default]
    Tcp,
}

impl TransportMode {
    /// Value for the source's `protocols` flags property.
    pub fn as_protocols(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Rtsp,
    /// In-process synthetic stream, `stub://name?...`.
    Synthetic,
}

/// Where to connect and how. Frozen for the duration of a run.
#[derive(Clone, Debug)]
pub struct StreamEndpoint {
    url: Url,
    kind: EndpointKind,
    pub transport: TransportMode,
    pub latency: Duration,
    pub timeout: Duration,
    pub tcp_timeout: Duration,
    pub retransmission: bool,
}

impl StreamEndpoint {
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|e| IngestError::InvalidEndpoint {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        let kind = match url.scheme() {
            "rtsp" | "rtsps" | "rtspt" => EndpointKind::Rtsp,
            "stub" => EndpointKind::Synthetic,
            other => {
                return Err(IngestError::InvalidEndpoint {
                    url: trimmed.to_string(),
                    reason: format!("unsupported scheme {other:?}"),
                })
            }
        };
        if kind == EndpointKind::Rtsp && url.host_str().is_none() {
            return Err(IngestError::InvalidEndpoint {
                url: trimmed.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(Self {
            url,
            kind,
            transport: TransportMode::Tcp,
            latency: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            tcp_timeout: DEFAULT_TIMEOUT,
            retransmission: true,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Short `host:port_path` tag used in log lines.
    ///
    /// `rtsp://cam.local/live/main` becomes `cam.local:554_live_main`.
    pub fn display_name(&self) -> String {
        let host = self.url.host_str().unwrap_or("");
        let path = self.url.path().trim_start_matches('/').replace('/', "_");
        match self.kind {
            EndpointKind::Synthetic => {
                if path.is_empty() {
                    format!("stub:{host}")
                } else {
                    format!("stub:{host}_{path}")
                }
            }
            EndpointKind::Rtsp => {
                let port = self.url.port().unwrap_or(DEFAULT_RTSP_PORT);
                if path.is_empty() {
                    format!("{host}:{port}")
                } else {
                    format!("{host}:{port}_{path}")
                }
            }
        }
    }

    /// Query parameter lookup, used by the synthetic backend.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_uses_default_port_and_flattens_path() {
        let endpoint = StreamEndpoint::parse("rtsp://192.168.1.20/live/ch0").unwrap();
        assert_eq!(endpoint.display_name(), "192.168.1.20:554_live_ch0");
    }

    #[test]
    fn display_name_keeps_explicit_port() {
        let endpoint = StreamEndpoint::parse("rtsp://cam:8554/stream").unwrap();
        assert_eq!(endpoint.display_name(), "cam:8554_stream");
        let bare = StreamEndpoint::parse("rtsp://cam:8554").unwrap();
        assert_eq!(bare.display_name(), "cam:8554");
    }

    #[test]
    fn transport_defaults_are_reliable() {
        let endpoint = StreamEndpoint::parse("rtsp://cam/stream").unwrap();
        assert_eq!(endpoint.transport, TransportMode::Tcp);
        assert_eq!(endpoint.timeout, Duration::from_secs(5));
        assert_eq!(endpoint.tcp_timeout, Duration::from_secs(5));
        assert!(endpoint.retransmission);
        assert_eq!(endpoint.latency, Duration::ZERO);
    }

    #[test]
    fn rejects_foreign_schemes_and_garbage() {
        assert!(matches!(
            StreamEndpoint::parse("http://cam/stream"),
            Err(IngestError::InvalidEndpoint { .. })
        ));
        assert!(StreamEndpoint::parse("not a url").is_err());
    }

    #[test]
    fn stub_endpoints_expose_query() {
        let endpoint = StreamEndpoint::parse("stub://lobby?encoding=H265&width=64").unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::Synthetic);
        assert_eq!(endpoint.query("encoding").as_deref(), Some("H265"));
        assert_eq!(endpoint.query("height"), None);
        assert_eq!(endpoint.display_name(), "stub:lobby");
    }
}
