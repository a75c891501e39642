//! Payload and setup payload types.
//!
//! Both data and metadata are opaque bytes to the protocol layer. The UTF-8
//! helpers exist because most applications exchange text.

use std::time::Duration;

use bytes::Bytes;

use crate::protocol::{MAJOR_VERSION, MINOR_VERSION};

/// Default keepalive interval advertised in SETUP.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default max lifetime advertised in SETUP.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(90);

/// Default MIME type for both data and metadata.
pub const DEFAULT_MIME_TYPE: &str = "application/binary";

/// A data + optional metadata pair.
///
/// # Example
///
/// ```
/// use rsocket_wire::Payload;
///
/// let payload = Payload::from_str("data", "metadata");
/// assert_eq!(payload.data_utf8(), Some("data"));
/// assert_eq!(payload.metadata_utf8(), Some("metadata"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// Data segment.
    pub data: Bytes,
    /// Metadata segment, if present on the wire.
    pub metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from raw bytes.
    pub fn new(data: impl Into<Bytes>, metadata: Option<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// Create a payload with data and metadata strings.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str, metadata: &str) -> Self {
        Self {
            data: Bytes::copy_from_slice(data.as_bytes()),
            metadata: Some(Bytes::copy_from_slice(metadata.as_bytes())),
        }
    }

    /// Create a payload with only a data segment.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    /// Create a payload with only a metadata segment (for METADATA_PUSH).
    pub fn from_metadata(metadata: impl Into<Bytes>) -> Self {
        Self {
            data: Bytes::new(),
            metadata: Some(metadata.into()),
        }
    }

    /// Get the data bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the metadata bytes, if any.
    #[inline]
    pub fn metadata(&self) -> Option<&[u8]> {
        self.metadata.as_deref()
    }

    /// Data as UTF-8, or `None` if it is not valid UTF-8.
    pub fn data_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Metadata as UTF-8, or `None` if absent or not valid UTF-8.
    pub fn metadata_utf8(&self) -> Option<&str> {
        self.metadata
            .as_deref()
            .and_then(|m| std::str::from_utf8(m).ok())
    }

    /// Whether a metadata segment is present.
    #[inline]
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Total bytes carried by data and metadata.
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, Bytes::len)
    }

    /// Whether both segments are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The payload exchanged once when a connection starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPayload {
    /// Protocol major version.
    pub major_version: u16,
    /// Protocol minor version.
    pub minor_version: u16,
    /// How often the client sends KEEPALIVE.
    pub keepalive_interval: Duration,
    /// How long either side waits without hearing anything before giving up.
    pub max_lifetime: Duration,
    /// MIME type of metadata segments.
    pub metadata_mime_type: String,
    /// MIME type of data segments.
    pub data_mime_type: String,
    /// Whether the client honours LEASE.
    pub lease: bool,
    /// Setup data and metadata.
    pub payload: Payload,
}

impl SetupPayload {
    /// Create a setup payload with default timings and MIME types.
    pub fn new(payload: Payload) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            metadata_mime_type: DEFAULT_MIME_TYPE.to_string(),
            data_mime_type: DEFAULT_MIME_TYPE.to_string(),
            lease: false,
            payload,
        }
    }

    /// Setup payload with data and metadata strings.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str, metadata: &str) -> Self {
        Self::new(Payload::from_str(data, metadata))
    }

    /// Set the keepalive interval and max lifetime.
    ///
    /// Both travel as whole milliseconds in a u32, so sub-millisecond parts
    /// are dropped and larger values saturate.
    pub fn keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.keepalive_interval = wire_millis(interval);
        self.max_lifetime = wire_millis(max_lifetime);
        self
    }

    /// Round the timings to what SETUP can carry.
    pub(crate) fn normalized(mut self) -> Self {
        self.keepalive_interval = wire_millis(self.keepalive_interval);
        self.max_lifetime = wire_millis(self.max_lifetime);
        self
    }

    /// Set the data MIME type.
    pub fn data_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.data_mime_type = mime.into();
        self
    }

    /// Set the metadata MIME type.
    pub fn metadata_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.metadata_mime_type = mime.into();
        self
    }

    /// Setup data as UTF-8.
    pub fn data_utf8(&self) -> Option<&str> {
        self.payload.data_utf8()
    }

    /// Setup metadata as UTF-8.
    pub fn metadata_utf8(&self) -> Option<&str> {
        self.payload.metadata_utf8()
    }

    /// `major.minor` version string.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major_version, self.minor_version)
    }
}

/// Truncate to whole milliseconds, saturating at `u32::MAX` ms.
pub(crate) fn wire_millis(duration: Duration) -> Duration {
    let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
    Duration::from_millis(u64::from(millis))
}

impl Default for SetupPayload {
    fn default() -> Self {
        Self::new(Payload::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_utf8_accessors() {
        let payload = Payload::from_str("data", "meta");
        assert_eq!(payload.data_utf8(), Some("data"));
        assert_eq!(payload.metadata_utf8(), Some("meta"));
        assert_eq!(payload.len(), 8);
    }

    #[test]
    fn test_payload_without_metadata() {
        let payload = Payload::from_data(Bytes::from_static(b"x"));
        assert!(!payload.has_metadata());
        assert_eq!(payload.metadata_utf8(), None);
    }

    #[test]
    fn test_payload_invalid_utf8() {
        let payload = Payload::from_data(Bytes::from_static(&[0xFF, 0xFE]));
        assert_eq!(payload.data_utf8(), None);
    }

    #[test]
    fn test_empty_metadata_is_distinct_from_none() {
        let with_empty = Payload::new(Bytes::new(), Some(Bytes::new()));
        assert!(with_empty.has_metadata());
        assert!(with_empty.is_empty());
        assert_ne!(with_empty, Payload::default());
    }

    #[test]
    fn test_setup_defaults() {
        let setup = SetupPayload::from_str("setup", "");
        assert_eq!(setup.version(), "1.0");
        assert_eq!(setup.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
        assert_eq!(setup.max_lifetime, DEFAULT_MAX_LIFETIME);
        assert_eq!(setup.data_mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(setup.data_utf8(), Some("setup"));
    }

    #[test]
    fn test_keepalive_keeps_whole_millis() {
        let setup = SetupPayload::default()
            .keepalive(Duration::from_micros(1_500), Duration::from_secs(u64::MAX / 2));
        assert_eq!(setup.keepalive_interval, Duration::from_millis(1));
        assert_eq!(
            setup.max_lifetime,
            Duration::from_millis(u64::from(u32::MAX))
        );
    }
}
