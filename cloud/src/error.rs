//! Error taxonomy for the cloud layer.
//!
//! Provider failures are parsed once, into [`ApiErrorItem`] lists, and every
//! gRPC status code assignment for provider errors happens in
//! [`grpc_code`]. Service handlers must not map provider codes themselves.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Provider error code for a volume that does not exist.
pub const API_CODE_VOLUME_NOT_FOUND: u32 = 5064;
/// Provider error code for a snapshot that does not exist.
pub const API_CODE_SNAPSHOT_NOT_FOUND: u32 = 5054;
/// Provider error code for a malformed resource identifier.
pub const API_CODE_MALFORMED_ID: u32 = 4105;
/// Provider error type string for missing resources.
pub const API_TYPE_INVALID_RESOURCE: &str = "InvalidResource";

/// Provider error codes of the invalid-parameter family.
const API_CODES_BAD_PARAMETER: [u32; 7] = [4019, 4029, 4061, 4078, 4125, 4202, 4203];
/// Provider error codes of the pagination-token family.
const API_CODES_BAD_PAGE_TOKEN: [u32; 2] = [4116, 4117];
/// Provider error code range reserved for quota exhaustion.
const API_CODES_QUOTA: std::ops::Range<u32> = 10000..11000;

/// One entry of a provider OAPI error payload.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Eq, PartialEq)]
pub struct ApiErrorItem {
    /// numeric error code, transported as a string
    #[serde(rename = "Code", default)]
    pub code: String,
    /// error family, e.g. `InvalidResource`
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// free-form detail string
    #[serde(rename = "Details", default)]
    pub details: String,
}

impl ApiErrorItem {
    /// The numeric form of the error code, when it is numeric.
    pub fn code_number(&self) -> Option<u32> {
        self.code.parse().ok()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
struct ApiErrorPayload {
    #[serde(rename = "Errors", default)]
    errors: Vec<ApiErrorItem>,
}

/// Outcome of parsing an HTTP error body returned by the provider.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ParsedApiError {
    /// A well-formed OAPI error list.
    Api(Vec<ApiErrorItem>),
    /// Anything else, kept verbatim.
    Raw(String),
}

/// Extracts the OAPI error list out of a generic HTTP error body.
pub fn parse_api_error(body: &str) -> ParsedApiError {
    match serde_json::from_str::<ApiErrorPayload>(body) {
        Ok(payload) if !payload.errors.is_empty() => ParsedApiError::Api(payload.errors),
        _ => ParsedApiError::Raw(body.to_string()),
    }
}

/// Errors surfaced by the cloud layer.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub")]
pub enum CloudError {
    /// The requested resource does not exist at the provider.
    #[snafu(display("{} '{}' not found", resource, id))]
    NotFound { resource: &'static str, id: String },

    /// A resource with the same name but conflicting attributes exists.
    #[snafu(display("resource already exists: {}", reason))]
    AlreadyExists { reason: String },

    /// More than one volume carries the requested name tag.
    #[snafu(display("multiple volumes found for name '{}'", name))]
    MultiVolumes { name: String },

    /// More than one snapshot carries the requested name tag.
    #[snafu(display("multiple snapshots found for name '{}'", name))]
    MultiSnapshots { name: String },

    /// A volume with this name exists with a different size.
    #[snafu(display(
        "volume '{}' already exists with size {} GiB, requested {} GiB",
        name,
        existing_gib,
        requested_gib
    ))]
    DiskExistsDiffSize {
        name: String,
        existing_gib: u64,
        requested_gib: u64,
    },

    /// Request validation failed before any provider call.
    #[snafu(display("invalid argument: {}", reason))]
    InvalidArgument { reason: String },

    /// The provider rejected the request with a structured error list.
    #[snafu(display("{}: api error (http {}): {:?}", action, status, errors))]
    Api {
        action: &'static str,
        status: u16,
        errors: Vec<ApiErrorItem>,
    },

    /// The provider answered with something that is not an OAPI error.
    #[snafu(display("{}: unexpected api response (http {}): {}", action, status, body))]
    ApiRaw {
        action: &'static str,
        status: u16,
        body: String,
    },

    /// The HTTP request itself failed.
    #[snafu(display("{}: transport error: {}", action, source))]
    Transport {
        action: &'static str,
        source: reqwest::Error,
    },

    /// The retry budget of a backoff schedule ran out.
    #[snafu(display("{}: retries exhausted after {} attempts", action, attempts))]
    RetriesExhausted { action: &'static str, attempts: u32 },

    /// A resource reached a terminal state the wait cannot recover from.
    #[snafu(display("{} '{}' entered state '{}'", resource, id, state))]
    TerminalState {
        resource: &'static str,
        id: String,
        state: String,
    },

    /// An operation requires a state the resource is not in.
    #[snafu(display("{} '{}' is in state '{}', expected '{}'", resource, id, state, expected))]
    UnexpectedState {
        resource: &'static str,
        id: String,
        state: String,
        expected: &'static str,
    },

    /// The resource watcher shut down while a wait was pending.
    #[snafu(display("resource watcher is no longer running"))]
    WatcherClosed,

    /// A state wait did not converge within its deadline.
    #[snafu(display("timed out waiting on {} '{}'", resource, id))]
    WaitTimeout { resource: &'static str, id: String },

    /// No device suffix left for the instance.
    #[snafu(display("no free device name on instance '{}'", vm_id))]
    NoDeviceAvailable { vm_id: String },

    /// Catch-all for local failures.
    #[snafu(display("internal error: {}", reason))]
    Internal { reason: String },
}

impl CloudError {
    /// True for the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// The provider error list, when this error carries one.
    pub fn api_errors(&self) -> Option<&[ApiErrorItem]> {
        match self {
            CloudError::Api { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// HTTP status of the provider response, when this error carries one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CloudError::Api { status, .. } | CloudError::ApiRaw { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn has_api_error(err: &CloudError, code: u32, kind: &str) -> bool {
    err.api_errors()
        .map(|errors| {
            errors
                .iter()
                .any(|e| e.code_number() == Some(code) && e.kind == kind)
        })
        .unwrap_or(false)
}

/// True when the provider reported the volume as missing.
pub fn is_volume_not_found(err: &CloudError) -> bool {
    has_api_error(err, API_CODE_VOLUME_NOT_FOUND, API_TYPE_INVALID_RESOURCE)
}

/// True when the provider reported the snapshot as missing.
pub fn is_snapshot_not_found(err: &CloudError) -> bool {
    has_api_error(err, API_CODE_SNAPSHOT_NOT_FOUND, API_TYPE_INVALID_RESOURCE)
}

/// True when the provider rejected the identifier as malformed.
pub fn is_malformed_id(err: &CloudError) -> bool {
    err.api_errors()
        .map(|errors| {
            errors
                .iter()
                .any(|e| e.code_number() == Some(API_CODE_MALFORMED_ID))
        })
        .unwrap_or(false)
}

/// Maps a cloud error to the gRPC status code surfaced over CSI.
///
/// This is the single place provider error codes become gRPC codes.
pub fn grpc_code(err: &CloudError) -> tonic::Code {
    match err {
        CloudError::NotFound { .. } => tonic::Code::NotFound,
        CloudError::AlreadyExists { .. } | CloudError::DiskExistsDiffSize { .. } => {
            tonic::Code::AlreadyExists
        }
        CloudError::InvalidArgument { .. } => tonic::Code::InvalidArgument,
        CloudError::Api { errors, .. } => {
            let code = errors.first().and_then(|e| e.code_number());
            match code {
                Some(code) if API_CODES_QUOTA.contains(&code) => tonic::Code::ResourceExhausted,
                Some(code) if API_CODES_BAD_PAGE_TOKEN.contains(&code) => tonic::Code::Aborted,
                Some(code) if API_CODES_BAD_PARAMETER.contains(&code) => {
                    tonic::Code::InvalidArgument
                }
                _ => tonic::Code::Internal,
            }
        }
        _ => tonic::Code::Internal,
    }
}
