//! Mapping of AWS SDK errors onto reconciler errors

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use converge_cloud::CloudError;

/// Error codes that mean the credentials are missing, invalid or not allowed
const AUTH_ERROR_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "RequestExpired",
    "AccessDenied",
    "AccessDeniedException",
    "UnrecognizedClientException",
];

/// Convert an SDK error into a [`CloudError`]
///
/// `target` is the identifier of the object the call addressed, if any.
pub fn map_sdk_error<E, R>(region: &str, target: Option<&str>, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + 'static,
{
    let code = err.code().map(str::to_string);
    let message = err.message().map(str::to_string);
    let message = message.unwrap_or_else(|| DisplayErrorContext(err).to_string());
    classify(region, target, code.as_deref(), &message)
}

/// Classify an API error by code and message
pub fn classify(region: &str, target: Option<&str>, code: Option<&str>, message: &str) -> CloudError {
    let Some(code) = code else {
        return CloudError::api(region, message);
    };

    if AUTH_ERROR_CODES.contains(&code) {
        return CloudError::AuthenticationFailed {
            region: region.to_string(),
            message: format!("{}: {}", code, message),
        };
    }

    // EC2 reports `InvalidVpcID.NotFound` and friends; Auto Scaling reports a
    // ValidationError whose message says the name was not found
    let not_found = code.ends_with(".NotFound")
        || (code == "ValidationError" && message.to_ascii_lowercase().contains("not found"));
    if not_found {
        return CloudError::RemoteNotFound {
            region: region.to_string(),
            id: target.unwrap_or("unknown").to_string(),
        };
    }

    CloudError::api(region, format!("{}: {}", code, message))
}
