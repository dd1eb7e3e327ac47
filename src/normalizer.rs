//! Error normalizer
//!
//! Wraps every remote call. A non-zero status code triggers one extra round
//! trip to translate the code into a display string, and the pair becomes an
//! [`MrcError::Remote`]. The translation call itself is never wrapped, so a
//! failing lookup cannot recurse. Nothing is retried.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::codes::MRC_SCRIPT_OUTPUT_BUFSIZ;
use crate::error::{ErrorCode, MrcError, MrcResult};
use crate::transport::{RemoteInterface, RemoteResult};

/// Funnels raw remote results into typed errors.
#[derive(Clone)]
pub struct ErrorNormalizer {
    remote: Arc<dyn RemoteInterface>,
}

impl ErrorNormalizer {
    /// Create a normalizer over a remote interface.
    pub fn new(remote: Arc<dyn RemoteInterface>) -> Self {
        Self { remote }
    }

    /// The wrapped remote interface.
    pub fn remote(&self) -> &Arc<dyn RemoteInterface> {
        &self.remote
    }

    /// Issue `call` against the remote interface and normalize its result.
    pub fn call<T, F>(&self, operation: &'static str, call: F) -> MrcResult<T>
    where
        F: FnOnce(&dyn RemoteInterface) -> RemoteResult<T>,
    {
        trace!(operation, "remote call");
        let result = call(self.remote.as_ref());
        self.check(operation, result)
    }

    /// Normalize an already obtained remote result.
    pub fn check<T>(&self, operation: &'static str, result: RemoteResult<T>) -> MrcResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(code) if code.is_success() => {
                // Zero on the error path is an implementation bug
                Err(MrcError::remote(code, format!("{operation} returned no value")))
            }
            Err(code) => {
                let message = self.message_for(code);
                debug!(operation, code = %code, message = %message, "remote call failed");
                Err(MrcError::remote(code, message))
            }
        }
    }

    /// Translate a code into its display string. Never fails.
    pub fn message_for(&self, code: ErrorCode) -> String {
        self.remote
            .get_error_message(code, MRC_SCRIPT_OUTPUT_BUFSIZ)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::*;
    use crate::error::ErrorKind;
    use crate::simulator::SimulatedServer;

    #[test]
    fn test_success_passes_through() {
        let normalizer = ErrorNormalizer::new(Arc::new(SimulatedServer::new()));
        let value = normalizer.check("noop", Ok::<_, ErrorCode>(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_failure_carries_code_and_message() {
        let server = Arc::new(SimulatedServer::new());
        let normalizer = ErrorNormalizer::new(server.clone());

        let err = normalizer
            .call("ping_server", |r| r.ping_server(12345))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(err.code(), Some(ErrorCode(MRC_ERR_INVALID_HANDLE)));
        assert!(err.to_string().contains("handle"));
        // The failed call plus exactly one translation round trip
        assert_eq!(server.calls(), vec!["ping_server", "get_error_message"]);
    }
}
