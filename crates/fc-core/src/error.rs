//! Error types for fcscan.

use thiserror::Error;

/// fcscan error type.
///
/// The variants mirror the failure classes of the analysis: model-domain and
/// sampling errors indicate a misconfigured parameter grid or prior table and
/// abort the run; non-convergence is recoverable at the call site (retry,
/// then exclude) up to a scan-wide rate ceiling.
#[derive(Error, Debug)]
pub enum Error {
    /// Spectrum model evaluated outside its domain (B = 0, Δ = 0, or a
    /// non-finite parameter or mean).
    #[error("model domain error: {0}")]
    ModelDomain(String),

    /// Likelihood evaluated on an unsupported spectrum (zero mean in a
    /// populated bin).
    #[error("likelihood domain error: {0}")]
    LikelihoodDomain(String),

    /// Minimizer exhausted its budget without meeting the stopping criterion.
    #[error("fit did not converge: {0}")]
    NonConvergence(String),

    /// Invalid (negative or non-finite) mean handed to the toy generator.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Inconsistent lengths or configuration values.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let e = Error::ModelDomain("B must be nonzero".into());
        assert!(e.to_string().contains("B must be nonzero"));
        let e = Error::NonConvergence("max iterations".into());
        assert!(e.to_string().starts_with("fit did not converge"));
    }
}
