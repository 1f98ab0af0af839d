use std::borrow::Cow;

use ::metrics::prometheus::IntCounter;

mod metrics;

pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";

/// ErrorMetadata object can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It is a generic object to be used
/// across the codebase to tag errors with information that is used to classify.
///
/// The msg is conveyed as an operator facing error message if it makes it to
/// the caller of a catalog operation.
///
/// The short_msg is used as a tag - available for tests and for metrics
/// logging - to have a message that is resilient to changes in copy.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching
    /// w/ a standard test helper.
    /// Eg InvalidTtlColumn
    pub short_msg: Cow<'static, str>,
    /// human readable - operator facing. Should be longer and descriptive.
    pub msg: Cow<'static, str>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
}

impl ErrorMetadata {
    /// Bad Request. The caller asked for something the catalog rejects, e.g.
    /// a TTL policy over a column that does not exist.
    ///
    /// The short_msg should be a CapitalCamelCased describing the error.
    /// The msg should be a descriptive message targeted toward the operator.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Catalog entity not found.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    /// Tagged errors are caused by the caller, so they are only worth a
    /// breadcrumb.
    pub fn should_report_to_sentry(&self) -> Option<sentry::Level> {
        Some(sentry::Level::Info)
    }

    pub fn custom_metric(&self) -> Option<&'static IntCounter> {
        match self.code {
            ErrorCode::BadRequest => Some(&crate::metrics::BAD_REQUEST_ERROR_TOTAL),
            ErrorCode::NotFound => Some(&crate::metrics::NOT_FOUND_ERROR_TOTAL),
        }
    }

    fn metric_status_label_value(&self) -> &'static str {
        match self.code {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn should_report_to_sentry(&self) -> Option<sentry::Level>;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn metric_server_error_label_value(&self) -> Option<&'static str>;
    fn metric_status_label_value(&self) -> &'static str;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    /// Returns true if error is tagged as BadRequest
    fn is_bad_request(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_bad_request)
    }

    /// Returns true if error is tagged as NotFound
    fn is_not_found(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_not_found)
    }

    /// Untagged errors are unexpected and always reported at error level.
    fn should_report_to_sentry(&self) -> Option<sentry::Level> {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => e.should_report_to_sentry(),
            None => Some(sentry::Level::Error),
        }
    }

    /// Return the short_msg associated with this Error
    fn short_msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.short_msg,
            None => INTERNAL_SERVER_ERROR,
        }
    }

    /// Return the descriptive msg associated with this Error
    fn msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.msg,
            None => INTERNAL_SERVER_ERROR_MSG,
        }
    }

    /// Only untagged errors count as server errors.
    fn metric_server_error_label_value(&self) -> Option<&'static str> {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(_) => None,
            None => Some("internal"),
        }
    }

    fn metric_status_label_value(&self) -> &'static str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => e.metric_status_label_value(),
            None => "internal",
        }
    }

    /// Rewrite the attached ErrorMetadata, if any.
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(em) => {
                let new_em = f(em.clone());
                self.context(new_em)
            },
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::{
        ErrorCode,
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
        INTERNAL_SERVER_ERROR,
    };

    #[test]
    fn test_classification_through_context() {
        let err = anyhow::anyhow!("column c missing")
            .context(ErrorMetadata::bad_request("InvalidTtlColumn", "column c missing"));
        assert!(err.is_bad_request());
        assert!(!err.is_not_found());
        assert_eq!(err.short_msg(), "InvalidTtlColumn");
        assert_eq!(err.metric_status_label_value(), "bad_request");

        let untagged = anyhow::anyhow!("boom");
        assert_eq!(untagged.short_msg(), INTERNAL_SERVER_ERROR);
        assert_eq!(untagged.should_report_to_sentry(), Some(sentry::Level::Error));
    }

    #[test]
    fn test_map_error_metadata() {
        let err: anyhow::Error =
            ErrorMetadata::not_found("TableNotFound", "no table [1:2]").into();
        let err = err.map_error_metadata(|em| ErrorMetadata {
            msg: format!("{} while altering TTL", em.msg).into(),
            ..em
        });
        assert!(err.is_not_found());
        assert_eq!(err.msg(), "no table [1:2] while altering TTL");
    }

    proptest! {
        #![proptest_config(ProptestConfig { failure_persistence: None, ..ProptestConfig::default() })]

        #[test]
        fn proptest_tag_survives_outer_context(
            code in any::<ErrorCode>(),
            short_msg in "[A-Z][A-Za-z]{0,16}",
            outer in "[a-z ]{1,32}",
        ) {
            let em = ErrorMetadata {
                code,
                short_msg: short_msg.clone().into(),
                msg: "Long message".into(),
            };
            let err = anyhow::Error::new(em).context(outer);
            prop_assert_eq!(err.is_bad_request(), code == ErrorCode::BadRequest);
            prop_assert_eq!(err.is_not_found(), code == ErrorCode::NotFound);
            prop_assert_eq!(err.short_msg(), short_msg.as_str());
            prop_assert_eq!(err.metric_server_error_label_value(), None);
            prop_assert_ne!(err.metric_status_label_value(), "internal");
        }
    }
}
