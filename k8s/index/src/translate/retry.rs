//! Retry-policy annotations on a `Service`, turned into an Envoy
//! `RetryPolicy`. Grounded in the gRPC A44 proposal the original followed:
//! `xds.lmwn.com/retry-status` is the only required annotation; count and
//! backoff are optional refinements layered on top.

use envoy_types::pb::envoy::config::route::v3::{retry_policy::RetryBackOff, RetryPolicy};
use k8s_openapi::api::core::v1::Service;
use lmwn_xds_core::retry::parse_retry_backoff;

pub const ANNOTATION_RETRYABLE_STATUS_CODE: &str = "xds.lmwn.com/retry-status";
pub const ANNOTATION_NUM_RETRIES: &str = "xds.lmwn.com/retry-count";
pub const ANNOTATION_RETRY_BACKOFF: &str = "xds.lmwn.com/retry-backoff";

/// Build a `RetryPolicy` from a service's annotations, or `None` if the
/// service doesn't opt in via `xds.lmwn.com/retry-status`.
pub fn retry_policy_from_service(service: &Service) -> Option<RetryPolicy> {
    let annotations = service.metadata.annotations.as_ref()?;
    let retry_on = annotations.get(ANNOTATION_RETRYABLE_STATUS_CODE)?.clone();

    let mut policy = RetryPolicy {
        retry_on,
        ..Default::default()
    };

    if let Some(num_retries) = annotations.get(ANNOTATION_NUM_RETRIES) {
        match num_retries.parse::<u32>() {
            Ok(n) => policy.num_retries = Some(n),
            Err(error) => tracing::warn!(
                namespace = service.metadata.namespace.as_deref().unwrap_or(""),
                name = service.metadata.name.as_deref().unwrap_or(""),
                %num_retries,
                %error,
                "cannot parse retry-count annotation"
            ),
        }
    }

    if let Some(backoff) = annotations.get(ANNOTATION_RETRY_BACKOFF) {
        match parse_retry_backoff(backoff) {
            Ok(Some(b)) => {
                policy.retry_back_off = Some(RetryBackOff {
                    base_interval: Some(duration_to_proto(b.base_interval)),
                    max_interval: b.max_interval.map(duration_to_proto),
                })
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(
                namespace = service.metadata.namespace.as_deref().unwrap_or(""),
                name = service.metadata.name.as_deref().unwrap_or(""),
                %backoff,
                %error,
                "cannot parse retry-backoff annotation"
            ),
        }
    }

    Some(policy)
}

fn duration_to_proto(d: std::time::Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn service_with_annotations(annotations: &[(&str, &str)]) -> Service {
        let mut map = BTreeMap::new();
        for (k, v) in annotations {
            map.insert(k.to_string(), v.to_string());
        }
        Service {
            metadata: kube::core::ObjectMeta {
                name: Some("svc".to_string()),
                namespace: Some("ns".to_string()),
                annotations: Some(map),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn no_annotation_means_no_policy() {
        let svc = service_with_annotations(&[]);
        assert!(retry_policy_from_service(&svc).is_none());
    }

    #[test]
    fn retry_status_alone_is_enough() {
        let svc = service_with_annotations(&[(ANNOTATION_RETRYABLE_STATUS_CODE, "5xx")]);
        let policy = retry_policy_from_service(&svc).unwrap();
        assert_eq!(policy.retry_on, "5xx");
        assert_eq!(policy.num_retries, None);
        assert!(policy.retry_back_off.is_none());
    }

    #[test]
    fn full_annotation_set_populates_backoff() {
        let svc = service_with_annotations(&[
            (ANNOTATION_RETRYABLE_STATUS_CODE, "5xx"),
            (ANNOTATION_NUM_RETRIES, "3"),
            (ANNOTATION_RETRY_BACKOFF, "1s,10s"),
        ]);
        let policy = retry_policy_from_service(&svc).unwrap();
        assert_eq!(policy.num_retries, Some(3));
        let backoff = policy.retry_back_off.unwrap();
        assert_eq!(backoff.base_interval.unwrap().seconds, 1);
        assert_eq!(backoff.max_interval.unwrap().seconds, 10);
    }

    #[test]
    fn unparseable_num_retries_is_dropped_not_fatal() {
        let svc = service_with_annotations(&[
            (ANNOTATION_RETRYABLE_STATUS_CODE, "5xx"),
            (ANNOTATION_NUM_RETRIES, "not-a-number"),
        ]);
        let policy = retry_policy_from_service(&svc).unwrap();
        assert_eq!(policy.num_retries, None);
    }
}
