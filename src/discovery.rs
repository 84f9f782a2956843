//! Static discovery documents
//!
//! `kubectl` asks for the API group list before issuing any resource call.
//! The groups served by Cloud Run never change at runtime, so the answers are
//! compiled in.

/// Response to `GET /api`
pub const CORE_API: &str = "{}";

/// Response to `GET /apis`, the groups exposed by the Cloud Run API
pub const API_GROUP_LIST: &str = r#"{
  "kind": "APIGroupList",
  "apiVersion": "v1",
  "groups": [
    {
      "name": "autoscaling.internal.knative.dev",
      "versions": [
        {
          "groupVersion": "autoscaling.internal.knative.dev/v1alpha1",
          "version": "v1alpha1"
        }
      ],
      "preferredVersion": {
        "groupVersion": "autoscaling.internal.knative.dev/v1alpha1",
        "version": "v1alpha1"
      }
    },
    {
      "name": "caching.internal.knative.dev",
      "versions": [
        {
          "groupVersion": "caching.internal.knative.dev/v1alpha1",
          "version": "v1alpha1"
        }
      ],
      "preferredVersion": {
        "groupVersion": "caching.internal.knative.dev/v1alpha1",
        "version": "v1alpha1"
      }
    },
    {
      "name": "domains.cloudrun.com",
      "versions": [
        {
          "groupVersion": "domains.cloudrun.com/v1alpha1",
          "version": "v1alpha1"
        }
      ],
      "preferredVersion": {
        "groupVersion": "domains.cloudrun.com/v1alpha1",
        "version": "v1alpha1"
      }
    },
    {
      "name": "networking.internal.knative.dev",
      "versions": [
        {
          "groupVersion": "networking.internal.knative.dev/v1alpha1",
          "version": "v1alpha1"
        }
      ],
      "preferredVersion": {
        "groupVersion": "networking.internal.knative.dev/v1alpha1",
        "version": "v1alpha1"
      }
    },
    {
      "name": "serving.knative.dev",
      "versions": [
        {
          "groupVersion": "serving.knative.dev/v1alpha1",
          "version": "v1alpha1"
        }
      ],
      "preferredVersion": {
        "groupVersion": "serving.knative.dev/v1alpha1",
        "version": "v1alpha1"
      }
    }
  ]
}"#;
