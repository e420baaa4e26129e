/// Management annotation key. Its presence on a namespaced secret means
/// "owned by this controller".
pub const MANAGED_BY_ANNOTATION: &str = "clustersecret.io/managed-by";

/// Helm-release secret name prefix filtered out as noise.
pub const HELM_RELEASE_PREFIX: &str = "sh.helm.release.v1.";

/// GitLab runner secret name pattern filtered out as noise.
pub const RUNNER_SECRET_PATTERN: &str = r"^runner-.*-project-.*-concurrent-.*$";
