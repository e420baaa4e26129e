use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::consts::{HELM_RELEASE_PREFIX, RUNNER_SECRET_PATTERN};

fn runner_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(RUNNER_SECRET_PATTERN).expect("static pattern is valid"))
}

/// Returns true if the secret is considered noise and must be dropped before
/// any per-event work runs: Helm release secrets, anything labeled
/// `owner=helm`, or GitLab Runner's per-job concurrent secrets.
pub fn is_noise_secret(name: &str, labels: &BTreeMap<String, String>) -> bool {
    if name.starts_with(HELM_RELEASE_PREFIX) {
        return true;
    }
    if labels.get("owner").map(String::as_str) == Some("helm") {
        return true;
    }
    runner_pattern().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn helm_release_secret_is_noise() {
        assert!(is_noise_secret("sh.helm.release.v1.myapp.v3", &labels(&[])));
    }

    #[test]
    fn helm_owner_label_is_noise() {
        assert!(is_noise_secret("whatever", &labels(&[("owner", "helm")])));
    }

    #[test]
    fn gitlab_runner_secret_is_noise() {
        assert!(is_noise_secret(
            "runner-abc123-project-42-concurrent-0",
            &labels(&[])
        ));
    }

    #[test]
    fn ordinary_secret_is_not_noise() {
        assert!(!is_noise_secret("mysecret", &labels(&[])));
        assert!(!is_noise_secret("runner-but-not-quite", &labels(&[])));
    }
}
