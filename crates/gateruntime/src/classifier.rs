//! Ordered rule matching over a failure report.

use gatecore::config::DiagnosisConfig;
use gatecore::{ErrorClass, FailureReport};
use regex::Regex;
use std::sync::LazyLock;

static AUTH_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:status(?: code)?|http(?:/[\d.]+)?|response code)[\s:=]*40[13]\b|unauthori[sz]ed|forbidden|invalid api key|authentication failed|access denied",
    )
    .expect("auth signature compiles")
});

static CREDENTIAL_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)credentials? (?:not found|not set|missing|could not be found)|no credentials|does not have any credentials|credential (?:is )?not (?:set|selected)",
    )
    .expect("credential signature compiles")
});

static RATE_LIMIT_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|too many requests|rate.?limit|throttl|quota exceeded|resource.?exhausted")
        .expect("rate limit signature compiles")
});

static TIMEOUT_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)timed? ?out|timeout|ETIMEDOUT|ESOCKETTIMEDOUT|ECONNABORTED|deadline exceeded")
        .expect("timeout signature compiles")
});

/// Pure classifier: same report in, same class out.
#[derive(Debug, Clone)]
pub struct Classifier {
    slow_node_ms: u64,
}

impl Classifier {
    pub fn new(config: &DiagnosisConfig) -> Self {
        Self {
            slow_node_ms: config.slow_node_ms,
        }
    }

    /// First matching class in taxonomy order; `Unknown` always matches.
    pub fn classify(&self, report: &FailureReport) -> ErrorClass {
        let text = report.searchable_text();
        ErrorClass::ORDERED
            .into_iter()
            .find(|class| self.matches(*class, report, &text))
            .unwrap_or(ErrorClass::Unknown)
    }

    fn matches(&self, class: ErrorClass, report: &FailureReport, text: &str) -> bool {
        let signals = &report.signals;
        match class {
            ErrorClass::AuthError => {
                matches!(signals.http_status, Some(401) | Some(403)) || AUTH_SIGNATURE.is_match(text)
            }
            ErrorClass::CredentialMissing => {
                !signals.unbound_credentials.is_empty() || CREDENTIAL_SIGNATURE.is_match(text)
            }
            ErrorClass::TypeMismatch => signals.malformed_input,
            ErrorClass::RateLimited => {
                signals.http_status == Some(429) || RATE_LIMIT_SIGNATURE.is_match(text)
            }
            ErrorClass::Timeout => {
                TIMEOUT_SIGNATURE.is_match(text)
                    || signals.elapsed_ms.is_some_and(|elapsed| elapsed > self.slow_node_ms)
            }
            ErrorClass::Unknown => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecore::FailureSignals;

    fn report(message: &str) -> FailureReport {
        FailureReport {
            execution_id: "1".into(),
            workflow_id: Some("wf".into()),
            failing_node_id: "HTTP Request".into(),
            symptom_node_id: "HTTP Request".into(),
            error_class: ErrorClass::Unknown,
            error_message: message.into(),
            context_snippet: None,
            upstream_chain: vec![],
            signals: FailureSignals::default(),
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(&DiagnosisConfig { slow_node_ms: 60_000 })
    }

    #[test]
    fn test_message_signatures() {
        let c = classifier();
        assert_eq!(c.classify(&report("Request failed with status code 401")), ErrorClass::AuthError);
        assert_eq!(c.classify(&report("Forbidden - perhaps check your credentials?")), ErrorClass::AuthError);
        assert_eq!(c.classify(&report("Credentials not found")), ErrorClass::CredentialMissing);
        assert_eq!(
            c.classify(&report("The service is receiving too many requests from you")),
            ErrorClass::RateLimited
        );
        assert_eq!(c.classify(&report("Rate limit exceeded, slow down")), ErrorClass::RateLimited);
        assert_eq!(c.classify(&report("connect ETIMEDOUT 10.0.0.4:443")), ErrorClass::Timeout);
        assert_eq!(c.classify(&report("Something odd happened")), ErrorClass::Unknown);
        assert_eq!(c.classify(&report("")), ErrorClass::Unknown);
    }

    #[test]
    fn test_auth_codes_need_status_wording() {
        let c = classifier();
        assert_eq!(c.classify(&report("invoice 401 not found in ledger")), ErrorClass::Unknown);
        assert_eq!(c.classify(&report("row 403 has an empty email")), ErrorClass::Unknown);
        assert_eq!(c.classify(&report("HTTP 403 returned by upstream")), ErrorClass::AuthError);
        assert_eq!(c.classify(&report("HTTP/1.1 401")), ErrorClass::AuthError);
        assert_eq!(c.classify(&report("response status: 401")), ErrorClass::AuthError);
    }

    #[test]
    fn test_order_is_first_match_wins() {
        let c = classifier();
        // 403 and a timeout marker: auth comes first
        assert_eq!(c.classify(&report("403 Forbidden after request timed out")), ErrorClass::AuthError);

        let mut throttled_malformed = report("429 Too Many Requests");
        throttled_malformed.signals.malformed_input = true;
        assert_eq!(c.classify(&throttled_malformed), ErrorClass::TypeMismatch);

        let mut unbound = report("Too many requests");
        unbound.signals.unbound_credentials = vec!["slackApi".into()];
        assert_eq!(c.classify(&unbound), ErrorClass::CredentialMissing);
    }

    #[test]
    fn test_http_status_and_elapsed_signals() {
        let c = classifier();
        let mut limited = report("upstream said no");
        limited.signals.http_status = Some(429);
        assert_eq!(c.classify(&limited), ErrorClass::RateLimited);

        let mut slow = report("socket hang up");
        slow.signals.elapsed_ms = Some(90_000);
        assert_eq!(c.classify(&slow), ErrorClass::Timeout);

        slow.signals.elapsed_ms = Some(60_000);
        assert_eq!(c.classify(&slow), ErrorClass::Unknown);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let r = report("Request failed with status code 429");
        let first = c.classify(&r);
        for _ in 0..10 {
            assert_eq!(c.classify(&r), first);
        }
    }
}
