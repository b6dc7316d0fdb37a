//! Verification-time selection.

use crate::domain::verification::TimeSource;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct ResolvedTime {
    pub time: OffsetDateTime,
    pub source: TimeSource,
    pub warnings: Vec<String>,
}

/// Pick the time certificate validity and revocation comparisons run at.
///
/// Priority: trusted embedded timestamp genTime, then the signer-claimed
/// signing-time when the caller opted into trusting it, then the current
/// wall clock. The two fallbacks always carry a warning.
pub fn resolve_time(
    trusted_timestamp: Option<OffsetDateTime>,
    signer_claimed: Option<OffsetDateTime>,
    trust_signature_time: bool,
) -> ResolvedTime {
    if let Some(gen_time) = trusted_timestamp {
        return ResolvedTime {
            time: gen_time,
            source: TimeSource::EmbeddedTimestamp,
            warnings: Vec::new(),
        };
    }

    if trust_signature_time {
        if let Some(claimed) = signer_claimed {
            return ResolvedTime {
                time: claimed,
                source: TimeSource::SignatureTime,
                warnings: vec![
                    "verification time is the signatory-provided signing-time and is not \
                     independently trustworthy"
                        .to_string(),
                ],
            };
        }
    }

    ResolvedTime {
        time: OffsetDateTime::now_utc(),
        source: TimeSource::CurrentTime,
        warnings: vec![
            "no trusted timestamp available; certificate validity is checked at the current time"
                .to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn embedded_timestamp_wins_regardless_of_trust_signature_time() {
        let gen_time = datetime!(2025-03-01 08:00:00 UTC);
        let claimed = datetime!(2025-03-02 08:00:00 UTC);
        for trust_signature_time in [false, true] {
            let resolved = resolve_time(Some(gen_time), Some(claimed), trust_signature_time);
            assert_eq!(resolved.source, TimeSource::EmbeddedTimestamp);
            assert_eq!(resolved.time, gen_time);
            assert!(resolved.warnings.is_empty());
        }
    }

    #[test]
    fn signer_time_needs_opt_in_and_warns() {
        let claimed = datetime!(2025-03-02 08:00:00 UTC);

        let resolved = resolve_time(None, Some(claimed), true);
        assert_eq!(resolved.source, TimeSource::SignatureTime);
        assert_eq!(resolved.time, claimed);
        assert!(!resolved.warnings.is_empty());

        let resolved = resolve_time(None, Some(claimed), false);
        assert_eq!(resolved.source, TimeSource::CurrentTime);
    }

    #[test]
    fn current_time_fallback_warns() {
        let before = OffsetDateTime::now_utc();
        let resolved = resolve_time(None, None, true);
        assert_eq!(resolved.source, TimeSource::CurrentTime);
        assert!(resolved.time >= before);
        assert!(!resolved.warnings.is_empty());
    }
}
